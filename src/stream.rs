//! Byte-granular access to the card through the embedded-io traits

use embedded_io::blocking::{Read, Seek, Write};
use embedded_io::{Io, SeekFrom};

use crate::config::SD_BLOCK_LEN;
use crate::errors::SdioError;
use crate::peripheral::{DmaChannel, SdioPeripheral};
use crate::sdio::{InitState, SdioHost};

/// Divider for words
const SD_WORD_DIV: usize = 4;

/// Reads and writes at arbitrary byte positions by staging one block at a time.
///
/// Writes are collected in the working block and reach the card when the
/// position moves to another block, on [`flush`](Write::flush), or on
/// [`close`](Self::close). Dropping the stream discards unflushed data.
pub struct SdStream<'a, P, D> {
    host: &'a mut SdioHost<P, D>,
    working_block: [u32; SD_BLOCK_LEN / SD_WORD_DIV],
    /// Block held in `working_block`, if any
    working_block_num: Option<u64>,
    dirty: bool,
    position: u64,
}

impl<'a, P: SdioPeripheral, D: DmaChannel> SdStream<'a, P, D> {
    pub fn new(host: &'a mut SdioHost<P, D>) -> Self {
        Self {
            host,
            working_block: [0; SD_BLOCK_LEN / SD_WORD_DIV],
            working_block_num: None,
            dirty: false,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Card size in bytes
    pub fn capacity(&self) -> u64 {
        self.host.card().capacity_kb() as u64 * 1024
    }

    /// Flush and release the host
    pub fn close(mut self) -> Result<(), SdioError> {
        self.flush()
    }

    /// Make the block holding `self.position` the working block. Returns the
    /// offset of the position inside it.
    fn load(&mut self) -> Result<usize, SdioError> {
        if self.host.state() != InitState::Ready {
            return Err(SdioError::RequestNotApplicable {});
        }

        let block_num = self.position / SD_BLOCK_LEN as u64;

        if self.working_block_num != Some(block_num) {
            self.flush()?;

            // Forget the old block first so a failed read is never mistaken for it
            self.working_block_num = None;
            self.host.read_block(
                block_num * SD_BLOCK_LEN as u64,
                bytemuck::cast_slice_mut(&mut self.working_block),
                SD_BLOCK_LEN,
            )?;
            self.working_block_num = Some(block_num);
        }

        Ok((self.position % SD_BLOCK_LEN as u64) as usize)
    }

    /// Bytes left before the end of the card, or None if the size is unknown
    fn remaining(&self) -> Option<u64> {
        match self.capacity() {
            0 => None,
            capacity => Some(capacity.saturating_sub(self.position)),
        }
    }
}

impl<P, D> Io for SdStream<'_, P, D> {
    type Error = SdioError;
}

impl<P: SdioPeripheral, D: DmaChannel> Read for SdStream<'_, P, D> {
    /// Read up to the end of the current block. Returns 0 at the end of the card.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, SdioError> {
        let mut length = buffer.len();

        if let Some(remaining) = self.remaining() {
            length = length.min(remaining.min(usize::MAX as u64) as usize);
        }

        if length == 0 {
            return Ok(0);
        }

        let offset = self.load()?;
        let length = length.min(SD_BLOCK_LEN - offset);
        let working_block: &[u8] = bytemuck::cast_slice(&self.working_block);

        buffer[..length].copy_from_slice(&working_block[offset..offset + length]);
        self.position += length as u64;

        Ok(length)
    }
}

impl<P: SdioPeripheral, D: DmaChannel> Write for SdStream<'_, P, D> {
    /// Write up to the end of the current block
    fn write(&mut self, buffer: &[u8]) -> Result<usize, SdioError> {
        if buffer.is_empty() {
            return Ok(0);
        }

        if self.remaining() == Some(0) {
            return Err(SdioError::AddressOutOfRange {});
        }

        let mut length = buffer.len();
        if let Some(remaining) = self.remaining() {
            length = length.min(remaining.min(usize::MAX as u64) as usize);
        }

        let offset = self.load()?;
        let length = length.min(SD_BLOCK_LEN - offset);
        let working_block: &mut [u8] = bytemuck::cast_slice_mut(&mut self.working_block);

        working_block[offset..offset + length].copy_from_slice(&buffer[..length]);
        self.position += length as u64;
        self.dirty = true;

        Ok(length)
    }

    fn flush(&mut self) -> Result<(), SdioError> {
        let Some(block_num) = self.working_block_num else {
            return Ok(());
        };

        if !self.dirty {
            return Ok(());
        }

        log::trace!("flushing block {}", block_num);

        self.host.write_block(
            block_num * SD_BLOCK_LEN as u64,
            bytemuck::cast_slice(&self.working_block),
            SD_BLOCK_LEN,
        )?;
        self.dirty = false;

        Ok(())
    }
}

impl<P: SdioPeripheral, D: DmaChannel> Seek for SdStream<'_, P, D> {
    fn seek(&mut self, position: SeekFrom) -> Result<u64, SdioError> {
        let position = match position {
            SeekFrom::Start(position) => Some(position),
            SeekFrom::End(delta) => self.capacity().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };

        self.position = position.ok_or(SdioError::InvalidParameter {})?;
        Ok(self.position)
    }
}

impl<P, D> core::fmt::Debug for SdStream<'_, P, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdStream")
            .field("working_block_num", &self.working_block_num)
            .field("dirty", &self.dirty)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
