//! Block reads and writes over the DMA data path

use crate::command::SdCmd;
use crate::config::{SD_BLOCK_LEN, SD_MAX_BLOCK_LEN, SD_MAX_DATA_LENGTH};
use crate::errors::SdioError;
use crate::peripheral::{
    DataConfig, DmaChannel, DmaDirection, DmaTransfer, ResponseSlot, SdioPeripheral, StatusFlags,
    TransferDirection,
};
use crate::poll::{poll_until, Retry};
use crate::registers::CARD_STATUS_LOCKED;
use crate::sdio::SdioHost;

/// Divider for words
const SD_WORD_DIV: usize = 4;

/// Validate a block size and get the exponent the data path is programmed with.
/// Sizes must be a power of two between 1 and 2048.
pub fn block_size_exp(block_len: usize) -> Result<u8, SdioError> {
    if block_len == 0 || block_len > SD_MAX_BLOCK_LEN || !block_len.is_power_of_two() {
        return Err(SdioError::InvalidParameter {});
    }

    Ok(block_len.trailing_zeros() as u8)
}

/// Parameters of one transfer, after addressing mode and block size are settled
#[derive(Debug, Clone, Copy)]
struct Transfer {
    /// Command argument, a byte address or a block index
    address: u32,
    block_len: usize,
    block_size_exp: u8,
}

impl Transfer {
    /// Total length of `blocks` blocks, bounded by what one transfer can move
    fn length(&self, blocks: u32) -> Result<usize, SdioError> {
        let length = blocks as u64 * self.block_len as u64;

        if length > SD_MAX_DATA_LENGTH {
            return Err(SdioError::InvalidParameter {});
        }

        Ok(length as usize)
    }
}

/// DMA moves whole words, so the buffer has to be word aligned and hold at
/// least `length` bytes rounded up to a word
fn words(buffer: &[u8], length: usize) -> Result<&[u32], SdioError> {
    let length = length.next_multiple_of(SD_WORD_DIV);
    let buffer = buffer.get(..length).ok_or(SdioError::InvalidParameter {})?;

    bytemuck::try_cast_slice(buffer).map_err(|_| SdioError::InvalidParameter {})
}

/// Flags that end a transfer in `direction` with an error
fn data_error_flags(direction: TransferDirection) -> StatusFlags {
    let overrun = match direction {
        TransferDirection::ToHost => StatusFlags::RXOVERR,
        TransferDirection::ToCard => StatusFlags::TXUNDERR,
    };

    StatusFlags::DTIMEOUT | StatusFlags::DCRCFAIL | overrun
}

fn words_mut(buffer: &mut [u8], length: usize) -> Result<&mut [u32], SdioError> {
    let length = length.next_multiple_of(SD_WORD_DIV);
    let buffer = buffer
        .get_mut(..length)
        .ok_or(SdioError::InvalidParameter {})?;

    bytemuck::try_cast_slice_mut(buffer).map_err(|_| SdioError::InvalidParameter {})
}

impl<P: SdioPeripheral, D: DmaChannel> SdioHost<P, D> {
    /// Read one block into `buffer`. `address` is a byte address; block
    /// addressed cards always transfer 512 bytes regardless of `block_len`.
    pub fn read_block(
        &mut self,
        address: u64,
        buffer: &mut [u8],
        block_len: usize,
    ) -> Result<(), SdioError> {
        self.abort_on_error(|host| {
            let transfer = host.prepare(address, buffer.len(), block_len)?;
            let words = words_mut(buffer, transfer.block_len)?;

            log::debug!("read block {:#x}, {} bytes", transfer.address, transfer.block_len);

            host.configure_data_path(transfer, transfer.block_len, TransferDirection::ToHost);
            host.start_dma(
                DmaDirection::PeripheralToMemory,
                words.as_mut_ptr() as usize,
                transfer.block_len,
            );

            host.cmd_r1(SdCmd::ReadSingleBlock(transfer.address))?;
            host.check_data_errors(TransferDirection::ToHost)?;
            host.wait_data_done(TransferDirection::ToHost)
        })
    }

    /// Read `blocks` consecutive blocks into `buffer`.
    ///
    /// With fewer than two blocks only the card's block length is set and no
    /// data is moved; use [`read_block`](Self::read_block) for a single block.
    pub fn read_blocks(
        &mut self,
        address: u64,
        buffer: &mut [u8],
        block_len: usize,
        blocks: u32,
    ) -> Result<(), SdioError> {
        self.abort_on_error(|host| {
            let transfer = host.prepare(address, buffer.len(), block_len)?;

            host.cmd_r1(SdCmd::SetBlockLen(transfer.block_len as u32))?;

            if blocks < 2 {
                log::debug!("read of {} block(s) only sets the block length", blocks);
                return Ok(());
            }

            let length = transfer.length(blocks)?;
            let words = words_mut(buffer, length)?;

            log::debug!("read {} blocks at {:#x}, {} bytes", blocks, transfer.address, length);

            host.configure_data_path(transfer, length, TransferDirection::ToHost);
            host.cmd_r1(SdCmd::ReadMultipleBlock(transfer.address))?;
            host.start_dma(
                DmaDirection::PeripheralToMemory,
                words.as_mut_ptr() as usize,
                length,
            );

            host.wait_data_done(TransferDirection::ToHost)?;
            host.cmd_r1(SdCmd::StopTransmission)?;

            Ok(())
        })
    }

    /// Write one block from `buffer` and wait for the card to finish programming it
    pub fn write_block(
        &mut self,
        address: u64,
        buffer: &[u8],
        block_len: usize,
    ) -> Result<(), SdioError> {
        self.abort_on_error(|host| {
            let transfer = host.prepare(address, buffer.len(), block_len)?;
            let words = words(buffer, transfer.block_len)?;

            host.cmd_r1(SdCmd::SetBlockLen(transfer.block_len as u32))?;
            host.wait_ready_for_data()?;

            log::debug!("write block {:#x}, {} bytes", transfer.address, transfer.block_len);

            host.cmd_r1(SdCmd::WriteBlock(transfer.address))?;
            host.configure_data_path(transfer, transfer.block_len, TransferDirection::ToCard);
            host.start_dma(
                DmaDirection::MemoryToPeripheral,
                words.as_ptr() as usize,
                transfer.block_len,
            );

            host.check_data_errors(TransferDirection::ToCard)?;
            host.wait_data_done(TransferDirection::ToCard)?;
            host.wait_programming_done()
        })
    }

    /// Write `blocks` consecutive blocks from `buffer`.
    ///
    /// Like [`read_blocks`](Self::read_blocks), fewer than two blocks only set
    /// the block length and wait for the card to be ready.
    pub fn write_blocks(
        &mut self,
        address: u64,
        buffer: &[u8],
        block_len: usize,
        blocks: u32,
    ) -> Result<(), SdioError> {
        self.abort_on_error(|host| {
            let transfer = host.prepare(address, buffer.len(), block_len)?;

            host.cmd_r1(SdCmd::SetBlockLen(transfer.block_len as u32))?;
            host.wait_ready_for_data()?;

            if blocks < 2 {
                log::debug!("write of {} block(s) only sets the block length", blocks);
                return Ok(());
            }

            let length = transfer.length(blocks)?;
            let words = words(buffer, length)?;

            if host.card.variant.takes_erase_hint() {
                host.cmd_r1(SdCmd::SetWrBlkEraseCount(blocks))?;
            }

            log::debug!("write {} blocks at {:#x}, {} bytes", blocks, transfer.address, length);

            host.configure_data_path(transfer, length, TransferDirection::ToCard);
            host.cmd_r1(SdCmd::WriteMultipleBlock(transfer.address))?;
            host.start_dma(
                DmaDirection::MemoryToPeripheral,
                words.as_ptr() as usize,
                length,
            );

            host.wait_data_done(TransferDirection::ToCard)?;
            host.cmd_r1(SdCmd::StopTransmission)?;
            host.wait_programming_done()
        })
    }

    /// Checks shared by every transfer. Leaves the data path and DMA disabled.
    fn prepare(
        &mut self,
        address: u64,
        buffer_len: usize,
        block_len: usize,
    ) -> Result<Transfer, SdioError> {
        self.abort_data();

        if buffer_len == 0 {
            return Err(SdioError::InvalidParameter {});
        }

        if self.sdio.read_response(ResponseSlot::Resp1) & CARD_STATUS_LOCKED != 0 {
            return Err(SdioError::LockUnlockFailed {});
        }

        let (address, block_len) = match self.card.variant.is_high_capacity() {
            true => (address / SD_BLOCK_LEN as u64, SD_BLOCK_LEN),
            false => (address, block_len),
        };

        let address = u32::try_from(address).map_err(|_| SdioError::InvalidParameter {})?;
        let block_size_exp = block_size_exp(block_len)?;

        Ok(Transfer {
            address,
            block_len,
            block_size_exp,
        })
    }

    /// Stop the data path and the DMA channel
    fn abort_data(&mut self) {
        self.sdio.configure_data(DataConfig::disabled());
        self.sdio.enable_dma(false);
        self.dma.enable(false);
    }

    /// Run a transfer, making sure the DMA no longer points at the caller's
    /// buffer when it fails
    fn abort_on_error(
        &mut self,
        transfer: impl FnOnce(&mut Self) -> Result<(), SdioError>,
    ) -> Result<(), SdioError> {
        let result = transfer(self);

        if let Err(e) = result {
            log::debug!("transfer failed: {}", e);
            self.abort_data();
        }

        result
    }

    fn configure_data_path(
        &mut self,
        transfer: Transfer,
        length: usize,
        direction: TransferDirection,
    ) {
        self.sdio.configure_data(DataConfig {
            timeout: self.config.data_timeout,
            length: length as u32,
            block_size_exp: transfer.block_size_exp,
            direction,
            enable: true,
        });
    }

    fn start_dma(&mut self, direction: DmaDirection, memory_address: usize, length: usize) {
        self.dma.enable(false);
        self.dma.configure(DmaTransfer {
            direction,
            peripheral_address: self.sdio.fifo_address(),
            memory_address,
            word_count: (length / SD_WORD_DIV) as u32,
            circular: false,
        });
        self.sdio.enable_dma(true);
        self.dma.enable(true);
    }

    fn check_data_errors(&self, direction: TransferDirection) -> Result<(), SdioError> {
        let status = self.sdio.read_status_flags();

        if status.contains(StatusFlags::DTIMEOUT) {
            return Err(SdioError::DataTimeout {});
        }

        if status.contains(StatusFlags::DCRCFAIL) {
            return Err(SdioError::DataCrcFail {});
        }

        match direction {
            TransferDirection::ToHost if status.contains(StatusFlags::RXOVERR) => {
                Err(SdioError::RxOverrun {})
            }
            TransferDirection::ToCard if status.contains(StatusFlags::TXUNDERR) => {
                Err(SdioError::TxUnderrun {})
            }
            _ => Ok(()),
        }
    }

    /// Wait for the DMA to drain and the data path to reach its end. A data
    /// error flag ends either wait early.
    fn wait_data_done(&mut self, direction: TransferDirection) -> Result<(), SdioError> {
        let errors = data_error_flags(direction);

        let dma = &self.dma;
        poll_until(
            &self.sdio,
            self.config.data_wait,
            SdioError::DataTimeout {},
            |sdio| {
                let failed = sdio.read_status_flags().intersects(errors);
                (failed || dma.transfer_complete()).then_some(())
            },
        )?;
        self.check_data_errors(direction)?;
        self.dma.clear_transfer_complete();

        poll_until(
            &self.sdio,
            self.config.data_wait,
            SdioError::DataTimeout {},
            |sdio| {
                sdio.read_status_flags()
                    .intersects(StatusFlags::DATAEND | errors)
                    .then_some(())
            },
        )?;

        self.check_data_errors(direction)?;
        self.sdio.clear_flags(StatusFlags::DATAEND | StatusFlags::DBCKEND);

        Ok(())
    }

    /// Ask for the card status until it reports READY_FOR_DATA
    fn wait_ready_for_data(&mut self) -> Result<(), SdioError> {
        for _ in 0..self.config.write_ready_attempts {
            if self.cmd_r1(SdCmd::SendStatus(self.card.rca))?.ready_for_data() {
                return Ok(());
            }
        }

        log::warn!("card never became ready for data");
        Err(SdioError::GenericError {})
    }

    /// Ask for the card status until it has left the receive and programming states
    fn wait_programming_done(&mut self) -> Result<(), SdioError> {
        let mut retry = Retry::new(self.config.programming, SdioError::GenericError {});

        loop {
            let status = self.cmd_r1(SdCmd::SendStatus(self.card.rca))?;

            if !status.current_state().is_busy_writing() {
                return Ok(());
            }

            retry.next(&self.sdio)?;
        }
    }
}
