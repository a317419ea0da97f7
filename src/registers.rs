//! Views over the registers and status words the card sends back

use crate::errors::SdioError;

/// Card status bits that report an error condition
pub const CARD_STATUS_ERROR_BITS: u32 = 0xFDFF_E008;

/// Set when the card is locked by a password
pub const CARD_STATUS_LOCKED: u32 = 1 << 25;

/// Set when the card will accept a data transfer
pub const CARD_STATUS_READY_FOR_DATA: u32 = 1 << 8;

/// Card status error bits, in the order they are reported. When more than one
/// bit is set the first entry wins.
pub const CARD_STATUS_ERRORS: [(u32, SdioError); 19] = [
    (1 << 31, SdioError::AddressOutOfRange {}),
    (1 << 30, SdioError::AddressMisaligned {}),
    (1 << 29, SdioError::BlockLenError {}),
    (1 << 28, SdioError::EraseSeqError {}),
    (1 << 27, SdioError::BadEraseParam {}),
    (1 << 26, SdioError::WpViolation {}),
    (1 << 24, SdioError::LockUnlockFailed {}),
    (1 << 23, SdioError::CmdCrcFail {}),
    (1 << 22, SdioError::IllegalCommand {}),
    (1 << 21, SdioError::CardEccFailed {}),
    (1 << 20, SdioError::ControllerInternalError {}),
    (1 << 19, SdioError::GeneralUnknownError {}),
    (1 << 18, SdioError::StreamReadUnderrun {}),
    (1 << 17, SdioError::StreamWriteOverrun {}),
    (1 << 16, SdioError::ConfigOverwrite {}),
    (1 << 15, SdioError::WpEraseSkip {}),
    (1 << 14, SdioError::CardEccDisabled {}),
    (1 << 13, SdioError::EraseReset {}),
    (1 << 3, SdioError::AuthSequenceError {}),
];

/// The narrower error layout carried by an R6 (published RCA) response
pub const R6_STATUS_ERRORS: [(u32, SdioError); 3] = [
    (0x2000, SdioError::GeneralUnknownError {}),
    (0x4000, SdioError::IllegalCommand {}),
    (0x8000, SdioError::CmdCrcFail {}),
];

fn first_error(word: u32, table: &[(u32, SdioError)]) -> Result<(), SdioError> {
    match table.iter().find(|(mask, _)| word & mask != 0) {
        Some((_, error)) => Err(*error),
        None => Ok(()),
    }
}

/// Card status, as returned in an R1 response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardStatus {
    pub card_status: u32,
}

impl CardStatus {
    pub const fn new(card_status: u32) -> Self {
        Self { card_status }
    }

    /// Gets the current state of the card
    pub fn current_state(&self) -> CurrentState {
        CurrentState::from_int(((self.card_status >> 9) & 0xF) as u8)
    }

    /// Returns the first error reported by the card, if any
    pub fn error(&self) -> Result<(), SdioError> {
        if self.card_status & CARD_STATUS_ERROR_BITS == 0 {
            return Ok(());
        }

        first_error(self.card_status, &CARD_STATUS_ERRORS)
    }

    #[inline]
    /// Returns true if the CARD_IS_LOCKED bit is set
    pub fn card_is_locked(&self) -> bool {
        self.card_status & CARD_STATUS_LOCKED != 0
    }

    #[inline]
    /// Returns true if the READY_FOR_DATA bit is set
    pub fn ready_for_data(&self) -> bool {
        self.card_status & CARD_STATUS_READY_FOR_DATA != 0
    }

    #[inline]
    /// Returns true if the APP_CMD bit is set
    pub fn app_cmd(&self) -> bool {
        self.card_status & (1 << 5) != 0
    }
}

/// Splits an R6 response into the published RCA, or the first error it reports
pub fn published_rca(response: u32) -> Result<u16, SdioError> {
    first_error(response, &R6_STATUS_ERRORS)?;

    Ok((response >> 16) as u16)
}

/// The card state machine state, as reported in the card status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentState {
    Idle,
    Ready,
    Ident,
    Stby,
    Tran,
    Data,
    Rcv,
    Prg,
    Dis,
    Reserved,
}

impl CurrentState {
    /// Grabs the sd state from a nibble
    pub fn from_int(nibble: u8) -> Self {
        match nibble {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Ident,
            3 => Self::Stby,
            4 => Self::Tran,
            5 => Self::Data,
            6 => Self::Rcv,
            7 => Self::Prg,
            8 => Self::Dis,
            _ => Self::Reserved,
        }
    }

    /// Returns true while the card is still taking in or committing data
    pub fn is_busy_writing(&self) -> bool {
        matches!(self, Self::Prg | Self::Rcv)
    }
}

/// Operation conditions register, as returned by ACMD41
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdOcr {
    pub ocr: u32,
}

impl SdOcr {
    /// Returns the voltage window
    pub fn voltage_window(&self) -> u32 {
        self.ocr & 0xFF_FFFF
    }
    /// Returns true if the card is still powering up
    pub fn is_busy(&self) -> bool {
        (self.ocr & (1 << 31)) == 0
    }
    /// Returns true if the CCS bit is set
    pub fn ccs(&self) -> bool {
        (self.ocr & (1 << 30)) > 0
    }
}

/// Card identification register
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SdCid {
    cid: [u32; 4],
}

impl SdCid {
    pub fn new(cid: [u32; 4]) -> Self {
        Self { cid }
    }

    pub fn words(&self) -> [u32; 4] {
        self.cid
    }

    /// Manufacturer ID, bits 127-120
    pub fn manufacturer_id(&self) -> u8 {
        (self.cid[0] >> 24) as u8
    }

    /// OEM/application ID, bits 119-104
    pub fn oem_id(&self) -> u16 {
        (self.cid[0] >> 8) as u16
    }

    /// Product name, five ASCII characters in bits 103-64
    pub fn product_name(&self) -> [u8; 5] {
        [
            self.cid[0] as u8,
            (self.cid[1] >> 24) as u8,
            (self.cid[1] >> 16) as u8,
            (self.cid[1] >> 8) as u8,
            self.cid[1] as u8,
        ]
    }
}

/// Card specific data register
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SdCsd {
    csd: [u32; 4],
}

impl SdCsd {
    pub fn new(csd: [u32; 4]) -> Self {
        Self { csd }
    }

    pub fn words(&self) -> [u32; 4] {
        self.csd
    }

    /// CSD_STRUCTURE, the top two bits of the register
    pub fn version(&self) -> u8 {
        (self.csd[0] >> 30) as u8
    }

    /// Card capacity in kilobytes, or None if the layout is not understood
    pub fn capacity_kb(&self) -> Option<u32> {
        match self.version() {
            0 => {
                // C_SIZE straddles words 1 and 2
                let c_size = ((self.csd[1] << 2) | (self.csd[2] >> 30)) & 0xFFF;
                let c_size_mult = (self.csd[2] >> 15) & 0x7;
                let read_bl_len = (self.csd[1] >> 16) & 0xF;

                let bytes = ((c_size as u64) + 1) << (c_size_mult + 2 + read_bl_len);

                Some((bytes >> 10) as u32)
            }
            1 => {
                let c_size = ((self.csd[1] << 16) | (self.csd[2] >> 16)) & 0x3F_FFFF;

                Some(c_size * 512)
            }
            _ => None,
        }
    }
}
