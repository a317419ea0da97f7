//! The SD command set used by the driver

use crate::config::SD_VOLTAGE_WINDOW;
use crate::peripheral::ResponseLength;
use crate::registers::{CardStatus, SdOcr};

/// High capacity support bit of the ACMD41 argument
const ACMD41_HCS: u32 = 1 << 30;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// Commands the driver sends to the card
pub enum SdCmd {
    /// CMD0: GO_IDLE_STATE, no response
    GoIdleState,
    /// CMD2: ALL_SEND_CID, requests all SD cards send their CIDs. R2.
    AllSendCid,
    /// CMD3: SEND_RELATIVE_ADDR, asks the card to publish a new RCA. R6.
    SendRelativeAddr,
    /// CMD7: SELECT_DESELECT_CARD, selects the card if the RCA is that of
    /// the card, deselects it otherwise. Supply the RCA. R1b.
    SelectDeselectCard(u16),
    /// CMD8: SEND_IF_COND, supply the check pattern to be echoed. R7.
    SendIfCond(u8),
    /// CMD9: SEND_CSD, supply the RCA of the card. R2.
    SendCsd(u16),
    /// CMD12: STOP_TRANSMISSION, R1b.
    StopTransmission,
    /// CMD13: SEND_STATUS, supply the RCA of the card. R1.
    SendStatus(u16),
    /// CMD16: SET_BLOCKLEN, supply the block length in bytes. R1.
    SetBlockLen(u32),
    /// CMD17: READ_SINGLE_BLOCK, supply the data address. R1.
    ReadSingleBlock(u32),
    /// CMD18: READ_MULTIPLE_BLOCK, supply the data address. R1.
    ReadMultipleBlock(u32),
    /// CMD24: WRITE_BLOCK, supply the data address. R1.
    WriteBlock(u32),
    /// CMD25: WRITE_MULTIPLE_BLOCK, supply the data address. R1.
    WriteMultipleBlock(u32),
    /// CMD55: APP_CMD, R1. Sent automatically before any ACMD.
    AppCmd(u16),
    /// ACMD6: SET_BUS_WIDTH, 4-bit if the supplied boolean is true. R1.
    SetBusWidth(bool),
    /// ACMD23: SET_WR_BLK_ERASE_COUNT, supply the number of blocks about to be written. R1.
    SetWrBlkEraseCount(u32),
    /// ACMD41: SD_APP_OP_COND, supply whether high capacity is supported. R3.
    SdAppOpCond { hcs: bool },
}

/// Response types for SD commands
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SdCmdResponseType {
    /// No response
    R0,
    /// Normal response
    R1,
    /// CID/CSD register
    R2,
    /// OCR register
    R3,
    /// Published RCA response
    R6,
    /// Card interface condition
    R7,
}

impl SdCmdResponseType {
    pub fn length(&self) -> ResponseLength {
        match self {
            Self::R0 => ResponseLength::None,
            Self::R2 => ResponseLength::Long,
            Self::R1 | Self::R3 | Self::R6 | Self::R7 => ResponseLength::Short,
        }
    }
}

impl SdCmd {
    /// Get the index of a command
    pub fn index(&self) -> u8 {
        match self {
            Self::GoIdleState => 0,
            Self::AllSendCid => 2,
            Self::SendRelativeAddr => 3,
            Self::SelectDeselectCard(_) => 7,
            Self::SendIfCond(_) => 8,
            Self::SendCsd(_) => 9,
            Self::StopTransmission => 12,
            Self::SendStatus(_) => 13,
            Self::SetBlockLen(_) => 16,
            Self::ReadSingleBlock(_) => 17,
            Self::ReadMultipleBlock(_) => 18,
            Self::WriteBlock(_) => 24,
            Self::WriteMultipleBlock(_) => 25,
            Self::AppCmd(_) => 55,
            Self::SetBusWidth(_) => 6,
            Self::SetWrBlkEraseCount(_) => 23,
            Self::SdAppOpCond { .. } => 41,
        }
    }

    /// Get the 32 bit argument of a command
    pub fn argument(&self) -> u32 {
        match self {
            Self::GoIdleState
            | Self::AllSendCid
            | Self::SendRelativeAddr
            | Self::StopTransmission => 0,
            // The RCA goes in the upper half, the lower half is stuff bits
            Self::SelectDeselectCard(rca)
            | Self::SendCsd(rca)
            | Self::SendStatus(rca)
            | Self::AppCmd(rca) => (*rca as u32) << 16,
            // Bits 11-8 are the supply voltage, 2.7-3.6v
            Self::SendIfCond(check_pattern) => (0b0001 << 8) | *check_pattern as u32,
            Self::SetBlockLen(unsigned32)
            | Self::ReadSingleBlock(unsigned32)
            | Self::ReadMultipleBlock(unsigned32)
            | Self::WriteBlock(unsigned32)
            | Self::WriteMultipleBlock(unsigned32)
            | Self::SetWrBlkEraseCount(unsigned32) => *unsigned32,
            Self::SetBusWidth(fourbit) => match fourbit {
                true => 0b10,
                false => 0,
            },
            Self::SdAppOpCond { hcs } => match hcs {
                true => SD_VOLTAGE_WINDOW | ACMD41_HCS,
                false => SD_VOLTAGE_WINDOW,
            },
        }
    }

    /// Get the response type of a command
    pub fn response_type(&self) -> SdCmdResponseType {
        match self {
            Self::GoIdleState => SdCmdResponseType::R0,
            Self::AllSendCid | Self::SendCsd(_) => SdCmdResponseType::R2,
            Self::SendRelativeAddr => SdCmdResponseType::R6,
            Self::SendIfCond(_) => SdCmdResponseType::R7,
            Self::SdAppOpCond { .. } => SdCmdResponseType::R3,
            _ => SdCmdResponseType::R1,
        }
    }

    #[inline]
    /// Returns true if a command is an app command
    pub fn is_acmd(&self) -> bool {
        matches!(
            self,
            Self::SetBusWidth(_) | Self::SetWrBlkEraseCount(_) | Self::SdAppOpCond { .. }
        )
    }
}

/// Validated response to a command
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SdCmdResponse {
    /// R0, returns nothing
    R0,
    /// R1, returns the card status
    R1(CardStatus),
    /// R2, returns cid or csd
    R2([u32; 4]),
    /// R3, returns OCR register
    R3(SdOcr),
    /// R6, returns RCA
    R6(u16),
    /// R7, returns the echoed voltage and check pattern
    R7(u32),
}
