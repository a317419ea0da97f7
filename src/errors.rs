//! Errors reported by the SDIO driver

use embedded_io::{blocking::ReadExactError, Error, ErrorKind};
use snafu::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum SdioError {
    #[snafu(display("(SDIO) Timeout on SD command!"))]
    CmdResponseTimeout {},
    #[snafu(display("(SDIO) Bad command CRC!"))]
    CmdCrcFail {},
    #[snafu(display("(SDIO) Illegal Command!"))]
    IllegalCommand {},
    #[snafu(display("(CARD) Out of range!"))]
    AddressOutOfRange {},
    #[snafu(display("(CARD) Misaligned address!"))]
    AddressMisaligned {},
    #[snafu(display("(CARD) Block length incorrect!"))]
    BlockLenError {},
    #[snafu(display("(CARD) Erase sequence error!"))]
    EraseSeqError {},
    #[snafu(display("(CARD) Erase parameters error!"))]
    BadEraseParam {},
    #[snafu(display("(CARD) Write protection violation!"))]
    WpViolation {},
    #[snafu(display("(CARD) Failed to lock/unlock card!"))]
    LockUnlockFailed {},
    #[snafu(display("(CARD) Card ECC failed!"))]
    CardEccFailed {},
    #[snafu(display("(CARD) Internal card controller error!"))]
    ControllerInternalError {},
    #[snafu(display("(CARD) Stream read underrun!"))]
    StreamReadUnderrun {},
    #[snafu(display("(CARD) Stream write overrun!"))]
    StreamWriteOverrun {},
    #[snafu(display("(CARD) CID/CSD overwrite error!"))]
    ConfigOverwrite {},
    #[snafu(display("(CARD) Wp erase skip!"))]
    WpEraseSkip {},
    #[snafu(display("(CARD) Card ECC disabled!"))]
    CardEccDisabled {},
    #[snafu(display("(CARD) Erase reset!"))]
    EraseReset {},
    #[snafu(display("(CARD) Authentication sequence error!"))]
    AuthSequenceError {},
    #[snafu(display("(CARD) Unknown card error!"))]
    GeneralUnknownError {},
    #[snafu(display("Invalid parameter!"))]
    InvalidParameter {},
    #[snafu(display("(SDIO) Bad OCR voltage range!"))]
    InvalidVoltageRange {},
    #[snafu(display("Request not applicable in the current state!"))]
    RequestNotApplicable {},
    #[snafu(display("(DATA) Timeout on data transfer!"))]
    DataTimeout {},
    #[snafu(display("(DATA) Bad data CRC!"))]
    DataCrcFail {},
    #[snafu(display("(DATA) Receive FIFO overrun!"))]
    RxOverrun {},
    #[snafu(display("(DATA) Transmit FIFO underrun!"))]
    TxUnderrun {},
    #[snafu(display("(SDIO) Card never became ready!"))]
    GenericError {},
    #[snafu(display("(IO) Unexpected EOF!"))]
    IoUnexpectedEof {},
}

impl Error for SdioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<SdioError> for ReadExactError<SdioError> {
    fn from(e: SdioError) -> ReadExactError<SdioError> {
        Self::Other(e)
    }
}

impl From<ReadExactError<SdioError>> for SdioError {
    fn from(e: ReadExactError<SdioError>) -> SdioError {
        match e {
            ReadExactError::UnexpectedEof => Self::IoUnexpectedEof {},
            ReadExactError::Other(e) => e,
        }
    }
}
