//! Interfaces the driver needs from the SDIO host peripheral and its DMA channel
//!
//! The protocol engine is written entirely against these traits. Implement
//! them once per target; the register layout of the flags follows the common
//! SDIO host cell found on STM32 parts.

use bitflags::bitflags;

bitflags! {
    /// Peripheral status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Response received, CRC check failed
        const CCRCFAIL = 1 << 0;
        /// Data block sent/received, CRC check failed
        const DCRCFAIL = 1 << 1;
        /// Command response timeout
        const CTIMEOUT = 1 << 2;
        /// Data timeout
        const DTIMEOUT = 1 << 3;
        /// Transmit FIFO underrun
        const TXUNDERR = 1 << 4;
        /// Receive FIFO overrun
        const RXOVERR = 1 << 5;
        /// Response received, CRC check passed
        const CMDREND = 1 << 6;
        /// Command sent, no response required
        const CMDSENT = 1 << 7;
        /// Data end, data counter reached zero
        const DATAEND = 1 << 8;
        /// Start bit not detected on all data signals
        const STBITERR = 1 << 9;
        /// Data block sent/received, CRC check passed
        const DBCKEND = 1 << 10;
        /// Command transfer in progress
        const CMDACT = 1 << 11;

        /// Flags that stay set until cleared
        const STATIC = 0x5FF;
        /// Flags that end a wait for a command response
        const RESPONSE_DONE = Self::CCRCFAIL.bits() | Self::CMDREND.bits() | Self::CTIMEOUT.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
}

/// How much response the peripheral should wait for after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLength {
    None,
    /// 48 bit response
    Short,
    /// 136 bit response
    Long,
}

/// Response register to read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSlot {
    Resp1,
    Resp2,
    Resp3,
    Resp4,
}

impl ResponseSlot {
    pub const ALL: [ResponseSlot; 4] = [Self::Resp1, Self::Resp2, Self::Resp3, Self::Resp4];
}

/// Direction of a data transfer, seen from the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    ToCard,
    ToHost,
}

/// Data path configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataConfig {
    /// Data timeout, in bus clock periods
    pub timeout: u32,
    /// Total length of the transfer in bytes
    pub length: u32,
    /// log2 of the block size
    pub block_size_exp: u8,
    pub direction: TransferDirection,
    /// Enables the data path state machine
    pub enable: bool,
}

impl DataConfig {
    /// The idle configuration, used to abort anything left over
    pub const fn disabled() -> Self {
        Self {
            timeout: 0,
            length: 0,
            block_size_exp: 0,
            direction: TransferDirection::ToCard,
            enable: false,
        }
    }
}

/// The SDIO host peripheral
pub trait SdioPeripheral {
    /// Enable the peripheral's clock domain. Called once when the driver is created.
    fn enable_bus_clock(&mut self);
    /// Return every register to its reset value
    fn reset(&mut self);
    fn set_power(&mut self, state: PowerState);
    fn set_clock_divider(&mut self, divider: u8);
    fn set_bus_width(&mut self, width: BusWidth);
    fn enable_clock(&mut self, enable: bool);
    /// Dispatch a command. Returns once the command path is idle again.
    fn send_command(&mut self, index: u8, argument: u32, response: ResponseLength, enable: bool);
    fn read_status_flags(&self) -> StatusFlags;
    fn clear_flags(&mut self, mask: StatusFlags);
    fn read_response(&self, slot: ResponseSlot) -> u32;
    /// Index of the command the last response belongs to
    fn command_echo(&self) -> u8;
    fn configure_data(&mut self, config: DataConfig);
    /// Let the data path raise DMA requests
    fn enable_dma(&mut self, enable: bool);
    /// Bus address of the data FIFO
    fn fifo_address(&self) -> u32;
    /// Polled on every iteration of every wait. Returning true aborts the wait
    /// with that wait's timeout error.
    fn cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    PeripheralToMemory,
    MemoryToPeripheral,
}

/// A word-sized transfer between the SDIO FIFO and memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    pub direction: DmaDirection,
    pub peripheral_address: u32,
    pub memory_address: usize,
    /// Number of 32 bit words
    pub word_count: u32,
    pub circular: bool,
}

/// The DMA channel wired to the SDIO peripheral
pub trait DmaChannel {
    /// Enable the DMA controller's clock domain. Called once when the driver is created.
    fn enable_bus_clock(&mut self);
    fn configure(&mut self, transfer: DmaTransfer);
    fn enable(&mut self, enable: bool);
    fn transfer_complete(&self) -> bool;
    fn clear_transfer_complete(&mut self);
}
