//! Driver tuning: clock dividers and every wait bound

use crate::poll::PollBudget;
use fugit::HertzU32;

/// Block length for SD operations
pub const SD_BLOCK_LEN: usize = 512;

/// Largest block size the data path can be programmed with
pub const SD_MAX_BLOCK_LEN: usize = 2048;

/// Largest length, in bytes, of a single multi-block transfer
pub const SD_MAX_DATA_LENGTH: u64 = 0x01FF_FFFF;

/// Polls allowed for CMD0 to go out, and for the CMD8 response
pub const SD_CMD_ACK_ATTEMPTS: u32 = 10_000;

/// Times ACMD41 is sent before giving up on the card powering up
pub const SD_MAX_VOLT_TRIAL: u32 = 0xFFFF;

/// Status requests made while waiting for the card to accept data
pub const SD_WRITE_READY_ATTEMPTS: u32 = 0xF_FFFF;

/// Data timeout programmed into the peripheral, in bus clock periods
pub const SD_DATA_TIMEOUT: u32 = 0xF_FFFF;

/// Polls allowed for the DMA and the data path to finish
pub const SD_DATA_WAIT_ATTEMPTS: u32 = 0xFF_FFFF;

/// Clock divider for identification, ~400kHz with a 72MHz kernel clock
pub const SD_CLK_DIV_INIT: u8 = 178;

/// Clock divider for transfers, 24MHz with a 72MHz kernel clock
pub const SD_CLK_DIV_TRANSFER: u8 = 1;

/// Check pattern sent with CMD8
pub const SD_CHECK_PATTERN: u8 = 0xAA;

/// Voltage window requested with ACMD41
pub const SD_VOLTAGE_WINDOW: u32 = 0x8010_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Clock of the peripheral, before the divider
    pub kernel_clock: HertzU32,
    pub init_clock_divider: u8,
    pub transfer_clock_divider: u8,
    /// Wait for a command without response to go out
    pub command_ack: PollBudget,
    /// Wait for the CMD8 response
    pub if_cond_response: PollBudget,
    /// Wait for any other command response
    pub response: PollBudget,
    pub voltage_trials: u32,
    pub write_ready_attempts: u32,
    /// Wait for the card to leave the programming state after a write
    pub programming: PollBudget,
    /// Wait for DMA completion and data end
    pub data_wait: PollBudget,
    pub data_timeout: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_clock: HertzU32::MHz(72),
            init_clock_divider: SD_CLK_DIV_INIT,
            transfer_clock_divider: SD_CLK_DIV_TRANSFER,
            command_ack: PollBudget::Attempts(SD_CMD_ACK_ATTEMPTS),
            if_cond_response: PollBudget::Attempts(SD_CMD_ACK_ATTEMPTS),
            // The peripheral raises CTIMEOUT on its own
            response: PollBudget::Unbounded,
            voltage_trials: SD_MAX_VOLT_TRIAL,
            write_ready_attempts: SD_WRITE_READY_ATTEMPTS,
            programming: PollBudget::Attempts(SD_DATA_WAIT_ATTEMPTS),
            data_wait: PollBudget::Attempts(SD_DATA_WAIT_ATTEMPTS),
            data_timeout: SD_DATA_TIMEOUT,
        }
    }
}

impl Config {
    pub fn with_kernel_clock(mut self, kernel_clock: HertzU32) -> Self {
        self.kernel_clock = kernel_clock;
        self
    }

    pub fn with_clock_dividers(mut self, init: u8, transfer: u8) -> Self {
        self.init_clock_divider = init;
        self.transfer_clock_divider = transfer;
        self
    }

    pub fn with_command_ack(mut self, budget: PollBudget) -> Self {
        self.command_ack = budget;
        self
    }

    pub fn with_if_cond_response(mut self, budget: PollBudget) -> Self {
        self.if_cond_response = budget;
        self
    }

    pub fn with_response(mut self, budget: PollBudget) -> Self {
        self.response = budget;
        self
    }

    pub fn with_voltage_trials(mut self, trials: u32) -> Self {
        self.voltage_trials = trials;
        self
    }

    pub fn with_write_ready_attempts(mut self, attempts: u32) -> Self {
        self.write_ready_attempts = attempts;
        self
    }

    pub fn with_programming(mut self, budget: PollBudget) -> Self {
        self.programming = budget;
        self
    }

    pub fn with_data_wait(mut self, budget: PollBudget) -> Self {
        self.data_wait = budget;
        self
    }

    /// Data timeout programmed into the peripheral, in bus clock periods
    pub fn with_data_timeout(mut self, data_timeout: u32) -> Self {
        self.data_timeout = data_timeout;
        self
    }

    /// Bus clock produced by a divider, SDIO_CK = kernel / (divider + 2)
    pub fn bus_clock(&self, divider: u8) -> HertzU32 {
        self.kernel_clock / (divider as u32 + 2)
    }
}
