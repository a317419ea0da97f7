//! Simulated SDIO peripheral, DMA channel and card, shared behind one state

use core::cell::{RefCell, RefMut};
use std::rc::Rc;

use crate::config::Config;
use crate::peripheral::{
    BusWidth, DataConfig, DmaChannel, DmaDirection, DmaTransfer, PowerState, ResponseLength,
    ResponseSlot, SdioPeripheral, StatusFlags,
};
use crate::registers::{CARD_STATUS_LOCKED, CARD_STATUS_READY_FOR_DATA};
use crate::sdio::SdioHost;

const SIM_STORAGE_LEN: usize = 64 * 1024;
const SIM_FIFO_ADDRESS: u32 = 0x4001_8080;
const SIM_NO_ECHO: u8 = 0x3F;
const SIM_APP_CMD: u32 = 1 << 5;
const SIM_STATE_TRAN: u32 = 4 << 9;
const SIM_STATE_PRG: u32 = 7 << 9;

/// Data command the card is waiting to move data for, with its byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Read(usize),
    Write(usize),
}

#[derive(Debug)]
pub struct SimState {
    // Peripheral side
    pub flags: StatusFlags,
    pub responses: [u32; 4],
    pub echo: u8,
    pub power: PowerState,
    pub clock_divider: u8,
    pub bus_width: BusWidth,
    pub clock_enabled: bool,
    pub bus_clock_enables: u32,
    pub data_config: DataConfig,
    pub dma_requests: bool,
    pub status_reads: u32,
    /// Misses left before `cancelled` starts reporting true
    pub cancel_after_polls: Option<u32>,

    // DMA side
    pub dma: Option<DmaTransfer>,
    pub dma_enabled: bool,
    pub dma_done: bool,
    pub stall_dma: bool,
    /// Raised by a stalled DMA the first time it is polled
    pub stall_error: Option<StatusFlags>,

    // Card side
    pub commands: Vec<(u8, u32)>,
    pub high_capacity: bool,
    pub answers_if_cond: bool,
    pub if_cond_echo: Option<u32>,
    /// ACMD41 attempt on which the card reports power up complete
    pub ready_after: Option<u32>,
    pub op_cond_attempts: u32,
    pub rca: u16,
    pub cid: [u32; 4],
    pub csd: [u32; 4],
    pub locked: bool,
    pub block_len: u32,
    pub pending: Option<Pending>,
    /// Status requests answered without READY_FOR_DATA
    pub not_ready_polls: u32,
    /// Status requests answered in the programming state after each write
    pub programming_polls: u32,
    pub busy_polls_left: u32,
    pub programming_error: Option<u32>,
    pub storage: Vec<u8>,

    // Injected faults
    pub status_errors: Option<(u8, u32)>,
    pub fail_command: Option<(u8, StatusFlags)>,
    pub wrong_echo: Option<u8>,
    pub data_error: Option<StatusFlags>,
}

impl SimState {
    fn new() -> Self {
        Self {
            flags: StatusFlags::empty(),
            responses: [0; 4],
            echo: 0,
            power: PowerState::Off,
            clock_divider: 0,
            bus_width: BusWidth::One,
            clock_enabled: false,
            bus_clock_enables: 0,
            data_config: DataConfig::disabled(),
            dma_requests: false,
            status_reads: 0,
            cancel_after_polls: None,
            dma: None,
            dma_enabled: false,
            dma_done: false,
            stall_dma: false,
            stall_error: None,
            commands: Vec::new(),
            high_capacity: true,
            answers_if_cond: true,
            if_cond_echo: None,
            ready_after: Some(3),
            op_cond_attempts: 0,
            rca: 0xB368,
            cid: [0x0353_4453, 0x4333_3247, 0x8000_0000, 0],
            csd: [0x4000_0000, 0, 0x1000_0000, 0],
            locked: false,
            block_len: 0,
            pending: None,
            not_ready_polls: 0,
            programming_polls: 2,
            busy_polls_left: 0,
            programming_error: None,
            storage: vec![0; SIM_STORAGE_LEN],
            status_errors: None,
            fail_command: None,
            wrong_echo: None,
            data_error: None,
        }
    }

    fn respond(&mut self, index: u8, response: [u32; 4], echo: u8, flags: StatusFlags) {
        self.responses = response;
        self.echo = match self.wrong_echo == Some(index) {
            true => index.wrapping_add(1),
            false => echo,
        };
        self.flags |= flags;
    }

    fn respond_r1(&mut self, index: u8, status: u32) {
        let mut status = status;

        if self.locked {
            status |= CARD_STATUS_LOCKED;
        }

        if let Some((command, bits)) = self.status_errors {
            if command == index {
                status |= bits;
            }
        }

        self.respond(index, [status, 0, 0, 0], index, StatusFlags::CMDREND);
    }

    fn card_status(&mut self) -> u32 {
        if self.busy_polls_left > 0 {
            self.busy_polls_left -= 1;
            return SIM_STATE_PRG | self.programming_error.unwrap_or(0);
        }

        if self.not_ready_polls > 0 {
            self.not_ready_polls -= 1;
            return SIM_STATE_TRAN;
        }

        SIM_STATE_TRAN | CARD_STATUS_READY_FOR_DATA
    }

    fn offset(&self, argument: u32) -> usize {
        match self.high_capacity {
            true => argument as usize * 512,
            false => argument as usize,
        }
    }

    fn command(&mut self, index: u8, argument: u32) {
        self.commands.push((index, argument));

        if let Some((command, flags)) = self.fail_command {
            if command == index {
                self.flags |= flags;
                return;
            }
        }

        match index {
            0 => {
                self.pending = None;
                self.flags |= StatusFlags::CMDSENT;
            }
            2 => self.respond(index, self.cid, SIM_NO_ECHO, StatusFlags::CMDREND),
            3 => {
                let response = ((self.rca as u32) << 16) | 0x0500;
                self.respond(index, [response, 0, 0, 0], index, StatusFlags::CMDREND);
            }
            8 if self.answers_if_cond => {
                let echo = self.if_cond_echo.unwrap_or(argument & 0xFFF);
                self.respond(index, [echo, 0, 0, 0], index, StatusFlags::CMDREND);
            }
            9 => self.respond(index, self.csd, SIM_NO_ECHO, StatusFlags::CMDREND),
            41 => {
                self.op_cond_attempts += 1;
                let ready = self
                    .ready_after
                    .is_some_and(|after| self.op_cond_attempts >= after);

                let mut ocr = 0x00FF_8000;
                if ready {
                    ocr |= 1 << 31;
                    if self.high_capacity && argument & (1 << 30) != 0 {
                        ocr |= 1 << 30;
                    }
                }

                // No CRC protects an R3, the peripheral flags every one of them
                self.respond(
                    index,
                    [ocr, 0, 0, 0],
                    SIM_NO_ECHO,
                    StatusFlags::CMDREND | StatusFlags::CCRCFAIL,
                );
            }
            55 | 6 | 23 => self.respond_r1(index, SIM_STATE_TRAN | SIM_APP_CMD),
            7 | 12 => {
                self.pending = None;
                self.respond_r1(index, SIM_STATE_TRAN);
            }
            13 => {
                let status = self.card_status();
                self.respond_r1(index, status);
            }
            16 => {
                self.block_len = argument;
                self.respond_r1(index, SIM_STATE_TRAN);
            }
            17 | 18 => {
                self.pending = Some(Pending::Read(self.offset(argument)));
                self.respond_r1(index, SIM_STATE_TRAN);
            }
            24 | 25 => {
                self.pending = Some(Pending::Write(self.offset(argument)));
                self.respond_r1(index, SIM_STATE_TRAN | CARD_STATUS_READY_FOR_DATA);
            }
            _ => self.flags |= StatusFlags::CTIMEOUT,
        }
    }

    /// Move the data of the pending command, if the DMA has been set up for it
    fn run_dma(&mut self) -> bool {
        if self.dma_done {
            return true;
        }

        if self.stall_dma {
            if let Some(error) = self.stall_error.take() {
                self.flags |= error;
            }
            return false;
        }

        if !self.dma_enabled || !self.dma_requests {
            return false;
        }

        let (Some(transfer), Some(pending)) = (self.dma, self.pending) else {
            return false;
        };

        assert_eq!(transfer.peripheral_address, SIM_FIFO_ADDRESS);
        let length = transfer.word_count as usize * 4;

        match pending {
            Pending::Read(offset) => {
                assert_eq!(transfer.direction, DmaDirection::PeripheralToMemory);
                let source = &self.storage[offset..offset + length];
                // SAFETY: the driver keeps the buffer borrowed until the transfer ends
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        source.as_ptr(),
                        transfer.memory_address as *mut u8,
                        length,
                    );
                }
            }
            Pending::Write(offset) => {
                assert_eq!(transfer.direction, DmaDirection::MemoryToPeripheral);
                // SAFETY: as above
                let source = unsafe {
                    core::slice::from_raw_parts(transfer.memory_address as *const u8, length)
                };
                self.storage[offset..offset + length].copy_from_slice(source);
                self.busy_polls_left = self.programming_polls;
            }
        }

        self.flags |= match self.data_error {
            Some(error) => error,
            None => StatusFlags::DATAEND | StatusFlags::DBCKEND,
        };
        self.pending = None;
        self.dma_done = true;

        true
    }
}

/// Test double for the whole bus. Hand out the peripheral and DMA halves
/// to a host and keep this to inspect or poke the shared state.
#[derive(Clone)]
pub struct SimCard {
    state: Rc<RefCell<SimState>>,
}

pub struct SimSdio {
    state: Rc<RefCell<SimState>>,
}

pub struct SimDma {
    state: Rc<RefCell<SimState>>,
}

pub type SimHost = SdioHost<SimSdio, SimDma>;

impl SimCard {
    fn with_state(state: SimState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// High capacity card, ready on the third ACMD41
    pub fn sdhc() -> Self {
        Self::with_state(SimState::new())
    }

    /// Physical layer 1.x card: ignores CMD8, byte addressed, 2GB
    pub fn sdsc_v1() -> Self {
        let mut state = SimState::new();
        state.high_capacity = false;
        state.answers_if_cond = false;
        state.rca = 0x1234;
        state.csd = [0x002F_0032, 0x5F59_83C8, 0x8003_8000, 0];
        Self::with_state(state)
    }

    /// Physical layer 2.0 card that never reports CCS
    pub fn sdsc_v2() -> Self {
        let mut state = SimState::new();
        state.high_capacity = false;
        state.rca = 0x1234;
        state.csd = [0x002F_0032, 0x5F59_83C8, 0x8003_8000, 0];
        Self::with_state(state)
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    pub fn commands(&self) -> Vec<(u8, u32)> {
        self.state.borrow().commands.clone()
    }

    pub fn peripheral(&self) -> SimSdio {
        SimSdio {
            state: self.state.clone(),
        }
    }

    pub fn dma(&self) -> SimDma {
        SimDma {
            state: self.state.clone(),
        }
    }

    pub fn host(&self) -> SimHost {
        self.host_with(Config::default())
    }

    pub fn host_with(&self, config: Config) -> SimHost {
        SdioHost::new(self.peripheral(), self.dma(), config)
    }

    /// A host that has already initialized the card
    pub fn ready_host(&self) -> SimHost {
        self.ready_host_with(Config::default())
    }

    pub fn ready_host_with(&self, config: Config) -> SimHost {
        let mut host = self.host_with(config);
        host.initialize().unwrap();
        host
    }
}

/// A zeroed, word aligned buffer of `N` words
pub fn aligned<const N: usize>() -> [u32; N] {
    [0; N]
}

impl SdioPeripheral for SimSdio {
    fn enable_bus_clock(&mut self) {
        self.state.borrow_mut().bus_clock_enables += 1;
    }

    fn reset(&mut self) {
        let mut state = self.state.borrow_mut();
        state.flags = StatusFlags::empty();
        state.power = PowerState::Off;
        state.clock_divider = 0;
        state.bus_width = BusWidth::One;
        state.clock_enabled = false;
        state.data_config = DataConfig::disabled();
        state.dma_requests = false;
    }

    fn set_power(&mut self, power: PowerState) {
        self.state.borrow_mut().power = power;
    }

    fn set_clock_divider(&mut self, divider: u8) {
        self.state.borrow_mut().clock_divider = divider;
    }

    fn set_bus_width(&mut self, width: BusWidth) {
        self.state.borrow_mut().bus_width = width;
    }

    fn enable_clock(&mut self, enable: bool) {
        self.state.borrow_mut().clock_enabled = enable;
    }

    fn send_command(&mut self, index: u8, argument: u32, response: ResponseLength, enable: bool) {
        assert!(enable);
        let expected = match index {
            0 => ResponseLength::None,
            2 | 9 => ResponseLength::Long,
            _ => ResponseLength::Short,
        };
        assert_eq!(response, expected, "CMD{index} sent with the wrong response length");

        self.state.borrow_mut().command(index, argument);
    }

    fn read_status_flags(&self) -> StatusFlags {
        let mut state = self.state.borrow_mut();
        state.status_reads += 1;
        state.flags
    }

    fn clear_flags(&mut self, mask: StatusFlags) {
        self.state.borrow_mut().flags.remove(mask);
    }

    fn read_response(&self, slot: ResponseSlot) -> u32 {
        let state = self.state.borrow();
        match slot {
            ResponseSlot::Resp1 => state.responses[0],
            ResponseSlot::Resp2 => state.responses[1],
            ResponseSlot::Resp3 => state.responses[2],
            ResponseSlot::Resp4 => state.responses[3],
        }
    }

    fn command_echo(&self) -> u8 {
        self.state.borrow().echo
    }

    fn configure_data(&mut self, config: DataConfig) {
        self.state.borrow_mut().data_config = config;
    }

    fn enable_dma(&mut self, enable: bool) {
        self.state.borrow_mut().dma_requests = enable;
    }

    fn fifo_address(&self) -> u32 {
        SIM_FIFO_ADDRESS
    }

    fn cancelled(&self) -> bool {
        let mut state = self.state.borrow_mut();
        match state.cancel_after_polls {
            Some(0) => true,
            Some(polls) => {
                state.cancel_after_polls = Some(polls - 1);
                false
            }
            None => false,
        }
    }
}

impl DmaChannel for SimDma {
    fn enable_bus_clock(&mut self) {
        self.state.borrow_mut().bus_clock_enables += 1;
    }

    fn configure(&mut self, transfer: DmaTransfer) {
        let mut state = self.state.borrow_mut();
        assert!(!state.dma_enabled, "DMA reconfigured while running");
        state.dma = Some(transfer);
        state.dma_done = false;
    }

    fn enable(&mut self, enable: bool) {
        self.state.borrow_mut().dma_enabled = enable;
    }

    fn transfer_complete(&self) -> bool {
        self.state.borrow_mut().run_dma()
    }

    fn clear_transfer_complete(&mut self) {
        self.state.borrow_mut().dma_done = false;
    }
}
