//! Driver handle, command issuing and response validation

use crate::command::{SdCmd, SdCmdResponse, SdCmdResponseType};
use crate::config::Config;
use crate::errors::SdioError;
use crate::peripheral::{DmaChannel, ResponseSlot, SdioPeripheral, StatusFlags};
use crate::poll::{poll_until, PollBudget};
use crate::registers::{published_rca, CardStatus, SdCid, SdCsd, SdOcr};

/// Kind of card found during initialization
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CardVariant {
    /// Standard capacity, physical layer 1.x
    #[default]
    SdscV1,
    /// Standard capacity, physical layer 2.0 or later
    SdscV2,
    /// High capacity, block addressed
    Sdhc,
    Mmc,
    Sdio,
    HsMmc,
    SdioCombo,
    HcMmc,
}

impl CardVariant {
    /// Block addressed cards take block indices instead of byte addresses
    pub fn is_high_capacity(&self) -> bool {
        matches!(self, Self::Sdhc)
    }

    /// Everything but a pure IO card has CID and CSD registers
    pub fn has_cid(&self) -> bool {
        !matches!(self, Self::Sdio)
    }

    /// SD cards publish their own RCA in response to CMD3
    pub fn publishes_rca(&self) -> bool {
        matches!(self, Self::SdscV1 | Self::SdscV2 | Self::Sdhc | Self::SdioCombo)
    }

    /// SD memory cards accept ACMD23 ahead of a multi-block write
    pub fn takes_erase_hint(&self) -> bool {
        matches!(self, Self::SdscV1 | Self::SdscV2 | Self::Sdhc)
    }
}

/// Where the card is in its bring-up
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    #[default]
    Uninitialized,
    PoweredOn,
    VersionProbed,
    VoltageNegotiated,
    Identified,
    AddressAssigned,
    ConfigDecoded,
    BusWidened,
    Ready,
}

/// What the driver knows about the attached card
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SdCard {
    pub(crate) variant: CardVariant,
    pub(crate) rca: u16,
    pub(crate) capacity_kb: u32,
    pub(crate) cid: SdCid,
    pub(crate) csd: SdCsd,
}

impl SdCard {
    pub fn variant(&self) -> CardVariant {
        self.variant
    }

    /// Relative card address, 0 until assigned
    pub fn rca(&self) -> u16 {
        self.rca
    }

    /// Capacity in kilobytes, 0 until the CSD is decoded
    pub fn capacity_kb(&self) -> u32 {
        self.capacity_kb
    }

    pub fn cid(&self) -> &SdCid {
        &self.cid
    }

    pub fn csd(&self) -> &SdCsd {
        &self.csd
    }
}

/// SD card attached to an SDIO host peripheral, with a DMA channel for data
///
/// Every operation takes `&mut self`; wrap the host in a
/// [`SharedSdio`](crate::shared::SharedSdio) to call it from more than one
/// context.
pub struct SdioHost<P, D> {
    pub(crate) sdio: P,
    pub(crate) dma: D,
    pub(crate) config: Config,
    pub(crate) card: SdCard,
    pub(crate) state: InitState,
    pub(crate) powered: bool,
}

impl<P: SdioPeripheral, D: DmaChannel> SdioHost<P, D> {
    /// Create a new driver. Turns on the clock domains of both collaborators.
    pub fn new(mut sdio: P, mut dma: D, config: Config) -> Self {
        sdio.enable_bus_clock();
        dma.enable_bus_clock();

        Self {
            sdio,
            dma,
            config,
            card: SdCard::default(),
            state: InitState::Uninitialized,
            powered: false,
        }
    }

    /// Give back the peripheral and the DMA channel
    pub fn release(self) -> (P, D) {
        (self.sdio, self.dma)
    }

    pub fn card(&self) -> &SdCard {
        &self.card
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send a command and validate its response. App commands are prefixed
    /// with APP_CMD automatically.
    pub fn command(&mut self, command: SdCmd) -> Result<SdCmdResponse, SdioError> {
        match command.response_type() {
            SdCmdResponseType::R0 => self.cmd_r0(command).map(|_| SdCmdResponse::R0),
            SdCmdResponseType::R1 => self.cmd_r1(command).map(SdCmdResponse::R1),
            SdCmdResponseType::R2 => self.cmd_r2(command).map(SdCmdResponse::R2),
            SdCmdResponseType::R3 => self.cmd_r3(command).map(SdCmdResponse::R3),
            SdCmdResponseType::R6 => self.cmd_r6(command).map(SdCmdResponse::R6),
            SdCmdResponseType::R7 => self.cmd_r7(command).map(SdCmdResponse::R7),
        }
    }

    pub(crate) fn cmd_r0(&mut self, command: SdCmd) -> Result<(), SdioError> {
        self.dispatch(command)?;
        self.wait_cmd_sent()
    }

    pub(crate) fn cmd_r1(&mut self, command: SdCmd) -> Result<CardStatus, SdioError> {
        self.dispatch(command)?;
        self.wait_response(self.config.response, true)?;
        self.check_echo(command)?;

        let status = CardStatus::new(self.sdio.read_response(ResponseSlot::Resp1));
        log::trace!("CMD{} status {:#010x}", command.index(), status.card_status);

        status.error()?;
        Ok(status)
    }

    pub(crate) fn cmd_r2(&mut self, command: SdCmd) -> Result<[u32; 4], SdioError> {
        self.dispatch(command)?;
        self.wait_response(self.config.response, true)?;

        Ok(ResponseSlot::ALL.map(|slot| self.sdio.read_response(slot)))
    }

    pub(crate) fn cmd_r3(&mut self, command: SdCmd) -> Result<SdOcr, SdioError> {
        self.dispatch(command)?;
        // R3 carries no CRC, CCRCFAIL is raised for every one of them
        self.wait_response(self.config.response, false)?;

        Ok(SdOcr {
            ocr: self.sdio.read_response(ResponseSlot::Resp1),
        })
    }

    pub(crate) fn cmd_r6(&mut self, command: SdCmd) -> Result<u16, SdioError> {
        self.dispatch(command)?;
        self.wait_response(self.config.response, true)?;
        self.check_echo(command)?;

        published_rca(self.sdio.read_response(ResponseSlot::Resp1))
    }

    pub(crate) fn cmd_r7(&mut self, command: SdCmd) -> Result<u32, SdioError> {
        self.dispatch(command)?;
        self.wait_response(self.config.if_cond_response, true)?;
        self.check_echo(command)?;

        Ok(self.sdio.read_response(ResponseSlot::Resp1))
    }

    fn dispatch(&mut self, command: SdCmd) -> Result<(), SdioError> {
        if command.is_acmd() {
            self.cmd_r1(SdCmd::AppCmd(self.card.rca))?;
        }

        log::trace!("CMD{} arg {:#010x}", command.index(), command.argument());

        self.sdio.send_command(
            command.index(),
            command.argument(),
            command.response_type().length(),
            true,
        );

        Ok(())
    }

    /// Wait for a command without response to leave the peripheral
    fn wait_cmd_sent(&mut self) -> Result<(), SdioError> {
        poll_until(
            &self.sdio,
            self.config.command_ack,
            SdioError::CmdResponseTimeout {},
            |sdio| {
                sdio.read_status_flags()
                    .contains(StatusFlags::CMDSENT)
                    .then_some(())
            },
        )?;

        self.sdio.clear_flags(StatusFlags::STATIC);
        Ok(())
    }

    /// Wait for a response, then classify it. Clears the static flags when a
    /// response arrived intact.
    fn wait_response(&mut self, budget: PollBudget, crc_checked: bool) -> Result<(), SdioError> {
        let status = poll_until(
            &self.sdio,
            budget,
            SdioError::CmdResponseTimeout {},
            |sdio| {
                let status = sdio.read_status_flags();
                status.intersects(StatusFlags::RESPONSE_DONE).then_some(status)
            },
        );

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.sdio.clear_flags(StatusFlags::CTIMEOUT);
                return Err(e);
            }
        };

        if status.contains(StatusFlags::CTIMEOUT) {
            self.sdio.clear_flags(StatusFlags::CTIMEOUT);
            return Err(SdioError::CmdResponseTimeout {});
        }

        if crc_checked && status.contains(StatusFlags::CCRCFAIL) {
            self.sdio.clear_flags(StatusFlags::CCRCFAIL);
            return Err(SdioError::CmdCrcFail {});
        }

        self.sdio.clear_flags(StatusFlags::STATIC);
        Ok(())
    }

    /// Make sure the response belongs to the command that was sent
    fn check_echo(&self, command: SdCmd) -> Result<(), SdioError> {
        let echo = self.sdio.command_echo();

        if echo != command.index() {
            log::debug!("CMD{} answered as CMD{}", command.index(), echo);
            return Err(SdioError::IllegalCommand {});
        }

        Ok(())
    }
}

impl<P, D> core::fmt::Debug for SdioHost<P, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdioHost")
            .field("card", &self.card)
            .field("state", &self.state)
            .field("powered", &self.powered)
            .finish_non_exhaustive()
    }
}
