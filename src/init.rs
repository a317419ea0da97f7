//! Card bring-up, from power on to the transfer state

use crate::command::SdCmd;
use crate::config::{SD_BLOCK_LEN, SD_CHECK_PATTERN};
use crate::errors::SdioError;
use crate::peripheral::{BusWidth, DmaChannel, PowerState, SdioPeripheral};
use crate::registers::{SdCid, SdCsd, SdOcr};
use crate::sdio::{CardVariant, InitState, SdCard, SdioHost};

/// RCA used for cards that do not publish one
const SD_DEFAULT_RCA: u16 = 1;

impl<P: SdioPeripheral, D: DmaChannel> SdioHost<P, D> {
    /// Bring the card up from power on to the transfer state. Any failure
    /// leaves the driver in the state it had reached.
    pub fn initialize(&mut self) -> Result<(), SdioError> {
        self.power_on()?;
        self.identify()?;
        self.widen_bus()?;
        self.enter_transfer_mode()
    }

    /// Power the card, reset it, probe its version and negotiate the
    /// operating voltage
    pub fn power_on(&mut self) -> Result<(), SdioError> {
        self.card = SdCard::default();
        self.state = InitState::Uninitialized;

        self.sdio.reset();
        self.sdio.set_clock_divider(self.config.init_clock_divider);
        self.sdio.set_power(PowerState::On);
        self.powered = true;
        self.sdio.enable_clock(true);

        log::info!(
            "SD power on, bus clock {} kHz",
            self.config
                .bus_clock(self.config.init_clock_divider)
                .to_kHz()
        );

        // Every card has to acknowledge this one
        self.cmd_r0(SdCmd::GoIdleState)?;
        self.state = InitState::PoweredOn;

        // Only cards implementing physical layer 2.0 or later answer CMD8
        let high_capacity_host = self.probe_version();
        self.state = InitState::VersionProbed;

        let ocr = self.negotiate_voltage(high_capacity_host)?;
        if ocr.ccs() {
            self.card.variant = CardVariant::Sdhc;
        }
        self.state = InitState::VoltageNegotiated;

        log::info!("SD card powered up as {:?}", self.card.variant);
        Ok(())
    }

    /// Drop power to the card. The card has to be initialized again afterwards.
    pub fn power_off(&mut self) -> Result<(), SdioError> {
        self.sdio.set_power(PowerState::Off);
        self.powered = false;
        self.card = SdCard::default();
        self.state = InitState::Uninitialized;

        log::info!("SD power off");
        Ok(())
    }

    /// Read the CID, get an RCA assigned and decode the CSD
    pub fn identify(&mut self) -> Result<(), SdioError> {
        if !self.powered {
            return Err(SdioError::RequestNotApplicable {});
        }

        let variant = self.card.variant;

        if variant.has_cid() {
            let cid = SdCid::new(self.cmd_r2(SdCmd::AllSendCid)?);
            log::info!(
                "SD card manufacturer {:#04x}, oem {:#06x}, product {}",
                cid.manufacturer_id(),
                cid.oem_id(),
                core::str::from_utf8(&cid.product_name()).unwrap_or("?")
            );
            self.card.cid = cid;
        }
        self.state = InitState::Identified;

        let rca = match variant.publishes_rca() {
            true => self.cmd_r6(SdCmd::SendRelativeAddr)?,
            false => SD_DEFAULT_RCA,
        };
        self.card.rca = rca;
        self.state = InitState::AddressAssigned;
        log::debug!("SD card RCA {:#06x}", rca);

        if variant.has_cid() {
            let csd = SdCsd::new(self.cmd_r2(SdCmd::SendCsd(rca))?);
            self.card.csd = csd;
            self.card.capacity_kb = match csd.capacity_kb() {
                Some(capacity_kb) => capacity_kb,
                None => {
                    log::warn!("Unknown CSD structure {}, capacity left at 0", csd.version());
                    0
                }
            };
            log::info!("SD card capacity {} KB", self.card.capacity_kb);
        }
        self.state = InitState::ConfigDecoded;

        Ok(())
    }

    /// Select the card and switch both ends to the 4 bit bus
    fn widen_bus(&mut self) -> Result<(), SdioError> {
        self.cmd_r1(SdCmd::SelectDeselectCard(self.card.rca))?;
        self.cmd_r1(SdCmd::SetBusWidth(true))?;
        self.sdio.set_bus_width(BusWidth::Four);
        self.state = InitState::BusWidened;

        Ok(())
    }

    /// Speed the clock up and settle on 512 byte blocks
    fn enter_transfer_mode(&mut self) -> Result<(), SdioError> {
        self.sdio.set_clock_divider(self.config.transfer_clock_divider);
        self.cmd_r1(SdCmd::SetBlockLen(SD_BLOCK_LEN as u32))?;
        self.state = InitState::Ready;

        log::info!(
            "SD card ready, bus clock {} kHz",
            self.config
                .bus_clock(self.config.transfer_clock_divider)
                .to_kHz()
        );
        Ok(())
    }

    /// Send CMD8. Returns true if the card answered with our check pattern,
    /// which means it can be offered high capacity.
    fn probe_version(&mut self) -> bool {
        match self.cmd_r7(SdCmd::SendIfCond(SD_CHECK_PATTERN)) {
            Ok(echo) if echo & 0xFF == SD_CHECK_PATTERN as u32 => {
                self.card.variant = CardVariant::SdscV2;
                true
            }
            Ok(echo) => {
                log::warn!("CMD8 echoed {:#x}, treating card as version 1.x", echo);
                self.card.variant = CardVariant::SdscV1;
                false
            }
            Err(e) => {
                log::warn!("CMD8 failed ({}), treating card as version 1.x", e);
                self.card.variant = CardVariant::SdscV1;
                false
            }
        }
    }

    /// Send ACMD41 until the card finishes powering up
    fn negotiate_voltage(&mut self, hcs: bool) -> Result<SdOcr, SdioError> {
        for attempt in 1..=self.config.voltage_trials {
            let ocr = self.cmd_r3(SdCmd::SdAppOpCond { hcs })?;

            if !ocr.is_busy() {
                log::debug!("ACMD41 ready after {} attempts, OCR {:#010x}", attempt, ocr.ocr);
                return Ok(ocr);
            }
        }

        Err(SdioError::InvalidVoltageRange {})
    }
}
