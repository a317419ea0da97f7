//! A driver handle that can be reached from more than one execution context

use core::cell::RefCell;

use critical_section::Mutex;

use crate::command::{SdCmd, SdCmdResponse};
use crate::errors::SdioError;
use crate::peripheral::{DmaChannel, SdioPeripheral};
use crate::sdio::{InitState, SdCard, SdioHost};

/// [`SdioHost`] behind a critical section mutex.
///
/// Every operation runs to completion inside one critical section, so
/// operations from different contexts never interleave. Operations busy-wait,
/// so interrupts stay masked for as long as a transfer takes. Calling back
/// into the same `SharedSdio` from inside [`lock`](Self::lock) panics.
pub struct SharedSdio<P, D> {
    host: Mutex<RefCell<SdioHost<P, D>>>,
}

impl<P: SdioPeripheral, D: DmaChannel> SharedSdio<P, D> {
    pub const fn new(host: SdioHost<P, D>) -> Self {
        Self {
            host: Mutex::new(RefCell::new(host)),
        }
    }

    /// Run `f` with exclusive access to the host
    pub fn lock<R>(&self, f: impl FnOnce(&mut SdioHost<P, D>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.host.borrow_ref_mut(cs)))
    }

    pub fn initialize(&self) -> Result<(), SdioError> {
        self.lock(|host| host.initialize())
    }

    pub fn power_on(&self) -> Result<(), SdioError> {
        self.lock(|host| host.power_on())
    }

    pub fn identify(&self) -> Result<(), SdioError> {
        self.lock(|host| host.identify())
    }

    pub fn power_off(&self) -> Result<(), SdioError> {
        self.lock(|host| host.power_off())
    }

    pub fn command(&self, command: SdCmd) -> Result<SdCmdResponse, SdioError> {
        self.lock(|host| host.command(command))
    }

    pub fn read_block(
        &self,
        address: u64,
        buffer: &mut [u8],
        block_len: usize,
    ) -> Result<(), SdioError> {
        self.lock(|host| host.read_block(address, buffer, block_len))
    }

    pub fn read_blocks(
        &self,
        address: u64,
        buffer: &mut [u8],
        block_len: usize,
        blocks: u32,
    ) -> Result<(), SdioError> {
        self.lock(|host| host.read_blocks(address, buffer, block_len, blocks))
    }

    pub fn write_block(
        &self,
        address: u64,
        buffer: &[u8],
        block_len: usize,
    ) -> Result<(), SdioError> {
        self.lock(|host| host.write_block(address, buffer, block_len))
    }

    pub fn write_blocks(
        &self,
        address: u64,
        buffer: &[u8],
        block_len: usize,
        blocks: u32,
    ) -> Result<(), SdioError> {
        self.lock(|host| host.write_blocks(address, buffer, block_len, blocks))
    }

    pub fn state(&self) -> InitState {
        self.lock(|host| host.state())
    }

    /// A copy of what is known about the card
    pub fn card(&self) -> SdCard {
        self.lock(|host| *host.card())
    }

    pub fn into_inner(self) -> SdioHost<P, D> {
        self.host.into_inner().into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdio::CardVariant;
    use crate::sim::{aligned, SimCard};

    #[test]
    fn operations_go_through_the_lock() {
        let card = SimCard::sdhc();
        let shared = SharedSdio::new(card.host());

        assert_eq!(shared.state(), InitState::Uninitialized);
        assert_eq!(shared.initialize(), Ok(()));
        assert_eq!(shared.state(), InitState::Ready);
        assert_eq!(shared.card().variant(), CardVariant::Sdhc);

        let mut written = aligned::<128>();
        written.fill(0x1234_5678);
        assert_eq!(shared.write_block(512, bytemuck::cast_slice(&written), 512), Ok(()));

        let mut read = aligned::<128>();
        assert_eq!(
            shared.read_block(512, bytemuck::cast_slice_mut(&mut read), 512),
            Ok(())
        );
        assert_eq!(read, written);
    }

    #[test]
    fn lock_gives_the_host_back() {
        let card = SimCard::sdhc();
        let shared = SharedSdio::new(card.host());
        shared.initialize().unwrap();

        let rca = shared.lock(|host| host.card().rca());
        assert_eq!(rca, 0xB368);

        let host = shared.into_inner();
        assert_eq!(host.state(), InitState::Ready);
    }

    #[test]
    fn errors_pass_through() {
        let card = SimCard::sdhc();
        let shared = SharedSdio::new(card.host());

        assert_eq!(shared.identify(), Err(SdioError::RequestNotApplicable {}));
        assert_eq!(shared.power_off(), Ok(()));
    }
}
