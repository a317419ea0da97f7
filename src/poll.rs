//! Bounded busy-waits

use crate::errors::SdioError;
use crate::peripheral::SdioPeripheral;

/// How long a busy-wait may spin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBudget {
    /// Give up after this many polls, the first one included
    Attempts(u32),
    /// Spin until the condition holds or the peripheral reports cancellation
    Unbounded,
}

/// Counts down the polls left in one wait
pub(crate) struct Retry {
    attempts_left: Option<u32>,
    on_expiry: SdioError,
}

impl Retry {
    pub(crate) fn new(budget: PollBudget, on_expiry: SdioError) -> Self {
        let attempts_left = match budget {
            PollBudget::Attempts(attempts) => Some(attempts),
            PollBudget::Unbounded => None,
        };

        Self {
            attempts_left,
            on_expiry,
        }
    }

    /// Account for one failed attempt. Fails once the budget is spent or the
    /// wait is cancelled. The first attempt is always made, even on a zero budget.
    pub(crate) fn next<P: SdioPeripheral + ?Sized>(&mut self, sdio: &P) -> Result<(), SdioError> {
        if sdio.cancelled() {
            return Err(self.on_expiry);
        }

        if let Some(attempts_left) = self.attempts_left.as_mut() {
            *attempts_left = attempts_left.saturating_sub(1);
            if *attempts_left == 0 {
                return Err(self.on_expiry);
            }
        }

        core::hint::spin_loop();
        Ok(())
    }
}

/// Poll `check` until it yields a value, spending one attempt per miss
pub(crate) fn poll_until<P, T>(
    sdio: &P,
    budget: PollBudget,
    on_expiry: SdioError,
    mut check: impl FnMut(&P) -> Option<T>,
) -> Result<T, SdioError>
where
    P: SdioPeripheral + ?Sized,
{
    let mut retry = Retry::new(budget, on_expiry);

    loop {
        if let Some(value) = check(sdio) {
            return Ok(value);
        }

        retry.next(sdio)?;
    }
}
