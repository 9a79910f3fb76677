//! Blocking wait for a header word to reach a given value.
//!
//! The futex primitive can only wait for "value changed", so this loops:
//! block until the word moves away from the last observed value (or a step
//! elapses), reload, compare against the awaited value, repeat. Unrelated
//! changes just become the new baseline.
//!
//! A word that already holds the awaited value on entry returns `Ok` at once.
//! A producer that publishes before the consumer starts waiting is therefore
//! never missed.

use std::time::{Duration, Instant};

use super::mailbox::{HeaderSlot, Mailbox};
use super::protocol::ChannelState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ok,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Outer budget and inner poll step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    /// Give up after this long. `None` waits forever.
    pub total: Option<Duration>,
    /// Longest single block on the primitive. `None` blocks until woken,
    /// still bounded by whatever remains of `total`.
    pub step: Option<Duration>,
}

impl WaitOptions {
    pub fn forever() -> Self {
        Self::default()
    }

    pub fn with_total(mut self, total: Duration) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = Some(step);
        self
    }
}

/// Wait until `slot` holds `expected` or the budget runs out.
///
/// With `total = T` a non-matching wait never returns before `T` and returns
/// within `T` plus scheduling latency, since each step is clipped to the
/// remaining budget.
pub fn wait_for(
    mailbox: &Mailbox,
    slot: HeaderSlot,
    expected: u32,
    options: WaitOptions,
) -> WaitOutcome {
    let start = Instant::now();
    let mut current = mailbox.load(slot);

    loop {
        if current == expected {
            return WaitOutcome::Ok;
        }

        let step = match options.total {
            Some(total) => {
                let elapsed = start.elapsed();
                if elapsed >= total {
                    tracing::debug!(
                        channel = %mailbox.id(),
                        ?slot,
                        expected,
                        current,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Wait timed out"
                    );
                    return WaitOutcome::TimedOut;
                }
                let remaining = total - elapsed;
                Some(options.step.map_or(remaining, |step| step.min(remaining)))
            }
            None => options.step,
        };

        mailbox.wait(slot, current, step);
        current = mailbox.load(slot);
    }
}

/// [`wait_for`] on the notification word.
pub fn wait_for_state(
    mailbox: &Mailbox,
    expected: ChannelState,
    options: WaitOptions,
) -> WaitOutcome {
    wait_for(mailbox, HeaderSlot::Notification, expected.as_raw(), options)
}
