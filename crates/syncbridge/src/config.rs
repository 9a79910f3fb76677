//! Channel and agent configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! | variable | default |
//! |----------|---------|
//! | `SYNCBRIDGE_CAPACITY` | 1024 bytes |
//! | `SYNCBRIDGE_CALL_TIMEOUT_MS` | unset (block forever) |
//! | `SYNCBRIDGE_STEP_TIMEOUT_MS` | 50 |
//! | `SYNCBRIDGE_POLL_INTERVAL_MS` | 100 |

use std::time::Duration;

use crate::bridge::wait::WaitOptions;

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

/// Host-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Mailbox size in bytes, 8-byte header included.
    pub capacity: usize,
    /// Budget for one `invoke`. `None` blocks until the agent answers.
    pub call_timeout: Option<Duration>,
    /// Longest single futex block inside a wait.
    pub step_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: env_parse("SYNCBRIDGE_CAPACITY").unwrap_or(DEFAULT_CAPACITY),
            call_timeout: env_millis("SYNCBRIDGE_CALL_TIMEOUT_MS"),
            step_timeout: Some(
                env_millis("SYNCBRIDGE_STEP_TIMEOUT_MS").unwrap_or(DEFAULT_STEP_TIMEOUT),
            ),
        }
    }
}

impl ChannelConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_step_timeout(mut self, step: Duration) -> Self {
        self.step_timeout = Some(step);
        self
    }

    pub(crate) fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            total: self.call_timeout,
            step: self.step_timeout,
        }
    }
}

/// Agent-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Longest single futex block while idle.
    pub step_timeout: Option<Duration>,
    /// How often a stoppable agent checks its stop flag.
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            step_timeout: Some(
                env_millis("SYNCBRIDGE_STEP_TIMEOUT_MS").unwrap_or(DEFAULT_STEP_TIMEOUT),
            ),
            poll_interval: env_millis("SYNCBRIDGE_POLL_INTERVAL_MS")
                .unwrap_or(DEFAULT_POLL_INTERVAL),
        }
    }
}

impl AgentConfig {
    pub fn with_step_timeout(mut self, step: Duration) -> Self {
        self.step_timeout = Some(step);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
