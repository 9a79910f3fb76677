//! Host side of the bridge - posts a job and blocks until the agent answers.
//!
//! A channel carries one call at a time. A call that times out or receives a
//! result too large for the mailbox poisons the channel: the agent may still
//! be working on (or have half-answered) the abandoned job, so no later call
//! can trust what it reads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bridge::codec::{decode_text, encode_text};
use crate::bridge::mailbox::{HEADER_BYTES, Mailbox, MailboxError};
use crate::bridge::protocol::{ChannelId, ChannelState, Job, JobOutcome};
use crate::bridge::wait::{WaitOutcome, wait_for_state};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("no result within {0:?}")]
    CallTimeout(Duration),

    #[error("job needs {len} payload bytes, mailbox holds {capacity}")]
    JobTooLarge { len: usize, capacity: usize },

    #[error("result needs {len} payload bytes, mailbox holds {capacity}")]
    ResultTooLarge { len: usize, capacity: usize },

    /// The job description could not be serialized. Nothing was written.
    #[error("job rejected: {0}")]
    Rejected(String),

    /// The job ran and reported a failure.
    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("malformed result: {0}")]
    Decode(String),

    #[error("another call is in flight on this channel")]
    Busy,

    #[error("channel poisoned by an earlier timed-out or oversized call")]
    Poisoned,
}

/// Clears the in-flight flag when the call returns, on every path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Host end of a host/agent pair.
pub struct Channel {
    mailbox: Arc<Mailbox>,
    config: ChannelConfig,
    in_flight: AtomicBool,
    poisoned: AtomicBool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("mailbox", &self.mailbox)
            .field("config", &self.config)
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Result<Self, MailboxError> {
        let mailbox = Arc::new(Mailbox::new(config.capacity)?);
        tracing::debug!(channel = %mailbox.id(), capacity = config.capacity, "Channel created");
        Ok(Self {
            mailbox,
            config,
            in_flight: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, MailboxError> {
        Self::new(ChannelConfig::default().with_capacity(capacity))
    }

    pub fn id(&self) -> ChannelId {
        self.mailbox.id()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The shared region, for handing to the agent before the first call.
    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Build a job from `op` and an argument list and invoke it.
    pub fn call<A: Serialize>(&self, op: &str, args: A) -> Result<Value, CallError> {
        let job = Job::from_args(op, args).map_err(|e| CallError::Rejected(e.to_string()))?;
        self.invoke(&job)
    }

    /// [`Channel::call`], deserializing the result into `R`.
    pub fn call_as<A, R>(&self, op: &str, args: A) -> Result<R, CallError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let value = self.call(op, args)?;
        serde_json::from_value(value).map_err(|e| CallError::Decode(e.to_string()))
    }

    /// Post `job`, block until the agent posts the result, and return it.
    pub fn invoke(&self, job: &Job) -> Result<Value, CallError> {
        if self.is_poisoned() {
            return Err(CallError::Poisoned);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CallError::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let channel = self.id();
        let capacity = self.mailbox.payload_capacity();
        let bytes = encode_text(&job.to_text());
        if bytes.len() > capacity {
            return Err(CallError::JobTooLarge {
                len: bytes.len(),
                capacity,
            });
        }

        let start = Instant::now();
        self.mailbox
            .write(0, &bytes, ChannelState::JobPosted)
            .map_err(|_| CallError::JobTooLarge {
                len: bytes.len(),
                capacity,
            })?;
        tracing::trace!(%channel, op = job.op(), len = bytes.len(), "Job posted");

        let options = self.config.wait_options();
        let outcome = wait_for_state(&self.mailbox, ChannelState::ResultPosted, options);
        if outcome == WaitOutcome::TimedOut {
            let timeout = options.total.unwrap_or_default();
            self.poison("call timed out");
            return Err(CallError::CallTimeout(timeout));
        }

        let len = self.mailbox.payload_len();
        if len.saturating_add(HEADER_BYTES) > self.mailbox.capacity() {
            self.poison("result exceeds mailbox capacity");
            return Err(CallError::ResultTooLarge { len, capacity });
        }

        let payload = self.mailbox.read().map_err(|e| CallError::Decode(e.to_string()))?;
        let text = decode_text(&payload).map_err(|e| CallError::Decode(e.to_string()))?;
        let outcome = JobOutcome::parse(&text).map_err(|e| CallError::Decode(e.to_string()))?;

        tracing::debug!(
            %channel,
            op = job.op(),
            ok = outcome.is_ok(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Call completed"
        );

        match outcome {
            JobOutcome::Ok(value) => Ok(value),
            JobOutcome::Err(message) => Err(CallError::JobFailed(message)),
        }
    }

    fn poison(&self, reason: &str) {
        self.poisoned.store(true, Ordering::Release);
        tracing::error!(channel = %self.id(), reason, "Channel poisoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quick(capacity: usize) -> Channel {
        Channel::new(
            ChannelConfig::new(capacity)
                .with_call_timeout(Duration::from_millis(50))
                .with_step_timeout(Duration::from_millis(10)),
        )
        .unwrap()
    }

    fn patient(capacity: usize) -> Channel {
        let config = ChannelConfig::new(capacity).with_call_timeout(Duration::from_secs(2));
        Channel::new(config).unwrap()
    }

    #[test]
    fn rejects_capacity_below_header() {
        let err = Channel::with_capacity(4).unwrap_err();
        assert_eq!(err, MailboxError::InvalidCapacity { capacity: 4 });
    }

    #[test]
    fn oversized_job_fails_before_any_write() {
        let channel = quick(16);
        let err = channel.call("add", (2, 2)).unwrap_err();
        // "add[2,2]" is 8 code units, 16 bytes.
        assert_eq!(err, CallError::JobTooLarge { len: 16, capacity: 8 });
        assert_eq!(channel.mailbox().state(), Some(ChannelState::Idle));
        assert_eq!(channel.mailbox().payload_len(), 0);
        assert!(!channel.is_poisoned());
    }

    #[test]
    fn unserializable_job_is_rejected() {
        let channel = quick(64);
        let err = channel.call("f", json!({"not": "a list"})).unwrap_err();
        assert!(matches!(err, CallError::Rejected(_)));

        let err = channel.call("", ()).unwrap_err();
        assert_eq!(err, CallError::Rejected("operation name is empty".to_string()));
        assert_eq!(channel.mailbox().state(), Some(ChannelState::Idle));
    }

    #[test]
    fn timeout_poisons_channel() {
        let channel = quick(64);
        let err = channel.call("ping", ()).unwrap_err();
        assert_eq!(err, CallError::CallTimeout(Duration::from_millis(50)));
        assert!(channel.is_poisoned());
        assert_eq!(channel.call("ping", ()).unwrap_err(), CallError::Poisoned);
    }

    #[test]
    fn busy_channel_refuses_second_call() {
        let channel = quick(64);
        channel.in_flight.store(true, Ordering::Release);
        assert_eq!(channel.call("ping", ()).unwrap_err(), CallError::Busy);
        // The refused call must not clear the flag it did not set.
        assert!(channel.in_flight.load(Ordering::Acquire));
    }

    #[test]
    fn reads_result_posted_by_hand() {
        let channel = patient(128);
        let mailbox = channel.mailbox();
        let responder = std::thread::spawn(move || {
            while mailbox.state() != Some(ChannelState::JobPosted) {
                std::thread::sleep(Duration::from_millis(1));
            }
            let text = decode_text(&mailbox.read().unwrap()).unwrap();
            assert_eq!(text, r#"greet["ada"]"#);
            mailbox
                .write(0, &encode_text(r#"{"ok":"hello ada"}"#), ChannelState::ResultPosted)
                .unwrap();
        });

        let greeting: String = channel.call_as("greet", ["ada"]).unwrap();
        responder.join().unwrap();
        assert_eq!(greeting, "hello ada");
        assert!(!channel.in_flight.load(Ordering::Acquire));
    }

    #[test]
    fn error_outcome_becomes_job_failed() {
        let channel = patient(128);
        let mailbox = channel.mailbox();
        let responder = std::thread::spawn(move || {
            while mailbox.state() != Some(ChannelState::JobPosted) {
                std::thread::sleep(Duration::from_millis(1));
            }
            mailbox
                .write(0, &encode_text(r#"{"err":"nope"}"#), ChannelState::ResultPosted)
                .unwrap();
        });

        let err = channel.call("anything", ()).unwrap_err();
        responder.join().unwrap();
        assert_eq!(err, CallError::JobFailed("nope".to_string()));
        assert!(!channel.is_poisoned());
    }

    #[test]
    fn malformed_result_is_a_decode_error() {
        let channel = patient(128);
        let mailbox = channel.mailbox();
        let responder = std::thread::spawn(move || {
            while mailbox.state() != Some(ChannelState::JobPosted) {
                std::thread::sleep(Duration::from_millis(1));
            }
            mailbox
                .write(0, &encode_text("4"), ChannelState::ResultPosted)
                .unwrap();
        });

        let err = channel.call("anything", ()).unwrap_err();
        responder.join().unwrap();
        assert!(matches!(err, CallError::Decode(_)));
    }
}
