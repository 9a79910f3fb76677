//! syncbridge: blocking calls from a host thread into an agent thread over a
//! shared-memory mailbox.
//!
//! The host posts a job into a fixed-size region, wakes the agent through a
//! futex on the region's notification word, and blocks until the agent posts
//! the result back the same way.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod host;

pub use agent::{
    Agent, AgentHandle, AsyncExecutable, Executable, JobError, Registry, spawn_agent,
};
pub use bridge::mailbox::{HEADER_BYTES, Mailbox, MailboxError};
pub use bridge::protocol::{ChannelId, ChannelState, Job, JobOutcome, ProtocolError};
pub use bridge::wait::{WaitOptions, WaitOutcome, wait_for, wait_for_state};
pub use config::{AgentConfig, ChannelConfig};
pub use host::{CallError, Channel};
