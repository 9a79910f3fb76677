//! Shared-memory mailbox bridge between host and agent.
//!
//! # Architecture
//!
//! - **codec**: text to fixed-width UTF-16 bytes and back
//! - **futex**: block on a 32-bit word until it changes
//! - **mailbox**: the header + payload region and its atomic write/read
//! - **wait**: wait-for-value loop with total budget and poll step
//! - **protocol**: channel states, job and result message formats

pub mod codec;
pub mod futex;
pub mod mailbox;
pub mod protocol;
pub mod wait;
