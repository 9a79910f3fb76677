//! Shared mailbox region.
//!
//! Layout, in 4-byte atomic words:
//!
//! ```text
//! byte 0..4   notification   ChannelState, waited on by both sides
//! byte 4..8   payload length in bytes
//! byte 8..    payload        capacity - 8 bytes
//! ```
//!
//! A write stores the payload, then the length, then the notification with
//! release ordering, then wakes waiters. A reader that observes the
//! notification with acquire ordering therefore sees the whole payload.
//!
//! The mailbox does no queuing. A second write overwrites the first; the
//! one-message-per-direction rule of the call protocol is what keeps that safe.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::futex;
use super::protocol::{ChannelId, ChannelState};

/// Size of the notification and length header.
pub const HEADER_BYTES: usize = 8;

const WORD_BYTES: usize = 4;

/// Header words addressable by the wait protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSlot {
    Notification,
    Length,
}

impl HeaderSlot {
    const fn index(self) -> usize {
        match self {
            Self::Notification => 0,
            Self::Length => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox capacity {capacity} is outside 8..=4294967295 bytes")]
    InvalidCapacity { capacity: usize },

    #[error("payload of {len} bytes exceeds mailbox payload capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },
}

/// Fixed-size shared region carrying one message at a time.
pub struct Mailbox {
    id: ChannelId,
    capacity: usize,
    words: Box<[AtomicU32]>,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .finish()
    }
}

impl Mailbox {
    /// Allocate a region of `capacity` bytes, header included.
    pub fn new(capacity: usize) -> Result<Self, MailboxError> {
        Self::with_id(ChannelId::new(), capacity)
    }

    pub fn with_id(id: ChannelId, capacity: usize) -> Result<Self, MailboxError> {
        if capacity < HEADER_BYTES || capacity > u32::MAX as usize {
            return Err(MailboxError::InvalidCapacity { capacity });
        }
        let words = (0..capacity.div_ceil(WORD_BYTES))
            .map(|_| AtomicU32::new(0))
            .collect();
        let mailbox = Self {
            id,
            capacity,
            words,
        };
        mailbox.store(HeaderSlot::Notification, ChannelState::Idle.as_raw());
        tracing::trace!(channel = %id, capacity, "Mailbox allocated");
        Ok(mailbox)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Total size in bytes, header included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available for the payload.
    pub fn payload_capacity(&self) -> usize {
        self.capacity - HEADER_BYTES
    }

    pub fn load(&self, slot: HeaderSlot) -> u32 {
        self.words[slot.index()].load(Ordering::Acquire)
    }

    pub fn store(&self, slot: HeaderSlot, value: u32) {
        self.words[slot.index()].store(value, Ordering::Release);
    }

    /// Block while `slot` still holds `current`. May return spuriously.
    pub fn wait(&self, slot: HeaderSlot, current: u32, timeout: Option<Duration>) {
        futex::wait(&self.words[slot.index()], current, timeout);
    }

    pub fn wake_all(&self, slot: HeaderSlot) {
        futex::wake_all(&self.words[slot.index()]);
    }

    /// Current channel state, `None` if the word holds an unknown value.
    pub fn state(&self) -> Option<ChannelState> {
        ChannelState::from_raw(self.load(HeaderSlot::Notification))
    }

    /// Length currently recorded in the header.
    pub fn payload_len(&self) -> usize {
        self.words[HeaderSlot::Length.index()].load(Ordering::Relaxed) as usize
    }

    /// Write `bytes` at `offset` within the payload area, record the payload
    /// extent (`offset + bytes.len()`) as the length, publish `state` and wake
    /// all waiters.
    ///
    /// Nothing is stored when the payload would not fit.
    pub fn write(
        &self,
        offset: usize,
        bytes: &[u8],
        state: ChannelState,
    ) -> Result<(), MailboxError> {
        let end = offset.saturating_add(bytes.len());
        if end > self.payload_capacity() {
            return Err(MailboxError::PayloadTooLarge {
                len: end,
                capacity: self.payload_capacity(),
            });
        }

        self.store_bytes(HEADER_BYTES + offset, bytes);
        self.words[HeaderSlot::Length.index()].store(end as u32, Ordering::Relaxed);
        tracing::trace!(channel = %self.id, len = end, %state, "Mailbox write");
        self.publish(state);
        Ok(())
    }

    /// Publish `state` with a length that does not fit, leaving the payload
    /// untouched. The consumer's capacity check turns this into a size error
    /// instead of a reply that never arrives.
    pub fn post_oversize(&self, required_len: usize, state: ChannelState) {
        let len = u32::try_from(required_len).unwrap_or(u32::MAX);
        self.words[HeaderSlot::Length.index()].store(len, Ordering::Relaxed);
        tracing::trace!(channel = %self.id, required_len, %state, "Mailbox oversize marker");
        self.publish(state);
    }

    /// Copy out the current payload.
    ///
    /// Only meaningful after the expected state has been observed.
    pub fn read(&self) -> Result<Vec<u8>, MailboxError> {
        let len = self.payload_len();
        if len > self.payload_capacity() {
            return Err(MailboxError::PayloadTooLarge {
                len,
                capacity: self.payload_capacity(),
            });
        }

        let mut out = Vec::with_capacity(len);
        let mut idx = HEADER_BYTES;
        let end = HEADER_BYTES + len;
        while idx < end {
            let lane = idx % WORD_BYTES;
            let take = (WORD_BYTES - lane).min(end - idx);
            let word = self.words[idx / WORD_BYTES]
                .load(Ordering::Relaxed)
                .to_le_bytes();
            out.extend_from_slice(&word[lane..lane + take]);
            idx += take;
        }
        Ok(out)
    }

    fn publish(&self, state: ChannelState) {
        self.store(HeaderSlot::Notification, state.as_raw());
        self.wake_all(HeaderSlot::Notification);
    }

    // Partial words are merged with what is already there. Only the side
    // expected to act writes, so the load/store pair cannot race another writer.
    fn store_bytes(&self, start: usize, bytes: &[u8]) {
        let mut idx = start;
        let mut rest = bytes;
        while !rest.is_empty() {
            let lane = idx % WORD_BYTES;
            let take = (WORD_BYTES - lane).min(rest.len());
            let slot = &self.words[idx / WORD_BYTES];
            let value = if take == WORD_BYTES {
                u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]])
            } else {
                let mut word = slot.load(Ordering::Relaxed).to_le_bytes();
                word[lane..lane + take].copy_from_slice(&rest[..take]);
                u32::from_le_bytes(word)
            };
            slot.store(value, Ordering::Relaxed);
            idx += take;
            rest = &rest[take..];
        }
    }
}
