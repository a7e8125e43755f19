//! Ready state shared between a resource and its I/O context.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a resource. States only ever move forward:
/// `Connecting -> Open -> Closing -> Closed`, with `Connecting -> Closed`
/// and `Open -> Closed` as shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ReadyState {
    /// Created; the handshake has not completed.
    #[default]
    Connecting = 0,
    /// Handshake done, data may flow.
    Open = 1,
    /// Close requested or received, close handshake in progress.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl ReadyState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    /// Data may be written.
    #[inline]
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, ReadyState::Open)
    }

    /// The resource has reached its terminal state.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, ReadyState::Closed)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Atomically readable [`ReadyState`] that can only advance.
#[derive(Debug, Default)]
pub struct SharedReadyState(AtomicU8);

impl SharedReadyState {
    /// Start in `Connecting`.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(ReadyState::Connecting as u8))
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if it lies ahead of the current state. Returns
    /// whether the state changed.
    pub fn advance(&self, next: ReadyState) -> bool {
        let prev = self.0.fetch_max(next as u8, Ordering::AcqRel);
        prev < next as u8
    }

    /// Move from exactly `from` to `to`. Returns `false` if the state was
    /// anything else.
    pub fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
