//! Endpoint role.

/// Which end of the connection this endpoint is. Clients mask every frame
/// they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake.
    Client,
    /// Answers the handshake. Only used by local test peers.
    Server,
}

impl Role {
    /// Outgoing frames must carry a mask.
    #[inline]
    #[must_use]
    pub const fn must_mask(&self) -> bool {
        matches!(self, Role::Client)
    }
}
