//! Message-level connections.
//!
//! A [`Connection`] wraps a stream whose opening handshake has been done by
//! [`client_upgrade`] (or [`server_accept`] for local peers) and exchanges
//! whole messages. The resource backends split it into a
//! [`ConnectionReader`] and a [`ConnectionWriter`] so that reads and
//! writes are issued independently.

mod fragmenter;
mod role;
mod state;
mod upgrade;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use fragmenter::Fragments;
pub use role::Role;
pub use state::{ReadyState, SharedReadyState};
pub use upgrade::{client_upgrade, server_accept};
