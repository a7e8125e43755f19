//! Test harness utilities for resource integration tests.
//!
//! This module provides a scripted WebSocket server on a real TCP listener
//! and a recorder for resource callbacks.

#![allow(dead_code)]

mod events;
mod server;

pub use events::EventLog;
pub use server::{Behavior, Seen, TestServer, serve};
