//! Frame codec over async byte streams.
//!
//! [`WebSocketCodec`] owns a stream whose opening handshake has already
//! completed and turns it into a sequence of validated frames. It can be
//! split into a [`FrameReader`] and a [`FrameWriter`] so that a read and a
//! write may be outstanding at the same time.

mod framed;

pub use framed::{FrameReader, FrameWriter, WebSocketCodec};
