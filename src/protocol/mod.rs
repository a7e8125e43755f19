//! RFC 6455 building blocks: frames, masking, handshake and reassembly.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;
pub mod validation;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{Frame, FrameHeader};
pub use handshake::{
    ClientHandshake, HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key,
    is_reserved_header,
};
pub use mask::apply_mask;
pub use opcode::OpCode;
pub use utf8::Utf8Validator;
pub use validation::FrameValidator;
