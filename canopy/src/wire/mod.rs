//! # Wire Protocol
//!
//! Everything that crosses a link between two processes.
//!
//! ## Key Concepts
//! - [`Message`]: the typed envelope (send, service lookup, reply, error,
//!   system)
//! - Framing: a 4-byte big-endian length prefix followed by the encoded
//!   list of envelopes
//! - Handshake: `HELLO` / `HELLO_OK` system messages negotiating exposed
//!   services before any call traffic is accepted
//! - [`NetworkPolicy`]: which peers may connect at all

pub mod frame;
pub mod handshake;
pub mod message;
pub mod policy;

pub use frame::{FrameDecoder, encode_frame};
pub use handshake::{Hello, SystemKind};
pub use message::Message;
pub use policy::NetworkPolicy;
