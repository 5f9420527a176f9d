//! Wire protocol: length-prefixed frames and the typed message codec.
//!
//! On the wire, each frame is a big-endian `i32` payload length followed by
//! that many bytes. Inside a frame, a message payload is:
//!
//! ```text
//! ┌─────────────┬────────────┬────────────┬──────────────┐
//! │ name length │ type name  │ version    │ message body │
//! │ 2 bytes     │ N bytes    │ 4 bytes    │ remaining    │
//! │ u16 BE      │ UTF-8      │ i32 BE     │ bytes        │
//! └─────────────┴────────────┴────────────┴──────────────┘
//! ```
//!
//! [`FrameReader`] handles the outer layer, [`PackCodec`] the inner one, and
//! [`MessageRegistry`] maps type names back to concrete Rust types.

mod codec;
mod reader;
mod registry;

pub use codec::{PackCodec, PROTOCOL_VERSION};
pub use reader::{build_frame, frame_prefix, FrameReader, DEFAULT_MAX_FRAME_SIZE, LEN_PREFIX_SIZE};
pub use registry::{Decoded, DynMessage, MessageRegistry, WireMessage};
