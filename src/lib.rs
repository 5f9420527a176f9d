//! # wiremux
//!
//! A networking toolkit for multiplexing typed messages over length-prefixed
//! TCP frames, with a polling bridge for C-style non-blocking APIs.
//!
//! ## Pieces
//!
//! - **Results** ([`ErrorInfo`], [`Result`]): every fallible operation
//!   returns a result whose error carries a process-unique id, an error
//!   code, and accumulating diagnostic pairs.
//! - **Transport** ([`TcpClient`], [`TcpServer`]): TCP primitives with every
//!   teardown flavor mapped to one `ConnectionClosed` condition.
//! - **Protocol** ([`FrameReader`], [`PackCodec`], [`MessageRegistry`]):
//!   big-endian length-prefixed frames carrying
//!   `[name-length][name][version][body]` payloads, decoded through an
//!   explicit type registry.
//! - **Dispatch** ([`DispatchClient`]): one connection, many message types;
//!   inbound messages route to one-shot waiters, in-line handlers, or
//!   spawned handlers in fixed priority order.
//! - **Polling** ([`PollingEngine`]): a lazily-started worker thread that
//!   turns poll-until-ready native APIs into single-shot async completions.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use wiremux::{DispatchClient, MessageRegistry, PackCodec, WireMessage};
//!
//! #[derive(Serialize, Deserialize)]
//! struct EchoReq { value: String }
//! impl WireMessage for EchoReq { const TYPE_NAME: &'static str = "echo.Req"; }
//!
//! #[derive(Serialize, Deserialize)]
//! struct EchoRsp { value: String }
//! impl WireMessage for EchoRsp { const TYPE_NAME: &'static str = "echo.Rsp"; }
//!
//! #[tokio::main]
//! async fn main() -> wiremux::Result<()> {
//!     let mut registry = MessageRegistry::new();
//!     registry.register::<EchoReq>();
//!     registry.register::<EchoRsp>();
//!
//!     let codec = PackCodec::new(Arc::new(registry));
//!     let client = Arc::new(DispatchClient::connect(codec, "127.0.0.1:2000").await?);
//!
//!     let receive = tokio::spawn({
//!         let client = client.clone();
//!         async move { client.run().await }
//!     });
//!
//!     let rsp: EchoRsp = client
//!         .send_then_wait(&EchoReq { value: "hello".into() })
//!         .await?;
//!     println!("echoed: {}", rsp.value);
//!
//!     client.close().await?;
//!     receive.await.expect("receive loop panicked")
//! }
//! ```

pub mod error;
pub mod polling;
pub mod protocol;
pub mod transport;
pub mod url;

mod client;
mod task;
mod writer;

pub use client::{BoxFuture, ClientConfig, DispatchClient, MessageSender};
pub use error::{ErrorCode, ErrorInfo, Result};
pub use polling::{OwnerKey, PollOutcome, PollingEngine};
pub use protocol::{
    build_frame, Decoded, DynMessage, FrameReader, MessageRegistry, PackCodec, WireMessage,
    DEFAULT_MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
pub use task::spawn_logged;
pub use transport::{TcpClient, TcpServer};
pub use url::UrlParser;
pub use writer::WriterConfig;
