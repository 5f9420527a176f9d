//! TCP transport primitives.
//!
//! [`TcpClient`] is the byte-stream capability every higher layer consumes:
//! connect by address string, exact-size reads, full writes, synchronous
//! disconnect. [`TcpServer`] is the accept side; each accepted socket can be
//! handed to [`DispatchClient::from_stream`](crate::DispatchClient::from_stream)
//! or wrapped in a `TcpClient` directly.

mod server;
mod tcp;

pub use server::TcpServer;
pub use tcp::TcpClient;

pub(crate) use tcp::map_io_error;
