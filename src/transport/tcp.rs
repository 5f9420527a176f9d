//! TCP client with uniform close-condition mapping.
//!
//! Every way a connection can go away — clean EOF from the peer, a local
//! `disconnect`, an OS-level reset or abort — surfaces as the single
//! `ConnectionClosed` condition. Callers that need to tell these apart must
//! drop below this layer; receive loops treat the condition as a normal
//! termination signal.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::url::UrlParser;

/// Map an I/O error onto the crate taxonomy.
///
/// All teardown flavors collapse into `ConnectionClosed`; anything else is a
/// `ThirdParty` error carrying the OS message.
pub(crate) fn map_io_error(error: io::Error) -> ErrorInfo {
    use io::ErrorKind;

    match error.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected => ErrorInfo::new(ErrorCode::ConnectionClosed),
        _ => ErrorInfo::new(ErrorCode::ThirdParty).with_message(error.to_string()),
    }
}

/// Resolve the service piece of an address to a numeric port.
fn resolve_port(service: &str) -> Result<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Ok(port);
    }
    match service {
        "http" => Ok(80),
        "https" => Ok(443),
        _ => Err(ErrorInfo::new(ErrorCode::Parameter)
            .with_message("unknown service name")
            .add_pair("service", service)),
    }
}

/// A TCP connection, or the not-yet-connected shell of one.
///
/// # Example
///
/// ```no_run
/// use wiremux::TcpClient;
///
/// # async fn demo() -> wiremux::Result<()> {
/// let mut client = TcpClient::new();
/// client.connect("127.0.0.1:2000").await?;
///
/// client.write_all(b"ping").await?;
/// let mut reply = [0u8; 4];
/// client.read_exact(&mut reply).await?;
/// client.disconnect()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TcpClient {
    stream: Option<TcpStream>,
}

impl TcpClient {
    /// Create an unconnected client.
    pub fn new() -> Self {
        Self { stream: None }
    }

    /// Wrap an already-connected socket (e.g. one returned by
    /// [`TcpServer::accept`](crate::TcpServer::accept)).
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Whether a connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect to `[protocol://]host[:port][/path]`.
    ///
    /// The port is resolved per [`UrlParser::service`]; every address the
    /// host resolves to is tried in order.
    pub async fn connect(&mut self, url: &str) -> Result<()> {
        let parsed = UrlParser::parse(url)?;
        let port = resolve_port(parsed.service()).map_err(|e| e.add_pair("url", url))?;

        let addrs = tokio::net::lookup_host((parsed.host(), port))
            .await
            .map_err(|e| map_io_error(e).add_pair("url", url))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => map_io_error(e).add_pair("url", url),
            None => ErrorInfo::new(ErrorCode::ThirdParty)
                .with_message("host resolved to no addresses")
                .add_pair("url", url),
        })
    }

    /// Read exactly `buf.len()` bytes.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.read_exact(buf).await.map_err(map_io_error)?;
        Ok(())
    }

    /// Write all of `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data).await.map_err(map_io_error)?;
        stream.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    /// Drop the connection. An in-flight read on a split half of this socket
    /// will subsequently fail with `ConnectionClosed`.
    pub fn disconnect(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    /// Take the underlying socket, e.g. for splitting into halves.
    pub fn into_stream(self) -> Option<TcpStream> {
        self.stream
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        // Using a torn-down client reads exactly like a torn-down socket.
        self.stream
            .as_mut()
            .ok_or_else(|| ErrorInfo::new(ErrorCode::ConnectionClosed))
    }
}
