//! TCP accept side.

use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::map_io_error;
use crate::error::{ErrorCode, ErrorInfo, Result};

/// A listening socket handing out connections.
///
/// Accepted sockets are plain `TcpStream`s; wrap one in
/// [`TcpClient::from_stream`](crate::TcpClient::from_stream) for raw stream
/// use or hand it to
/// [`DispatchClient::from_stream`](crate::DispatchClient::from_stream) for
/// message dispatch.
///
/// # Example
///
/// ```no_run
/// use wiremux::TcpServer;
///
/// # async fn demo() -> wiremux::Result<()> {
/// let mut server = TcpServer::new();
/// server.listen("0.0.0.0", 2000)?;
/// loop {
///     let socket = server.accept().await?;
///     // hand `socket` to a per-connection task
///     # let _ = socket; break;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TcpServer {
    listener: Option<TcpListener>,
}

impl TcpServer {
    /// Create a server that is not yet listening.
    pub fn new() -> Self {
        Self { listener: None }
    }

    /// Bind and listen on `ip:port` with address reuse enabled.
    ///
    /// Calling `listen` while already listening is a no-op, matching the
    /// idempotent open-once contract.
    pub fn listen(&mut self, ip: &str, port: u16) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }

        let ip: IpAddr = ip.parse().map_err(|_| {
            ErrorInfo::new(ErrorCode::Parameter)
                .with_message("invalid listen address")
                .add_pair("ip", ip)
        })?;
        let addr = SocketAddr::new(ip, port);

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(map_io_error)?;
        socket.set_reuseaddr(true).map_err(map_io_error)?;
        socket
            .bind(addr)
            .map_err(|e| map_io_error(e).add_pair("addr", addr))?;

        let listener = socket.listen(1024).map_err(map_io_error)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<TcpStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| ErrorInfo::new(ErrorCode::Parameter).with_message("not listening"))?;

        let (stream, _peer) = listener.accept().await.map_err(map_io_error)?;
        Ok(stream)
    }

    /// The bound address, useful when listening on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| ErrorInfo::new(ErrorCode::Parameter).with_message("not listening"))?;
        listener.local_addr().map_err(map_io_error)
    }

    /// Stop listening. Already-accepted connections are unaffected.
    pub fn close(&mut self) -> Result<()> {
        self.listener = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TcpClient;

    #[tokio::test]
    async fn test_listen_accept_connect() {
        let mut server = TcpServer::new();
        server.listen("127.0.0.1", 0).unwrap();
        let port = server.local_addr().unwrap().port();

        let client = tokio::spawn(async move {
            let mut client = TcpClient::new();
            client.connect(&format!("127.0.0.1:{port}")).await.unwrap();
            client.write_all(b"hi").await.unwrap();
        });

        let mut socket = server.accept().await.unwrap();
        let mut buf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut socket, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"hi");

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_twice_is_noop() {
        let mut server = TcpServer::new();
        server.listen("127.0.0.1", 0).unwrap();
        let first = server.local_addr().unwrap();
        server.listen("127.0.0.1", 0).unwrap();
        assert_eq!(server.local_addr().unwrap(), first);
    }

    #[tokio::test]
    async fn test_accept_without_listen_fails() {
        let server = TcpServer::new();
        let err = server.accept().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
    }

    #[test]
    fn test_invalid_ip_rejected() {
        let mut server = TcpServer::new();
        let err = server.listen("not-an-ip", 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Parameter);
        assert_eq!(err.values("ip").collect::<Vec<_>>(), vec!["not-an-ip"]);
    }
}
