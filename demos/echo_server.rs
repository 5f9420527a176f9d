//! Echo server demo.
//!
//! Accepts connections and answers every `EchoReq` with an `EchoRsp`
//! carrying the same value. Pair with the `echo_client` demo:
//!
//! ```text
//! cargo run --example echo_server
//! cargo run --example echo_client
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wiremux::{DispatchClient, MessageRegistry, PackCodec, TcpServer, WireMessage};

#[derive(Serialize, Deserialize, Debug)]
struct EchoReq {
    value: String,
}
impl WireMessage for EchoReq {
    const TYPE_NAME: &'static str = "echo.Req";
}

#[derive(Serialize, Deserialize, Debug)]
struct EchoRsp {
    value: String,
}
impl WireMessage for EchoRsp {
    const TYPE_NAME: &'static str = "echo.Rsp";
}

fn codec() -> PackCodec {
    let mut registry = MessageRegistry::new();
    registry.register::<EchoReq>();
    registry.register::<EchoRsp>();
    PackCodec::new(Arc::new(registry))
}

#[tokio::main]
async fn main() -> wiremux::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = TcpServer::new();
    server.listen("127.0.0.1", 2000)?;
    tracing::info!("listening on 127.0.0.1:2000");

    loop {
        let socket = server.accept().await?;
        tracing::info!(peer = ?socket.peer_addr().ok(), "accepted connection");

        tokio::spawn(async move {
            let conn = DispatchClient::from_stream(codec(), socket);

            let reply = conn.sender();
            conn.add_co_message_callback::<EchoReq, _, _>(move |req| {
                let reply = reply.clone();
                async move {
                    tracing::info!(value = %req.value, "echoing");
                    reply.send(&EchoRsp { value: req.value }).await
                }
            });

            if let Err(error) = conn.run().await {
                tracing::warn!(error = %error, "connection ended with error");
            }
        });
    }
}
