//! Echo client demo.
//!
//! Connects to the `echo_server` demo, sends an `EchoReq` and waits for the
//! matching `EchoRsp` on the same connection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wiremux::{DispatchClient, MessageRegistry, PackCodec, WireMessage};

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

    let client = Arc::new(DispatchClient::connect(codec(), "127.0.0.1:2000").await?);

    let receive = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });

    let rsp: EchoRsp = client
        .send_then_wait(&EchoReq {
            value: "hello".into(),
        })
        .await?;
    tracing::info!(value = %rsp.value, "got echo");

    client.close().await?;
    receive.await.expect("receive loop panicked")
}
