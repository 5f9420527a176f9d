//! Typed message dispatch over one TCP connection.
//!
//! [`DispatchClient`] owns a connection, a [`FrameReader`] and a
//! [`PackCodec`], and multiplexes typed messages over the single stream. The
//! receive loop ([`run`](DispatchClient::run)) decodes each inbound frame and
//! routes it by message type, consulting in fixed priority order:
//!
//! 1. a pending one-shot waiter ([`wait`](DispatchClient::wait),
//!    [`send_then_wait`](DispatchClient::send_then_wait)) — consumed and
//!    removed on the first matching message;
//! 2. a persistent handler
//!    ([`add_message_callback`](DispatchClient::add_message_callback)) —
//!    invoked in-line, blocking the loop for its duration;
//! 3. a persistent coroutine handler
//!    ([`add_co_message_callback`](DispatchClient::add_co_message_callback))
//!    — each matching message spawns an independent task.
//!
//! A message matching none of the three is dropped. Undecodable frames are
//! logged and skipped; they never tear down the connection.
//!
//! There is no built-in timeout: wrap any operation in
//! `tokio::time::timeout` to impose a deadline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use wiremux::{DispatchClient, MessageRegistry, PackCodec, WireMessage};
//!
//! #[derive(Serialize, Deserialize)]
//! struct HelloReq { value: String }
//! impl WireMessage for HelloReq { const TYPE_NAME: &'static str = "demo.HelloReq"; }
//!
//! #[derive(Serialize, Deserialize)]
//! struct HelloRsp { value: String }
//! impl WireMessage for HelloRsp { const TYPE_NAME: &'static str = "demo.HelloRsp"; }
//!
//! # async fn demo() -> wiremux::Result<()> {
//! let mut registry = MessageRegistry::new();
//! registry.register::<HelloReq>();
//! registry.register::<HelloRsp>();
//!
//! let codec = PackCodec::new(Arc::new(registry));
//! let client = Arc::new(DispatchClient::connect(codec, "127.0.0.1:2000").await?);
//!
//! let receive = tokio::spawn({
//!     let client = client.clone();
//!     async move { client.run().await }
//! });
//!
//! let rsp: HelloRsp = client
//!     .send_then_wait(&HelloReq { value: "hello".into() })
//!     .await?;
//! println!("{}", rsp.value);
//!
//! client.close().await?;
//! receive.await.unwrap()?;
//! # Ok(())
//! # }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, ErrorInfo, Result};
use crate::protocol::{Decoded, DynMessage, FrameReader, PackCodec, WireMessage};
use crate::task::spawn_logged;
use crate::transport::TcpClient;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Boxed future returned by coroutine handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type SyncCallback = Arc<dyn Fn(&DynMessage) + Send + Sync>;
type SpawnedCallback = Arc<dyn Fn(DynMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The persistent consumer slot for one message type: in-line or spawned,
/// never both.
enum Handler {
    Sync(SyncCallback),
    Spawned(SpawnedCallback),
}

/// Routing state for one message type.
#[derive(Default)]
struct RouteSlot {
    waiter: Option<oneshot::Sender<DynMessage>>,
    handler: Option<Handler>,
}

impl RouteSlot {
    fn is_empty(&self) -> bool {
        self.waiter.is_none() && self.handler.is_none()
    }
}

/// What the route lookup decided to do with a message. Resolved under the
/// table lock, acted on after it is released, so user callbacks never run
/// while the lock is held.
enum Delivery {
    Waiter(oneshot::Sender<DynMessage>),
    Sync(SyncCallback),
    Spawned(SpawnedCallback),
    Drop,
}

/// Configuration for a dispatch client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Cap on inbound frame payloads; `None` uses the reader default.
    pub max_frame_size: Option<usize>,
    /// Outbound writer-task tuning.
    pub writer: WriterConfig,
}

/// Encode and queue one message on the outbound path.
async fn send_message<M: WireMessage>(
    codec: &PackCodec,
    writer: &WriterHandle,
    message: &M,
) -> Result<()> {
    let payload = codec.encode(message)?;
    if payload.is_empty() {
        return Err(ErrorInfo::new(ErrorCode::ThirdParty)
            .with_message("encoder produced an empty buffer")
            .add_pair("message_type", M::TYPE_NAME));
    }

    let frame = OutboundFrame::new(Bytes::from(payload))
        .map_err(|e| e.add_pair("message_type", M::TYPE_NAME))?;
    writer.send(frame).await
}

/// A cheap, cloneable handle for sending messages on a client's connection.
///
/// Handlers that need to reply should capture one of these (via
/// [`DispatchClient::sender`]) instead of the client itself; the handle
/// holds no route table or reader, so a handler owning it does not keep the
/// whole client alive.
#[derive(Clone)]
pub struct MessageSender {
    codec: PackCodec,
    writer: WriterHandle,
}

impl MessageSender {
    /// Encode and send one message.
    pub async fn send<M: WireMessage>(&self, message: &M) -> Result<()> {
        send_message(&self.codec, &self.writer, message).await
    }
}

/// A typed-message client over one TCP connection.
///
/// Registration and sending take `&self` and may be called from any task;
/// wrap the client in an `Arc` to drive [`run`](Self::run) concurrently
/// with request/response traffic.
pub struct DispatchClient {
    codec: PackCodec,
    routes: Mutex<HashMap<TypeId, RouteSlot>>,
    reader: Mutex<Option<FrameReader<OwnedReadHalf>>>,
    writer: WriterHandle,
    // Keeps the writer task owned for its whole life.
    _writer_task: JoinHandle<Result<()>>,
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient").finish_non_exhaustive()
    }
}

impl DispatchClient {
    /// Connect to `[protocol://]host[:port]` and build a client around the
    /// resulting stream.
    pub async fn connect(codec: PackCodec, url: &str) -> Result<Self> {
        Self::connect_with(codec, url, ClientConfig::default()).await
    }

    /// [`connect`](Self::connect) with explicit configuration.
    pub async fn connect_with(codec: PackCodec, url: &str, config: ClientConfig) -> Result<Self> {
        let mut tcp = TcpClient::new();
        tcp.connect(url).await?;
        let Some(stream) = tcp.into_stream() else {
            return Err(ErrorInfo::new(ErrorCode::Internal)
                .with_message("connect succeeded without a stream"));
        };
        Ok(Self::from_stream_with(codec, stream, config))
    }

    /// Build a client around an already-connected socket (e.g. one returned
    /// by [`TcpServer::accept`](crate::TcpServer::accept)).
    pub fn from_stream(codec: PackCodec, stream: TcpStream) -> Self {
        Self::from_stream_with(codec, stream, ClientConfig::default())
    }

    /// [`from_stream`](Self::from_stream) with explicit configuration.
    pub fn from_stream_with(codec: PackCodec, stream: TcpStream, config: ClientConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, config.writer);

        let reader = match config.max_frame_size {
            Some(max) => FrameReader::with_max_frame_size(read_half, max),
            None => FrameReader::new(read_half),
        };

        Self {
            codec,
            routes: Mutex::new(HashMap::new()),
            reader: Mutex::new(Some(reader)),
            writer,
            _writer_task: writer_task,
        }
    }

    /// The codec this client encodes and decodes with.
    pub fn codec(&self) -> &PackCodec {
        &self.codec
    }

    /// Run the receive loop until the connection goes away.
    ///
    /// Returns `Ok(())` when the underlying read reports the connection
    /// closed (the normal termination signal, whether the peer closed or
    /// [`close`](Self::close) was called locally); any other transport error
    /// is returned as-is. On exit, pending waiters resolve with
    /// `ConnectionClosed`.
    pub async fn run(&self) -> Result<()> {
        let mut reader = self.lock_reader().take().ok_or_else(|| {
            ErrorInfo::new(ErrorCode::Internal)
                .with_message("receive loop already running or finished")
        })?;

        let result = self.receive_loop(&mut reader).await;

        // Unblock everyone still waiting on this connection.
        let mut routes = self.lock_routes();
        for slot in routes.values_mut() {
            slot.waiter = None;
        }
        routes.retain(|_, slot| !slot.is_empty());
        drop(routes);

        match result {
            Err(e) if e.code() == ErrorCode::ConnectionClosed => Ok(()),
            other => other,
        }
    }

    async fn receive_loop(&self, reader: &mut FrameReader<OwnedReadHalf>) -> Result<()> {
        loop {
            let frame = reader.read().await?;

            let decoded = match self.codec.decode(&frame) {
                Ok(decoded) => decoded,
                Err(error) => {
                    // A malformed frame is recoverable noise, not fatal.
                    tracing::warn!(error = %error, "dropping undecodable frame");
                    continue;
                }
            };

            self.dispatch(decoded);
        }
    }

    /// Route one decoded message. Priority: waiter, then handler.
    fn dispatch(&self, decoded: Decoded) {
        let delivery = {
            let mut routes = self.lock_routes();
            match routes.get_mut(&decoded.type_id) {
                Some(slot) => {
                    if let Some(waiter) = slot.waiter.take() {
                        Delivery::Waiter(waiter)
                    } else {
                        match &slot.handler {
                            Some(Handler::Sync(f)) => Delivery::Sync(f.clone()),
                            Some(Handler::Spawned(f)) => Delivery::Spawned(f.clone()),
                            None => Delivery::Drop,
                        }
                    }
                }
                None => Delivery::Drop,
            }
        };

        match delivery {
            Delivery::Waiter(waiter) => {
                if waiter.send(decoded.message).is_err() {
                    tracing::debug!(
                        message_type = decoded.type_name,
                        "waiter abandoned before delivery"
                    );
                }
            }
            Delivery::Sync(callback) => callback(&decoded.message),
            Delivery::Spawned(callback) => {
                spawn_logged(callback(decoded.message));
            }
            Delivery::Drop => {
                tracing::debug!(
                    message_type = decoded.type_name,
                    "no consumer registered, dropping message"
                );
            }
        }
    }

    /// Encode and send one message.
    pub async fn send<M: WireMessage>(&self, message: &M) -> Result<()> {
        send_message(&self.codec, &self.writer, message).await
    }

    /// A sending handle for use inside handlers and other tasks.
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            codec: self.codec.clone(),
            writer: self.writer.clone(),
        }
    }

    /// Send `message`, then await the first inbound message of type `R`.
    ///
    /// The waiter is registered before the send goes out, so a response
    /// arriving immediately cannot slip past unobserved.
    pub async fn send_then_wait<M: WireMessage, R: WireMessage>(&self, message: &M) -> Result<R> {
        let rx = self.register_waiter::<R>()?;

        if let Err(error) = self.send(message).await {
            self.clear_waiter::<R>();
            return Err(error);
        }

        Self::await_waiter::<R>(rx).await
    }

    /// Suspend until the receive loop delivers a message of type `R`.
    ///
    /// At most one waiter per message type may be outstanding; a second
    /// concurrent `wait` for the same type fails with a `Parameter` error
    /// rather than silently displacing the first.
    pub async fn wait<R: WireMessage>(&self) -> Result<R> {
        let rx = self.register_waiter::<R>()?;
        Self::await_waiter::<R>(rx).await
    }

    /// Register a persistent handler invoked in-line by the receive loop.
    ///
    /// The loop blocks for the handler's duration, which keeps handling
    /// ordered with respect to subsequent messages. Registering a second
    /// handler (of either kind) for a type that already has one is logged
    /// as an error and replaces the earlier registration.
    pub fn add_message_callback<M, F>(&self, callback: F)
    where
        M: WireMessage,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let shim: SyncCallback = Arc::new(move |message: &DynMessage| {
            match message.downcast_ref::<M>() {
                Some(typed) => callback(typed),
                None => tracing::error!(
                    message_type = M::TYPE_NAME,
                    "routed message failed downcast"
                ),
            }
        });
        self.install_handler::<M>(Handler::Sync(shim));
    }

    /// Register a persistent handler spawned as an independent task per
    /// matching message.
    ///
    /// The receive loop does not wait for it; completion and failure are
    /// observed only via logging.
    pub fn add_co_message_callback<M, F, Fut>(&self, callback: F)
    where
        M: WireMessage,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shim: SpawnedCallback = Arc::new(move |message: DynMessage| {
            match message.downcast::<M>() {
                Ok(typed) => Box::pin(callback(*typed)) as BoxFuture<'static, Result<()>>,
                Err(_) => Box::pin(async {
                    Err(ErrorInfo::new(ErrorCode::Internal)
                        .with_message("routed message failed downcast")
                        .add_pair("message_type", M::TYPE_NAME))
                }),
            }
        });
        self.install_handler::<M>(Handler::Spawned(shim));
    }

    /// Shut down the write side of the connection.
    ///
    /// The in-flight read in [`run`](Self::run) is not interrupted directly;
    /// it fails with `ConnectionClosed` once the peer finishes closing,
    /// which `run` reports as a normal `Ok(())` exit.
    pub async fn close(&self) -> Result<()> {
        self.writer.close().await
    }

    /// Frames queued on the outbound path, for observability.
    pub fn pending_writes(&self) -> usize {
        self.writer.pending_count()
    }

    fn install_handler<M: WireMessage>(&self, handler: Handler) {
        let mut routes = self.lock_routes();
        let slot = routes.entry(TypeId::of::<M>()).or_default();
        if slot.handler.is_some() {
            tracing::error!(
                message_type = M::TYPE_NAME,
                "duplicate message callback registration, replacing earlier handler"
            );
        }
        slot.handler = Some(handler);
    }

    fn register_waiter<R: WireMessage>(&self) -> Result<oneshot::Receiver<DynMessage>> {
        let mut routes = self.lock_routes();
        let slot = routes.entry(TypeId::of::<R>()).or_default();
        if slot.waiter.is_some() {
            return Err(ErrorInfo::new(ErrorCode::Parameter)
                .with_message("a waiter is already pending for this message type")
                .add_pair("message_type", R::TYPE_NAME));
        }
        let (tx, rx) = oneshot::channel();
        slot.waiter = Some(tx);
        Ok(rx)
    }

    fn clear_waiter<R: WireMessage>(&self) {
        let mut routes = self.lock_routes();
        if let Some(slot) = routes.get_mut(&TypeId::of::<R>()) {
            slot.waiter = None;
            if slot.is_empty() {
                routes.remove(&TypeId::of::<R>());
            }
        }
    }

    async fn await_waiter<R: WireMessage>(rx: oneshot::Receiver<DynMessage>) -> Result<R> {
        match rx.await {
            Ok(message) => match message.downcast::<R>() {
                Ok(typed) => Ok(*typed),
                Err(_) => Err(ErrorInfo::new(ErrorCode::Internal)
                    .with_message("delivered message failed downcast")
                    .add_pair("message_type", R::TYPE_NAME)),
            },
            Err(_) => Err(ErrorInfo::new(ErrorCode::ConnectionClosed)
                .with_message("receive loop ended before a matching message arrived")),
        }
    }

    fn lock_routes(&self) -> MutexGuard<'_, HashMap<TypeId, RouteSlot>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reader(&self) -> MutexGuard<'_, Option<FrameReader<OwnedReadHalf>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
