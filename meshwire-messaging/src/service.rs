//! The messaging service: every node's client and server in one object.
//!
//! Outbound requests flow facade → pool lookup (or loopback) → per-channel
//! client connection; inbound frames flow reader task → dispatcher → handler
//! or pending callback. Connections are keyed by channel id in maps owned
//! here, which breaks the ownership cycle between a channel and the
//! connection that writes to it; channel teardown drives removal.

use crate::callback::SWEEP_INTERVAL;
use crate::channel::Channel;
use crate::config::MessagingConfig;
use crate::connection::{
    LocalClientConnection, RemoteClientConnection, RemoteServerConnection, ServerConnection,
};
use crate::error::MessagingError;
use crate::executor::{self, Executor};
use crate::handler::{HandlerRegistry, MessageHandler};
use crate::pool::{ChannelFuture, ChannelPool};
use crate::stream::MaybeTlsStream;
use crate::tls::{self, TlsContext};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use meshwire_protocol::{
    hash32, Address, Decoder, Handshake, ProtocolMessage, ProtocolVersion, Request, Status,
    HANDSHAKE_LEN,
};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Socket send/receive buffer size on both roles.
const SOCKET_BUFFER_SIZE: u32 = 1024 * 1024;
/// Outbound connect deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Listen backlog.
const BACKLOG: u32 = 128;
/// Read chunk size for channel reader tasks.
const READ_BUFFER_SIZE: usize = 8192;

/// Peer-to-peer messaging service.
///
/// Cheap to clone; all clones drive the same node.
#[derive(Clone)]
pub struct MessagingService {
    inner: Arc<Inner>,
}

struct Inner {
    preamble: i32,
    address: Address,
    config: MessagingConfig,
    started: AtomicBool,
    handlers: Arc<HandlerRegistry>,
    local_client: LocalClientConnection,
    client_connections: Mutex<HashMap<u64, Arc<RemoteClientConnection>>>,
    server_connections: Mutex<HashMap<u64, Arc<RemoteServerConnection>>>,
    pools: Mutex<HashMap<Address, Arc<ChannelPool>>>,
    tls: Mutex<Option<TlsContext>>,
    message_ids: AtomicU64,
    channel_ids: AtomicU64,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessagingService {
    /// Creates a node for `cluster_name` answering at `address`.
    ///
    /// The cluster name drives the handshake preamble: nodes from different
    /// clusters refuse each other's connections.
    pub fn new(
        cluster_name: impl AsRef<str>,
        address: Address,
        config: MessagingConfig,
    ) -> Self {
        let handlers = Arc::new(HandlerRegistry::new());
        let (shutdown, _) = broadcast::channel(4);
        Self {
            inner: Arc::new(Inner {
                preamble: hash32(cluster_name.as_ref()),
                local_client: LocalClientConnection::new(address.clone(), handlers.clone()),
                address,
                config,
                started: AtomicBool::new(false),
                handlers,
                client_connections: Mutex::new(HashMap::new()),
                server_connections: Mutex::new(HashMap::new()),
                pools: Mutex::new(HashMap::new()),
                tls: Mutex::new(None),
                message_ids: AtomicU64::new(0),
                channel_ids: AtomicU64::new(0),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The node's return address.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Loads TLS material if configured, binds the server and starts the
    /// timeout sweeper. Idempotent.
    pub async fn start(&self) -> Result<(), MessagingError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("already running at local address: {}", self.inner.address);
            return Ok(());
        }
        match self.inner.start_inner().await {
            Ok(()) => {
                tracing::info!("started");
                Ok(())
            }
            Err(error) => {
                self.inner.started.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    /// Stops the acceptors, the sweeper and every open channel. Idempotent:
    /// only the first call does any work.
    ///
    /// In-flight callbacks are not failed proactively; they complete
    /// exceptionally as their channels close.
    pub async fn stop(&self) {
        if self
            .inner
            .started
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.inner.shutdown.send(());
            let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
            for task in tasks {
                let _ = task.await;
            }
            tracing::info!("stopped");
        }
    }

    /// Sends a fire-and-forget message; resolves once the frame is written.
    pub async fn send_async(
        &self,
        address: Address,
        subject: &str,
        payload: Bytes,
    ) -> Result<(), MessagingError> {
        let request = self.inner.next_request(subject, payload);
        if address == self.inner.address {
            return self.inner.local_client.send_async(request);
        }

        let channel = self.inner.get_channel(&address, subject).await?;
        let connection = self.inner.get_or_create_client_connection(&channel);
        match connection.send_async(request).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.inner.handle_send_fault(&channel, &error).await;
                Err(error)
            }
        }
    }

    /// Sends a request and awaits the reply, with the adaptive timeout and
    /// inline completion.
    pub async fn send_and_receive(
        &self,
        address: Address,
        subject: &str,
        payload: Bytes,
    ) -> Result<Bytes, MessagingError> {
        self.send_and_receive_with(address, subject, payload, None, executor::direct())
            .await
    }

    /// Sends a request and awaits the reply.
    ///
    /// `timeout: None` selects the adaptive timeout. Completion is
    /// dispatched through `executor`, so transport tasks never run caller
    /// code; if the executor rejects the completion task, the rejection is
    /// logged and this future never resolves.
    pub async fn send_and_receive_with(
        &self,
        address: Address,
        subject: &str,
        payload: Bytes,
        timeout: Option<Duration>,
        executor: Arc<dyn Executor>,
    ) -> Result<Bytes, MessagingError> {
        let request = self.inner.next_request(subject, payload);
        let result = if address == self.inner.address {
            self.inner.local_client.send_and_receive(request, timeout).await
        } else {
            self.inner
                .send_and_receive_remote(&address, request, timeout)
                .await
        };
        dispatch_completion(executor, result).await
    }

    /// Registers a fire-and-forget consumer. The consumer runs on
    /// `executor`; nothing is replied.
    pub fn register_consumer<F>(&self, subject: &str, consumer: F, executor: Arc<dyn Executor>)
    where
        F: Fn(Address, Bytes) + Send + Sync + 'static,
    {
        let consumer = Arc::new(consumer);
        let entry: MessageHandler = Arc::new(move |request, _connection| {
            let consumer = consumer.clone();
            let accepted = executor.execute(Box::new(move || {
                consumer(request.sender, request.payload);
            }));
            if !accepted {
                tracing::warn!("unable to dispatch message due to rejected executor task");
            }
        });
        self.inner.handlers.insert(subject, entry);
    }

    /// Registers a synchronous handler whose return value becomes the reply
    /// payload. A panicking handler produces a handler-exception reply; the
    /// connection stays usable.
    pub fn register_handler<F>(&self, subject: &str, handler: F, executor: Arc<dyn Executor>)
    where
        F: Fn(Address, Bytes) -> Bytes + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let entry: MessageHandler = Arc::new(move |request, connection| {
            let handler = handler.clone();
            let accepted = executor.execute(Box::new(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler(request.sender.clone(), request.payload.clone())
                }));
                match result {
                    Ok(payload) => connection.reply(&request, Status::Ok, Some(payload)),
                    Err(_) => {
                        tracing::warn!(
                            "an error occurred in a message handler for {}",
                            request.subject
                        );
                        connection.reply(&request, Status::ErrorHandlerException, None);
                    }
                }
            }));
            if !accepted {
                tracing::warn!("unable to dispatch message due to rejected executor task");
            }
        });
        self.inner.handlers.insert(subject, entry);
    }

    /// Registers an asynchronous handler. A failed handler future produces
    /// a handler-exception reply.
    pub fn register_async_handler<F, Fut>(&self, subject: &str, handler: F)
    where
        F: Fn(Address, Bytes) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Bytes, Box<dyn std::error::Error + Send + Sync>>>
            + Send
            + 'static,
    {
        let handler = Arc::new(handler);
        let entry: MessageHandler = Arc::new(move |request, connection| {
            let future = handler(request.sender.clone(), request.payload.clone());
            tokio::spawn(async move {
                match future.await {
                    Ok(payload) => connection.reply(&request, Status::Ok, Some(payload)),
                    Err(error) => {
                        tracing::warn!(
                            "an error occurred in a message handler for {}: {}",
                            request.subject,
                            error
                        );
                        connection.reply(&request, Status::ErrorHandlerException, None);
                    }
                }
            });
        });
        self.inner.handlers.insert(subject, entry);
    }

    /// Removes the handler for a subject, if any.
    pub fn unregister_handler(&self, subject: &str) {
        self.inner.handlers.remove(subject);
    }
}

/// Routes a finished result through the caller's executor.
async fn dispatch_completion<T: Send + 'static>(
    executor: Arc<dyn Executor>,
    result: Result<T, MessagingError>,
) -> Result<T, MessagingError> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let accepted = executor.execute(Box::new(move || {
        let _ = tx.send(result);
    }));
    if !accepted {
        tracing::warn!("executor rejected completion task; leaving future incomplete");
        return std::future::pending().await;
    }
    match rx.await {
        Ok(result) => result,
        // The executor dropped the task without running it; same contract
        // as a rejection.
        Err(_) => std::future::pending().await,
    }
}

impl Inner {
    fn next_request(&self, subject: &str, payload: Bytes) -> Request {
        let id = self.message_ids.fetch_add(1, Ordering::SeqCst) + 1;
        Request::new(id, self.address.clone(), subject, payload)
    }

    // ---- lifecycle -------------------------------------------------------

    async fn start_inner(self: &Arc<Self>) -> Result<(), MessagingError> {
        if self.config.tls.enabled {
            let context = tls::create_tls_context(&self.config.tls)?;
            *self.tls.lock() = Some(context);
            if let Some(key_store) = &self.config.tls.key_store {
                tracing::info!("loaded cluster key store from: {}", key_store.display());
            }
        }

        let port = self.config.port.unwrap_or(self.address.port);
        let interfaces = if self.config.interfaces.is_empty() {
            vec!["0.0.0.0".to_string()]
        } else {
            self.config.interfaces.clone()
        };

        let mut tasks = Vec::new();
        for interface in &interfaces {
            let listener = self.bind(interface, port).await?;
            tracing::info!(
                "TCP server listening for connections on {}:{}",
                interface,
                port
            );
            tasks.push(self.spawn_acceptor(listener));
        }
        tasks.push(self.spawn_sweeper());
        *self.tasks.lock() = tasks;
        Ok(())
    }

    async fn bind(&self, interface: &str, port: u16) -> Result<TcpListener, MessagingError> {
        let addr = resolve(interface, port).await?;
        let bound = (|| -> std::io::Result<TcpListener> {
            let socket = new_socket(&addr)?;
            socket.set_reuseaddr(true)?;
            socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
            socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
            socket.set_keepalive(true)?;
            socket.bind(addr)?;
            socket.listen(BACKLOG)
        })();
        bound.map_err(|e| {
            tracing::warn!(
                "failed to bind TCP server to {}:{} due to {}",
                interface,
                port,
                e
            );
            MessagingError::Startup(format!(
                "failed to bind TCP server to {}:{}: {}",
                interface, port, e
            ))
        })
    }

    fn spawn_acceptor(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let inner = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => inner.clone().spawn_server_pipeline(stream, peer),
                        Err(error) => tracing::error!("accept error: {}", error),
                    },
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let inner = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.timeout_all_callbacks(),
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// One sweep over every client connection's callback table.
    fn timeout_all_callbacks(&self) {
        self.local_client.sweep();
        let connections: Vec<Arc<RemoteClientConnection>> =
            self.client_connections.lock().values().cloned().collect();
        for connection in connections {
            connection.sweep();
        }
    }

    // ---- server side -----------------------------------------------------

    fn spawn_server_pipeline(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        tokio::spawn(async move {
            stream.set_nodelay(true).ok();

            let acceptor = self.tls.lock().as_ref().map(|ctx| ctx.acceptor.clone());
            let mut stream = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => MaybeTlsStream::TlsServer { stream: tls_stream },
                    Err(error) => {
                        tracing::warn!("[{}] TLS handshake failed: {}", peer, error);
                        return;
                    }
                },
                None => MaybeTlsStream::Plain { stream },
            };

            let tls_status = if stream.is_tls() { " (TLS)" } else { "" };
            tracing::debug!("[{}] client connected{}", peer, tls_status);

            let version = match self.server_handshake(&mut stream, peer).await {
                Ok(Some(version)) => version,
                Ok(None) => return,
                Err(error) => {
                    tracing::debug!("[{}] handshake failed: {}", peer, error);
                    return;
                }
            };

            let (read_half, write_half) = tokio::io::split(stream);
            let channel = Arc::new(Channel::new(
                self.next_channel_id(),
                peer,
                version,
                write_half,
            ));
            self.spawn_reader(channel, read_half);
        });
    }

    /// Server half of the handshake: verify the preamble, negotiate the
    /// version and echo it back. `Ok(None)` means the connection must be
    /// dropped silently.
    async fn server_handshake(
        &self,
        stream: &mut MaybeTlsStream,
        peer: SocketAddr,
    ) -> Result<Option<ProtocolVersion>, MessagingError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        let handshake = Handshake::decode(&buf);

        if handshake.preamble != self.preamble {
            tracing::warn!("[{}] received invalid handshake, closing connection", peer);
            return Ok(None);
        }
        let Some(version) = ProtocolVersion::negotiate(handshake.version) else {
            tracing::warn!("[{}] failed to negotiate version, closing connection", peer);
            return Ok(None);
        };

        stream
            .write_all(&Handshake::new(self.preamble, version).encode())
            .await?;
        Ok(Some(version))
    }

    // ---- channel reader & dispatch ---------------------------------------

    fn spawn_reader(self: &Arc<Self>, channel: Arc<Channel>, mut reader: ReadHalf<MaybeTlsStream>) {
        let inner = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut decoder = Decoder::new(channel.version());
            let mut buf = [0u8; READ_BUFFER_SIZE];
            'read: loop {
                tokio::select! {
                    result = reader.read(&mut buf) => match result {
                        Ok(0) => {
                            tracing::debug!("channel {} closed by peer {}", channel.id(), channel.peer());
                            break 'read;
                        }
                        Ok(n) => {
                            decoder.extend(&buf[..n]);
                            loop {
                                match decoder.decode() {
                                    Ok(Some(message)) => inner.dispatch_inbound(&channel, message),
                                    Ok(None) => break,
                                    Err(error) => {
                                        tracing::error!(
                                            "exception inside channel handling pipeline on channel {}: {}",
                                            channel.id(),
                                            error
                                        );
                                        break 'read;
                                    }
                                }
                            }
                        }
                        Err(error) => {
                            tracing::debug!("read error on channel {}: {}", channel.id(), error);
                            break 'read;
                        }
                    },
                    _ = shutdown.recv() => break 'read,
                }
            }
            inner.teardown_channel(&channel).await;
        });
    }

    fn dispatch_inbound(self: &Arc<Self>, channel: &Arc<Channel>, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Request(request) => {
                let connection = self.get_or_create_server_connection(channel);
                self.dispatch_request(request, connection);
            }
            ProtocolMessage::Reply(reply) => {
                let connection = self.get_or_create_client_connection(channel);
                connection.dispatch(reply);
            }
        }
    }

    fn dispatch_request(&self, request: Request, connection: Arc<RemoteServerConnection>) {
        match self.handlers.get(&request.subject) {
            Some(handler) => {
                tracing::trace!(
                    "{} - received message type {} from {}",
                    self.address,
                    request.subject,
                    request.sender
                );
                handler(request, connection);
            }
            None => {
                tracing::debug!(
                    "{} - no handler for message type {} from {}",
                    self.address,
                    request.subject,
                    request.sender
                );
                connection.reply(&request, Status::ErrorNoHandler, None);
            }
        }
    }

    /// Removes the channel's connections and fails its pending callbacks.
    async fn teardown_channel(&self, channel: &Arc<Channel>) {
        channel.close().await;
        let client = self.client_connections.lock().remove(&channel.id());
        if let Some(connection) = client {
            connection.close();
        }
        self.server_connections.lock().remove(&channel.id());
    }

    fn get_or_create_client_connection(
        &self,
        channel: &Arc<Channel>,
    ) -> Arc<RemoteClientConnection> {
        self.client_connections
            .lock()
            .entry(channel.id())
            .or_insert_with(|| Arc::new(RemoteClientConnection::new(channel.clone())))
            .clone()
    }

    fn get_or_create_server_connection(
        &self,
        channel: &Arc<Channel>,
    ) -> Arc<RemoteServerConnection> {
        self.server_connections
            .lock()
            .entry(channel.id())
            .or_insert_with(|| Arc::new(RemoteServerConnection::new(channel.clone())))
            .clone()
    }

    fn next_channel_id(&self) -> u64 {
        self.channel_ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ---- client side -----------------------------------------------------

    async fn send_and_receive_remote(
        self: &Arc<Self>,
        address: &Address,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError> {
        let channel = self.get_channel(address, &request.subject).await?;
        let connection = self.get_or_create_client_connection(&channel);
        match connection.send_and_receive(request, timeout).await {
            Ok(payload) => Ok(payload),
            Err(error) => {
                self.handle_send_fault(&channel, &error).await;
                Err(error)
            }
        }
    }

    /// Closes the channel and evicts its client connection unless the error
    /// is a request-level outcome (timeouts and messaging faults leave the
    /// channel alone).
    async fn handle_send_fault(&self, channel: &Arc<Channel>, error: &MessagingError) {
        if error.is_messaging_fault() {
            return;
        }
        tracing::debug!("closing connection to {}", channel.peer());
        channel.close().await;
        let connection = self.client_connections.lock().remove(&channel.id());
        if let Some(connection) = connection {
            connection.close();
        }
    }

    fn pool(&self, address: &Address) -> Arc<ChannelPool> {
        self.pools
            .lock()
            .entry(address.clone())
            .or_insert_with(|| Arc::new(ChannelPool::new()))
            .clone()
    }

    /// Resolves the pool slot for `(address, subject)` to a live channel,
    /// replacing failed or stale slot entries along the way.
    fn get_channel<'a>(
        self: &'a Arc<Self>,
        address: &'a Address,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Arc<Channel>, MessagingError>> {
        async move {
            let pool = self.pool(address);
            let offset = ChannelPool::offset(subject);

            let slot = pool.get_or_connect(offset, || self.connect_future(address.clone()));
            let channel = match slot.clone().await {
                Ok(channel) => channel,
                Err(error) => return Err(MessagingError::Connect(error)),
            };
            if channel.is_active() {
                return Ok(channel);
            }

            // The pooled channel died since it was opened. Clear or adopt
            // the slot, drop the dead channel's connection, then retry.
            let replacement =
                pool.replace_stale(offset, &slot, || self.connect_future(address.clone()));
            let connection = self.client_connections.lock().remove(&channel.id());
            if let Some(connection) = connection {
                tracing::debug!("closing connection to {}", channel.peer());
                connection.close();
            }

            match replacement {
                None => self.get_channel(address, subject).await,
                Some(future) => future.await.map_err(MessagingError::Connect),
            }
        }
        .boxed()
    }

    /// Starts a connect attempt whose result every hitter of the slot
    /// shares.
    fn connect_future(self: &Arc<Self>, address: Address) -> ChannelFuture {
        let inner = self.clone();
        async move {
            tracing::debug!("connecting to {}", address);
            match inner.open_channel(&address).await {
                Ok(channel) => {
                    tracing::debug!("connected to {}", channel.peer());
                    Ok(channel)
                }
                Err(error) => {
                    tracing::debug!("failed to connect to {}: {}", address, error);
                    Err(Arc::new(error))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Dials, optionally wraps in TLS, runs the client handshake and spawns
    /// the channel's reader.
    async fn open_channel(self: &Arc<Self>, address: &Address) -> Result<Arc<Channel>, MessagingError> {
        let peer = resolve(&address.host, address.port).await?;
        let socket = new_socket(&peer)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.set_keepalive(true)?;

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, socket.connect(peer))
            .await
            .map_err(|_| {
                MessagingError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", address),
                ))
            })??;
        stream.set_nodelay(true)?;

        let connector = self.tls.lock().as_ref().map(|ctx| ctx.connector.clone());
        let mut stream = match connector {
            Some(connector) => {
                let server_name = ServerName::try_from(address.host.clone())
                    .map_err(|_| MessagingError::Tls(format!("invalid server name: {}", address.host)))?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| MessagingError::Tls(e.to_string()))?;
                MaybeTlsStream::TlsClient { stream: tls_stream }
            }
            None => {
                if self.config.tls.enabled {
                    return Err(MessagingError::Startup(
                        "TLS is enabled but the service has not been started".into(),
                    ));
                }
                MaybeTlsStream::Plain { stream }
            }
        };

        self.client_handshake(&mut stream, address).await?;

        let version = {
            let mut buf = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut buf).await?;
            let handshake = Handshake::decode(&buf);
            if handshake.preamble != self.preamble {
                tracing::warn!("received invalid handshake from {}, closing connection", address);
                return Err(meshwire_protocol::ProtocolError::InvalidPreamble {
                    expected: self.preamble,
                    actual: handshake.preamble,
                }
                .into());
            }
            ProtocolVersion::from_number(handshake.version)
                .ok_or(meshwire_protocol::ProtocolError::UnknownVersion(handshake.version))?
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let channel = Arc::new(Channel::new(
            self.next_channel_id(),
            peer,
            version,
            write_half,
        ));
        self.spawn_reader(channel.clone(), read_half);
        Ok(channel)
    }

    async fn client_handshake(
        &self,
        stream: &mut MaybeTlsStream,
        address: &Address,
    ) -> Result<(), MessagingError> {
        tracing::trace!("sending handshake to {}", address);
        stream
            .write_all(&Handshake::new(self.preamble, ProtocolVersion::latest()).encode())
            .await?;
        Ok(())
    }
}

fn new_socket(addr: &SocketAddr) -> std::io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, MessagingError> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            MessagingError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot resolve {}:{}", host, port),
            ))
        })
}
