//! Connection objects: the client and server halves of every conversation.
//!
//! Remote connections ride a [`Channel`]; local connections bypass the wire
//! entirely for self-addressed messages. Both client flavors share the same
//! callback-table semantics, and both server flavors map reply statuses the
//! same way, so loopback and remote behavior are indistinguishable to
//! callers.

use crate::callback::CallbackTable;
use crate::channel::Channel;
use crate::error::MessagingError;
use crate::handler::HandlerRegistry;
use bytes::Bytes;
use meshwire_protocol::{Address, ProtocolMessage, Reply, Request, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// The server side of a conversation: where replies go.
pub(crate) trait ServerConnection: Send + Sync {
    /// Writes a reply for the given request. No delivery guarantee beyond
    /// the channel write.
    fn reply(&self, request: &Request, status: Status, payload: Option<Bytes>);
}

/// Client side of a connection to a remote peer. 1:1 with its channel and
/// the owner of that channel's callback table.
pub(crate) struct RemoteClientConnection {
    channel: Arc<Channel>,
    callbacks: CallbackTable,
}

impl RemoteClientConnection {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            callbacks: CallbackTable::new(),
        }
    }

    /// Fire-and-forget send; resolves when the frame has been written.
    pub async fn send_async(&self, request: Request) -> Result<(), MessagingError> {
        self.channel
            .write_message(&ProtocolMessage::Request(request))
            .await
    }

    /// Sends a request and awaits the correlated reply.
    ///
    /// The callback is registered before the write so a reply racing the
    /// write's completion still finds it. A write failure removes the
    /// callback again and surfaces the write error.
    pub async fn send_and_receive(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.callbacks.register(id, &request.subject, timeout, tx);

        if let Err(error) = self
            .channel
            .write_message(&ProtocolMessage::Request(request))
            .await
        {
            self.callbacks.fail(id);
            return Err(error);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(MessagingError::ConnectionClosed),
        }
    }

    /// Completes the pending callback a reply correlates to.
    pub fn dispatch(&self, reply: Reply) {
        match self.callbacks.complete(reply.id) {
            Some(callback) => match reply.status {
                Status::Ok => callback.complete(reply.payload),
                Status::ErrorNoHandler => callback.fail(MessagingError::NoRemoteHandler),
                Status::ErrorHandlerException => {
                    callback.fail(MessagingError::RemoteHandlerFailure)
                }
                Status::ProtocolException => callback.fail(MessagingError::PeerProtocolException),
            },
            None => {
                tracing::debug!(
                    "received a reply for message id {} but was unable to locate the request handle",
                    reply.id
                );
            }
        }
    }

    /// Times out overdue callbacks; driven by the service sweeper.
    pub fn sweep(&self) {
        self.callbacks.sweep();
    }

    /// Fails all outstanding callbacks with `ConnectionClosed`. Idempotent.
    pub fn close(&self) {
        self.callbacks.close();
    }
}

/// Server side of a remote conversation; stateless beyond the channel.
pub(crate) struct RemoteServerConnection {
    channel: Arc<Channel>,
    handle: tokio::runtime::Handle,
}

impl RemoteServerConnection {
    /// Must be created on the runtime; replies are spawned onto it so the
    /// (possibly synchronous) handler never blocks on the socket.
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl ServerConnection for RemoteServerConnection {
    fn reply(&self, request: &Request, status: Status, payload: Option<Bytes>) {
        let reply = ProtocolMessage::Reply(Reply::new(
            request.id,
            status,
            payload.unwrap_or_default(),
        ));
        let channel = self.channel.clone();
        self.handle.spawn(async move {
            if let Err(error) = channel.write_message(&reply).await {
                tracing::debug!(
                    "failed to write reply on channel {}: {}",
                    channel.id(),
                    error
                );
            }
        });
    }
}

/// Client side of the loopback path. Invokes local handlers directly; no
/// socket is ever opened for self-addressed messages.
pub(crate) struct LocalClientConnection {
    address: Address,
    handlers: Arc<HandlerRegistry>,
    callbacks: Arc<CallbackTable>,
}

impl LocalClientConnection {
    pub fn new(address: Address, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            address,
            handlers,
            callbacks: Arc::new(CallbackTable::new()),
        }
    }

    /// Fire-and-forget delivery to a local handler. A missing handler is
    /// logged and the send still succeeds.
    pub fn send_async(&self, request: Request) -> Result<(), MessagingError> {
        match self.handlers.get(&request.subject) {
            Some(handler) => {
                tracing::trace!(
                    "{} - received message type {} from {}",
                    self.address,
                    request.subject,
                    request.sender
                );
                handler(request, Arc::new(LocalServerConnection::detached()));
            }
            None => {
                tracing::debug!(
                    "{} - no handler for message type {} from {}",
                    self.address,
                    request.subject,
                    request.sender
                );
            }
        }
        Ok(())
    }

    pub async fn send_and_receive(
        &self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<Bytes, MessagingError> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.callbacks.register(id, &request.subject, timeout, tx);

        let connection = LocalServerConnection::attached(self.callbacks.clone(), id);
        match self.handlers.get(&request.subject) {
            Some(handler) => {
                tracing::trace!(
                    "{} - received message type {} from {}",
                    self.address,
                    request.subject,
                    request.sender
                );
                handler(request, Arc::new(connection));
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

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(MessagingError::ConnectionClosed),
        }
    }

    pub fn sweep(&self) {
        self.callbacks.sweep();
    }
}

/// Server side of the loopback path: completes the local callback directly
/// instead of writing a frame.
pub(crate) struct LocalServerConnection {
    target: Option<(Arc<CallbackTable>, u64)>,
}

impl LocalServerConnection {
    /// Reply target for a `send_and_receive` loopback exchange.
    fn attached(callbacks: Arc<CallbackTable>, id: u64) -> Self {
        Self {
            target: Some((callbacks, id)),
        }
    }

    /// Reply target for fire-and-forget deliveries; replies are discarded.
    fn detached() -> Self {
        Self { target: None }
    }
}

impl ServerConnection for LocalServerConnection {
    fn reply(&self, _request: &Request, status: Status, payload: Option<Bytes>) {
        let Some((callbacks, id)) = &self.target else {
            return;
        };
        if let Some(callback) = callbacks.complete(*id) {
            match status {
                Status::Ok => callback.complete(payload.unwrap_or_default()),
                Status::ErrorNoHandler => callback.fail(MessagingError::NoRemoteHandler),
                Status::ErrorHandlerException => {
                    callback.fail(MessagingError::RemoteHandlerFailure)
                }
                Status::ProtocolException => callback.fail(MessagingError::PeerProtocolException),
            }
        }
    }
}
