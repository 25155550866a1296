//! Handler registry.

use crate::connection::ServerConnection;
use meshwire_protocol::Request;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// An installed handler: receives the request and the connection to reply
/// on. Registration arities (consumer, sync, async) are erased into this
/// shape by the service facade.
pub(crate) type MessageHandler = Arc<dyn Fn(Request, Arc<dyn ServerConnection>) + Send + Sync>;

/// Subject-keyed handler table. Reads are hot (every inbound request),
/// writes are rare.
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, subject: &str) -> Option<MessageHandler> {
        self.handlers.read().get(subject).cloned()
    }

    /// Installs a handler, replacing any previous one for the subject.
    pub fn insert(&self, subject: impl Into<String>, handler: MessageHandler) {
        self.handlers.write().insert(subject.into(), handler);
    }

    pub fn remove(&self, subject: &str) {
        self.handlers.write().remove(subject);
    }
}
