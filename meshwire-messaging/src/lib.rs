//! # meshwire-messaging
//!
//! Peer-to-peer TCP messaging transport for meshwire clusters.
//!
//! Every node is simultaneously a client and a server: it keeps a pool of
//! eight outbound channels per peer (selected by subject hash), correlates
//! requests to replies through per-connection callback tables, times
//! overdue requests out with a φ-accrual detector fed by per-subject reply
//! histories, and short-circuits self-addressed messages through an
//! in-process loopback path that never touches a socket.
//!
//! ```no_run
//! use bytes::Bytes;
//! use meshwire_messaging::{executor, Address, MessagingConfig, MessagingService};
//!
//! # async fn run() -> Result<(), meshwire_messaging::MessagingError> {
//! let node = MessagingService::new(
//!     "my-cluster",
//!     Address::new("127.0.0.1", 5000),
//!     MessagingConfig::default(),
//! );
//! node.register_handler("echo", |_sender, payload| payload, executor::direct());
//! node.start().await?;
//!
//! let peer = Address::new("127.0.0.1", 5001);
//! let reply = node
//!     .send_and_receive(peer, "echo", Bytes::from_static(b"ping"))
//!     .await?;
//! # drop(reply);
//! # Ok(())
//! # }
//! ```

mod callback;
mod channel;
pub mod config;
mod connection;
pub mod error;
pub mod executor;
mod handler;
mod pool;
pub mod service;
mod stream;
mod tls;

pub use config::{ConfigError, MessagingConfig, TlsConfig};
pub use error::MessagingError;
pub use executor::{DirectExecutor, Executor, SpawnExecutor};
pub use meshwire_protocol::Address;
pub use service::MessagingService;
