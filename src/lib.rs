//! # Herald
//!
//! A message-routing broker for small networks of WebSocket clients
//! ("links"). Each link identifies itself with a node id and a link type,
//! then sends JSON packages addressed to a single node, to every node of a
//! link type, to everyone (`*`), or to the server itself (`<server>`).
//!
//! ## Modules
//! - [`config`]: endpoint configuration and server settings
//! - [`core`]: the package envelope and destination addressing
//! - [`protocol`]: identification handshake, service notices, server handlers
//! - [`server`]: accept loop, client registry and routing
//! - [`service`]: the [`Link`](service::link::Link) client
//! - [`transport`]: TLS termination
//! - [`utils`]: logging, metrics and timeouts
//!
//! ## Example
//! ```rust,no_run
//! use herald::{HeraldConfig, Link, Server, ServerConfig};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! # async fn demo() -> herald::Result<()> {
//! let config = HeraldConfig::new("herald", "127.0.0.1", 8765, false, "s3cret", "/")?;
//! let server = Server::new(config.clone(), ServerConfig::default());
//! tokio::spawn({
//!     let server = server.clone();
//!     async move { server.run().await }
//! });
//!
//! let mut link = Link::connect(&config, Uuid::new_v4(), "desktop").await?;
//! link.send(json!({"hello": "world"}), "mobile").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod server;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{BroadcastPolicy, HeraldConfig, ServerConfig, Settings};
pub use core::package::{Destination, Package};
pub use error::{ProtocolError, Result};
pub use server::Server;
pub use service::link::Link;
