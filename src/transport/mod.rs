//! # Transport
//!
//! Herald speaks JSON over WebSocket (`tokio-tungstenite`); this module holds
//! what sits underneath it, currently TLS termination.

pub mod tls;

pub use tls::TlsServerConfig;
