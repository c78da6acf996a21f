//! # Error Types
//!
//! Error handling for the Herald broker.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side is
//! [`ProtocolError`]. Failures are scoped: a handshake or protocol error ends at
//! the connection that caused it, a delivery error ends at the recipient it
//! concerns, and only configuration errors are expected to stop the process.
//!
//! ## Error Categories
//! - **I/O and transport**: socket and WebSocket failures
//! - **Configuration**: invalid endpoint parameters or settings files
//! - **Identification**: malformed handshakes, wrong secret, duplicate nids
//! - **Protocol**: packages that fail to deserialize or break wire rules
//! - **Delivery**: a recipient whose connection is already closed
//!
//! ## Example Usage
//! ```rust
//! use herald::error::{ProtocolError, Result};
//! use herald::core::package::Package;
//!
//! fn parse(raw: &[u8]) -> Result<Package> {
//!     Package::from_wire(raw)
//! }
//!
//! match parse(b"{}") {
//!     Err(ProtocolError::DeserializeError(reason)) => assert!(reason.contains("missing")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants shared by the server and link sides.
pub mod constants {
    /// Connection errors
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "Identification timed out";
    pub const ERR_SERVER_BUSY: &str = "Too many pending connections";

    /// Identification errors
    pub const ERR_NOT_TEXT: &str = "Identification must be a text message";
    pub const ERR_MALFORMED_IDENTIFY: &str =
        "Malformed identification, expected 'Identify <nid>:<link_type>:<secret>'";
    pub const ERR_INVALID_NID: &str = "Node id must be a lowercase hyphenated UUID";
    pub const ERR_RESERVED_LINK_TYPE: &str = "Link type is reserved or addresses a node";
    pub const ERR_WRONG_SECRET: &str = "Invalid secret";
    pub const ERR_NID_IN_USE: &str = "Node id already in use";
    pub const ERR_ALREADY_IDENTIFIED: &str = "Client is already identified";

    /// Protocol errors
    pub const ERR_INVALID_PACKAGE: &str = "Invalid package";
    pub const ERR_SPOOFED_SOURCE: &str = "Source '<server>' is reserved for the server";
    pub const ERR_FORGED_SOURCE: &str = "Source must be the sender's node id";
    pub const ERR_UNEXPECTED_FRAME: &str = "Unexpected WebSocket frame";

    /// Delivery errors
    pub const ERR_QUEUE_FULL: &str = "Outbound queue full";
}

/// ProtocolError is the primary error type for all Herald operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TLS error: {0}")]
    TlsError(String),
}

impl ProtocolError {
    /// Whether this error means the peer's transport is gone.
    pub fn is_disconnect(&self) -> bool {
        use tokio_tungstenite::tungstenite::error::ProtocolError as WsProtocolError;
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self {
            ProtocolError::ConnectionClosed => true,
            ProtocolError::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed) => true,
            ProtocolError::WebSocket(WsError::Protocol(
                WsProtocolError::ResetWithoutClosingHandshake,
            )) => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
