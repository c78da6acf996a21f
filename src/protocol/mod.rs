//! # Protocol Layer
//!
//! Identification handshake, service notices and server-side dispatch.
//!
//! ## Components
//! - **Handshake**: parsing and checking `Identify <nid>:<link_type>:<secret>`
//! - **Notice**: `<server>`-sourced success/error messages
//! - **Dispatcher**: handlers for packages addressed to `<server>`

pub mod dispatcher;
pub mod handshake;
pub mod notice;
