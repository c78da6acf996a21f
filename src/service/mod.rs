//! # Services
//!
//! Client-side endpoints built on the protocol layer.

pub mod link;
