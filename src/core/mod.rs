//! # Core Protocol Components
//!
//! The package envelope every message travels in, and how its destination is
//! addressed.
//!
//! ## Wire Format
//! One JSON object per WebSocket text frame:
//! ```text
//! {"data": <any>, "source": "<nid>", "destination": "<nid | link type | * | <server>>",
//!  "source_conv_id": <string | null>, "destination_conv_id": <string | null>}
//! ```

pub mod package;
