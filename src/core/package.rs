//! The routed envelope and its addressing.
//!
//! A [`Package`] carries an opaque JSON payload plus the metadata Herald routes
//! on. The wire form is a JSON object with exactly five fields:
//!
//! ```text
//! {"data": <any>, "source": <string>, "destination": <string>,
//!  "source_conv_id": <string|null>, "destination_conv_id": <string|null>}
//! ```
//!
//! The `destination` string is parsed once, on deserialization, into a
//! [`Destination`]. Resolution order is fixed: `<server>`, then `*`, then
//! anything that parses as a UUID, and finally a link type name.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reserved token addressing the server itself, and the source of its notices
pub const SERVER_TOKEN: &str = "<server>";

/// Reserved destination token for delivery to every identified client
pub const BROADCAST_TOKEN: &str = "*";

/// Where a package should go.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    /// `<server>`: handled by the server, never forwarded
    Server,
    /// `*`: every identified client
    Broadcast,
    /// A single node by nid
    Direct(Uuid),
    /// Every client of a link type
    Group(String),
}

impl Destination {
    /// Whether a link type name would resolve to [`Destination::Group`].
    ///
    /// Names that collide with a reserved token or parse as a UUID can never be
    /// addressed as a group.
    pub fn is_group_name(name: &str) -> bool {
        matches!(Self::from(name), Destination::Group(_))
    }
}

impl From<&str> for Destination {
    fn from(raw: &str) -> Self {
        match raw {
            SERVER_TOKEN => Destination::Server,
            BROADCAST_TOKEN => Destination::Broadcast,
            _ => match Uuid::parse_str(raw) {
                Ok(nid) => Destination::Direct(nid),
                Err(_) => Destination::Group(raw.to_string()),
            },
        }
    }
}

impl From<String> for Destination {
    fn from(raw: String) -> Self {
        match Destination::from(raw.as_str()) {
            Destination::Group(_) => Destination::Group(raw),
            other => other,
        }
    }
}

impl From<Uuid> for Destination {
    fn from(nid: Uuid) -> Self {
        Destination::Direct(nid)
    }
}

impl FromStr for Destination {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Destination::from(s))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Server => f.write_str(SERVER_TOKEN),
            Destination::Broadcast => f.write_str(BROADCAST_TOKEN),
            Destination::Direct(nid) => write!(f, "{}", nid.hyphenated()),
            Destination::Group(link_type) => f.write_str(link_type),
        }
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.to_string()
    }
}

/// Wire envelope routed between links.
///
/// Fields are private; a package is never modified after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    data: Value,
    source: String,
    destination: Destination,
    #[serde(default)]
    source_conv_id: Option<String>,
    #[serde(default)]
    destination_conv_id: Option<String>,
}

impl Package {
    pub fn new(data: Value, source: impl Into<String>, destination: impl Into<Destination>) -> Self {
        Self {
            data,
            source: source.into(),
            destination: destination.into(),
            source_conv_id: None,
            destination_conv_id: None,
        }
    }

    /// Same package with conversation ids attached
    pub fn with_conv_ids(
        self,
        source_conv_id: Option<String>,
        destination_conv_id: Option<String>,
    ) -> Self {
        Self {
            source_conv_id,
            destination_conv_id,
            ..self
        }
    }

    /// A copy of this package addressed to a single node.
    ///
    /// Payload, source and conversation ids are carried over unchanged.
    pub fn readdressed(&self, nid: Uuid) -> Self {
        Self {
            data: self.data.clone(),
            source: self.source.clone(),
            destination: Destination::Direct(nid),
            source_conv_id: self.source_conv_id.clone(),
            destination_conv_id: self.destination_conv_id.clone(),
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn source_conv_id(&self) -> Option<&str> {
        self.source_conv_id.as_deref()
    }

    pub fn destination_conv_id(&self) -> Option<&str> {
        self.destination_conv_id.as_deref()
    }

    /// Whether the package claims to come from the server
    pub fn is_from_server(&self) -> bool {
        self.source == SERVER_TOKEN
    }

    /// Serialize to the canonical JSON wire form
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }

    /// Deserialize from the JSON wire form.
    ///
    /// # Errors
    /// `ProtocolError::DeserializeError` if the bytes are not a JSON object or
    /// `data`, `source` or `destination` is missing.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}
