//! Service notices sent by the server.
//!
//! A notice uses the package wire layout with `source = "<server>"` and a
//! payload of `{"type": "success" | "error", "service": <message>}`. Before a
//! connection is identified its `destination` is `null`, which is why notices
//! have their own type instead of being a [`Package`].

use crate::core::package::{Destination, Package, SERVER_TOKEN};
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome carried by a service notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Success,
    Error,
}

/// Payload of a service notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub service: String,
}

/// Server-originated notice, e.g. a handshake acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNotice {
    pub data: ServiceData,
    pub source: String,
    pub destination: Option<String>,
    #[serde(default)]
    pub source_conv_id: Option<String>,
    #[serde(default)]
    pub destination_conv_id: Option<String>,
}

impl ServiceNotice {
    pub fn new(kind: ServiceKind, message: impl Into<String>, destination: Option<Uuid>) -> Self {
        Self {
            data: ServiceData {
                kind,
                service: message.into(),
            },
            source: SERVER_TOKEN.to_string(),
            destination: destination.map(|nid| Destination::Direct(nid).to_string()),
            source_conv_id: None,
            destination_conv_id: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.data.kind == ServiceKind::Error
    }

    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }

    /// Parse a notice, rejecting anything not sourced from the server
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let notice: Self = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::DeserializeError(e.to_string()))?;
        if notice.source != SERVER_TOKEN {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "service notice from '{}'",
                notice.source
            )));
        }
        Ok(notice)
    }

    /// The notice as a regular package, once it is addressed to a node
    pub fn into_package(self) -> Result<Package> {
        let destination = self.destination.ok_or_else(|| {
            ProtocolError::UnexpectedMessage("notice has no destination".into())
        })?;
        let data = serde_json::to_value(&self.data)?;
        Ok(Package::new(data, self.source, destination)
            .with_conv_ids(self.source_conv_id, self.destination_conv_id))
    }
}
