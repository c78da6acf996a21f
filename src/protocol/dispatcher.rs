use crate::core::package::Package;
use crate::error::{ProtocolError, Result};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&Package) -> Result<Option<Value>> + Send + Sync + 'static;

/// Handlers for packages addressed to `<server>`.
///
/// Handlers are keyed by the payload's `type` field. A handler may return a
/// reply payload, which the server sends back to the requesting node.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, opcode: &str, handler: F) -> Result<()>
    where
        F: Fn(&Package) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::TransportError("Failed to acquire write lock on dispatcher".to_string())
        })?;

        handlers.insert(Cow::Owned(opcode.to_string()), Box::new(handler));
        Ok(())
    }

    pub fn is_registered(&self, opcode: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(opcode))
            .unwrap_or(false)
    }

    pub fn dispatch(&self, package: &Package) -> Result<Option<Value>> {
        let opcode = get_opcode(package).ok_or_else(|| {
            ProtocolError::UnexpectedMessage("server package without a 'type' field".to_string())
        })?;

        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::TransportError("Failed to acquire read lock on dispatcher".to_string())
        })?;

        handlers
            .get(opcode)
            .ok_or_else(|| ProtocolError::UnexpectedMessage(opcode.to_string()))
            .and_then(|handler| handler(package))
    }
}

/// Payload `type` used to pick a handler
#[inline]
fn get_opcode(package: &Package) -> Option<&str> {
    package.data().get("type").and_then(Value::as_str)
}
