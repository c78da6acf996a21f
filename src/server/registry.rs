//! The set of identified clients.
//!
//! The registry is the only state shared between connections. It maps nids to
//! client handles and answers destination queries. Every entry is identified
//! and no two entries share a nid. Connection tasks own their clients; the
//! registry only indexes them and never closes one on its own.
//!
//! The lock is a `std::sync::RwLock` held only for map operations, never
//! across an `.await`.

use crate::config::BroadcastPolicy;
use crate::core::package::{Destination, Package};
use crate::error::{constants, ProtocolError, Result};
use crate::server::client::ConnectedClient;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

type ClientMap = BTreeMap<Uuid, Arc<ConnectedClient>>;

#[derive(Debug, Default)]
pub struct Registry {
    clients: RwLock<ClientMap>,
    broadcast: BroadcastPolicy,
}

impl Registry {
    pub fn new(broadcast: BroadcastPolicy) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            broadcast,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientMap> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientMap> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn broadcast_policy(&self) -> BroadcastPolicy {
        self.broadcast
    }

    /// Identify `client` and add it, atomically with the uniqueness check.
    ///
    /// # Errors
    /// `ProtocolError::HandshakeError` if `nid` is already registered or the
    /// client was identified before.
    pub fn register(
        &self,
        client: Arc<ConnectedClient>,
        nid: Uuid,
        link_type: impl Into<String>,
    ) -> Result<()> {
        let mut clients = self.write();

        if clients.contains_key(&nid) {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_NID_IN_USE.into(),
            ));
        }

        client.identify(nid, link_type)?;
        clients.insert(nid, client);
        debug!(%nid, registered = clients.len(), "Client registered");
        Ok(())
    }

    /// Remove `client` if it is the registered holder of its nid.
    ///
    /// Safe to call for clients that were never registered or were already
    /// removed; returns whether an entry was removed.
    pub fn remove(&self, client: &ConnectedClient) -> bool {
        let Some(nid) = client.nid() else {
            return false;
        };

        let mut clients = self.write();
        match clients.get(&nid) {
            Some(registered) if registered.id() == client.id() => {
                clients.remove(&nid);
                debug!(%nid, registered = clients.len(), "Client removed");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, nid: &Uuid) -> Option<Arc<ConnectedClient>> {
        self.read().get(nid).cloned()
    }

    pub fn contains(&self, nid: &Uuid) -> bool {
        self.read().contains_key(nid)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All registered clients, ordered by nid
    pub fn snapshot(&self) -> Vec<Arc<ConnectedClient>> {
        self.read().values().cloned().collect()
    }

    /// Clients a package should be delivered to.
    ///
    /// Pure over the current contents: `<server>` resolves to nobody, `*` to
    /// every client (minus the sender under
    /// [`BroadcastPolicy::ExcludeSender`]), a nid to at most one client, and a
    /// link type to every client declaring it.
    pub fn find_destination(&self, package: &Package) -> Vec<Arc<ConnectedClient>> {
        let clients = self.read();

        match package.destination() {
            Destination::Server => Vec::new(),
            Destination::Broadcast => {
                let sender = match self.broadcast {
                    BroadcastPolicy::IncludeSender => None,
                    BroadcastPolicy::ExcludeSender => Uuid::parse_str(package.source()).ok(),
                };
                clients
                    .iter()
                    .filter(|(nid, _)| Some(**nid) != sender)
                    .map(|(_, client)| Arc::clone(client))
                    .collect()
            }
            Destination::Direct(nid) => clients.get(nid).cloned().into_iter().collect(),
            Destination::Group(link_type) => clients
                .values()
                .filter(|client| client.link_type() == Some(link_type.as_str()))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn client() -> Arc<ConnectedClient> {
        let (client, _rx) = ConnectedClient::detached(8);
        Arc::new(client)
    }

    fn registered(registry: &Registry, link_type: &str) -> (Uuid, Arc<ConnectedClient>) {
        let nid = Uuid::new_v4();
        let client = client();
        registry.register(Arc::clone(&client), nid, link_type).unwrap();
        (nid, client)
    }

    fn nids(clients: &[Arc<ConnectedClient>]) -> BTreeSet<Uuid> {
        clients.iter().filter_map(|c| c.nid()).collect()
    }

    #[test]
    fn test_duplicate_nid_rejected() {
        let registry = Registry::default();
        let (nid, first) = registered(&registry, "desktop");

        let second = client();
        let result = registry.register(Arc::clone(&second), nid, "mobile");
        assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));
        assert!(!second.is_identified());
        assert_eq!(registry.get(&nid).unwrap().id(), first.id());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::default();
        let (nid, a) = registered(&registry, "desktop");
        let (other, _b) = registered(&registry, "desktop");

        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(!registry.contains(&nid));
        assert!(registry.contains(&other));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_ignores_unregistered_clients() {
        let registry = Registry::default();
        let stranger = client();
        assert!(!registry.remove(&stranger));

        let (nid, _holder) = registered(&registry, "desktop");
        let impostor = client();
        impostor.identify(nid, "desktop").unwrap();
        assert!(!registry.remove(&impostor));
        assert!(registry.contains(&nid));
    }

    #[test]
    fn test_server_destination_resolves_to_nobody() {
        let registry = Registry::default();
        registered(&registry, "desktop");
        let package = Package::new(json!(1), "x", "<server>");
        assert!(registry.find_destination(&package).is_empty());
    }

    #[test]
    fn test_broadcast_includes_sender_by_default() {
        let registry = Registry::default();
        let (a, _ca) = registered(&registry, "desktop");
        let (b, _cb) = registered(&registry, "mobile");

        let package = Package::new(json!("hi"), a.to_string(), "*");
        let resolved = nids(&registry.find_destination(&package));
        assert_eq!(resolved, BTreeSet::from([a, b]));
    }

    #[test]
    fn test_broadcast_can_exclude_sender() {
        let registry = Registry::new(BroadcastPolicy::ExcludeSender);
        let (a, _ca) = registered(&registry, "desktop");
        let (b, _cb) = registered(&registry, "mobile");

        let package = Package::new(json!("hi"), a.to_string(), "*");
        let resolved = nids(&registry.find_destination(&package));
        assert_eq!(resolved, BTreeSet::from([b]));
    }

    #[test]
    fn test_direct_and_group_resolution() {
        let registry = Registry::default();
        let (a, _ca) = registered(&registry, "desktop");
        let (b, _cb) = registered(&registry, "mobile");
        let (c, _cc) = registered(&registry, "mobile");

        let direct = Package::new(json!("x"), "s", a);
        assert_eq!(nids(&registry.find_destination(&direct)), BTreeSet::from([a]));

        let unknown = Package::new(json!("x"), "s", Uuid::new_v4());
        assert!(registry.find_destination(&unknown).is_empty());

        let group = Package::new(json!("x"), "s", "mobile");
        assert_eq!(nids(&registry.find_destination(&group)), BTreeSet::from([b, c]));

        let nobody = Package::new(json!("x"), "s", "nonexistent-type");
        assert!(registry.find_destination(&nobody).is_empty());
    }
}
