//! Server-side handle for one live connection.
//!
//! A [`ConnectedClient`] owns the outbound half of its connection: packages are
//! queued on a bounded channel drained by the connection's writer task, so any
//! number of routing tasks can send to the same client without sharing the
//! WebSocket sink. The identity is set once, by the handshake.

use crate::core::package::Package;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::notice::{ServiceKind, ServiceNotice};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Process-unique id of an accepted connection.
///
/// Distinguishes two connections that assert the same nid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity asserted during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub nid: Uuid,
    pub link_type: String,
}

/// One accepted connection and, once identified, the node behind it.
pub struct ConnectedClient {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Message>,
    identity: OnceLock<ClientIdentity>,
    connection_time: SystemTime,
    closing: CancellationToken,
}

impl ConnectedClient {
    /// Wrap the outbound queue of a freshly accepted connection.
    ///
    /// `closing` is cancelled when the client is closed; pass a child of the
    /// server's shutdown token so shutdown reaches every connection.
    pub fn new(
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<Message>,
        closing: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            peer,
            outbound,
            identity: OnceLock::new(),
            connection_time: SystemTime::now(),
            closing,
        }
    }

    /// A client backed by a plain channel, without any socket.
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(None, tx, CancellationToken::new()), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connection_time(&self) -> SystemTime {
        self.connection_time
    }

    pub fn identity(&self) -> Option<&ClientIdentity> {
        self.identity.get()
    }

    pub fn nid(&self) -> Option<Uuid> {
        self.identity.get().map(|identity| identity.nid)
    }

    pub fn link_type(&self) -> Option<&str> {
        self.identity.get().map(|identity| identity.link_type.as_str())
    }

    pub fn is_identified(&self) -> bool {
        self.identity.get().is_some()
    }

    /// Record the identity asserted by the handshake.
    ///
    /// # Errors
    /// `ProtocolError::HandshakeError` if the client is already identified.
    pub fn identify(&self, nid: Uuid, link_type: impl Into<String>) -> Result<()> {
        self.identity
            .set(ClientIdentity {
                nid,
                link_type: link_type.into(),
            })
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_ALREADY_IDENTIFIED.into()))
    }

    /// Queue a package for this client.
    ///
    /// # Errors
    /// `ProtocolError::ConnectionClosed` if the connection is closed or closing.
    pub async fn send(&self, package: &Package) -> Result<()> {
        self.send_text(package.to_wire()?).await
    }

    /// Queue a package without waiting for room.
    ///
    /// Used for routed traffic, so a link that stops reading costs its senders
    /// nothing.
    ///
    /// # Errors
    /// `ProtocolError::TransportError` if the outbound queue is full,
    /// `ProtocolError::ConnectionClosed` if the connection is closed or closing.
    pub fn try_send(&self, package: &Package) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        match self.outbound.try_send(Message::text(package.to_wire()?)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ProtocolError::TransportError(
                constants::ERR_QUEUE_FULL.into(),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Queue a `<server>` notice addressed to this client's nid (null if unidentified).
    pub async fn send_service(&self, kind: ServiceKind, message: impl Into<String>) -> Result<()> {
        let notice = ServiceNotice::new(kind, message, self.nid());
        self.send_text(notice.to_wire()?).await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        tokio::select! {
            _ = self.closing.cancelled() => Err(ProtocolError::ConnectionClosed),
            sent = self.outbound.send(Message::text(text)) => {
                sent.map_err(|_| ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Ask the connection to terminate. Calling it again has no effect.
    pub fn close(&self) {
        self.closing.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled() || self.outbound.is_closed()
    }

    /// Resolves once [`close`](Self::close) was called or the server shuts down.
    pub async fn closed(&self) {
        self.closing.cancelled().await
    }
}

impl fmt::Debug for ConnectedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("identity", &self.identity.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::Destination;
    use serde_json::json;

    fn text_of(message: Message) -> String {
        match message {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_identify_is_one_way() {
        let (client, _rx) = ConnectedClient::detached(4);
        assert!(!client.is_identified());

        let nid = Uuid::new_v4();
        client.identify(nid, "desktop").unwrap();
        assert!(client.is_identified());
        assert_eq!(client.nid(), Some(nid));
        assert_eq!(client.link_type(), Some("desktop"));

        let again = client.identify(Uuid::new_v4(), "mobile");
        assert!(matches!(again, Err(ProtocolError::HandshakeError(_))));
        assert_eq!(client.nid(), Some(nid));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _ra) = ConnectedClient::detached(1);
        let (b, _rb) = ConnectedClient::detached(1);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_send_queues_wire_form() {
        let (client, mut rx) = ConnectedClient::detached(4);
        let nid = Uuid::new_v4();
        let package = Package::new(json!({"n": 1}), "src", nid);

        client.send(&package).await.unwrap();
        let received = Package::from_wire(text_of(rx.recv().await.unwrap()).as_bytes()).unwrap();
        assert_eq!(received, package);
    }

    #[tokio::test]
    async fn test_service_notice_destination_follows_identity() {
        let (client, mut rx) = ConnectedClient::detached(4);

        client.send_service(ServiceKind::Error, "nope").await.unwrap();
        let before = ServiceNotice::from_wire(text_of(rx.recv().await.unwrap()).as_bytes()).unwrap();
        assert_eq!(before.destination, None);
        assert!(before.is_error());

        let nid = Uuid::new_v4();
        client.identify(nid, "bot").unwrap();
        client.send_service(ServiceKind::Success, "ok").await.unwrap();
        let after = ServiceNotice::from_wire(text_of(rx.recv().await.unwrap()).as_bytes()).unwrap();
        assert_eq!(after.destination, Some(nid.to_string()));

        let package = after.into_package().unwrap();
        assert_eq!(package.destination(), &Destination::Direct(nid));
        assert!(package.is_from_server());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _rx) = ConnectedClient::detached(4);
        client.close();
        client.close();
        assert!(client.is_closed());

        let result = client.send_service(ServiceKind::Success, "late").await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[test]
    fn test_try_send_fails_fast_when_queue_is_full() {
        let (client, mut rx) = ConnectedClient::detached(1);
        let package = Package::new(json!(1), "src", "*");

        client.try_send(&package).unwrap();
        match client.try_send(&package) {
            Err(ProtocolError::TransportError(reason)) => {
                assert_eq!(reason, constants::ERR_QUEUE_FULL)
            }
            other => panic!("expected a full queue, got {other:?}"),
        }

        rx.try_recv().unwrap();
        client.try_send(&package).unwrap();

        drop(rx);
        assert!(matches!(
            client.try_send(&package),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_fails_when_writer_is_gone() {
        let (client, rx) = ConnectedClient::detached(4);
        drop(rx);

        let package = Package::new(json!(null), "src", "*");
        assert!(matches!(
            client.send(&package).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
