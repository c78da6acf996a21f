use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::HeraldConfig;
use crate::core::package::{Destination, Package};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::identify_message;
use crate::protocol::notice::ServiceNotice;
use crate::utils::timeout::{with_timeout_error, HANDSHAKE_TIMEOUT};

type LinkStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of a Herald connection.
///
/// A link connects, identifies itself with a nid and link type, and then
/// exchanges packages with the rest of the network through the server.
pub struct Link {
    nid: Uuid,
    link_type: String,
    ws: LinkStream,
}

impl Link {
    /// Connect to the server described by `config` and identify.
    ///
    /// # Errors
    /// `ProtocolError::HandshakeError` carrying the server's reason if the
    /// identification is rejected.
    #[instrument(skip(config), fields(url = %config.url()))]
    pub async fn connect(config: &HeraldConfig, nid: Uuid, link_type: &str) -> Result<Self> {
        if config.secure() {
            // Another provider may already be installed by the application.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let (mut ws, _response) =
            with_timeout_error(tokio_tungstenite::connect_async(config.url()), HANDSHAKE_TIMEOUT)
                .await?;

        ws.send(Message::text(identify_message(nid, link_type, config.secret())))
            .await?;

        let notice = with_timeout_error(read_notice(&mut ws), HANDSHAKE_TIMEOUT).await?;
        if notice.is_error() {
            let _ = ws.close(None).await;
            return Err(ProtocolError::HandshakeError(notice.data.service));
        }

        info!(%nid, link_type, "Identified with server");
        Ok(Self {
            nid,
            link_type: link_type.to_string(),
            ws,
        })
    }

    pub fn nid(&self) -> Uuid {
        self.nid
    }

    pub fn link_type(&self) -> &str {
        &self.link_type
    }

    /// Send `data` from this link to `destination`
    pub async fn send(&mut self, data: Value, destination: impl Into<Destination>) -> Result<()> {
        let package = Package::new(data, self.nid.to_string(), destination);
        self.send_package(&package).await
    }

    pub async fn send_package(&mut self, package: &Package) -> Result<()> {
        self.send_raw(package.to_wire()?).await
    }

    /// Send a text frame as-is, bypassing package construction
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<()> {
        self.ws.send(Message::text(text.into())).await?;
        Ok(())
    }

    /// Wait for the next package
    ///
    /// # Errors
    /// `ProtocolError::ConnectionClosed` once the server closes the connection.
    pub async fn recv(&mut self) -> Result<Package> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Package::from_wire(text.as_bytes()),
                Some(Ok(Message::Binary(bytes))) => return Package::from_wire(&bytes),
                Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Like [`recv`](Self::recv), giving up with `Ok(None)` after `duration`
    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<Option<Package>> {
        match tokio::time::timeout(duration, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        debug!(nid = %self.nid, "Closing link");
        match self.ws.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = ProtocolError::from(e);
                if e.is_disconnect() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

async fn read_notice(ws: &mut LinkStream) -> Result<ServiceNotice> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return ServiceNotice::from_wire(text.as_bytes()),
            Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::ConnectionClosed),
            Some(Ok(Message::Binary(_))) => {
                return Err(ProtocolError::UnexpectedMessage(
                    crate::error::constants::ERR_UNEXPECTED_FRAME.into(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
