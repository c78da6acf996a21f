//! # Herald Server
//!
//! Accepts WebSocket connections from links, identifies them, and forwards
//! packages between them.
//!
//! ## Connection lifecycle
//! ```text
//! Connecting ──upgrade──▶ Identifying ──Identify ok──▶ Identified ──close──▶ Closed
//!                              │
//!                              └──bad line / wrong secret / timeout──▶ Rejected ──▶ Closed
//! ```
//!
//! Each connection runs as its own task with a companion writer task draining
//! the client's outbound queue. Every package read from an identified link is
//! routed on a separate task. Routed copies never wait for queue room: a
//! recipient whose queue is full misses the package, so a link that stops
//! reading cannot pin routing tasks or stall its senders. All tasks live on one [`TaskTracker`] and observe one
//! [`CancellationToken`], which lets [`Server::shutdown`] stop everything
//! deterministically.
//!
//! ## Example
//! ```rust,no_run
//! use herald::config::{HeraldConfig, ServerConfig};
//! use herald::server::Server;
//!
//! # async fn run() -> herald::error::Result<()> {
//! let config = HeraldConfig::new("herald", "0.0.0.0", 8765, false, "s3cret", "/")?;
//! let server = Server::new(config, ServerConfig::default());
//! server.run().await
//! # }
//! ```

pub mod client;
pub mod registry;

pub use client::{ClientIdentity, ConnectedClient, ConnectionId};
pub use registry::Registry;

use crate::config::{HeraldConfig, ServerConfig, Settings};
use crate::core::package::{Destination, Package, SERVER_TOKEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{verify_identify, Identification};
use crate::protocol::notice::ServiceKind;
use crate::transport::TlsServerConfig;
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::timeout::with_timeout_error;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

/// State shared by the accept loop, connection tasks and routing tasks
struct ServerState {
    config: HeraldConfig,
    settings: ServerConfig,
    registry: Registry,
    metrics: Metrics,
    dispatcher: Dispatcher,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    pending: Arc<Semaphore>,
}

/// A Herald broker instance.
///
/// Cheap to clone; clones share the registry, metrics and shutdown signal.
#[derive(Clone)]
pub struct Server {
    state: Arc<ServerState>,
    tls: Option<TlsAcceptor>,
}

impl Server {
    pub fn new(config: HeraldConfig, settings: ServerConfig) -> Self {
        let state = ServerState {
            registry: Registry::new(settings.broadcast),
            metrics: Metrics::new(),
            dispatcher: Dispatcher::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            pending: Arc::new(Semaphore::new(settings.max_pending_connections)),
            config,
            settings,
        };

        Self {
            state: Arc::new(state),
            tls: None,
        }
    }

    /// Build a server from validated settings, loading TLS material when the
    /// endpoint is secure.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate_strict()?;

        let server = Self::new(settings.endpoint.clone(), settings.server.clone());
        match (&settings.tls, settings.endpoint.secure()) {
            (Some(tls), true) => Ok(server.with_tls(TlsServerConfig::from(tls).acceptor()?)),
            _ => Ok(server),
        }
    }

    /// Terminate TLS on accepted sockets
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn config(&self) -> &HeraldConfig {
        &self.state.config
    }

    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.state.metrics
    }

    /// Handlers for packages addressed to `<server>`
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }

    /// Stop accepting, close every connection and cancel outstanding routing
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.shutdown.is_cancelled()
    }

    /// Bind the endpoint's address and port
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.state.config.bind_address()).await?;
        Ok(listener)
    }

    /// Bind, serve, and shut down gracefully on Ctrl-C
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;

        let shutdown = self.state.shutdown.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                shutdown.cancel();
            }
        });

        self.serve(listener).await
    }

    /// Accept connections on `listener` until [`shutdown`](Self::shutdown)
    #[instrument(skip(self, listener), fields(name = %self.state.config.name()))]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let state = &self.state;
        info!(url = %state.config.url(), local = ?listener.local_addr().ok(), "Herald listening");

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(state);
                        let tls = self.tls.clone();
                        self.state.tasks.spawn(
                            accept_connection(state, tls, stream, peer)
                                .instrument(tracing::info_span!("connection", %peer)),
                        );
                    }
                    Err(e) => {
                        state.metrics.connection_errors.incr();
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }

        info!(
            connections = state.registry.len(),
            "Shutting down server. Waiting for tasks to finish..."
        );
        state.tasks.close();
        if tokio::time::timeout(state.settings.shutdown_timeout, state.tasks.wait())
            .await
            .is_err()
        {
            warn!(remaining = state.tasks.len(), "Shutdown timeout reached, forcing exit");
        }
        state.metrics.log_metrics();
        Ok(())
    }

    /// Clients the package would be delivered to right now
    pub fn find_destination(&self, package: &Package) -> Vec<Arc<ConnectedClient>> {
        self.state.registry.find_destination(package)
    }

    /// Forward a package to every client it resolves to.
    ///
    /// Returns how many recipients accepted their copy.
    pub async fn route_package(&self, package: &Package) -> usize {
        route_package(&self.state, package).await
    }
}

/// Wrap the socket in TLS when configured, then serve it.
async fn accept_connection(
    state: Arc<ServerState>,
    tls: Option<TlsAcceptor>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    // Held until identification completes; covers TLS and the upgrade too.
    let permit = Arc::clone(&state.pending).try_acquire_owned().ok();

    state.metrics.connection_opened();

    let result = match tls {
        Some(acceptor) => {
            match with_timeout_error(acceptor.accept(stream), state.settings.handshake_timeout)
                .await
            {
                Ok(stream) => handle_connection(&state, stream, peer, permit).await,
                Err(e) => Err(ProtocolError::TlsError(e.to_string())),
            }
        }
        None => handle_connection(&state, stream, peer, permit).await,
    };

    state.metrics.connection_closed();

    match result {
        Ok(()) => debug!("Connection closed"),
        Err(e) if e.is_disconnect() => debug!(error = %e, "Connection dropped"),
        Err(e) => {
            state.metrics.connection_errors.incr();
            warn!(error = %e, "Connection ended with error");
        }
    }
}

async fn handle_connection<S>(
    state: &Arc<ServerState>,
    stream: S,
    peer: SocketAddr,
    permit: Option<OwnedSemaphorePermit>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(state.settings.max_message_size))
        .max_frame_size(Some(state.settings.max_message_size));

    let path = state.config.path().to_string();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let body = format!("no Herald endpoint at '{}'", request.uri().path());
            let mut rejection = ErrorResponse::new(Some(body));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = with_timeout_error(
        tokio_tungstenite::accept_hdr_async_with_config(stream, check_path, Some(ws_config)),
        state.settings.handshake_timeout,
    )
    .await?;

    let (sink, mut incoming) = ws.split();
    let (outbound, queue) = mpsc::channel(state.settings.outbound_queue);
    let client = Arc::new(ConnectedClient::new(
        Some(peer),
        outbound,
        state.shutdown.child_token(),
    ));

    let writer = state.tasks.spawn(
        write_loop(sink, queue, Arc::clone(&client)).instrument(tracing::Span::current()),
    );

    let result = serve_client(state, &client, &mut incoming, permit).await;

    state.registry.remove(&client);
    client.close();
    let _ = writer.await;

    if let Some(nid) = client.nid() {
        info!(%nid, link_type = client.link_type().unwrap_or_default(), "Link disconnected");
    }

    result
}

/// Drain the client's outbound queue into the WebSocket.
///
/// Messages already queued when the client closes are still flushed, so a
/// rejection notice reaches the peer before the close frame.
async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut queue: mpsc::Receiver<Message>,
    client: Arc<ConnectedClient>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = client.closed() => break,
        };

        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "Write failed, closing connection");
            client.close();
            break;
        }
    }

    while let Ok(message) = queue.try_recv() {
        if sink.send(message).await.is_err() {
            break;
        }
    }

    let _ = sink.close().await;
}

async fn serve_client<S>(
    state: &Arc<ServerState>,
    client: &Arc<ConnectedClient>,
    incoming: &mut SplitStream<WebSocketStream<S>>,
    permit: Option<OwnedSemaphorePermit>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if permit.is_none() {
        state.metrics.identifications_rejected.incr();
        warn!(limit = state.settings.max_pending_connections, "Rejecting connection, too many pending");
        let _ = client
            .send_service(ServiceKind::Error, constants::ERR_SERVER_BUSY)
            .await;
        return Ok(());
    }

    let identification = match identify(state, client, incoming).await? {
        Some(identification) => identification,
        None => return Ok(()),
    };
    drop(permit);

    let Identification { nid, link_type, .. } = identification;
    if let Err(e) = state.registry.register(Arc::clone(client), nid, link_type.as_str()) {
        state.metrics.identifications_rejected.incr();
        warn!(%nid, error = %e, "Identification rejected");
        let _ = client.send_service(ServiceKind::Error, rejection_reason(&e)).await;
        return Ok(());
    }

    state.metrics.links_identified.incr();
    info!(%nid, %link_type, "Link identified");
    client
        .send_service(ServiceKind::Success, format!("Identified as {nid}"))
        .await?;

    read_loop(state, client, incoming).await
}

/// Read and check the identification line.
///
/// Returns `None` when the connection was rejected or went away; the caller
/// then just closes it.
async fn identify<S>(
    state: &ServerState,
    client: &ConnectedClient,
    incoming: &mut SplitStream<WebSocketStream<S>>,
) -> Result<Option<Identification>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = tokio::select! {
        _ = client.closed() => return Ok(None),
        first = tokio::time::timeout(state.settings.handshake_timeout, incoming.next()) => first,
    };

    let outcome = match first {
        Err(_) => Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_TIMEOUT.into(),
        )),
        Ok(None) => return Ok(None),
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(Some(Ok(Message::Text(line)))) => verify_identify(line.as_str(), state.config.secret()),
        Ok(Some(Ok(_))) => Err(ProtocolError::HandshakeError(constants::ERR_NOT_TEXT.into())),
    };

    match outcome {
        Ok(identification) => Ok(Some(identification)),
        Err(e) => {
            state.metrics.identifications_rejected.incr();
            warn!(error = %e, "Identification rejected");
            let _ = client.send_service(ServiceKind::Error, rejection_reason(&e)).await;
            Ok(None)
        }
    }
}

fn rejection_reason(error: &ProtocolError) -> String {
    match error {
        ProtocolError::HandshakeError(reason) => reason.clone(),
        other => other.to_string(),
    }
}

async fn read_loop<S>(
    state: &Arc<ServerState>,
    client: &Arc<ConnectedClient>,
    incoming: &mut SplitStream<WebSocketStream<S>>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = client.closed() => return Ok(()),
            message = incoming.next() => message,
        };

        let message = match message {
            None => return Ok(()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(message)) => message,
        };

        let package = match &message {
            Message::Text(text) => Package::from_wire(text.as_bytes()),
            Message::Binary(bytes) => Package::from_wire(bytes),
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        state.metrics.package_received(message.len() as u64);

        let package = match package {
            Ok(package) if package.is_from_server() => {
                state.metrics.malformed_packages.incr();
                warn!("Dropping package with spoofed '<server>' source");
                client
                    .send_service(ServiceKind::Error, constants::ERR_SPOOFED_SOURCE)
                    .await?;
                continue;
            }
            Ok(package) if Uuid::try_parse(package.source()).ok() != client.nid() => {
                state.metrics.malformed_packages.incr();
                warn!(source = package.source(), "Dropping package with forged source");
                client
                    .send_service(ServiceKind::Error, constants::ERR_FORGED_SOURCE)
                    .await?;
                continue;
            }
            Ok(package) => package,
            Err(e) => {
                state.metrics.malformed_packages.incr();
                warn!(error = %e, "Dropping malformed package");
                client
                    .send_service(
                        ServiceKind::Error,
                        format!("{}: {e}", constants::ERR_INVALID_PACKAGE),
                    )
                    .await?;
                continue;
            }
        };

        let task_state = Arc::clone(state);
        let sender = Arc::clone(client);
        state.tasks.spawn(
            async move {
                tokio::select! {
                    _ = task_state.shutdown.cancelled() => {}
                    _ = handle_package(&task_state, &sender, package) => {}
                }
            }
            .in_current_span(),
        );
    }
}

async fn handle_package(state: &ServerState, sender: &ConnectedClient, package: Package) {
    match package.destination() {
        Destination::Server => serve_server_package(state, sender, &package).await,
        _ => {
            route_package(state, &package).await;
        }
    }
}

/// Offer a `<server>`-addressed package to the dispatcher
async fn serve_server_package(state: &ServerState, sender: &ConnectedClient, package: &Package) {
    let Some(nid) = sender.nid() else {
        return;
    };

    match state.dispatcher.dispatch(package) {
        Ok(Some(reply)) => {
            let reply = Package::new(reply, SERVER_TOKEN, nid)
                .with_conv_ids(None, package.source_conv_id().map(str::to_string));
            if let Err(e) = sender.try_send(&reply) {
                debug!(%nid, error = %e, "Could not deliver server reply");
            }
        }
        Ok(None) => {}
        Err(ProtocolError::UnexpectedMessage(opcode)) => {
            debug!(%nid, %opcode, "No server handler, dropping package");
        }
        Err(e) => {
            warn!(%nid, error = %e, "Server handler failed");
            let _ = sender.send_service(ServiceKind::Error, e.to_string()).await;
        }
    }
}

/// Resolve the package and hand each recipient its own readdressed copy.
///
/// A failed delivery, including one to a full queue, is logged and counted
/// without affecting the others.
async fn route_package(state: &ServerState, package: &Package) -> usize {
    let _timer = Timer::start("route_package");

    let recipients = state.registry.find_destination(package);
    if recipients.is_empty() {
        state.metrics.packages_dropped.incr();
        debug!(destination = %package.destination(), "No recipients, dropping package");
        return 0;
    }

    let mut delivered = 0;
    for client in &recipients {
        let Some(nid) = client.nid() else {
            continue;
        };

        match client.try_send(&package.readdressed(nid)) {
            Ok(()) => {
                state.metrics.packages_forwarded.incr();
                delivered += 1;
            }
            Err(e) => {
                state.metrics.delivery_failures.incr();
                warn!(%nid, error = %e, "Delivery failed");
            }
        }
    }

    debug!(
        destination = %package.destination(),
        recipients = recipients.len(),
        delivered,
        "Package routed"
    );
    delivered
}
