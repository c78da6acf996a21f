//! # TLS Transport Layer
//!
//! Server-side TLS termination for `wss://` endpoints.
//!
//! ## Responsibilities
//! - Load a PEM certificate chain and private key
//! - Build a `tokio-rustls` acceptor the server wraps accepted sockets with
//!
//! Links connect to secure endpoints through `tokio-tungstenite`'s rustls
//! connector and the platform root store.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};

use crate::config::TlsSettings;
use crate::error::{ProtocolError, Result};

/// TLS server configuration
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsServerConfig {
    /// Create a new TLS server configuration
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
        let file = File::open(path).map_err(|e| {
            ProtocolError::TlsError(format!("Failed to open {what} file {}: {e}", path.display()))
        })?;
        Ok(BufReader::new(file))
    }

    fn load_certs(&self) -> Result<Vec<CertificateDer<'static>>> {
        let mut reader = Self::open(&self.cert_path, "certificate")?;
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProtocolError::TlsError(format!("Failed to parse certificate: {e}")))?;

        if certs.is_empty() {
            return Err(ProtocolError::TlsError("No certificates found".into()));
        }
        Ok(certs)
    }

    fn load_key(&self) -> Result<PrivateKeyDer<'static>> {
        let mut reader = Self::open(&self.key_path, "key")?;
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to parse private key: {e}")))?
            .ok_or_else(|| ProtocolError::TlsError("No private keys found".into()))
    }

    /// Load the rustls server configuration from the PEM files
    #[instrument(skip(self), fields(cert = %self.cert_path.display()))]
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_chain = self.load_certs()?;
        let private_key = self.load_key()?;

        debug!(certificates = cert_chain.len(), "Loaded TLS material");

        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))?
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
    }

    /// Build the acceptor used by the server's accept loop
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.load_server_config()?)))
    }
}

impl From<&TlsSettings> for TlsServerConfig {
    fn from(settings: &TlsSettings) -> Self {
        Self::new(&settings.cert_path, &settings.key_path)
    }
}
