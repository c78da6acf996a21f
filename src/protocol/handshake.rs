//! Identification handshake.
//!
//! The first message on every connection must be the text
//! `Identify <nid>:<link_type>:<secret>`. This module parses and checks that
//! line; the server decides what to do with the outcome. Parsing never touches
//! shared state, so an unauthenticated socket cannot reach the registry.
//!
//! Rules enforced here:
//! - `nid` and `link_type` are non-empty and contain no whitespace or colon
//! - `nid` is a UUID in lowercase hyphenated form, the form every package uses
//! - `link_type` is routable as a group (not `*`, `<server>` or UUID-shaped)
//! - `secret` contains no colon and equals the endpoint secret

use crate::config::HANDSHAKE_SEPARATOR;
use crate::core::package::Destination;
use crate::error::{constants, ProtocolError, Result};
use std::fmt;
use uuid::Uuid;

use tracing::{debug, instrument};

/// Keyword opening the identification line
pub const IDENTIFY_PREFIX: &str = "Identify ";

/// Identity asserted by a connecting link.
#[derive(Clone, PartialEq, Eq)]
pub struct Identification {
    pub nid: Uuid,
    pub link_type: String,
    secret: String,
}

impl Identification {
    /// Whether the asserted secret matches the endpoint's
    pub fn secret_matches(&self, expected: &str) -> bool {
        self.secret == expected
    }
}

impl fmt::Debug for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identification")
            .field("nid", &self.nid)
            .field("link_type", &self.link_type)
            .finish_non_exhaustive()
    }
}

fn is_token(field: &str) -> bool {
    !field.is_empty()
        && !field
            .chars()
            .any(|c| c.is_whitespace() || c == HANDSHAKE_SEPARATOR)
}

/// Parse an identification line without checking the secret.
///
/// # Errors
/// `ProtocolError::HandshakeError` describing the first rule the line breaks.
#[instrument(level = "debug", skip(line))]
pub fn parse_identify(line: &str) -> Result<Identification> {
    let malformed = || ProtocolError::HandshakeError(constants::ERR_MALFORMED_IDENTIFY.into());

    let body = line.strip_prefix(IDENTIFY_PREFIX).ok_or_else(malformed)?;

    let mut fields = body.splitn(3, HANDSHAKE_SEPARATOR);
    let (nid, link_type, secret) = match (fields.next(), fields.next(), fields.next()) {
        (Some(nid), Some(link_type), Some(secret)) => (nid, link_type, secret),
        _ => return Err(malformed()),
    };

    if !is_token(nid) || !is_token(link_type) || secret.contains(HANDSHAKE_SEPARATOR) {
        return Err(malformed());
    }

    let invalid_nid = || ProtocolError::HandshakeError(constants::ERR_INVALID_NID.into());
    let parsed = Uuid::try_parse(nid).map_err(|_| invalid_nid())?;
    if parsed.hyphenated().to_string() != nid {
        return Err(invalid_nid());
    }
    let nid = parsed;

    if !Destination::is_group_name(link_type) {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_RESERVED_LINK_TYPE.into(),
        ));
    }

    debug!(%nid, link_type, "Parsed identification");

    Ok(Identification {
        nid,
        link_type: link_type.to_string(),
        secret: secret.to_string(),
    })
}

/// Parse an identification line and check it against the endpoint secret.
pub fn verify_identify(line: &str, secret: &str) -> Result<Identification> {
    let identification = parse_identify(line)?;
    if !identification.secret_matches(secret) {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_WRONG_SECRET.into(),
        ));
    }
    Ok(identification)
}

/// Build the identification line a link sends first.
pub fn identify_message(nid: Uuid, link_type: &str, secret: &str) -> String {
    format!(
        "{IDENTIFY_PREFIX}{}{HANDSHAKE_SEPARATOR}{link_type}{HANDSHAKE_SEPARATOR}{secret}",
        nid.hyphenated()
    )
}
