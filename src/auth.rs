//! Authentication collaborator and SASL mechanism helpers.
//!
//! The bridge never verifies credentials itself. It extracts what the peer
//! offered (SASL `PLAIN` credentials, `ANONYMOUS`, or a TLS client
//! certificate chain) and hands it to an [`Authenticator`].

use bytes::Bytes;
use thiserror::Error;

/// SASL mechanisms offered to peers, in preference order.
pub const OFFERED_MECHANISMS: [&str; 2] = ["ANONYMOUS", "PLAIN"];

/// DER-encoded certificate presented by the peer during the TLS handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerCertificate(pub Bytes);

/// An authenticated principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    user_name: Option<String>,
}

impl Identity {
    /// Create an identity for `user_name` (`None` for anonymous peers).
    #[must_use]
    pub fn new(user_name: Option<String>) -> Self { Self { user_name } }

    /// Authenticated user name, if any.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> { self.user_name.as_deref() }
}

/// Reason an authentication attempt failed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);

/// Verifies credentials on behalf of the bridge.
pub trait Authenticator: Send + Sync {
    /// Authenticate a peer.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the credentials are not accepted.
    fn authenticate(
        &self,
        user_name: Option<&str>,
        password: Option<&str>,
        peer_certificates: &[PeerCertificate],
    ) -> Result<Identity, AuthError>;
}

/// Accepts every peer; used when the broker has no authentication plugin.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuthenticator;

impl Authenticator for NoopAuthenticator {
    fn authenticate(
        &self,
        user_name: Option<&str>,
        _password: Option<&str>,
        _peer_certificates: &[PeerCertificate],
    ) -> Result<Identity, AuthError> {
        Ok(Identity::new(user_name.map(str::to_owned)))
    }
}

/// Outcome reported back to the peer at the end of a SASL exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslOutcome {
    /// Authentication succeeded.
    Ok,
    /// Authentication failed.
    Auth,
}

/// Mechanism the peer selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslMechanism {
    /// `PLAIN` user/password exchange.
    Plain,
    /// `ANONYMOUS`, optionally backed by a TLS identity.
    Anonymous,
}

impl SaslMechanism {
    /// Map a mechanism name to a supported mechanism.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PLAIN" => Some(Self::Plain),
            "ANONYMOUS" => Some(Self::Anonymous),
            _ => None,
        }
    }
}

/// Credentials carried in a SASL `PLAIN` initial response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlainCredentials {
    /// Authorization identity, when the peer supplied one.
    pub authzid: Option<String>,
    /// Authentication identity.
    pub user_name: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl PlainCredentials {
    /// Parse a NUL-separated `PLAIN` response.
    ///
    /// The canonical form is `authzid NUL user NUL password`. Peers that omit
    /// the authorization identity entirely (`user NUL password`) are accepted
    /// too; empty fields decode as `None`.
    #[must_use]
    pub fn parse(response: &[u8]) -> Self {
        let parts: Vec<Option<String>> = response
            .split(|byte| *byte == 0)
            .map(|part| {
                (!part.is_empty()).then(|| String::from_utf8_lossy(part).into_owned())
            })
            .collect();
        match parts.as_slice() {
            [authzid, user, password, ..] => Self {
                authzid: authzid.clone(),
                user_name: user.clone(),
                password: password.clone(),
            },
            [user, password] => Self {
                authzid: None,
                user_name: user.clone(),
                password: password.clone(),
            },
            [user] => Self {
                authzid: None,
                user_name: user.clone(),
                password: None,
            },
            [] => Self::default(),
        }
    }
}
