//! Canonical error and result types for the crate.
//!
//! Every failure the bridge can observe ends up in one of two places: a
//! [`BridgeError`] returned to the driver (fatal to the connection), or an
//! [`ErrorCondition`] attached to a close/detach frame so the remote peer
//! sees a symbolic diagnostic.

use std::io;

use thiserror::Error;

use crate::{
    auth::AuthError,
    broker::{BrokerException, ExceptionKind},
    engine::EngineError,
    header::ProtocolHeader,
};

/// Symbolic error categories carried on close and detach frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    /// The peer is not permitted to perform the operation.
    UnauthorizedAccess,
    /// A field supplied by the peer was malformed or missing.
    InvalidField,
    /// The operation is not valid in the current state.
    IllegalState,
    /// The bridge or broker failed internally.
    InternalError,
    /// A referenced entity does not exist.
    NotFound,
    /// A delivery could not be processed.
    Failed,
}

impl ConditionKind {
    /// Wire symbol for this category.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::UnauthorizedAccess => "amqp:unauthorized-access",
            Self::InvalidField => "amqp:invalid-field",
            Self::IllegalState => "amqp:illegal-state",
            Self::InternalError => "amqp:internal-error",
            Self::NotFound => "amqp:not-found",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Diagnostic attached to a connection, link or rejected delivery.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {description}")]
pub struct ErrorCondition {
    /// Symbolic category.
    pub kind: ConditionKind,
    /// Human readable detail.
    pub description: String,
}

impl ErrorCondition {
    /// Build a condition from a category and description.
    #[must_use]
    pub fn new(kind: ConditionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Condition used when connection registration is refused.
    #[must_use]
    pub fn for_connection_open(exception: &BrokerException) -> Self {
        let kind = match exception.kind {
            ExceptionKind::Security => ConditionKind::UnauthorizedAccess,
            ExceptionKind::InvalidClientId => ConditionKind::InvalidField,
            _ => ConditionKind::IllegalState,
        };
        Self::new(kind, exception.message.clone())
    }

    /// Condition used when producer or temporary destination registration
    /// fails.
    #[must_use]
    pub fn for_registration(exception: &BrokerException) -> Self {
        let kind = match exception.kind {
            ExceptionKind::Security => ConditionKind::UnauthorizedAccess,
            _ => ConditionKind::InternalError,
        };
        Self::new(kind, exception.message.clone())
    }

    /// Condition used when a link-scoped broker command fails.
    ///
    /// Selector and client-id failures are the peer's fault and map to
    /// `invalid-field`; everything else is an internal error.
    #[must_use]
    pub fn for_link(exception: &BrokerException) -> Self {
        let kind = match exception.kind {
            ExceptionKind::Security => ConditionKind::UnauthorizedAccess,
            ExceptionKind::InvalidSelector | ExceptionKind::InvalidClientId => {
                ConditionKind::InvalidField
            }
            ExceptionKind::Other => ConditionKind::InternalError,
        };
        Self::new(kind, exception.message.clone())
    }
}

/// A peer broke a protocol rule; the offending link or connection is closed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("protocol violation: {condition}")]
pub struct ProtocolViolation {
    /// Condition reported to the peer.
    pub condition: ErrorCondition,
}

impl ProtocolViolation {
    /// Build a violation with the given category and description.
    #[must_use]
    pub fn new(kind: ConditionKind, description: impl Into<String>) -> Self {
        Self {
            condition: ErrorCondition::new(kind, description),
        }
    }

    /// Shorthand for an `invalid-field` violation.
    #[must_use]
    pub fn invalid_field(description: impl Into<String>) -> Self {
        Self::new(ConditionKind::InvalidField, description)
    }
}

/// Top-level error type for failures that end a connection.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The protocol engine could not decode transport bytes.
    #[error("could not decode frame: {0}")]
    Decode(#[from] EngineError),
    /// The transport failed while reading or writing.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// The peer opened with a header this bridge does not speak.
    #[error("unsupported protocol header: {0}")]
    UnsupportedHeader(ProtocolHeader),
    /// The peer's credentials were refused.
    #[error(transparent)]
    Authentication(#[from] AuthError),
    /// The broker reported a failure that could not be scoped to a link.
    #[error("broker failure: {0}")]
    Broker(#[from] BrokerException),
}

/// Canonical result alias used by the bridge's public APIs.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ExceptionKind::Security, ConditionKind::UnauthorizedAccess)]
    #[case(ExceptionKind::InvalidClientId, ConditionKind::InvalidField)]
    #[case(ExceptionKind::InvalidSelector, ConditionKind::IllegalState)]
    #[case(ExceptionKind::Other, ConditionKind::IllegalState)]
    fn connection_open_conditions(#[case] kind: ExceptionKind, #[case] expected: ConditionKind) {
        let condition = ErrorCondition::for_connection_open(&BrokerException::new(kind, "nope"));
        assert_eq!(condition.kind, expected);
        assert_eq!(condition.description, "nope");
    }

    #[rstest]
    #[case(ExceptionKind::Security, ConditionKind::UnauthorizedAccess)]
    #[case(ExceptionKind::InvalidSelector, ConditionKind::InvalidField)]
    #[case(ExceptionKind::Other, ConditionKind::InternalError)]
    fn link_conditions(#[case] kind: ExceptionKind, #[case] expected: ConditionKind) {
        assert_eq!(
            ErrorCondition::for_link(&BrokerException::new(kind, "x")).kind,
            expected
        );
    }

    #[rstest]
    #[case(ExceptionKind::Security, ConditionKind::UnauthorizedAccess)]
    #[case(ExceptionKind::InvalidSelector, ConditionKind::InternalError)]
    #[case(ExceptionKind::Other, ConditionKind::InternalError)]
    fn registration_conditions(#[case] kind: ExceptionKind, #[case] expected: ConditionKind) {
        assert_eq!(
            ErrorCondition::for_registration(&BrokerException::new(kind, "x")).kind,
            expected
        );
    }

    #[test]
    fn condition_displays_symbol() {
        let condition = ErrorCondition::new(ConditionKind::NotFound, "gone");
        assert_eq!(condition.to_string(), "amqp:not-found: gone");
    }

    #[test]
    fn transport_failure_keeps_its_source() {
        let error = BridgeError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(
            &error,
            BridgeError::Transport(e) if e.kind() == io::ErrorKind::ConnectionReset
        ));
        assert!(error.to_string().starts_with("transport error: "));
    }
}
