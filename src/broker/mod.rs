//! Boundary to the broker core.
//!
//! The bridge issues typed [`BrokerCommand`]s and receives
//! [`BrokerEvent`]s back. Routing, persistence and subscription matching
//! live behind the [`Broker`] trait.

mod command;
mod destination;
mod ids;
mod message;
pub mod selector;

use thiserror::Error;

pub use self::{
    command::{
        AckType,
        BrokerCommand,
        BrokerEvent,
        BrokerResponse,
        Command,
        ConnectionInfo,
        ConsumerInfo,
        MessageAck,
        ProducerInfo,
        TransactionInfo,
        TransactionKind,
    },
    destination::{Destination, DestinationError, DestinationKind},
    ids::{ConnectionId, ConsumerId, LocalTransactionId, MessageId, ProducerId, SessionId},
    message::{BrokerMessage, MESSAGE_FORMAT_PROPERTY, MessageDispatch},
};

/// Category of a broker failure, used to pick the condition shown to peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Authentication or authorization failed.
    Security,
    /// The client id is invalid or already in use.
    InvalidClientId,
    /// A message selector could not be parsed.
    InvalidSelector,
    /// Anything else.
    Other,
}

/// A failure reported by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BrokerException {
    /// Failure category.
    pub kind: ExceptionKind,
    /// Broker-supplied description.
    pub message: String,
}

impl BrokerException {
    /// Create an exception.
    #[must_use]
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The broker as seen from one connection.
pub trait Broker {
    /// Hand `command` to the broker. Response-required commands are answered
    /// later with a [`BrokerEvent::Response`] carrying the command id.
    fn send(&mut self, command: BrokerCommand);

    /// Destination of the durable subscription `name` recorded for
    /// `client_id`, if one exists.
    fn lookup_subscription(&self, name: &str, client_id: Option<&str>) -> Option<Destination>;

    /// Validate a selector before registering a consumer with it.
    ///
    /// # Errors
    ///
    /// Returns an [`ExceptionKind::InvalidSelector`] exception when the
    /// selector is malformed.
    fn validate_selector(&self, selector: &str) -> Result<(), BrokerException> {
        selector::validate(selector)
    }
}
