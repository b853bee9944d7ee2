//! Broker-native messages and dispatches.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;

use super::{ConsumerId, Destination, LocalTransactionId, MessageId, ProducerId};
use crate::value::PropertyValue;

/// Property recording the wire message format of a broker message.
pub const MESSAGE_FORMAT_PROPERTY: &str = "JMS_AMQP_MESSAGE_FORMAT";

/// A message in the broker's native representation.
///
/// `Clone` is a deep copy; topic dispatches are cloned before the bridge
/// mutates them because the same message may be shared by many consumers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Id minted by the bridge or the broker.
    pub message_id: Option<MessageId>,
    /// Id the client put on the wire message, if any.
    pub client_message_id: Option<String>,
    /// Destination the message is addressed to.
    pub destination: Option<Destination>,
    /// Producer that sent the message.
    pub producer_id: Option<ProducerId>,
    /// Transaction the message belongs to.
    pub transaction_id: Option<LocalTransactionId>,
    /// Number of previous delivery attempts.
    pub redelivery_counter: u32,
    /// Whether the body may no longer be modified.
    pub read_only_body: bool,
    /// Message properties.
    pub properties: BTreeMap<String, PropertyValue>,
    /// Opaque body.
    pub body: Bytes,
}

impl BrokerMessage {
    /// Create a message carrying `body`.
    #[must_use]
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Broker sequence of the message, `0` when unassigned.
    #[must_use]
    pub fn broker_sequence(&self) -> u64 {
        self.message_id.as_ref().map_or(0, |id| id.broker_sequence)
    }
}

/// A message the broker hands to one consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageDispatch {
    /// Consumer the message is addressed to.
    pub consumer_id: ConsumerId,
    /// Destination the message came from.
    pub destination: Destination,
    /// The message; `None` marks the end of a queue browse.
    pub message: Option<Arc<BrokerMessage>>,
    /// Delivery attempts recorded for this dispatch.
    pub redelivery_counter: u32,
}

impl MessageDispatch {
    /// Dispatch `message` to `consumer_id`.
    #[must_use]
    pub fn new(consumer_id: ConsumerId, destination: Destination, message: BrokerMessage) -> Self {
        Self {
            consumer_id,
            destination,
            message: Some(Arc::new(message)),
            redelivery_counter: 0,
        }
    }

    /// The end-of-browse marker for `consumer_id`.
    #[must_use]
    pub fn end_of_browse(consumer_id: ConsumerId, destination: Destination) -> Self {
        Self {
            consumer_id,
            destination,
            message: None,
            redelivery_counter: 0,
        }
    }

    /// Message id of the dispatched message.
    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        self.message.as_deref().and_then(|m| m.message_id.as_ref())
    }
}
