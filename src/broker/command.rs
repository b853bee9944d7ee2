//! Commands sent to the broker and events received from it.

use super::{
    BrokerException,
    BrokerMessage,
    ConnectionId,
    ConsumerId,
    Destination,
    LocalTransactionId,
    MessageDispatch,
    MessageId,
    ProducerId,
    SessionId,
};
use crate::{auth::PeerCertificate, correlation::CommandId};

/// Registration of a client connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection being registered.
    pub connection_id: ConnectionId,
    /// Client id taken from the peer's container id.
    pub client_id: Option<String>,
    /// SASL user name.
    pub user_name: Option<String>,
    /// SASL password.
    pub password: Option<String>,
    /// TLS client certificate chain.
    pub peer_certificates: Vec<PeerCertificate>,
}

/// Registration of a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerInfo {
    /// Producer being registered.
    pub producer_id: ProducerId,
    /// Fixed destination; `None` for anonymous producers.
    pub destination: Option<Destination>,
}

/// Registration of a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// Consumer being registered.
    pub consumer_id: ConsumerId,
    /// Destination consumed from.
    pub destination: Destination,
    /// Message selector.
    pub selector: Option<String>,
    /// Skip messages published on the same connection.
    pub no_local: bool,
    /// Acknowledge messages individually rather than by range.
    pub no_range_acks: bool,
    /// Messages the broker may push before acknowledgement.
    pub prefetch: u32,
    /// Dispatch from broker threads.
    pub dispatch_async: bool,
    /// Browse without consuming.
    pub browser: bool,
    /// Durable subscription name.
    pub subscription_name: Option<String>,
}

/// How an acknowledgement settles a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckType {
    /// Delivered; final acknowledgement follows with the transaction.
    Delivered,
    /// Consumed.
    Individual,
    /// Undeliverable; the broker should dead-letter it.
    Poison,
}

/// Acknowledgement of one dispatched message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageAck {
    /// Acknowledging consumer.
    pub consumer_id: ConsumerId,
    /// Destination of the message.
    pub destination: Destination,
    /// Acknowledged message.
    pub message_id: Option<MessageId>,
    /// Settlement kind.
    pub ack_type: AckType,
    /// Number of messages covered; always one.
    pub message_count: u32,
    /// Transaction scoping the acknowledgement.
    pub transaction_id: Option<LocalTransactionId>,
}

/// Transaction operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    /// Begin a local transaction.
    Begin,
    /// Commit without a prepare phase.
    CommitOnePhase,
    /// Roll back.
    Rollback,
}

/// Transaction demarcation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Transaction affected.
    pub transaction_id: LocalTransactionId,
    /// Operation.
    pub kind: TransactionKind,
}

/// Body of a broker command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Register a connection.
    RegisterConnection(ConnectionInfo),
    /// Remove a connection.
    RemoveConnection(ConnectionId),
    /// The client is going away.
    Shutdown,
    /// Register a session.
    RegisterSession(SessionId),
    /// Remove a session.
    RemoveSession(SessionId),
    /// Register a producer.
    RegisterProducer(ProducerInfo),
    /// Remove a producer.
    RemoveProducer(ProducerId),
    /// Register a consumer.
    RegisterConsumer(ConsumerInfo),
    /// Remove a consumer.
    RemoveConsumer {
        /// Consumer removed.
        consumer_id: ConsumerId,
        /// Broker sequence of the last message delivered, for redelivery
        /// accounting.
        last_delivered_sequence_id: u64,
    },
    /// Adjust a consumer's prefetch.
    ConsumerControl {
        /// Consumer adjusted.
        consumer_id: ConsumerId,
        /// Destination consumed from.
        destination: Destination,
        /// New prefetch.
        prefetch: u32,
    },
    /// Remove a durable subscription.
    RemoveSubscription {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Subscription name.
        subscription_name: String,
        /// Client id the subscription was recorded under.
        client_id: Option<String>,
    },
    /// Create a destination.
    AddDestination {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Destination created.
        destination: Destination,
    },
    /// Delete a destination.
    RemoveDestination {
        /// Owning connection.
        connection_id: ConnectionId,
        /// Destination deleted.
        destination: Destination,
    },
    /// Publish a message.
    Send(BrokerMessage),
    /// Acknowledge a message.
    Ack(MessageAck),
    /// Demarcate a transaction.
    Transaction(TransactionInfo),
}

/// A command stamped with its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerCommand {
    /// Per-connection command id.
    pub command_id: CommandId,
    /// Whether the broker must answer with a [`BrokerResponse`].
    pub response_required: bool,
    /// The command.
    pub body: Command,
}

/// The broker's answer to a response-required command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerResponse {
    /// Id of the command answered.
    pub correlation_id: CommandId,
    /// Outcome.
    pub result: Result<(), BrokerException>,
}

impl BrokerResponse {
    /// A successful response to `correlation_id`.
    #[must_use]
    pub fn ok(correlation_id: CommandId) -> Self {
        Self {
            correlation_id,
            result: Ok(()),
        }
    }

    /// A failed response to `correlation_id`.
    #[must_use]
    pub fn error(correlation_id: CommandId, exception: BrokerException) -> Self {
        Self {
            correlation_id,
            result: Err(exception),
        }
    }
}

/// Something the broker delivers to the bridge asynchronously.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Answer to a command.
    Response(BrokerResponse),
    /// A message for one of this connection's consumers.
    Dispatch(MessageDispatch),
    /// An error not tied to any command.
    ConnectionError(BrokerException),
    /// Broker metadata; ignored.
    BrokerInfo,
}
