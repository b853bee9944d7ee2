//! Connection-wide state shared by every link context.
//!
//! Contexts borrow this mutably while the converter keeps its link and
//! session tables borrowed separately.

use bytes::Bytes;
use log::{debug, error, trace};

use crate::{
    broker::{
        Broker,
        BrokerCommand,
        Command,
        ConnectionId,
        Destination,
        DestinationKind,
        LocalTransactionId,
    },
    config::BridgeConfig,
    correlation::{CommandId, CommandIdGenerator, ResponseCorrelator},
    engine::{
        DeliveryHandle,
        DeliveryState,
        LinkHandle,
        ProtocolEngine,
        Symbol,
        TEMP_QUEUE_CAPABILITY,
        TEMP_TOPIC_CAPABILITY,
        decode_txn_id,
    },
    error::{ConditionKind, ErrorCondition},
    transform::Transformers,
};

/// Work to resume when the broker answers a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Pending {
    ConnectionOpen,
    ConnectionClose,
    ProducerAttach {
        link: LinkHandle,
    },
    ConsumerAttach {
        link: LinkHandle,
    },
    TemporaryDestination {
        link: LinkHandle,
    },
    TemporaryDestinationRemoval {
        destination: Destination,
    },
    Send {
        link: LinkHandle,
        delivery: DeliveryHandle,
        txn_id: Option<Bytes>,
    },
    Ack {
        link: LinkHandle,
        delivery: DeliveryHandle,
    },
    CommitAck {
        link: LinkHandle,
    },
    Discharge {
        link: LinkHandle,
        delivery: DeliveryHandle,
        rollback: bool,
    },
}

/// Cleanup run exactly once when a link is closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CloseAction {
    DeleteTemporaryDestination(Destination),
}

pub(crate) struct BridgeIo<E, B> {
    pub(crate) engine: E,
    pub(crate) broker: B,
    pub(crate) config: BridgeConfig,
    pub(crate) connection_id: ConnectionId,
    pub(crate) client_id: Option<String>,
    pub(crate) transformers: Transformers,
    pub(crate) correlator: ResponseCorrelator<Pending>,
    command_ids: CommandIdGenerator,
    next_temp_destination_id: u64,
    next_transaction_id: u64,
}

impl<E, B> BridgeIo<E, B>
where
    E: ProtocolEngine,
    B: Broker,
{
    pub(crate) fn new(engine: E, broker: B, config: BridgeConfig) -> Self {
        let transformers = Transformers::for_kind(config.transformer_kind());
        Self {
            engine,
            broker,
            config,
            connection_id: ConnectionId::generate(),
            client_id: None,
            transformers,
            correlator: ResponseCorrelator::new(),
            command_ids: CommandIdGenerator::new(),
            next_temp_destination_id: 0,
            next_transaction_id: 0,
        }
    }

    /// Stamp and send a command. Supplying `pending` marks it
    /// response-required and parks the continuation until the answer.
    pub(crate) fn send(&mut self, body: Command, pending: Option<Pending>) -> CommandId {
        let command_id = self.command_ids.next_id();
        let response_required = pending.is_some();
        if let Some(pending) = pending
            && let Some(displaced) = self.correlator.register(command_id, pending)
        {
            error!("command id reused: id={command_id}, displaced={displaced:?}");
        }
        trace!("sending command to broker: id={command_id}, command={body:?}");
        self.broker.send(BrokerCommand {
            command_id,
            response_required,
            body,
        });
        command_id
    }

    /// Local transaction id for a wire transaction id.
    pub(crate) fn local_transaction_id(&self, txn_id: &[u8]) -> Option<LocalTransactionId> {
        decode_txn_id(txn_id).map(|value| LocalTransactionId::new(self.connection_id.clone(), value))
    }

    /// Allocate a transaction id; the first is `1`.
    pub(crate) fn next_transaction_id(&mut self) -> u64 {
        self.next_transaction_id += 1;
        self.next_transaction_id
    }

    /// Create a temporary destination for a dynamic terminus on `link`.
    ///
    /// The kind follows the terminus capabilities; without either capability
    /// a temporary queue is created.
    pub(crate) fn create_temporary_destination(
        &mut self,
        link: LinkHandle,
        capabilities: &[Symbol],
    ) -> Destination {
        let kind = if capabilities.contains(&TEMP_TOPIC_CAPABILITY) {
            DestinationKind::TempTopic
        } else if capabilities.contains(&TEMP_QUEUE_CAPABILITY) {
            DestinationKind::TempQueue
        } else {
            debug!("dynamic link requested no node type, using a temporary queue: link={link}");
            DestinationKind::TempQueue
        };
        let name = format!("{}:{}", self.connection_id, self.next_temp_destination_id);
        self.next_temp_destination_id += 1;
        let destination = Destination::new(kind, name);
        self.send(
            Command::AddDestination {
                connection_id: self.connection_id.clone(),
                destination: destination.clone(),
            },
            Some(Pending::TemporaryDestination { link }),
        );
        destination
    }

    pub(crate) fn run_close_actions(&mut self, actions: Vec<CloseAction>) {
        for action in actions {
            match action {
                CloseAction::DeleteTemporaryDestination(destination) => {
                    self.send(
                        Command::RemoveDestination {
                            connection_id: self.connection_id.clone(),
                            destination: destination.clone(),
                        },
                        Some(Pending::TemporaryDestinationRemoval { destination }),
                    );
                }
            }
        }
    }

    /// Top producer credit back up to the configured value once it has
    /// fallen to a fifth of it.
    pub(crate) fn replenish_credit(&mut self, link: LinkHandle) {
        let target = self.config.producer_credit;
        let current = u32::try_from(self.engine.credit(link)).unwrap_or(0);
        if u64::from(current) * 5 <= u64::from(target) {
            trace!(
                "granting producer credit: link={link}, credit={}",
                target - current
            );
            self.engine.flow(link, target - current);
        }
    }

    /// Reject and settle `delivery` with a `failed` condition.
    pub(crate) fn reject(&mut self, delivery: DeliveryHandle, description: impl Into<String>) {
        let condition = ErrorCondition::new(ConditionKind::Failed, description);
        self.engine
            .disposition(delivery, DeliveryState::Rejected(Some(condition)));
        self.engine.settle(delivery);
    }

    /// Close `link` with `condition`.
    pub(crate) fn close_link_with(&mut self, link: LinkHandle, condition: ErrorCondition) {
        debug!("closing link: link={link}, condition={condition}");
        self.engine.set_link_condition(link, condition);
        self.engine.close_link(link);
    }
}
