//! Transaction coordinator links.
//!
//! A coordinator link carries declare and discharge control messages. A
//! declare allocates a connection-local transaction id and begins it on the
//! broker. A discharge first settles the session's consumer-side
//! transactional acknowledgements, then commits or rolls back on the broker.

use log::{debug, trace};

use super::io::{BridgeIo, Pending};
use crate::{
    broker::{Broker, BrokerException, Command, LocalTransactionId, TransactionInfo, TransactionKind},
    engine::{ControlAction, DeliveryHandle, DeliveryState, LinkHandle, ProtocolEngine, encode_txn_id},
    error::{ConditionKind, ErrorCondition},
    reassembly::TransferAssembler,
};

/// A discharge waiting for the session's consumers to settle their
/// transactional work.
#[derive(Debug)]
pub(crate) struct Discharge {
    pub(crate) delivery: DeliveryHandle,
    pub(crate) transaction_id: LocalTransactionId,
    pub(crate) rollback: bool,
}

#[derive(Debug, Default)]
pub(crate) struct CoordinatorContext {
    assembler: TransferAssembler,
}

impl CoordinatorContext {
    pub(crate) fn new() -> Self { Self::default() }

    /// Handle a control message. Declares complete here; a discharge is
    /// returned for the caller to finish against the session's consumers.
    pub(crate) fn on_delivery<E, B>(
        &mut self,
        io: &mut BridgeIo<E, B>,
        link: LinkHandle,
        delivery: DeliveryHandle,
    ) -> Option<Discharge>
    where
        E: ProtocolEngine,
        B: Broker,
    {
        if !io.engine.is_readable(delivery) {
            return None;
        }
        let body = self.assembler.read_from(&mut io.engine, link)?;
        io.engine.advance(link);

        let action = match io.engine.decode_control(&body) {
            Ok(action) => action,
            Err(e) => {
                violation(io, link, delivery, ConditionKind::InvalidField, e.to_string());
                return None;
            }
        };
        trace!("coordinator control: link={link}, action={action:?}");

        match action {
            ControlAction::Declare { global_id: Some(_) } => {
                violation(
                    io,
                    link,
                    delivery,
                    ConditionKind::InvalidField,
                    "The coordinator does not support global transactions",
                );
                None
            }
            ControlAction::Declare { global_id: None } => {
                let value = io.next_transaction_id();
                let transaction_id = LocalTransactionId::new(io.connection_id.clone(), value);
                debug!("declaring transaction: transaction={transaction_id}");
                io.send(
                    Command::Transaction(TransactionInfo {
                        connection_id: io.connection_id.clone(),
                        transaction_id,
                        kind: TransactionKind::Begin,
                    }),
                    None,
                );
                io.engine
                    .disposition(delivery, DeliveryState::Declared(encode_txn_id(value)));
                io.engine.settle(delivery);
                None
            }
            ControlAction::Discharge { txn_id, fail } => {
                let Some(transaction_id) = io.local_transaction_id(&txn_id) else {
                    violation(
                        io,
                        link,
                        delivery,
                        ConditionKind::InvalidField,
                        "invalid transaction id",
                    );
                    return None;
                };
                Some(Discharge {
                    delivery,
                    transaction_id,
                    rollback: fail,
                })
            }
            ControlAction::Other(name) => {
                violation(
                    io,
                    link,
                    delivery,
                    ConditionKind::IllegalState,
                    format!("Unknown coordinator action: {name}"),
                );
                None
            }
        }
    }
}

/// End the broker transaction once the session's consumers have committed or
/// rolled back their transactional acknowledgements.
pub(crate) fn end_transaction<E, B>(io: &mut BridgeIo<E, B>, link: LinkHandle, discharge: Discharge)
where
    E: ProtocolEngine,
    B: Broker,
{
    let Discharge {
        delivery,
        transaction_id,
        rollback,
    } = discharge;
    debug!("discharging transaction: transaction={transaction_id}, rollback={rollback}");
    let kind = if rollback {
        TransactionKind::Rollback
    } else {
        TransactionKind::CommitOnePhase
    };
    io.send(
        Command::Transaction(TransactionInfo {
            connection_id: io.connection_id.clone(),
            transaction_id,
            kind,
        }),
        Some(Pending::Discharge {
            link,
            delivery,
            rollback,
        }),
    );
}

/// Report the broker's verdict on a discharge to the peer.
pub(crate) fn on_discharge_response<E, B>(
    io: &mut BridgeIo<E, B>,
    delivery: DeliveryHandle,
    result: Result<(), BrokerException>,
) where
    E: ProtocolEngine,
    B: Broker,
{
    match result {
        Ok(()) => {
            io.engine.disposition(delivery, DeliveryState::Accepted);
            io.engine.settle(delivery);
        }
        Err(e) => io.reject(delivery, e.message),
    }
}

/// A malformed or unsupported control message: reject it and close the
/// coordinator link. The connection stays up.
fn violation<E, B>(
    io: &mut BridgeIo<E, B>,
    link: LinkHandle,
    delivery: DeliveryHandle,
    kind: ConditionKind,
    description: impl Into<String>,
) where
    E: ProtocolEngine,
    B: Broker,
{
    let condition = ErrorCondition::new(kind, description);
    io.engine
        .disposition(delivery, DeliveryState::Rejected(Some(condition.clone())));
    io.engine.settle(delivery);
    io.close_link_with(link, condition);
}
