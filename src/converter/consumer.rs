//! Outbound pipeline: broker dispatches streamed to client consumer links.
//!
//! Dispatches queue on a per-consumer FIFO. The pump streams the encoded
//! message at the head into the link; when the engine stops accepting bytes
//! the pump simply returns and resumes on the next flow event or dispatch.

use std::{
    collections::{HashMap, VecDeque},
    mem,
    sync::Arc,
};

use bytes::{Buf, Bytes};
use log::{debug, trace, warn};

use super::io::{BridgeIo, CloseAction, Pending};
use crate::{
    broker::{
        AckType,
        Broker,
        BrokerMessage,
        Command,
        ConsumerId,
        ConsumerInfo,
        Destination,
        LocalTransactionId,
        MESSAGE_FORMAT_PROPERTY,
        MessageAck,
        MessageDispatch,
        MessageId,
    },
    engine::{DeliveryHandle, DeliveryState, LinkHandle, ProtocolEngine, SessionHandle},
    metrics::{self, Direction},
    tag_pool::TagPool,
    value::PropertyValue,
};

/// How a delivery is settled towards the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Settlement {
    /// Acknowledge with the given type.
    Ack(AckType),
    /// Settle the link delivery and queue the dispatch again without
    /// acknowledging it.
    Redeliver,
}

#[derive(Debug)]
struct InFlight {
    buffer: Bytes,
    delivery: DeliveryHandle,
}

/// A dispatch acknowledged inside a still-open transaction.
#[derive(Clone, Debug)]
struct TxDispatch {
    dispatch: MessageDispatch,
    transaction_id: LocalTransactionId,
}

/// Read-only view of a consumer's queues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    /// Broker consumer id.
    pub consumer_id: ConsumerId,
    /// Prefetch last reported to the broker.
    pub credit: u32,
    /// Queued dispatches, head first: message id and redelivery count.
    pub queued: Vec<(Option<MessageId>, u32)>,
    /// Deliveries sent and awaiting a disposition.
    pub unsettled: usize,
    /// Dispatches acknowledged inside an open transaction.
    pub dispatched_in_tx: usize,
    /// Whether a browse has reached its end.
    pub end_of_browse: bool,
}

/// State of one sending link bound to a broker consumer.
#[derive(Debug)]
pub(crate) struct ConsumerContext {
    pub(crate) consumer_id: ConsumerId,
    pub(crate) link: LinkHandle,
    pub(crate) session: SessionHandle,
    pub(crate) destination: Destination,
    pub(crate) credit: u32,
    subscription_name: Option<String>,
    browser: bool,
    presettle: bool,
    closed: bool,
    end_of_browse: bool,
    last_delivered_sequence_id: u64,
    outbound: VecDeque<MessageDispatch>,
    current: Option<InFlight>,
    unsettled: HashMap<DeliveryHandle, MessageDispatch>,
    dispatched_in_tx: VecDeque<TxDispatch>,
    tags: TagPool,
    close_actions: Vec<CloseAction>,
}

impl ConsumerContext {
    pub(crate) fn new(
        info: &ConsumerInfo,
        link: LinkHandle,
        session: SessionHandle,
        presettle: bool,
    ) -> Self {
        Self {
            consumer_id: info.consumer_id.clone(),
            link,
            session,
            destination: info.destination.clone(),
            credit: info.prefetch,
            subscription_name: info.subscription_name.clone(),
            browser: info.browser,
            presettle,
            closed: false,
            end_of_browse: false,
            last_delivered_sequence_id: 0,
            outbound: VecDeque::new(),
            current: None,
            unsettled: HashMap::new(),
            dispatched_in_tx: VecDeque::new(),
            tags: TagPool::new(),
            close_actions: Vec::new(),
        }
    }

    pub(crate) fn add_close_action(&mut self, action: CloseAction) { self.close_actions.push(action); }

    pub(crate) fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            consumer_id: self.consumer_id.clone(),
            credit: self.credit,
            queued: self
                .outbound
                .iter()
                .map(|md| (md.message_id().cloned(), md.redelivery_counter))
                .collect(),
            unsettled: self.unsettled.len(),
            dispatched_in_tx: self.dispatched_in_tx.len(),
            end_of_browse: self.end_of_browse,
        }
    }

    /// Queue a broker dispatch and try to send it.
    pub(crate) fn on_dispatch<E, B>(&mut self, io: &mut BridgeIo<E, B>, dispatch: MessageDispatch)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        match dispatch.message_id() {
            Some(id) => trace!("dispatching message: message={id}, consumer={}", self.consumer_id),
            None => trace!("dispatching end of browse: consumer={}", self.consumer_id),
        }
        self.outbound.push_back(dispatch);
        self.pump(io);
    }

    /// Stream queued dispatches into the link until the engine or the peer's
    /// credit stops us.
    pub(crate) fn pump<E, B>(&mut self, io: &mut BridgeIo<E, B>)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        while !self.closed {
            while let Some(current) = self.current.as_mut() {
                let sent = io.engine.send(self.link, &current.buffer);
                if sent == 0 {
                    return;
                }
                current.buffer.advance(sent.min(current.buffer.len()));
                if current.buffer.is_empty() {
                    let delivery = current.delivery;
                    self.current = None;
                    io.engine.advance(self.link);
                    if self.presettle {
                        self.settle(io, delivery, Settlement::Ack(AckType::Individual));
                    }
                }
            }

            let needs_credit = self.outbound.front().is_some_and(|md| md.message.is_some());
            if needs_credit && io.engine.credit(self.link) <= 0 {
                return;
            }
            let Some(mut dispatch) = self.outbound.pop_front() else {
                return;
            };
            let Some(mut message) = dispatch.message.take() else {
                self.end_of_browse = true;
                self.drain_check(io);
                continue;
            };
            if dispatch.destination.is_topic() {
                // Topic messages fan out to every subscriber.
                message = Arc::new(BrokerMessage::clone(&message));
            }
            let encoded = {
                let prepared = Arc::make_mut(&mut message);
                prepared
                    .properties
                    .entry(MESSAGE_FORMAT_PROPERTY.to_owned())
                    .or_insert(PropertyValue::Int(0));
                prepared.redelivery_counter = dispatch.redelivery_counter;
                prepared.read_only_body = true;
                io.transformers.outbound().transform(prepared)
            };
            dispatch.message = Some(message);

            match encoded {
                Ok(encoded) if encoded.is_empty() => {
                    debug!("nothing to send for dispatch: consumer={}", self.consumer_id);
                }
                Ok(encoded) => {
                    let tag = if self.presettle {
                        Bytes::new()
                    } else {
                        self.tags.checkout()
                    };
                    let delivery = io.engine.create_delivery(self.link, tag);
                    self.unsettled.insert(delivery, dispatch);
                    self.current = Some(InFlight {
                        buffer: encoded.data,
                        delivery,
                    });
                    metrics::inc_deliveries(Direction::Outbound);
                }
                Err(e) => {
                    warn!(
                        "dropping dispatch that could not be encoded: consumer={}, error={e}",
                        self.consumer_id
                    );
                }
            }
        }
    }

    /// Tell the peer we are drained once nothing is queued. Browsers only
    /// report drained after the end-of-browse marker.
    pub(crate) fn drain_check<E, B>(&self, io: &mut BridgeIo<E, B>)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        if self.browser && !self.end_of_browse {
            return;
        }
        if self.outbound.is_empty() {
            io.engine.drained(self.link);
        }
    }

    /// React to the peer's disposition of a delivery we sent.
    pub(crate) fn on_disposition<E, B>(&mut self, io: &mut BridgeIo<E, B>, delivery: DeliveryHandle)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        let state = io.engine.remote_state(delivery);
        let remotely_settled = io.engine.remotely_settled(delivery);
        let settlement = match state {
            Some(DeliveryState::Transactional {
                txn_id,
                outcome: Some(outcome),
            }) if *outcome == DeliveryState::Accepted => {
                trace!("transactional accept: consumer={}, delivery={delivery}", self.consumer_id);
                if !remotely_settled {
                    io.engine.disposition(
                        delivery,
                        DeliveryState::transactional(txn_id, DeliveryState::Accepted),
                    );
                }
                Some(Settlement::Ack(AckType::Delivered))
            }
            Some(DeliveryState::Accepted) => {
                if !remotely_settled {
                    io.engine.disposition(delivery, DeliveryState::Accepted);
                }
                Some(Settlement::Ack(AckType::Individual))
            }
            Some(DeliveryState::Rejected(_)) => {
                self.count_redelivery(delivery);
                Some(Settlement::Redeliver)
            }
            Some(DeliveryState::Released) => Some(Settlement::Redeliver),
            Some(DeliveryState::Modified {
                delivery_failed,
                undeliverable_here,
            }) => {
                if delivery_failed {
                    self.count_redelivery(delivery);
                }
                if undeliverable_here == Some(true) {
                    Some(Settlement::Ack(AckType::Poison))
                } else {
                    Some(Settlement::Redeliver)
                }
            }
            _ => None,
        };
        if let Some(settlement) = settlement {
            self.settle(io, delivery, settlement);
        }
        self.pump(io);
    }

    fn count_redelivery(&mut self, delivery: DeliveryHandle) {
        if let Some(dispatch) = self.unsettled.get_mut(&delivery) {
            dispatch.redelivery_counter += 1;
            trace!(
                "redelivery counted: consumer={}, count={}",
                self.consumer_id, dispatch.redelivery_counter
            );
        }
    }

    fn settle<E, B>(&mut self, io: &mut BridgeIo<E, B>, delivery: DeliveryHandle, settlement: Settlement)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        let tag = io.engine.delivery_tag(delivery);
        if !tag.is_empty() && io.engine.remotely_settled(delivery) {
            self.tags.checkin(tag);
        }
        let Some(dispatch) = self.unsettled.remove(&delivery) else {
            debug!("settling unknown delivery: consumer={}, delivery={delivery}", self.consumer_id);
            return;
        };

        let ack_type = match settlement {
            Settlement::Redeliver => {
                io.engine.settle(delivery);
                self.outbound.push_back(dispatch);
                return;
            }
            Settlement::Ack(ack_type) => ack_type,
        };

        if let Some(message) = dispatch.message.as_deref() {
            self.last_delivered_sequence_id = message.broker_sequence();
        }
        let transaction_id = io
            .engine
            .remote_state(delivery)
            .as_ref()
            .and_then(DeliveryState::txn_id)
            .and_then(|txn_id| io.local_transaction_id(txn_id));
        let ack = MessageAck {
            consumer_id: self.consumer_id.clone(),
            destination: dispatch.destination.clone(),
            message_id: dispatch.message_id().cloned(),
            ack_type,
            message_count: 1,
            transaction_id: transaction_id.clone(),
        };
        if let Some(transaction_id) = transaction_id {
            self.dispatched_in_tx.push_front(TxDispatch {
                dispatch,
                transaction_id,
            });
        }
        trace!("sending ack: consumer={}, ack={ack:?}", self.consumer_id);
        io.send(
            Command::Ack(ack),
            Some(Pending::Ack {
                link: self.link,
                delivery,
            }),
        );
    }

    /// Acknowledge every dispatch recorded in the transaction.
    pub(crate) fn commit<E, B>(&mut self, io: &mut BridgeIo<E, B>)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        for tx in mem::take(&mut self.dispatched_in_tx) {
            let ack = MessageAck {
                consumer_id: self.consumer_id.clone(),
                destination: tx.dispatch.destination.clone(),
                message_id: tx.dispatch.message_id().cloned(),
                ack_type: AckType::Individual,
                message_count: 1,
                transaction_id: Some(tx.transaction_id),
            };
            trace!("sending commit ack: consumer={}, ack={ack:?}", self.consumer_id);
            io.send(Command::Ack(ack), Some(Pending::CommitAck { link: self.link }));
        }
    }

    /// Queue every dispatch recorded in the transaction again, at the head,
    /// counting one more delivery attempt for each.
    pub(crate) fn rollback(&mut self) {
        trace!(
            "rolling back dispatches: consumer={}, count={}",
            self.consumer_id,
            self.dispatched_in_tx.len()
        );
        for tx in mem::take(&mut self.dispatched_in_tx) {
            let mut dispatch = tx.dispatch;
            dispatch.redelivery_counter += 1;
            self.outbound.push_front(dispatch);
        }
    }

    /// Detach: unregister the consumer, keeping close actions.
    pub(crate) fn on_detach<E, B>(&mut self, io: &mut BridgeIo<E, B>) -> bool
    where
        E: ProtocolEngine,
        B: Broker,
    {
        if mem::replace(&mut self.closed, true) {
            return false;
        }
        io.send(
            Command::RemoveConsumer {
                consumer_id: self.consumer_id.clone(),
                last_delivered_sequence_id: self.last_delivered_sequence_id,
            },
            None,
        );
        true
    }

    /// Close: unregister the consumer, drop a durable subscription and run
    /// close actions once.
    pub(crate) fn on_close<E, B>(&mut self, io: &mut BridgeIo<E, B>)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        if !self.on_detach(io) {
            return;
        }
        if let Some(subscription_name) = self.subscription_name.clone() {
            io.send(
                Command::RemoveSubscription {
                    connection_id: io.connection_id.clone(),
                    subscription_name,
                    client_id: io.client_id.clone(),
                },
                None,
            );
        }
        io.run_close_actions(mem::take(&mut self.close_actions));
    }
}
