//! Inbound pipeline: client producer links feeding the broker.

use std::mem;

use bytes::Bytes;
use log::{debug, trace};

use super::io::{BridgeIo, CloseAction, Pending};
use crate::{
    broker::{Broker, BrokerException, Command, Destination, MessageId, ProducerId},
    engine::{DeliveryHandle, DeliveryState, LinkHandle, ProtocolEngine, SessionHandle},
    metrics::{self, Direction},
    reassembly::TransferAssembler,
    transform::EncodedMessage,
};

const ANONYMOUS_WITHOUT_TO: &str = "Missing to field for message sent to an anonymous producer";

/// State of one receiving link bound to a broker producer.
#[derive(Debug)]
pub(crate) struct ProducerContext {
    pub(crate) producer_id: ProducerId,
    pub(crate) session: SessionHandle,
    pub(crate) destination: Option<Destination>,
    pub(crate) anonymous: bool,
    closed: bool,
    assembler: TransferAssembler,
    message_sequence: u64,
    close_actions: Vec<CloseAction>,
}

impl ProducerContext {
    pub(crate) fn new(producer_id: ProducerId, session: SessionHandle) -> Self {
        Self {
            producer_id,
            session,
            destination: None,
            anonymous: false,
            closed: false,
            assembler: TransferAssembler::new(),
            message_sequence: 0,
            close_actions: Vec::new(),
        }
    }

    pub(crate) fn add_close_action(&mut self, action: CloseAction) { self.close_actions.push(action); }

    /// Read the delivery and, once complete, forward it to the broker.
    pub(crate) fn on_delivery<E, B>(
        &mut self,
        io: &mut BridgeIo<E, B>,
        link: LinkHandle,
        delivery: DeliveryHandle,
    ) where
        E: ProtocolEngine,
        B: Broker,
    {
        if !io.engine.is_readable(delivery) {
            debug!("delivery not readable: link={link}, delivery={delivery}");
            return;
        }
        let Some(body) = self.assembler.read_from(&mut io.engine, link) else {
            return;
        };
        io.engine.advance(link);
        self.on_message(io, link, delivery, body);
    }

    fn on_message<E, B>(
        &mut self,
        io: &mut BridgeIo<E, B>,
        link: LinkHandle,
        delivery: DeliveryHandle,
        body: Bytes,
    ) where
        E: ProtocolEngine,
        B: Broker,
    {
        if self.closed {
            return;
        }
        let encoded = EncodedMessage::new(io.engine.message_format(delivery), body);
        let mut message = match io.transformers.inbound().transform(encoded) {
            Ok(message) => message,
            Err(e) => {
                debug!("rejecting untransformable message: producer={}, error={e}", self.producer_id);
                io.reject(delivery, e.to_string());
                return;
            }
        };

        if let Some(destination) = &self.destination {
            message.destination = Some(destination.clone());
        } else if self.anonymous && message.destination.is_none() {
            io.reject(delivery, ANONYMOUS_WITHOUT_TO);
            return;
        }

        self.message_sequence += 1;
        let mut message_id = MessageId::new(self.producer_id.clone(), self.message_sequence);
        message_id.text_view = message.client_message_id.clone();
        trace!(
            "inbound message: message={message_id}, producer={}, sequence={}",
            self.producer_id, self.message_sequence
        );
        message.message_id = Some(message_id);
        message.producer_id = Some(self.producer_id.clone());

        let txn_id = io
            .engine
            .remote_state(delivery)
            .as_ref()
            .and_then(DeliveryState::txn_id)
            .cloned();
        if let Some(txn_id) = &txn_id {
            let Some(transaction_id) = io.local_transaction_id(txn_id) else {
                io.reject(delivery, "invalid transaction id");
                return;
            };
            message.transaction_id = Some(transaction_id);
        }

        metrics::inc_deliveries(Direction::Inbound);
        if io.engine.remotely_settled(delivery) {
            io.replenish_credit(link);
            io.send(Command::Send(message), None);
        } else {
            io.send(
                Command::Send(message),
                Some(Pending::Send {
                    link,
                    delivery,
                    txn_id,
                }),
            );
        }
    }

    /// Detach: unregister the producer but keep temporary destinations.
    pub(crate) fn on_detach<E, B>(&mut self, io: &mut BridgeIo<E, B>)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        if !mem::replace(&mut self.closed, true) {
            io.send(Command::RemoveProducer(self.producer_id.clone()), None);
        }
    }

    /// Close: unregister the producer and run close actions once.
    pub(crate) fn on_close<E, B>(&mut self, io: &mut BridgeIo<E, B>)
    where
        E: ProtocolEngine,
        B: Broker,
    {
        self.on_detach(io);
        io.run_close_actions(mem::take(&mut self.close_actions));
    }
}

/// Finish a message send once the broker has answered.
pub(crate) fn on_send_response<E, B>(
    io: &mut BridgeIo<E, B>,
    link: LinkHandle,
    delivery: DeliveryHandle,
    txn_id: Option<Bytes>,
    result: Result<(), BrokerException>,
) where
    E: ProtocolEngine,
    B: Broker,
{
    match result {
        Ok(()) => {
            io.replenish_credit(link);
            let outcome = match txn_id {
                Some(txn_id) => DeliveryState::transactional(txn_id, DeliveryState::Accepted),
                None => DeliveryState::Accepted,
            };
            io.engine.disposition(delivery, outcome);
            io.engine.settle(delivery);
        }
        Err(e) => io.reject(delivery, e.message),
    }
}
