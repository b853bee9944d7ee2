//! Connection, session and link lifecycle, and resumption of parked work
//! when the broker answers.

use std::mem;

use log::{debug, info, warn};

use super::{
    ConnectionState,
    Converter,
    LinkContext,
    SessionContext,
    consumer::ConsumerContext,
    coordinator::{self, CoordinatorContext, Discharge},
    io::{CloseAction, Pending},
    producer::{self, ProducerContext},
};
use crate::{
    broker::{
        Broker,
        BrokerException,
        Command,
        ConnectionInfo,
        ConsumerId,
        ConsumerInfo,
        Destination,
        DestinationKind,
        ProducerId,
        ProducerInfo,
        SessionId,
    },
    engine::{
        ANONYMOUS_RELAY,
        CONNECTION_OPEN_FAILED,
        COPY,
        DeliveryHandle,
        ExpiryPolicy,
        JMS_SELECTOR_FILTER_IDS,
        LinkHandle,
        LinkRole,
        NO_LOCAL_FILTER_IDS,
        ProtocolEngine,
        QUEUE_PREFIX,
        RemoteTarget,
        SenderSettleMode,
        SessionHandle,
        Source,
        TOPIC_PREFIX,
        Target,
        TerminusDurability,
        find_filter,
    },
    error::{BridgeError, ConditionKind, ErrorCondition, ProtocolViolation},
    transport::Transport,
    value::PropertyValue,
};

impl<E, B, T> Converter<E, B, T>
where
    E: ProtocolEngine,
    B: Broker,
    T: Transport,
{
    pub(super) fn on_connection_open(&mut self) {
        let client_id = self.io.engine.remote_container().filter(|id| !id.is_empty());
        self.io.client_id.clone_from(&client_id);
        let info = ConnectionInfo {
            connection_id: self.io.connection_id.clone(),
            client_id,
            user_name: self.user_name.clone(),
            password: self.password.clone(),
            peer_certificates: self.transport.peer_certificates(),
        };
        debug!(
            "registering connection: connection={}, client_id={:?}",
            info.connection_id, info.client_id
        );
        self.io
            .send(Command::RegisterConnection(info), Some(Pending::ConnectionOpen));
    }

    fn on_connection_registered(&mut self, result: Result<(), BrokerException>) {
        if self.closing {
            debug!("registration answered during teardown: connection={}", self.io.connection_id);
            return;
        }
        match result {
            Ok(()) => {
                self.io.engine.set_offered_capabilities(vec![ANONYMOUS_RELAY]);
                self.io.engine.set_connection_properties(vec![
                    (QUEUE_PREFIX, PropertyValue::from(DestinationKind::Queue.scheme())),
                    (TOPIC_PREFIX, PropertyValue::from(DestinationKind::Topic.scheme())),
                ]);
                self.io.engine.open_connection();
                self.transport.stop_connect_checker();
                self.state = ConnectionState::Open;
                info!("connection open: connection={}", self.io.connection_id);
            }
            Err(exception) => {
                self.io
                    .engine
                    .set_connection_properties(vec![(CONNECTION_OPEN_FAILED, PropertyValue::Bool(true))]);
                self.io.engine.open_connection();
                self.io
                    .engine
                    .set_connection_condition(ErrorCondition::for_connection_open(&exception));
                self.io.engine.close_connection();
                self.handle_exception(&BridgeError::Broker(exception));
            }
        }
    }

    /// Begin teardown: tell the broker the connection is going away and
    /// finish once it has answered, or straight away if the socket is gone.
    pub(super) fn do_close(&mut self) {
        if mem::replace(&mut self.closing, true) {
            return;
        }
        debug!("closing connection: connection={}", self.io.connection_id);
        self.state = ConnectionState::Closing;
        self.io.send(
            Command::RemoveConnection(self.io.connection_id.clone()),
            Some(Pending::ConnectionClose),
        );
        self.io.send(Command::Shutdown, None);
        if self.socket_closed {
            self.finish_close();
        }
    }

    pub(super) fn finish_close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.io.engine.close_connection();
        self.flush();
        self.stop_transport();
        self.state = ConnectionState::Closed;
        info!("connection closed: connection={}", self.io.connection_id);
    }

    pub(super) fn on_session_open(&mut self, session: SessionHandle) {
        self.next_session_id += 1;
        let session_id = SessionId::new(self.io.connection_id.clone(), self.next_session_id);
        debug!("session open: session={session_id}");
        self.io.send(Command::RegisterSession(session_id.clone()), None);
        self.io.engine.set_session_incoming_capacity(session, usize::MAX);
        self.io.engine.open_session(session);
        self.sessions.insert(session, SessionContext::new(session_id));
    }

    pub(super) fn on_session_close(&mut self, session: SessionHandle) {
        if let Some(context) = self.sessions.remove(&session) {
            debug!("session close: session={}", context.session_id);
            for link in self.io.engine.session_links(session) {
                self.release_link(link, false);
            }
            self.io.send(Command::RemoveSession(context.session_id), None);
        }
        self.io.engine.close_session(session);
        self.io.engine.free_session(session);
    }

    pub(super) fn on_link_open(&mut self, link: LinkHandle) {
        let Some(session) = self
            .io
            .engine
            .link_session(link)
            .filter(|session| self.sessions.contains_key(session))
        else {
            warn!("link opened outside a known session: link={link}");
            self.refuse_link(
                link,
                ProtocolViolation::new(ConditionKind::IllegalState, "session not open"),
            );
            return;
        };
        let source = self.io.engine.remote_source(link);
        let target = self.io.engine.remote_target(link);
        self.io.engine.set_source(link, source.clone());
        self.io.engine.set_target(link, target.clone());
        match self.io.engine.link_role(link) {
            Some(LinkRole::Receiver) => self.open_producer(link, session, target),
            Some(LinkRole::Sender) => self.open_consumer(link, session, source),
            None => warn!("link with unknown role: link={link}"),
        }
    }

    fn open_producer(&mut self, link: LinkHandle, session: SessionHandle, target: Option<RemoteTarget>) {
        let target = match target {
            Some(RemoteTarget::Coordinator) => {
                debug!("coordinator attached: link={link}");
                self.links
                    .insert(link, LinkContext::Coordinator(CoordinatorContext::new()));
                self.io.engine.flow(link, self.io.config.producer_credit);
                self.io.engine.open_link(link);
                return;
            }
            Some(RemoteTarget::Target(target)) => target,
            None => {
                self.refuse_link(link, ProtocolViolation::invalid_field("target not set"));
                return;
            }
        };

        let Some(session_context) = self.sessions.get_mut(&session) else {
            return;
        };
        let producer_id = ProducerId::new(
            session_context.session_id.clone(),
            session_context.next_producer_id(),
        );
        let mut producer = ProducerContext::new(producer_id.clone(), session);

        if target.dynamic {
            let destination = self.io.create_temporary_destination(link, &target.capabilities);
            let local = Target {
                address: Some(destination.qualified_name()),
                dynamic: true,
                ..target
            };
            self.io
                .engine
                .set_target(link, Some(RemoteTarget::Target(local)));
            producer.add_close_action(CloseAction::DeleteTemporaryDestination(destination.clone()));
            producer.destination = Some(destination);
        } else if let Some(address) = target.address.as_deref() {
            match Destination::parse(address, DestinationKind::Queue) {
                Ok(destination) => producer.destination = Some(destination),
                Err(e) => {
                    debug!("bad target address: link={link}, error={e}");
                    self.io.engine.set_target(link, None);
                    self.refuse_link(link, ProtocolViolation::invalid_field("target address not set"));
                    return;
                }
            }
        } else {
            producer.anonymous = true;
        }

        debug!(
            "registering producer: producer={producer_id}, destination={:?}",
            producer.destination
        );
        let info = ProducerInfo {
            producer_id,
            destination: producer.destination.clone(),
        };
        self.links.insert(link, LinkContext::Producer(producer));
        self.io.engine.flow(link, self.io.config.producer_credit);
        self.io
            .send(Command::RegisterProducer(info), Some(Pending::ProducerAttach { link }));
    }

    fn open_consumer(&mut self, link: LinkHandle, session: SessionHandle, source: Option<Source>) {
        let mut selector = None;
        let mut no_local = false;
        let mut temporary = None;

        let (local, destination) = if let Some(source) = source {
            let selector_filter = find_filter(&source.filter, &JMS_SELECTOR_FILTER_IDS).cloned();
            if let Some(filter) = &selector_filter
                && let Err(e) = self.io.broker.validate_selector(&filter.value)
            {
                self.io.engine.set_source(link, None);
                self.refuse_link(link, ProtocolViolation::invalid_field(e.message));
                return;
            }
            let no_local_filter = find_filter(&source.filter, &NO_LOCAL_FILTER_IDS).cloned();
            no_local = no_local_filter.is_some();
            selector = selector_filter.as_ref().map(|filter| filter.value.clone());
            let supported: Vec<_> = selector_filter.into_iter().chain(no_local_filter).collect();

            if source.dynamic {
                let destination = self.io.create_temporary_destination(link, &source.capabilities);
                temporary = Some(destination.clone());
                let local = Source {
                    address: Some(destination.qualified_name()),
                    dynamic: true,
                    ..Source::default()
                };
                (local, destination)
            } else {
                let parsed = source
                    .address
                    .as_deref()
                    .map(|address| Destination::parse(address, DestinationKind::Queue));
                let Some(Ok(destination)) = parsed else {
                    self.io.engine.set_source(link, None);
                    self.refuse_link(link, ProtocolViolation::invalid_field("source address not set"));
                    return;
                };
                let local = Source {
                    filter: supported,
                    ..source
                };
                (local, destination)
            }
        } else {
            let name = self.io.engine.link_name(link);
            let Some(destination) = self
                .io
                .broker
                .lookup_subscription(&name, self.io.client_id.as_deref())
            else {
                self.refuse_link(
                    link,
                    ProtocolViolation::new(
                        ConditionKind::NotFound,
                        format!("Unknown subscription link: {name}"),
                    ),
                );
                return;
            };
            debug!("recovering durable subscription: link={link}, subscription={name}");
            let local = Source {
                address: Some(destination.qualified_name()),
                durable: TerminusDurability::UnsettledState,
                expiry_policy: ExpiryPolicy::Never,
                distribution_mode: Some(COPY),
                ..Source::default()
            };
            (local, destination)
        };

        let Some(session_context) = self.sessions.get_mut(&session) else {
            return;
        };
        let consumer_id = ConsumerId::new(
            session_context.session_id.clone(),
            session_context.next_consumer_id(),
        );
        let browser = local.distribution_mode.as_ref() == Some(&COPY) && destination.is_queue();
        let subscription_name = (local.durable.is_durable() && destination.is_topic())
            .then(|| self.io.engine.link_name(link));
        self.io.engine.set_source(link, Some(local));

        let info = ConsumerInfo {
            consumer_id: consumer_id.clone(),
            destination,
            selector,
            no_local,
            no_range_acks: true,
            prefetch: u32::try_from(self.io.engine.credit(link)).unwrap_or(0),
            dispatch_async: true,
            browser,
            subscription_name,
        };
        debug!(
            "registering consumer: consumer={consumer_id}, destination={}, prefetch={}, browser={browser}",
            info.destination, info.prefetch
        );
        let presettle = self.io.engine.remote_sender_settle_mode(link) == SenderSettleMode::Settled;
        let mut consumer = ConsumerContext::new(&info, link, session, presettle);
        if let Some(destination) = temporary {
            consumer.add_close_action(CloseAction::DeleteTemporaryDestination(destination));
        }
        self.consumers_by_id.insert(consumer_id, link);
        self.links.insert(link, LinkContext::Consumer(consumer));
        self.io
            .send(Command::RegisterConsumer(info), Some(Pending::ConsumerAttach { link }));
    }

    /// Close a link the bridge will not serve.
    fn refuse_link(&mut self, link: LinkHandle, violation: ProtocolViolation) {
        debug!("refusing link: link={link}, error={violation}");
        self.io.close_link_with(link, violation.condition);
    }

    /// Drop the link's context and every lookup entry pointing at it.
    fn remove_link_context(&mut self, link: LinkHandle) -> Option<LinkContext> {
        let context = self.links.remove(&link)?;
        if let LinkContext::Consumer(consumer) = &context {
            self.consumers_by_id.remove(&consumer.consumer_id);
            if let Some(session) = self.sessions.get_mut(&consumer.session) {
                session.consumers.retain(|other| *other != link);
            }
        }
        Some(context)
    }

    /// Run the context's detach or close hook. Close also runs close actions.
    fn release_link(&mut self, link: LinkHandle, close: bool) {
        match self.remove_link_context(link) {
            Some(LinkContext::Producer(mut producer)) if close => producer.on_close(&mut self.io),
            Some(LinkContext::Producer(mut producer)) => producer.on_detach(&mut self.io),
            Some(LinkContext::Consumer(mut consumer)) if close => consumer.on_close(&mut self.io),
            Some(LinkContext::Consumer(mut consumer)) => {
                consumer.on_detach(&mut self.io);
            }
            Some(LinkContext::Coordinator(_)) | None => {}
        }
    }

    pub(super) fn on_link_detach(&mut self, link: LinkHandle) {
        debug!("link detached: link={link}");
        self.release_link(link, false);
        self.io.engine.detach_link(link);
        self.io.engine.free_link(link);
    }

    pub(super) fn on_link_close(&mut self, link: LinkHandle) {
        debug!("link closed: link={link}");
        self.release_link(link, true);
        self.io.engine.close_link(link);
        self.io.engine.free_link(link);
    }

    pub(super) fn on_link_flow(&mut self, link: LinkHandle) {
        let Some(LinkContext::Consumer(consumer)) = self.links.get_mut(&link) else {
            return;
        };
        let credit = u32::try_from(self.io.engine.credit(link)).unwrap_or(0);
        if credit != consumer.credit {
            consumer.credit = credit;
            self.io.send(
                Command::ConsumerControl {
                    consumer_id: consumer.consumer_id.clone(),
                    destination: consumer.destination.clone(),
                    prefetch: credit,
                },
                None,
            );
        }
        consumer.pump(&mut self.io);
        consumer.drain_check(&mut self.io);
    }

    pub(super) fn on_delivery(&mut self, delivery: DeliveryHandle) {
        let Some(link) = self.io.engine.delivery_link(delivery) else {
            debug!("delivery without a link: delivery={delivery}");
            return;
        };
        let discharge = match self.links.get_mut(&link) {
            Some(LinkContext::Producer(producer)) => {
                producer.on_delivery(&mut self.io, link, delivery);
                None
            }
            Some(LinkContext::Consumer(consumer)) => {
                consumer.on_disposition(&mut self.io, delivery);
                None
            }
            Some(LinkContext::Coordinator(coordinator)) => {
                coordinator.on_delivery(&mut self.io, link, delivery)
            }
            None => {
                debug!("delivery on unknown link: link={link}, delivery={delivery}");
                None
            }
        };
        if let Some(discharge) = discharge {
            self.discharge(link, discharge);
        }
    }

    /// Consumer links of the session owning `link`, in attach order.
    fn session_consumers(&self, link: LinkHandle) -> Vec<LinkHandle> {
        self.io
            .engine
            .link_session(link)
            .and_then(|session| self.sessions.get(&session))
            .map(|session| session.consumers.clone())
            .unwrap_or_default()
    }

    fn discharge(&mut self, link: LinkHandle, discharge: Discharge) {
        for consumer_link in self.session_consumers(link) {
            if let Some(LinkContext::Consumer(consumer)) = self.links.get_mut(&consumer_link) {
                if discharge.rollback {
                    consumer.rollback();
                } else {
                    consumer.commit(&mut self.io);
                }
            }
        }
        coordinator::end_transaction(&mut self.io, link, discharge);
    }

    /// Close a consumer link after the broker refused one of its acks.
    fn fail_consumer_link(&mut self, link: LinkHandle, exception: &BrokerException) {
        if self.links.contains_key(&link) {
            self.io.close_link_with(link, ErrorCondition::for_link(exception));
        }
    }

    /// Resume work parked until the broker answered.
    pub(super) fn resume(&mut self, pending: Pending, result: Result<(), BrokerException>) {
        match pending {
            Pending::ConnectionOpen => self.on_connection_registered(result),
            Pending::ConnectionClose => self.finish_close(),
            Pending::ProducerAttach { link } => match result {
                Ok(()) if self.links.contains_key(&link) => self.io.engine.open_link(link),
                Ok(()) => debug!("producer registered after link went away: link={link}"),
                Err(e) => {
                    if self.links.remove(&link).is_none() {
                        debug!("producer refused after link went away: link={link}, error={e}");
                        return;
                    }
                    self.io.engine.set_target(link, None);
                    self.io.close_link_with(link, ErrorCondition::for_registration(&e));
                }
            },
            Pending::ConsumerAttach { link } => match result {
                Ok(()) => {
                    let Some(LinkContext::Consumer(consumer)) = self.links.get(&link) else {
                        debug!("consumer registered after link went away: link={link}");
                        return;
                    };
                    if let Some(session) = self.sessions.get_mut(&consumer.session) {
                        session.consumers.push(link);
                    }
                    self.io.engine.open_link(link);
                }
                Err(e) => {
                    if self.remove_link_context(link).is_none() {
                        debug!("consumer refused after link went away: link={link}, error={e}");
                        return;
                    }
                    self.io.engine.set_source(link, None);
                    self.io.close_link_with(link, ErrorCondition::for_link(&e));
                }
            },
            Pending::TemporaryDestination { link } => {
                if let Err(e) = result {
                    match self.remove_link_context(link) {
                        Some(LinkContext::Producer(_)) => self.io.engine.set_target(link, None),
                        Some(_) => self.io.engine.set_source(link, None),
                        None => return,
                    }
                    self.io.close_link_with(link, ErrorCondition::for_registration(&e));
                }
            }
            Pending::TemporaryDestinationRemoval { destination } => {
                if let Err(e) = result {
                    debug!("temporary destination removal failed: destination={destination}, error={e}");
                }
            }
            Pending::Send {
                link,
                delivery,
                txn_id,
            } => producer::on_send_response(&mut self.io, link, delivery, txn_id, result),
            Pending::Ack { link, delivery } => match result {
                Ok(()) => self.io.engine.settle(delivery),
                Err(e) => self.fail_consumer_link(link, &e),
            },
            Pending::CommitAck { link } => {
                if let Err(e) = result {
                    self.fail_consumer_link(link, &e);
                }
            }
            Pending::Discharge {
                link,
                delivery,
                rollback,
            } => {
                coordinator::on_discharge_response(&mut self.io, delivery, result);
                if rollback {
                    for consumer_link in self.session_consumers(link) {
                        if let Some(LinkContext::Consumer(consumer)) = self.links.get_mut(&consumer_link) {
                            consumer.pump(&mut self.io);
                        }
                    }
                }
            }
        }
    }
}
