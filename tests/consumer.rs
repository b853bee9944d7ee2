//! Consumer links: attach, dispatch streaming, dispositions and teardown.

use amqp_bridge::{
    BridgeConfig,
    ConditionKind,
    broker::{
        AckType,
        BrokerEvent,
        BrokerException,
        BrokerMessage,
        Command,
        ConnectionId,
        ConsumerId,
        ConsumerInfo,
        Destination,
        ExceptionKind,
        MessageAck,
        MessageDispatch,
        MessageId,
        ProducerId,
        SessionId,
    },
    engine::{
        COPY,
        DeliveryHandle,
        DeliveryState,
        ExpiryPolicy,
        FilterEntry,
        FilterId,
        JMS_SELECTOR_FILTER_IDS,
        LinkHandle,
        NO_LOCAL_FILTER_IDS,
        SenderSettleMode,
        SessionHandle,
        Source,
        Symbol,
        TEMP_TOPIC_CAPABILITY,
        TerminusDurability,
    },
};
use bridge_testing::{
    RecordingBroker,
    TestConverter,
    answer_all,
    answer_matching,
    connected,
    converter_with,
    open_connection,
    open_session,
    pump,
};
use bytes::Bytes;
use rstest::rstest;

fn source(address: &str) -> Option<Source> {
    Some(Source {
        address: Some(address.to_owned()),
        ..Source::default()
    })
}

fn registration(bridge: &TestConverter) -> ConsumerInfo {
    bridge
        .broker()
        .bodies()
        .into_iter()
        .rev()
        .find_map(|body| match body {
            Command::RegisterConsumer(info) => Some(info.clone()),
            _ => None,
        })
        .expect("consumer registered")
}

/// Attach a receiving peer and answer the registration.
fn attach_with(
    bridge: &mut TestConverter,
    session: SessionHandle,
    name: &str,
    source: Option<Source>,
    credit: i32,
    mode: SenderSettleMode,
) -> (LinkHandle, ConsumerInfo) {
    let link = bridge
        .engine_mut()
        .attach_consumer(session, name, source, credit, mode);
    pump(bridge).expect("attach processed");
    let info = registration(bridge);
    answer_all(bridge);
    (link, info)
}

fn attach(
    bridge: &mut TestConverter,
    session: SessionHandle,
    credit: i32,
) -> (LinkHandle, ConsumerInfo) {
    attach_with(
        bridge,
        session,
        "receiver",
        source("queue://Q1"),
        credit,
        SenderSettleMode::Unsettled,
    )
}

fn message(sequence: u64, body: &'static [u8]) -> BrokerMessage {
    let producer = ProducerId::new(SessionId::new(ConnectionId::new("ID:remote-1"), 1), 1);
    let mut id = MessageId::new(producer, sequence);
    id.broker_sequence = sequence * 10;
    let mut message = BrokerMessage::with_body(Bytes::from_static(body));
    message.message_id = Some(id);
    message
}

fn dispatch(bridge: &mut TestConverter, info: &ConsumerInfo, message: BrokerMessage) {
    let dispatch = MessageDispatch::new(info.consumer_id.clone(), info.destination.clone(), message);
    bridge
        .on_broker_event(BrokerEvent::Dispatch(dispatch))
        .expect("dispatch handled");
}

fn acks(bridge: &TestConverter) -> Vec<MessageAck> {
    bridge
        .broker()
        .bodies()
        .into_iter()
        .filter_map(|body| match body {
            Command::Ack(ack) => Some(ack.clone()),
            _ => None,
        })
        .collect()
}

fn only_delivery(bridge: &TestConverter, link: LinkHandle) -> DeliveryHandle {
    let outgoing = bridge.engine().outgoing(link);
    assert_eq!(outgoing.len(), 1, "expected one delivery, got {outgoing:?}");
    outgoing[0]
}

#[rstest]
fn nothing_is_sent_until_credit_arrives(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 0);
    assert_eq!(info.prefetch, 0);
    assert_eq!(info.destination, Destination::queue("Q1"));
    assert!(info.no_range_acks);
    assert!(info.dispatch_async);
    assert!(bridge.engine().link(link).opened);

    dispatch(&mut bridge, &info, message(1, b"m1"));
    assert!(bridge.engine().outgoing(link).is_empty());
    let snapshot = bridge.consumer_snapshot(link).expect("consumer link");
    assert_eq!(snapshot.queued.len(), 1);
    assert_eq!(snapshot.unsettled, 0);

    bridge.broker_mut().clear();
    bridge.engine_mut().grant_credit(link, 5);
    pump(&mut bridge).expect("flow processed");

    assert_eq!(
        bridge.broker().bodies(),
        vec![&Command::ConsumerControl {
            consumer_id: info.consumer_id.clone(),
            destination: info.destination.clone(),
            prefetch: 5,
        }]
    );
    assert_eq!(
        bridge.engine().sent_messages(link),
        vec![Bytes::from_static(b"m1")]
    );
    assert_eq!(bridge.engine().link(link).credit, 4);
    let snapshot = bridge.consumer_snapshot(link).expect("consumer link");
    assert!(snapshot.queued.is_empty());
    assert_eq!(snapshot.unsettled, 1);
    assert_eq!(snapshot.credit, 5);
}

#[rstest]
fn unchanged_credit_sends_no_control(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, _) = attach(&mut bridge, session, 3);
    bridge.broker_mut().clear();
    bridge.engine_mut().grant_credit(link, 3);
    pump(&mut bridge).expect("flow processed");
    assert!(bridge.broker().commands().is_empty());
}

#[rstest]
fn accepted_delivery_is_acknowledged_then_settled(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 5);
    dispatch(&mut bridge, &info, message(3, b"hello"));
    let delivery = only_delivery(&bridge, link);
    assert_eq!(bridge.engine().delivery(delivery).tag, Bytes::from_static(b"0"));

    bridge.broker_mut().clear();
    bridge
        .engine_mut()
        .dispose(delivery, DeliveryState::Accepted, false);
    pump(&mut bridge).expect("disposition processed");

    assert_eq!(
        acks(&bridge),
        vec![MessageAck {
            consumer_id: info.consumer_id.clone(),
            destination: info.destination.clone(),
            message_id: message(3, b"hello").message_id,
            ack_type: AckType::Individual,
            message_count: 1,
            transaction_id: None,
        }]
    );
    let record = bridge.engine().delivery(delivery);
    assert_eq!(record.local_state, Some(DeliveryState::Accepted));
    assert!(!record.settled);

    answer_all(&mut bridge);
    assert!(bridge.engine().delivery(delivery).settled);
    assert_eq!(bridge.consumer_snapshot(link).map(|s| s.unsettled), Some(0));

    bridge.broker_mut().clear();
    bridge.engine_mut().remote_close_link(link);
    pump(&mut bridge).expect("close processed");
    assert_eq!(
        bridge.broker().bodies(),
        vec![&Command::RemoveConsumer {
            consumer_id: info.consumer_id,
            last_delivered_sequence_id: 30,
        }]
    );
}

#[rstest]
#[case::rejected(DeliveryState::Rejected(None), 1)]
#[case::released(DeliveryState::Released, 0)]
#[case::modified_failed(
    DeliveryState::Modified { delivery_failed: true, undeliverable_here: None },
    1
)]
#[case::modified(
    DeliveryState::Modified { delivery_failed: false, undeliverable_here: Some(false) },
    0
)]
fn unaccepted_delivery_is_queued_again(
    connected: (TestConverter, SessionHandle),
    #[case] state: DeliveryState,
    #[case] redeliveries: u32,
) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 1);
    dispatch(&mut bridge, &info, message(1, b"retry"));
    let delivery = only_delivery(&bridge, link);
    bridge.broker_mut().clear();

    bridge.engine_mut().dispose(delivery, state, false);
    pump(&mut bridge).expect("disposition processed");

    assert!(acks(&bridge).is_empty());
    assert!(bridge.engine().delivery(delivery).settled);
    let snapshot = bridge.consumer_snapshot(link).expect("consumer link");
    assert_eq!(
        snapshot.queued,
        vec![(message(1, b"retry").message_id, redeliveries)]
    );

    bridge.engine_mut().grant_credit(link, 1);
    pump(&mut bridge).expect("flow processed");
    assert_eq!(bridge.engine().outgoing(link).len(), 2);
    assert_eq!(bridge.engine().sent_messages(link).len(), 2);
}

#[rstest]
fn undeliverable_here_is_poisoned(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 1);
    dispatch(&mut bridge, &info, message(1, b"bad"));
    let delivery = only_delivery(&bridge, link);

    bridge.engine_mut().dispose(
        delivery,
        DeliveryState::Modified {
            delivery_failed: true,
            undeliverable_here: Some(true),
        },
        true,
    );
    pump(&mut bridge).expect("disposition processed");

    let acks = acks(&bridge);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].ack_type, AckType::Poison);
    assert!(bridge.consumer_snapshot(link).expect("consumer").queued.is_empty());
}

#[rstest]
#[case(true, b"0")]
#[case(false, b"1")]
fn tags_are_reused_once_remotely_settled(
    connected: (TestConverter, SessionHandle),
    #[case] remotely_settled: bool,
    #[case] second_tag: &'static [u8],
) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 5);
    dispatch(&mut bridge, &info, message(1, b"a"));
    let first = only_delivery(&bridge, link);
    bridge
        .engine_mut()
        .dispose(first, DeliveryState::Accepted, remotely_settled);
    pump(&mut bridge).expect("disposition processed");
    assert_eq!(
        bridge.engine().delivery(first).local_state.is_some(),
        !remotely_settled
    );

    dispatch(&mut bridge, &info, message(2, b"b"));
    let second = bridge.engine().outgoing(link)[1];
    assert_eq!(
        bridge.engine().delivery(second).tag,
        Bytes::from_static(second_tag)
    );
}

#[rstest]
fn presettled_link_sends_untagged_and_acks_immediately(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach_with(
        &mut bridge,
        session,
        "fast",
        source("queue://Q1"),
        5,
        SenderSettleMode::Settled,
    );
    bridge.broker_mut().clear();
    dispatch(&mut bridge, &info, message(1, b"quick"));

    let delivery = only_delivery(&bridge, link);
    assert!(bridge.engine().delivery(delivery).tag.is_empty());
    let acks = acks(&bridge);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].ack_type, AckType::Individual);

    answer_all(&mut bridge);
    assert!(bridge.engine().delivery(delivery).settled);
}

#[rstest]
fn partial_send_resumes_when_engine_has_room(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 5);
    bridge.engine_mut().set_send_budget(link, Some(2));
    dispatch(&mut bridge, &info, message(1, b"hello"));
    dispatch(&mut bridge, &info, message(2, b"world"));

    let delivery = only_delivery(&bridge, link);
    assert_eq!(&bridge.engine().delivery(delivery).payload[..], b"he");
    assert!(bridge.engine().sent_messages(link).is_empty());
    assert_eq!(bridge.consumer_snapshot(link).map(|s| s.queued.len()), Some(1));

    bridge.engine_mut().set_send_budget(link, None);
    bridge.engine_mut().grant_credit(link, 5);
    pump(&mut bridge).expect("flow processed");
    assert_eq!(
        bridge.engine().sent_messages(link),
        vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")]
    );
}

#[rstest]
fn empty_encoding_is_skipped(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 5);
    dispatch(&mut bridge, &info, message(1, b""));
    dispatch(&mut bridge, &info, message(2, b"kept"));
    assert_eq!(
        bridge.engine().sent_messages(link),
        vec![Bytes::from_static(b"kept")]
    );
}

#[rstest]
fn queue_consumer_reports_drained_when_idle(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, _) = attach(&mut bridge, session, 0);
    bridge.engine_mut().grant_credit(link, 2);
    pump(&mut bridge).expect("flow processed");
    assert_eq!(bridge.engine().link(link).drained, 1);
}

#[rstest]
fn browser_drains_only_after_end_of_browse(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let browse = Some(Source {
        address: Some("queue://Q1".into()),
        distribution_mode: Some(COPY),
        ..Source::default()
    });
    let (link, info) = attach_with(
        &mut bridge,
        session,
        "browser",
        browse,
        5,
        SenderSettleMode::Unsettled,
    );
    assert!(info.browser);

    dispatch(&mut bridge, &info, message(1, b"peek"));
    bridge.engine_mut().grant_credit(link, 4);
    pump(&mut bridge).expect("flow processed");
    assert_eq!(bridge.engine().link(link).drained, 0);

    let end = MessageDispatch::end_of_browse(info.consumer_id.clone(), info.destination.clone());
    bridge
        .on_broker_event(BrokerEvent::Dispatch(end))
        .expect("end of browse handled");
    assert_eq!(bridge.engine().link(link).drained, 1);
    assert!(bridge.consumer_snapshot(link).expect("consumer").end_of_browse);
}

#[rstest]
fn copy_on_topic_is_not_a_browser(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let copy = Some(Source {
        address: Some("topic://news".into()),
        distribution_mode: Some(COPY),
        ..Source::default()
    });
    let (_, info) = attach_with(&mut bridge, session, "t", copy, 1, SenderSettleMode::Unsettled);
    assert!(!info.browser);
    assert_eq!(info.subscription_name, None);
}

fn filter(descriptor: FilterId, value: &str) -> FilterEntry {
    FilterEntry {
        key: Symbol::from(descriptor_key(&descriptor)),
        descriptor,
        value: value.to_owned(),
    }
}

fn descriptor_key(descriptor: &FilterId) -> String {
    match descriptor {
        FilterId::Symbol(symbol) => symbol.to_string(),
        FilterId::Code(code) => format!("{code:#x}"),
    }
}

#[rstest]
fn supported_filters_are_applied_and_echoed(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let selector = filter(JMS_SELECTOR_FILTER_IDS[1].clone(), "color = 'red'");
    let no_local = filter(NO_LOCAL_FILTER_IDS[0].clone(), "");
    let unknown = filter(FilterId::Code(0xdead), "?");
    let filtered = Some(Source {
        address: Some("topic://paint".into()),
        filter: vec![unknown, selector.clone(), no_local.clone()],
        ..Source::default()
    });
    let (link, info) = attach_with(
        &mut bridge,
        session,
        "filtered",
        filtered,
        1,
        SenderSettleMode::Unsettled,
    );

    assert_eq!(info.selector.as_deref(), Some("color = 'red'"));
    assert!(info.no_local);
    let local = bridge.engine().link(link).source.clone().expect("source set");
    assert_eq!(local.filter, vec![selector, no_local]);
}

#[rstest]
fn malformed_selector_is_refused(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let bad = Some(Source {
        address: Some("queue://Q1".into()),
        filter: vec![filter(JMS_SELECTOR_FILTER_IDS[0].clone(), "(a = 1")],
        ..Source::default()
    });
    let link = bridge
        .engine_mut()
        .attach_consumer(session, "bad", bad, 1, SenderSettleMode::Unsettled);
    pump(&mut bridge).expect("attach processed");

    let record = bridge.engine().link(link);
    assert!(record.closed);
    assert_eq!(record.source, None);
    let condition = record.condition.clone().expect("condition set");
    assert_eq!(condition.kind, ConditionKind::InvalidField);
    assert!(condition.description.contains("unclosed '('"));
    assert!(bridge.broker().commands().is_empty());
}

#[rstest]
fn source_without_address_is_refused(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let link = bridge.engine_mut().attach_consumer(
        session,
        "nowhere",
        Some(Source::default()),
        1,
        SenderSettleMode::Unsettled,
    );
    pump(&mut bridge).expect("attach processed");
    let record = bridge.engine().link(link);
    assert!(record.closed);
    assert_eq!(
        record.condition.as_ref().map(|c| c.description.as_str()),
        Some("source address not set")
    );
}

#[rstest]
fn failed_registration_closes_link(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let link = bridge.engine_mut().attach_consumer(
        session,
        "refused",
        source("queue://Q1"),
        1,
        SenderSettleMode::Unsettled,
    );
    pump(&mut bridge).expect("attach processed");
    let info = registration(&bridge);
    assert!(answer_matching(
        &mut bridge,
        |c| matches!(c, Command::RegisterConsumer(_)),
        Err(BrokerException::new(ExceptionKind::InvalidSelector, "bad selector")),
    ));

    let record = bridge.engine().link(link);
    assert!(record.closed);
    assert!(!record.opened);
    assert_eq!(record.source, None);
    assert_eq!(
        record.condition.as_ref().map(|c| c.kind),
        Some(ConditionKind::InvalidField)
    );
    assert!(bridge.consumer_snapshot(link).is_none());

    dispatch(&mut bridge, &info, message(1, b"lost"));
    assert!(bridge.engine().outgoing(link).is_empty());
}

#[rstest]
fn refused_ack_closes_link(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, info) = attach(&mut bridge, session, 1);
    dispatch(&mut bridge, &info, message(1, b"m"));
    let delivery = only_delivery(&bridge, link);
    bridge
        .engine_mut()
        .dispose(delivery, DeliveryState::Accepted, false);
    pump(&mut bridge).expect("disposition processed");

    assert!(answer_matching(
        &mut bridge,
        |c| matches!(c, Command::Ack(_)),
        Err(BrokerException::new(ExceptionKind::Other, "store failed")),
    ));
    let record = bridge.engine().link(link);
    assert!(record.closed);
    assert_eq!(
        record.condition.as_ref().map(|c| c.kind),
        Some(ConditionKind::InternalError)
    );
    assert!(!bridge.engine().delivery(delivery).settled);
}

fn durable_broker() -> TestConverter {
    let broker = RecordingBroker::new().with_subscription(
        "sub-1",
        Some("client-1"),
        Destination::topic("news"),
    );
    let mut bridge = converter_with(BridgeConfig::default(), broker);
    open_connection(&mut bridge, Some("client-1"));
    bridge
}

#[rstest]
fn durable_subscription_is_recovered_by_link_name() {
    let mut bridge = durable_broker();
    let session = open_session(&mut bridge);
    let (link, info) =
        attach_with(&mut bridge, session, "sub-1", None, 1, SenderSettleMode::Unsettled);

    assert_eq!(info.destination, Destination::topic("news"));
    assert_eq!(info.subscription_name.as_deref(), Some("sub-1"));
    let local = bridge.engine().link(link).source.clone().expect("source set");
    assert_eq!(local.address.as_deref(), Some("topic://news"));
    assert_eq!(local.durable, TerminusDurability::UnsettledState);
    assert_eq!(local.expiry_policy, ExpiryPolicy::Never);
    assert_eq!(local.distribution_mode, Some(COPY));
    assert!(bridge.engine().link(link).opened);
}

#[rstest]
fn unknown_subscription_is_not_found() {
    let mut bridge = durable_broker();
    let session = open_session(&mut bridge);
    bridge.broker_mut().clear();
    let link = bridge
        .engine_mut()
        .attach_consumer(session, "ghost", None, 1, SenderSettleMode::Unsettled);
    pump(&mut bridge).expect("attach processed");

    let condition = bridge
        .engine()
        .link(link)
        .condition
        .clone()
        .expect("condition set");
    assert_eq!(condition.kind, ConditionKind::NotFound);
    assert_eq!(condition.description, "Unknown subscription link: ghost");
    assert!(bridge.broker().commands().is_empty());
}

#[rstest]
fn detach_keeps_durable_subscription_and_close_removes_it(
    connected: (TestConverter, SessionHandle),
) {
    let (mut bridge, session) = connected;
    let durable = || {
        Some(Source {
            address: Some("topic://news".into()),
            durable: TerminusDurability::UnsettledState,
            ..Source::default()
        })
    };
    let (first, info) =
        attach_with(&mut bridge, session, "sub-2", durable(), 1, SenderSettleMode::Unsettled);
    assert_eq!(info.subscription_name.as_deref(), Some("sub-2"));

    bridge.broker_mut().clear();
    bridge.engine_mut().remote_detach(first);
    pump(&mut bridge).expect("detach processed");
    assert!(matches!(
        bridge.broker().bodies().as_slice(),
        [Command::RemoveConsumer { .. }]
    ));

    let (second, info) =
        attach_with(&mut bridge, session, "sub-2", durable(), 1, SenderSettleMode::Unsettled);
    bridge.broker_mut().clear();
    bridge.engine_mut().remote_close_link(second);
    pump(&mut bridge).expect("close processed");
    assert_eq!(
        bridge.broker().bodies(),
        vec![
            &Command::RemoveConsumer {
                consumer_id: info.consumer_id,
                last_delivered_sequence_id: 0,
            },
            &Command::RemoveSubscription {
                connection_id: bridge.connection_id().clone(),
                subscription_name: "sub-2".into(),
                client_id: Some("client-1".into()),
            },
        ]
    );
}

#[rstest]
fn dynamic_source_is_deleted_on_close(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let dynamic = Some(Source {
        dynamic: true,
        capabilities: vec![TEMP_TOPIC_CAPABILITY],
        ..Source::default()
    });
    let (link, info) =
        attach_with(&mut bridge, session, "reply", dynamic, 1, SenderSettleMode::Unsettled);
    assert!(info.destination.is_temporary());
    assert!(info.destination.is_topic());
    assert_eq!(info.subscription_name, None);
    let local = bridge.engine().link(link).source.clone().expect("source set");
    assert_eq!(local.address, Some(info.destination.qualified_name()));

    bridge.broker_mut().clear();
    bridge.engine_mut().remote_close_link(link);
    pump(&mut bridge).expect("close processed");
    assert!(matches!(
        bridge.broker().bodies().as_slice(),
        [
            Command::RemoveConsumer { .. },
            Command::RemoveDestination { destination, .. },
        ] if *destination == info.destination
    ));
}

#[rstest]
fn dispatch_for_unknown_consumer_is_ignored(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let (link, mut info) = attach(&mut bridge, session, 1);
    info.consumer_id = ConsumerId::new(info.consumer_id.session().clone(), 99);
    dispatch(&mut bridge, &info, message(1, b"stray"));
    assert!(bridge.engine().outgoing(link).is_empty());
    assert!(!bridge.is_stopped());
}

#[rstest]
fn refusal_after_detach_leaves_link_alone(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let link = bridge.engine_mut().attach_consumer(
        session,
        "receiver",
        source("queue://Q1"),
        1,
        SenderSettleMode::Unsettled,
    );
    pump(&mut bridge).expect("attach processed");
    bridge.engine_mut().remote_detach(link);
    pump(&mut bridge).expect("detach processed");

    assert!(answer_matching(
        &mut bridge,
        |c| matches!(c, Command::RegisterConsumer(_)),
        Err(BrokerException::new(ExceptionKind::Other, "late failure")),
    ));
    let record = bridge.engine().link(link);
    assert!(record.freed);
    assert!(!record.closed);
    assert_eq!(record.condition, None);
    assert!(record.source.is_some());
}

#[rstest]
fn repeated_teardown_releases_consumer_once(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let dynamic = Some(Source {
        dynamic: true,
        ..Source::default()
    });
    let (link, info) =
        attach_with(&mut bridge, session, "reply", dynamic, 1, SenderSettleMode::Unsettled);
    bridge.broker_mut().clear();

    bridge.engine_mut().remote_close_link(link);
    bridge.engine_mut().remote_detach(link);
    bridge.engine_mut().remote_close_link(link);
    pump(&mut bridge).expect("teardown processed");
    bridge.engine_mut().end_session(session);
    pump(&mut bridge).expect("end processed");

    let bodies = bridge.broker().bodies();
    assert!(
        matches!(
            bodies.as_slice(),
            [
                Command::RemoveConsumer { consumer_id, .. },
                Command::RemoveDestination { destination, .. },
                Command::RemoveSession(_),
            ] if *consumer_id == info.consumer_id && *destination == info.destination
        ),
        "unexpected commands: {bodies:?}"
    );
    assert!(bridge.consumer_snapshot(link).is_none());
}
