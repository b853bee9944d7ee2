//! Coordinator links and local transactions spanning producers and consumers.

use amqp_bridge::{
    ConditionKind,
    broker::{
        AckType,
        BrokerEvent,
        BrokerException,
        BrokerMessage,
        Command,
        ConnectionId,
        ConsumerInfo,
        ExceptionKind,
        LocalTransactionId,
        MessageAck,
        MessageDispatch,
        MessageId,
        ProducerId,
        SessionId,
        TransactionInfo,
        TransactionKind,
    },
    config::DEFAULT_PRODUCER_CREDIT,
    engine::{
        ControlAction,
        DeliveryHandle,
        DeliveryState,
        LinkHandle,
        RemoteTarget,
        SenderSettleMode,
        SessionHandle,
        Source,
        Target,
        encode_txn_id,
    },
};
use bridge_testing::{TestConverter, answer_all, answer_matching, connected, encode_control, pump};
use bytes::Bytes;
use rstest::rstest;

fn coordinator(bridge: &mut TestConverter, session: SessionHandle) -> LinkHandle {
    let link = bridge
        .engine_mut()
        .attach_producer(session, "txn-ctrl", Some(RemoteTarget::Coordinator));
    pump(bridge).expect("coordinator attached");
    link
}

fn declare(bridge: &mut TestConverter, link: LinkHandle) -> DeliveryHandle {
    let delivery = bridge
        .engine_mut()
        .control(link, &ControlAction::Declare { global_id: None });
    pump(bridge).expect("declare processed");
    delivery
}

fn discharge(bridge: &mut TestConverter, link: LinkHandle, txn: u64, fail: bool) -> DeliveryHandle {
    let delivery = bridge.engine_mut().control(
        link,
        &ControlAction::Discharge {
            txn_id: encode_txn_id(txn),
            fail,
        },
    );
    pump(bridge).expect("discharge processed");
    delivery
}

fn transactions(bridge: &TestConverter) -> Vec<TransactionInfo> {
    bridge
        .broker()
        .bodies()
        .into_iter()
        .filter_map(|body| match body {
            Command::Transaction(info) => Some(info.clone()),
            _ => None,
        })
        .collect()
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

fn local_txn(bridge: &TestConverter, value: u64) -> LocalTransactionId {
    LocalTransactionId::new(bridge.connection_id().clone(), value)
}

/// Attach a queue consumer and stream two dispatches into it.
fn consumer_with_two_deliveries(
    bridge: &mut TestConverter,
    session: SessionHandle,
    credit: i32,
) -> (LinkHandle, Vec<DeliveryHandle>, Vec<Option<MessageId>>) {
    let link = bridge.engine_mut().attach_consumer(
        session,
        "receiver",
        Some(Source {
            address: Some("queue://work".into()),
            ..Source::default()
        }),
        credit,
        SenderSettleMode::Unsettled,
    );
    pump(bridge).expect("consumer attached");
    let info = bridge
        .broker()
        .bodies()
        .into_iter()
        .find_map(|body| match body {
            Command::RegisterConsumer(info) => Some(info.clone()),
            _ => None,
        })
        .expect("consumer registered");
    answer_all(bridge);

    let ids: Vec<_> = (1..=2).map(|seq| dispatch(bridge, &info, seq)).collect();
    let deliveries = bridge.engine().outgoing(link);
    assert_eq!(deliveries.len(), 2);
    (link, deliveries, ids)
}

fn dispatch(bridge: &mut TestConverter, info: &ConsumerInfo, sequence: u64) -> Option<MessageId> {
    let producer = ProducerId::new(SessionId::new(ConnectionId::new("ID:remote-9"), 1), 1);
    let mut message = BrokerMessage::with_body(Bytes::from(format!("job-{sequence}")));
    message.message_id = Some(MessageId::new(producer, sequence));
    let id = message.message_id.clone();
    bridge
        .on_broker_event(BrokerEvent::Dispatch(MessageDispatch::new(
            info.consumer_id.clone(),
            info.destination.clone(),
            message,
        )))
        .expect("dispatch handled");
    id
}

/// Accept every delivery inside transaction `txn` and let the broker record
/// the provisional acks.
fn accept_in_transaction(bridge: &mut TestConverter, deliveries: &[DeliveryHandle], txn: u64) {
    for delivery in deliveries {
        bridge.engine_mut().dispose(
            *delivery,
            DeliveryState::transactional(encode_txn_id(txn), DeliveryState::Accepted),
            false,
        );
    }
    pump(bridge).expect("dispositions processed");
}

#[rstest]
fn declare_begins_a_local_transaction(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let link = coordinator(&mut bridge, session);
    let record = bridge.engine().link(link);
    assert!(record.opened);
    assert_eq!(record.flowed, vec![DEFAULT_PRODUCER_CREDIT]);

    let first = declare(&mut bridge, link);
    let second = declare(&mut bridge, link);

    for (delivery, value) in [(first, 1), (second, 2)] {
        let record = bridge.engine().delivery(delivery);
        assert_eq!(
            record.local_state,
            Some(DeliveryState::Declared(encode_txn_id(value)))
        );
        assert!(record.settled);
    }
    assert_eq!(
        transactions(&bridge),
        vec![
            TransactionInfo {
                connection_id: bridge.connection_id().clone(),
                transaction_id: local_txn(&bridge, 1),
                kind: TransactionKind::Begin,
            },
            TransactionInfo {
                connection_id: bridge.connection_id().clone(),
                transaction_id: local_txn(&bridge, 2),
                kind: TransactionKind::Begin,
            },
        ]
    );
}

#[rstest]
fn transactional_send_commits_in_order(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let control = coordinator(&mut bridge, session);
    declare(&mut bridge, control);

    let producer = bridge.engine_mut().attach_producer(
        session,
        "sender",
        Some(RemoteTarget::Target(Target {
            address: Some("queue://orders".into()),
            ..Target::default()
        })),
    );
    pump(&mut bridge).expect("producer attached");
    answer_all(&mut bridge);
    let state = DeliveryState::Transactional {
        txn_id: encode_txn_id(1),
        outcome: None,
    };
    bridge
        .engine_mut()
        .transfer(producer, b"order", false, Some(state));
    pump(&mut bridge).expect("transfer processed");
    answer_all(&mut bridge);

    let delivery = discharge(&mut bridge, control, 1, false);
    assert!(!bridge.engine().delivery(delivery).settled);

    let txn = local_txn(&bridge, 1);
    let kinds: Vec<_> = transactions(&bridge)
        .into_iter()
        .inspect(|info| assert_eq!(info.transaction_id, txn))
        .map(|info| info.kind)
        .collect();
    assert_eq!(kinds, vec![TransactionKind::Begin, TransactionKind::CommitOnePhase]);
    let sends: Vec<_> = bridge
        .broker()
        .bodies()
        .into_iter()
        .filter_map(|body| match body {
            Command::Send(message) => Some(message.transaction_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sends, vec![Some(txn)]);

    answer_all(&mut bridge);
    let record = bridge.engine().delivery(delivery);
    assert_eq!(record.local_state, Some(DeliveryState::Accepted));
    assert!(record.settled);
}

#[rstest]
fn consumer_acks_are_provisional_until_commit(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let control = coordinator(&mut bridge, session);
    declare(&mut bridge, control);
    let (link, deliveries, ids) = consumer_with_two_deliveries(&mut bridge, session, 5);
    bridge.broker_mut().clear();

    accept_in_transaction(&mut bridge, &deliveries, 1);
    let txn = local_txn(&bridge, 1);
    let provisional = acks(&bridge);
    assert_eq!(provisional.len(), 2);
    assert!(
        provisional
            .iter()
            .all(|ack| ack.ack_type == AckType::Delivered && ack.transaction_id == Some(txn.clone()))
    );
    assert_eq!(
        bridge.engine().delivery(deliveries[0]).local_state,
        Some(DeliveryState::transactional(
            encode_txn_id(1),
            DeliveryState::Accepted
        ))
    );
    answer_all(&mut bridge);
    let snapshot = bridge.consumer_snapshot(link).expect("consumer link");
    assert_eq!(snapshot.unsettled, 0);
    assert_eq!(snapshot.dispatched_in_tx, 2);

    bridge.broker_mut().clear();
    let delivery = discharge(&mut bridge, control, 1, false);

    let committed = acks(&bridge);
    assert_eq!(committed.len(), 2);
    assert!(
        committed
            .iter()
            .all(|ack| ack.ack_type == AckType::Individual && ack.transaction_id == Some(txn.clone()))
    );
    let mut acked: Vec<_> = committed.into_iter().map(|ack| ack.message_id).collect();
    acked.sort_by_key(|id| id.as_ref().map(|id| id.producer_sequence));
    assert_eq!(acked, ids);
    assert!(matches!(
        bridge.broker().bodies().last(),
        Some(Command::Transaction(TransactionInfo {
            kind: TransactionKind::CommitOnePhase,
            ..
        }))
    ));

    answer_all(&mut bridge);
    assert_eq!(
        bridge.engine().delivery(delivery).local_state,
        Some(DeliveryState::Accepted)
    );
    assert_eq!(
        bridge.consumer_snapshot(link).map(|s| s.dispatched_in_tx),
        Some(0)
    );
}

#[rstest]
fn rollback_requeues_in_original_order(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let control = coordinator(&mut bridge, session);
    declare(&mut bridge, control);
    let (link, deliveries, ids) = consumer_with_two_deliveries(&mut bridge, session, 4);
    accept_in_transaction(&mut bridge, &deliveries, 1);
    answer_all(&mut bridge);
    bridge.broker_mut().clear();

    discharge(&mut bridge, control, 1, true);

    assert!(acks(&bridge).is_empty());
    let kinds: Vec<_> = transactions(&bridge).into_iter().map(|info| info.kind).collect();
    assert_eq!(kinds, vec![TransactionKind::Rollback]);
    let snapshot = bridge.consumer_snapshot(link).expect("consumer link");
    assert_eq!(snapshot.dispatched_in_tx, 0);
    assert_eq!(
        snapshot.queued,
        ids.iter().cloned().map(|id| (id, 1)).collect::<Vec<_>>()
    );
    assert_eq!(bridge.engine().outgoing(link).len(), 2);

    answer_all(&mut bridge);
    assert_eq!(
        bridge.engine().sent_messages(link),
        vec![
            Bytes::from_static(b"job-1"),
            Bytes::from_static(b"job-2"),
            Bytes::from_static(b"job-1"),
            Bytes::from_static(b"job-2"),
        ]
    );
    assert!(bridge.consumer_snapshot(link).expect("consumer").queued.is_empty());
}

#[rstest]
fn refused_discharge_rejects_control_message(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let control = coordinator(&mut bridge, session);
    declare(&mut bridge, control);
    answer_all(&mut bridge);

    let delivery = discharge(&mut bridge, control, 1, false);
    assert!(answer_matching(
        &mut bridge,
        |c| matches!(c, Command::Transaction(_)),
        Err(BrokerException::new(ExceptionKind::Other, "commit failed")),
    ));

    let record = bridge.engine().delivery(delivery);
    assert!(record.settled);
    assert!(matches!(
        &record.local_state,
        Some(DeliveryState::Rejected(Some(c)))
            if c.kind == ConditionKind::Failed && c.description == "commit failed"
    ));
    assert!(!bridge.engine().link(control).closed);
    assert!(!bridge.is_stopped());
}

#[rstest]
#[case::global_transaction(
    encode_control(&ControlAction::Declare { global_id: Some(Bytes::from_static(b"xid")) }),
    ConditionKind::InvalidField
)]
#[case::missing_transaction_id(
    encode_control(&ControlAction::Discharge { txn_id: Bytes::new(), fail: false }),
    ConditionKind::InvalidField
)]
#[case::unknown_action(
    encode_control(&ControlAction::Other("coordinator-x".into())),
    ConditionKind::IllegalState
)]
#[case::undecodable(Bytes::from_static(&[0x7f]), ConditionKind::InvalidField)]
fn coordinator_violation_closes_only_the_coordinator(
    connected: (TestConverter, SessionHandle),
    #[case] body: Bytes,
    #[case] kind: ConditionKind,
) {
    let (mut bridge, session) = connected;
    let control = coordinator(&mut bridge, session);
    let producer = bridge.engine_mut().attach_producer(
        session,
        "sender",
        Some(RemoteTarget::Target(Target {
            address: Some("queue://orders".into()),
            ..Target::default()
        })),
    );
    pump(&mut bridge).expect("producer attached");
    answer_all(&mut bridge);
    bridge.broker_mut().clear();

    let delivery = bridge.engine_mut().transfer(control, &body, false, None);
    pump(&mut bridge).expect("control processed");

    let record = bridge.engine().delivery(delivery);
    assert!(record.settled);
    assert!(matches!(
        &record.local_state,
        Some(DeliveryState::Rejected(Some(c))) if c.kind == kind
    ));
    let link = bridge.engine().link(control);
    assert!(link.closed);
    assert_eq!(link.condition.as_ref().map(|c| c.kind), Some(kind));

    assert!(transactions(&bridge).is_empty());
    assert!(!bridge.engine().link(producer).closed);
    assert_eq!(bridge.engine().connection().closed, 0);
    assert!(!bridge.is_stopped());
}

#[rstest]
fn global_declare_is_described(connected: (TestConverter, SessionHandle)) {
    let (mut bridge, session) = connected;
    let control = coordinator(&mut bridge, session);
    bridge.engine_mut().control(
        control,
        &ControlAction::Declare {
            global_id: Some(Bytes::from_static(b"xid")),
        },
    );
    pump(&mut bridge).expect("control processed");
    assert_eq!(
        bridge
            .engine()
            .link(control)
            .condition
            .as_ref()
            .map(|c| c.description.as_str()),
        Some("The coordinator does not support global transactions")
    );
}
