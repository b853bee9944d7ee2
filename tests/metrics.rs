#![cfg(feature = "metrics")]
//! Metrics recorded by the bridge.
//!
//! Recorded with `metrics_util::debugging::DebuggingRecorder` installed as a
//! thread-local recorder, so tests do not interfere.

use amqp_bridge::{
    BridgeConfig,
    CONNECTIONS_ACTIVE,
    DELIVERIES_TOTAL,
    Direction,
    ERRORS_TOTAL,
    TransportInput,
    engine::{RemoteTarget, Target},
    metrics as bridge_metrics,
};
use bridge_testing::{answer_all, converter, open_connection, open_session, pump};
use bytes::Bytes;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter_value(snapshotter: &Snapshotter, name: &str, direction: Option<&str>) -> Option<u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| {
            let key = key.key();
            let labelled = direction.is_none_or(|direction| {
                key.labels()
                    .any(|l| l.key() == "direction" && l.value() == direction)
            });
            match value {
                DebugValue::Counter(c) if key.name() == name && labelled => Some(c),
                _ => None,
            }
        })
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn delivery_metric_is_labelled(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        bridge_metrics::inc_deliveries(direction);
        bridge_metrics::inc_deliveries(direction);
    });
    assert_eq!(counter_value(&snapshotter, DELIVERIES_TOTAL, Some(label)), Some(2));
}

#[test]
fn connection_gauge_tracks_open_connections() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        bridge_metrics::inc_connections();
        bridge_metrics::inc_connections();
        bridge_metrics::dec_connections();
    });
    let metrics = snapshotter.snapshot().into_vec();
    assert!(
        metrics.iter().any(|(key, _, _, value)| {
            key.key().name() == CONNECTIONS_ACTIVE
                && matches!(value, DebugValue::Gauge(g) if g.into_inner() == 1.0)
        }),
        "expected {CONNECTIONS_ACTIVE} == 1, got {metrics:#?}"
    );
}

#[test]
fn forwarded_message_is_counted_inbound() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let mut bridge = converter(BridgeConfig::default());
        open_connection(&mut bridge, None);
        let session = open_session(&mut bridge);
        let link = bridge.engine_mut().attach_producer(
            session,
            "sender",
            Some(RemoteTarget::Target(Target {
                address: Some("queue://metered".into()),
                ..Target::default()
            })),
        );
        pump(&mut bridge).expect("attach processed");
        answer_all(&mut bridge);
        bridge.engine_mut().transfer(link, b"payload", true, None);
        pump(&mut bridge).expect("transfer processed");
    });
    assert_eq!(
        counter_value(&snapshotter, DELIVERIES_TOTAL, Some("inbound")),
        Some(1)
    );
}

#[test]
fn fatal_connection_error_is_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let mut bridge = converter(BridgeConfig::default());
        open_connection(&mut bridge, None);
        bridge.engine_mut().fail_input("garbage");
        let result = bridge.on_transport_input(TransportInput::Frame(Bytes::from_static(b"??")));
        assert!(result.is_err());
    });
    assert_eq!(counter_value(&snapshotter, ERRORS_TOTAL, None), Some(1));
}
