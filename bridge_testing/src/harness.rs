//! Helpers for driving a [`Converter`] over the scripted collaborators.

use amqp_bridge::{
    BridgeConfig,
    Converter,
    TransportInput,
    broker::{BrokerEvent, BrokerException, BrokerResponse, Command},
    engine::SessionHandle,
    header::ProtocolHeader,
};
use bytes::Bytes;
use rstest::fixture;

use crate::{RecordingBroker, ScriptedEngine, VecTransport};

/// Converter wired to the scripted engine, recording broker and in-memory
/// transport.
pub type TestConverter = Converter<ScriptedEngine, RecordingBroker, VecTransport>;

/// Build a converter with `config`.
#[must_use]
pub fn converter(config: BridgeConfig) -> TestConverter {
    converter_with(config, RecordingBroker::new())
}

/// Build a converter over `broker`.
#[must_use]
pub fn converter_with(config: BridgeConfig, broker: RecordingBroker) -> TestConverter {
    Converter::new(ScriptedEngine::new(), broker, VecTransport::new(), config)
}

/// Feed a frame so the converter drains whatever was scripted.
///
/// # Errors
///
/// Propagates the converter's error.
pub fn pump(converter: &mut TestConverter) -> amqp_bridge::Result<()> {
    converter.on_transport_input(TransportInput::Frame(Bytes::from_static(b"frame")))
}

/// Answer one command with `result`.
///
/// # Panics
///
/// Panics if the converter rejects the response.
pub fn respond(
    converter: &mut TestConverter,
    id: amqp_bridge::correlation::CommandId,
    result: Result<(), BrokerException>,
) {
    let response = BrokerResponse {
        correlation_id: id,
        result,
    };
    converter
        .on_broker_event(BrokerEvent::Response(response))
        .expect("response handled");
}

/// Successfully answer every outstanding command, including any issued while
/// answering.
pub fn answer_all(converter: &mut TestConverter) {
    loop {
        let ids = converter.broker_mut().take_unanswered();
        if ids.is_empty() {
            break;
        }
        for id in ids {
            respond(converter, id, Ok(()));
        }
    }
}

/// Answer the oldest outstanding command matching `predicate`. Returns
/// whether one was found.
pub fn answer_matching(
    converter: &mut TestConverter,
    predicate: impl Fn(&Command) -> bool,
    result: Result<(), BrokerException>,
) -> bool {
    let Some(id) = converter.broker_mut().take_unanswered_matching(predicate) else {
        return false;
    };
    respond(converter, id, result);
    true
}

/// Send a plain header and the peer's open, then register the connection.
///
/// # Panics
///
/// Panics if the converter fails.
pub fn open_connection(converter: &mut TestConverter, container: Option<&str>) {
    converter
        .on_transport_input(TransportInput::Header(ProtocolHeader::plain()))
        .expect("header accepted");
    converter.engine_mut().remote_open(container);
    pump(converter).expect("open processed");
    answer_all(converter);
}

/// Begin a session on an open connection.
///
/// # Panics
///
/// Panics if the converter fails.
pub fn open_session(converter: &mut TestConverter) -> SessionHandle {
    let session = converter.engine_mut().begin_session();
    pump(converter).expect("begin processed");
    session
}

/// An open connection with one session.
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn connected() -> (TestConverter, SessionHandle) {
    let mut converter = converter(BridgeConfig::default());
    open_connection(&mut converter, Some("client-1"));
    let session = open_session(&mut converter);
    converter.broker_mut().clear();
    (converter, session)
}
