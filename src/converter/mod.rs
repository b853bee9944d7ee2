//! Per-connection protocol converter.
//!
//! A [`Converter`] sits between one client connection and the broker. It
//! feeds transport bytes to the [`ProtocolEngine`], dispatches the decoded
//! events to the connection, session and link lifecycle, and resumes parked
//! work when the broker answers. Every entry point runs to completion and
//! ends by flushing the engine's output to the transport, so the converter
//! must be driven from a single task (see [`crate::actor`]).

mod consumer;
mod coordinator;
mod io;
mod lifecycle;
mod producer;

use std::{collections::HashMap, io as std_io, mem, sync::Arc};

use bytes::{Buf, Bytes};
use log::{debug, error, trace, warn};

pub use self::consumer::ConsumerSnapshot;
use self::{
    consumer::ConsumerContext,
    coordinator::CoordinatorContext,
    io::BridgeIo,
    producer::ProducerContext,
};
use crate::{
    auth::{
        AuthError,
        Authenticator,
        NoopAuthenticator,
        OFFERED_MECHANISMS,
        PlainCredentials,
        SaslMechanism,
        SaslOutcome,
    },
    broker::{Broker, BrokerEvent, BrokerException, BrokerResponse, ConnectionId, ConsumerId, SessionId},
    config::{AsyncErrorPolicy, BridgeConfig},
    engine::{EngineError, EngineEvent, LinkHandle, ProtocolEngine, SessionHandle},
    error::{BridgeError, Result},
    header::ProtocolHeader,
    metrics,
    transform::Transformers,
    transport::{Transport, TransportInput},
};

/// Log target for raw frame tracing.
pub const FRAME_TRACE_TARGET: &str = "amqp_bridge::frames";

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the peer's open and the broker's registration.
    Opening,
    /// Registered and open.
    Open,
    /// Teardown started; waiting for the broker.
    Closing,
    /// Torn down.
    Closed,
}

pub(crate) struct SessionContext {
    pub(crate) session_id: SessionId,
    pub(crate) consumers: Vec<LinkHandle>,
    next_producer_id: u64,
    next_consumer_id: u64,
}

impl SessionContext {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            consumers: Vec::new(),
            next_producer_id: 0,
            next_consumer_id: 0,
        }
    }

    fn next_producer_id(&mut self) -> u64 {
        self.next_producer_id += 1;
        self.next_producer_id
    }

    fn next_consumer_id(&mut self) -> u64 {
        self.next_consumer_id += 1;
        self.next_consumer_id
    }
}

/// Per-link state, chosen once when the link opens.
#[derive(Debug)]
pub(crate) enum LinkContext {
    Producer(ProducerContext),
    Consumer(ConsumerContext),
    Coordinator(CoordinatorContext),
}

/// Bridges one protocol connection to the broker.
pub struct Converter<E, B, T> {
    io: BridgeIo<E, B>,
    transport: T,
    authenticator: Arc<dyn Authenticator>,
    sessions: HashMap<SessionHandle, SessionContext>,
    links: HashMap<LinkHandle, LinkContext>,
    consumers_by_id: HashMap<ConsumerId, LinkHandle>,
    state: ConnectionState,
    closing: bool,
    socket_closed: bool,
    stopped: bool,
    sasl_active: bool,
    user_name: Option<String>,
    password: Option<String>,
    next_session_id: u64,
}

impl<E, B, T> Converter<E, B, T>
where
    E: ProtocolEngine,
    B: Broker,
    T: Transport,
{
    /// Create a converter for a freshly accepted connection.
    #[must_use]
    pub fn new(mut engine: E, broker: B, transport: T, config: BridgeConfig) -> Self {
        engine.set_channel_max(config.channel_max);
        if let Some(size) = config.max_frame_size {
            engine.set_max_frame_size(size);
        }
        let io = BridgeIo::new(engine, broker, config);
        debug!("converter created: connection={}", io.connection_id);
        Self {
            io,
            transport,
            authenticator: Arc::new(NoopAuthenticator),
            sessions: HashMap::new(),
            links: HashMap::new(),
            consumers_by_id: HashMap::new(),
            state: ConnectionState::Opening,
            closing: false,
            socket_closed: false,
            stopped: false,
            sasl_active: false,
            user_name: None,
            password: None,
            next_session_id: 0,
        }
    }

    /// Use `authenticator` for SASL exchanges.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Replace the configured message transformers.
    #[must_use]
    pub fn with_transformers(mut self, transformers: Transformers) -> Self {
        self.io.transformers = transformers;
        self
    }

    /// Broker connection id.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId { &self.io.connection_id }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state }

    /// Whether the transport has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool { self.stopped }

    /// The protocol engine.
    #[must_use]
    pub fn engine(&self) -> &E { &self.io.engine }

    /// Mutable access to the protocol engine.
    pub fn engine_mut(&mut self) -> &mut E { &mut self.io.engine }

    /// The broker.
    #[must_use]
    pub fn broker(&self) -> &B { &self.io.broker }

    /// Mutable access to the broker.
    pub fn broker_mut(&mut self) -> &mut B { &mut self.io.broker }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &T { &self.transport }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T { &mut self.transport }

    /// Snapshot of the consumer bound to `link`, if it is a consumer link.
    #[must_use]
    pub fn consumer_snapshot(&self, link: LinkHandle) -> Option<ConsumerSnapshot> {
        match self.links.get(&link) {
            Some(LinkContext::Consumer(consumer)) => Some(consumer.snapshot()),
            _ => None,
        }
    }

    /// Feed one chunk read from the transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the header is unsupported, the engine cannot
    /// decode the bytes or authentication fails. The transport has already
    /// been stopped when this returns an error.
    pub fn on_transport_input(&mut self, input: TransportInput) -> Result<()> {
        let result = match input {
            TransportInput::Header(header) => self.on_header(header),
            TransportInput::Frame(bytes) => self.on_frame(bytes),
        };
        if let Err(e) = &result {
            self.handle_exception(e);
        }
        result
    }

    /// Handle an event delivered by the broker.
    ///
    /// # Errors
    ///
    /// Returns an error when an uncorrelated broker failure tears the
    /// connection down under the configured [`AsyncErrorPolicy`].
    pub fn on_broker_event(&mut self, event: BrokerEvent) -> Result<()> {
        let result = match event {
            BrokerEvent::Response(response) => self.on_response(response),
            BrokerEvent::Dispatch(dispatch) => {
                match self.consumers_by_id.get(&dispatch.consumer_id) {
                    Some(link) => {
                        if let Some(LinkContext::Consumer(consumer)) = self.links.get_mut(link) {
                            consumer.on_dispatch(&mut self.io, dispatch);
                        }
                    }
                    None => debug!(
                        "dispatch for unknown consumer: connection={}, consumer={}",
                        self.io.connection_id, dispatch.consumer_id
                    ),
                }
                Ok(())
            }
            BrokerEvent::ConnectionError(exception) => self.on_async_error(exception),
            BrokerEvent::BrokerInfo => Ok(()),
        };
        match &result {
            Ok(()) => self.flush(),
            Err(e) => self.handle_exception(e),
        }
        result
    }

    /// The transport failed or reached end of stream.
    pub fn on_transport_error(&mut self, error: std_io::Error) {
        let error = BridgeError::from(error);
        debug!(
            "transport closed: connection={}, error={error}",
            self.io.connection_id
        );
        self.socket_closed = true;
        if self.closing {
            self.stop_transport();
        } else {
            self.do_close();
        }
    }

    /// Start connection teardown. Repeated calls are ignored.
    pub fn close(&mut self) {
        self.do_close();
        self.flush();
    }

    /// Tear down without waiting for the broker to answer. Used once broker
    /// events can no longer reach this converter.
    pub fn abort(&mut self) {
        debug!("aborting connection: connection={}", self.io.connection_id);
        self.do_close();
        self.finish_close();
    }

    fn on_header(&mut self, header: ProtocolHeader) -> Result<()> {
        if !header.is_valid() {
            let supported = ProtocolHeader::minimally_supported();
            warn!(
                "unsupported protocol header: connection={}, header={header}, supported={supported}",
                self.io.connection_id
            );
            self.transport.write(&supported.to_bytes());
            return Err(BridgeError::UnsupportedHeader(header));
        }
        if header.is_sasl() {
            debug!("starting sasl: connection={}", self.io.connection_id);
            self.io.engine.sasl_server(&OFFERED_MECHANISMS);
            self.sasl_active = true;
        }
        self.on_frame(header.to_bytes())
    }

    fn on_frame(&mut self, mut bytes: Bytes) -> Result<()> {
        if self.io.config.trace_frames {
            trace!(
                target: FRAME_TRACE_TARGET,
                "received: connection={}, bytes={:?}",
                self.io.connection_id,
                bytes
            );
        }
        while !bytes.is_empty() {
            let consumed = self.io.engine.input(&bytes)?;
            if consumed == 0 {
                return Err(EngineError::Decode("engine accepted no input".to_owned()).into());
            }
            bytes.advance(consumed.min(bytes.len()));
            self.process_sasl()?;
            self.process_events();
        }
        self.flush();
        Ok(())
    }

    fn process_sasl(&mut self) -> Result<()> {
        if !self.sasl_active {
            return Ok(());
        }
        let Some(mechanism) = self.io.engine.sasl_remote_mechanism() else {
            return Ok(());
        };
        self.sasl_active = false;
        let response = self.io.engine.sasl_recv();
        let credentials = match SaslMechanism::from_name(&mechanism) {
            Some(SaslMechanism::Plain) => PlainCredentials::parse(&response),
            Some(SaslMechanism::Anonymous) => PlainCredentials::default(),
            None => {
                self.io.engine.sasl_done(SaslOutcome::Auth);
                return Err(AuthError(format!("unsupported mechanism {mechanism}")).into());
            }
        };
        let peer_certificates = self.transport.peer_certificates();
        match self.authenticator.authenticate(
            credentials.user_name.as_deref(),
            credentials.password.as_deref(),
            &peer_certificates,
        ) {
            Ok(identity) => {
                debug!(
                    "sasl complete: connection={}, mechanism={mechanism}, user={:?}",
                    self.io.connection_id,
                    identity.user_name()
                );
                self.user_name = credentials.user_name;
                self.password = credentials.password;
                self.io.engine.sasl_done(SaslOutcome::Ok);
                Ok(())
            }
            Err(e) => {
                self.io.engine.sasl_done(SaslOutcome::Auth);
                Err(e.into())
            }
        }
    }

    fn process_events(&mut self) {
        while let Some(event) = self.io.engine.next_event() {
            trace!("engine event: connection={}, event={event:?}", self.io.connection_id);
            match event {
                EngineEvent::ConnectionRemoteOpen => self.on_connection_open(),
                EngineEvent::ConnectionRemoteClose => self.do_close(),
                EngineEvent::SessionRemoteOpen(session) => self.on_session_open(session),
                EngineEvent::SessionRemoteClose(session) => self.on_session_close(session),
                EngineEvent::LinkRemoteOpen(link) => self.on_link_open(link),
                EngineEvent::LinkRemoteDetach(link) => self.on_link_detach(link),
                EngineEvent::LinkRemoteClose(link) => self.on_link_close(link),
                EngineEvent::LinkFlow(link) => self.on_link_flow(link),
                EngineEvent::Delivery(delivery) => self.on_delivery(delivery),
            }
        }
    }

    fn on_response(&mut self, response: BrokerResponse) -> Result<()> {
        let BrokerResponse {
            correlation_id,
            result,
        } = response;
        match self.io.correlator.complete(correlation_id) {
            Some(pending) => {
                trace!(
                    "resuming: connection={}, id={correlation_id}, pending={pending:?}",
                    self.io.connection_id
                );
                self.resume(pending, result);
                Ok(())
            }
            None => match result {
                Ok(()) => {
                    debug!(
                        "response without pending work: connection={}, id={correlation_id}",
                        self.io.connection_id
                    );
                    Ok(())
                }
                Err(exception) => self.on_async_error(exception),
            },
        }
    }

    fn on_async_error(&mut self, exception: BrokerException) -> Result<()> {
        let teardown = match self.io.config.async_error_policy {
            AsyncErrorPolicy::Teardown => true,
            AsyncErrorPolicy::TeardownDuringBringUp => self.state == ConnectionState::Opening,
            AsyncErrorPolicy::LogOnly => false,
        };
        if teardown {
            return Err(exception.into());
        }
        warn!(
            "ignoring broker error: connection={}, error={exception}",
            self.io.connection_id
        );
        Ok(())
    }

    /// Report a fatal error, flush what the peer should still see and stop
    /// the transport.
    fn handle_exception(&mut self, e: &BridgeError) {
        error!("connection failed: connection={}, error={e}", self.io.connection_id);
        metrics::inc_errors();
        self.flush();
        self.stop_transport();
    }

    fn stop_transport(&mut self) {
        if !mem::replace(&mut self.stopped, true) {
            debug!("stopping transport: connection={}", self.io.connection_id);
            self.transport.stop();
        }
    }

    /// Write pending engine output until the transport pushes back.
    fn flush(&mut self) {
        if self.stopped || self.socket_closed {
            return;
        }
        while let Some(output) = self.io.engine.pending_output().filter(|out| !out.is_empty()) {
            let written = self.transport.write(&output);
            if self.io.config.trace_frames {
                trace!(
                    target: FRAME_TRACE_TARGET,
                    "sent: connection={}, bytes={:?}",
                    self.io.connection_id,
                    output.slice(..written.min(output.len()))
                );
            }
            self.io.engine.output_consumed(written);
            if written < output.len() {
                break;
            }
        }
    }
}
