//! Async driver serializing every entry point of one [`Converter`].
//!
//! Transport reads and broker callbacks arrive from different tasks. The
//! [`BridgeActor`] owns the converter and multiplexes both sources with a
//! biased `tokio::select!`, so engine state is only ever touched from one
//! task. Broker code holds a cloneable [`BrokerHandle`] and never sees the
//! converter itself.

mod registry;

use std::{any::Any, io, panic::AssertUnwindSafe};

use futures::FutureExt;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub use self::registry::{active_bridge_count, is_bridge_active};
use self::registry::ActiveBridge;
use crate::{
    broker::{Broker, BrokerEvent, BrokerResponse, ConnectionId, MessageDispatch},
    converter::Converter,
    engine::ProtocolEngine,
    transport::{Transport, TransportInput},
};

/// The bridge task has stopped; the undelivered event is returned.
#[derive(Debug, Error)]
#[error("bridge task has stopped")]
pub struct BridgeClosed(pub BrokerEvent);

/// Cloneable entry point for broker threads.
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerEvent>,
}

impl BrokerHandle {
    /// Queue `event` for the bridge task.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeClosed`] if the bridge task has finished.
    pub fn deliver(&self, event: BrokerEvent) -> Result<(), BridgeClosed> {
        self.tx.send(event).map_err(|e| BridgeClosed(e.0))
    }

    /// Answer a command.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeClosed`] if the bridge task has finished.
    pub fn respond(&self, response: BrokerResponse) -> Result<(), BridgeClosed> {
        self.deliver(BrokerEvent::Response(response))
    }

    /// Hand a message to one of the connection's consumers.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeClosed`] if the bridge task has finished.
    pub fn dispatch(&self, dispatch: MessageDispatch) -> Result<(), BridgeClosed> {
        self.deliver(BrokerEvent::Dispatch(dispatch))
    }

    /// Whether the bridge task has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Receiving half of a [`BrokerHandle`], consumed by [`BridgeActor::new`].
#[derive(Debug)]
pub struct BrokerEvents(mpsc::UnboundedReceiver<BrokerEvent>);

/// Create the channel broker threads use to reach a bridge task.
///
/// The handle is usually given to the [`Broker`] implementation before the
/// converter is built.
#[must_use]
pub fn broker_channel() -> (BrokerHandle, BrokerEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BrokerHandle { tx }, BrokerEvents(rx))
}

enum Event {
    Shutdown,
    Input(Option<TransportInput>),
    Broker(Option<BrokerEvent>),
}

/// Drives one [`Converter`] from transport input and broker events.
pub struct BridgeActor<E, B, T> {
    converter: Converter<E, B, T>,
    input_rx: mpsc::Receiver<TransportInput>,
    events_rx: mpsc::UnboundedReceiver<BrokerEvent>,
    shutdown: CancellationToken,
    shutting_down: bool,
    input_open: bool,
    registration: Option<ActiveBridge>,
}

impl<E, B, T> BridgeActor<E, B, T>
where
    E: ProtocolEngine,
    B: Broker,
    T: Transport,
{
    /// Create an actor reading transport chunks from `input_rx` and broker
    /// events from `events`.
    #[must_use]
    pub fn new(
        converter: Converter<E, B, T>,
        input_rx: mpsc::Receiver<TransportInput>,
        events: BrokerEvents,
        shutdown: CancellationToken,
    ) -> Self {
        let registration = Some(ActiveBridge::new(converter.connection_id().clone()));
        Self {
            converter,
            input_rx,
            events_rx: events.0,
            shutdown,
            shutting_down: false,
            input_open: true,
            registration,
        }
    }

    /// Broker connection id of the driven converter.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId { self.converter.connection_id() }

    /// Get a clone of the shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Run until the converter stops its transport or the broker goes away.
    ///
    /// Returns the converter so callers can inspect its final state.
    pub async fn run(mut self) -> Converter<E, B, T> {
        let connection_id = self.converter.connection_id().clone();
        info!("bridge started: connection={connection_id}");
        tracing::info!(connection = %connection_id, "bridge started");

        while !self.converter.is_stopped() {
            match self.next_event().await {
                Event::Shutdown => {
                    debug!("shutdown requested: connection={connection_id}");
                    self.shutting_down = true;
                    self.converter.close();
                }
                Event::Input(Some(input)) => {
                    // Failures are logged and the transport stopped inside
                    // the converter.
                    let _ = self.converter.on_transport_input(input);
                }
                Event::Input(None) => {
                    self.input_open = false;
                    self.converter
                        .on_transport_error(io::Error::from(io::ErrorKind::UnexpectedEof));
                }
                Event::Broker(Some(event)) => {
                    let _ = self.converter.on_broker_event(event);
                }
                Event::Broker(None) => {
                    warn!("broker channel closed: connection={connection_id}");
                    self.converter.abort();
                    break;
                }
            }
        }

        info!(
            "bridge finished: connection={connection_id}, state={:?}",
            self.converter.state()
        );
        tracing::info!(connection = %connection_id, "bridge finished");
        drop(self.registration.take());
        self.converter
    }

    /// Await the next event. Shutdown wins over transport input, which wins
    /// over broker events.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus operations internally"
    )]
    async fn next_event(&mut self) -> Event {
        let shutdown = self.shutdown.clone();
        let input_rx = &mut self.input_rx;
        let events_rx = &mut self.events_rx;
        tokio::select! {
            biased;

            () = shutdown.cancelled(), if !self.shutting_down => Event::Shutdown,
            input = input_rx.recv(), if self.input_open => Event::Input(input),
            event = events_rx.recv() => Event::Broker(event),
        }
    }
}

/// Spawn `actor` on `tracker`, logging and discarding any panic.
pub fn spawn_bridge<E, B, T>(
    actor: BridgeActor<E, B, T>,
    tracker: &TaskTracker,
) -> JoinHandle<()>
where
    E: ProtocolEngine + Send + 'static,
    B: Broker + Send + 'static,
    T: Transport + Send + 'static,
{
    let connection_id = actor.connection_id().clone();
    tracker.spawn(async move {
        let fut = AssertUnwindSafe(actor.run()).catch_unwind();
        if let Err(panic) = fut.await {
            crate::metrics::inc_errors();
            let message = panic_message(panic.as_ref());
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("bridge task panicked: connection={connection_id}, panic={message}");
            tracing::error!(connection = %connection_id, panic = %message, "bridge task panicked");
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&'static str>().map(|s| (*s).to_owned()))
        .unwrap_or_else(|| "<non-string panic>".to_owned())
}
