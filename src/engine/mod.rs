//! Boundary to the wire-protocol engine.
//!
//! The engine owns framing, the connection/session/link state machines and
//! the encode/decode buffers. The bridge only feeds it bytes, drains the
//! typed events it produces and drives endpoints through the
//! [`ProtocolEngine`] trait. Endpoints are referred to by stable integer
//! handles; the bridge keeps its own per-link state in side tables keyed by
//! those handles.

mod delivery;
mod terminus;

use bytes::Bytes;
use derive_more::{Display, From, Into};
use thiserror::Error;

pub use self::{
    delivery::{ControlAction, DeliveryState, decode_txn_id, encode_txn_id},
    terminus::{
        ANONYMOUS_RELAY,
        CONNECTION_OPEN_FAILED,
        COPY,
        ExpiryPolicy,
        FilterEntry,
        FilterId,
        JMS_SELECTOR_FILTER_IDS,
        NO_LOCAL_FILTER_IDS,
        QUEUE_PREFIX,
        RemoteTarget,
        Source,
        Symbol,
        TEMP_QUEUE_CAPABILITY,
        TEMP_TOPIC_CAPABILITY,
        TOPIC_PREFIX,
        Target,
        TerminusDurability,
        find_filter,
    },
};
use crate::{auth::SaslOutcome, error::ErrorCondition, value::PropertyValue};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
        #[display("{_0}")]
        pub struct $name(u64);

        impl $name {
            /// Create a handle from its raw value.
            #[must_use]
            pub const fn new(value: u64) -> Self { Self(value) }

            /// Raw handle value.
            #[must_use]
            pub const fn get(self) -> u64 { self.0 }
        }
    };
}

handle!(
    /// Engine-assigned identity of a session.
    SessionHandle
);
handle!(
    /// Engine-assigned identity of a link.
    LinkHandle
);
handle!(
    /// Engine-assigned identity of a delivery.
    DeliveryHandle
);

/// Errors reported by the protocol engine.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Transport bytes could not be decoded.
    #[error("malformed frame: {0}")]
    Decode(String),
    /// A coordinator message body could not be decoded.
    #[error("malformed control message: {0}")]
    Control(String),
}

/// Events surfaced by the engine after input is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// The peer opened the connection.
    ConnectionRemoteOpen,
    /// The peer closed the connection.
    ConnectionRemoteClose,
    /// The peer began a session.
    SessionRemoteOpen(SessionHandle),
    /// The peer ended a session.
    SessionRemoteClose(SessionHandle),
    /// The peer attached a link.
    LinkRemoteOpen(LinkHandle),
    /// The peer detached a link without closing it.
    LinkRemoteDetach(LinkHandle),
    /// The peer closed a link.
    LinkRemoteClose(LinkHandle),
    /// Link credit or drain state changed.
    LinkFlow(LinkHandle),
    /// A delivery arrived or its remote state changed.
    Delivery(DeliveryHandle),
}

/// Role of the local end of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkRole {
    /// We send; the peer consumes.
    Sender,
    /// We receive; the peer produces.
    Receiver,
}

/// Settlement mode the peer requested for messages we send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SenderSettleMode {
    /// Deliveries are sent unsettled.
    Unsettled,
    /// Deliveries are sent settled.
    Settled,
    /// Either, per delivery.
    #[default]
    Mixed,
}

/// Result of reading from a receiving link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecvChunk {
    /// Bytes of the current delivery.
    Data(Bytes),
    /// No bytes buffered yet; more transfers will follow.
    Pending,
    /// The current delivery is complete.
    End,
}

/// Operations the bridge performs on the protocol engine.
///
/// All methods are called from the connection's single serialized pump, so
/// the trait takes `&mut self` and requires no internal synchronization.
pub trait ProtocolEngine {
    /// Feed transport bytes; returns how many were consumed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Decode`] when the bytes are not valid framing.
    fn input(&mut self, bytes: &[u8]) -> Result<usize, EngineError>;
    /// Encoded bytes waiting to be written, if any.
    fn pending_output(&self) -> Option<Bytes>;
    /// Mark `count` pending bytes as written.
    fn output_consumed(&mut self, count: usize);
    /// Pop the next event.
    fn next_event(&mut self) -> Option<EngineEvent>;
    /// Cap the frame size.
    fn set_max_frame_size(&mut self, size: u32);
    /// Cap the channel number.
    fn set_channel_max(&mut self, max: u16);

    /// Start SASL server mode offering `mechanisms`.
    fn sasl_server(&mut self, mechanisms: &[&str]);
    /// Mechanism the peer chose, once known.
    fn sasl_remote_mechanism(&self) -> Option<String>;
    /// Take the peer's initial SASL response.
    fn sasl_recv(&mut self) -> Bytes;
    /// Complete the SASL exchange.
    fn sasl_done(&mut self, outcome: SaslOutcome);

    /// Container id the peer announced in its open.
    fn remote_container(&self) -> Option<String>;
    /// Set the capabilities offered in our open.
    fn set_offered_capabilities(&mut self, capabilities: Vec<Symbol>);
    /// Set the properties sent in our open.
    fn set_connection_properties(&mut self, properties: Vec<(Symbol, PropertyValue)>);
    /// Attach an error condition to our close.
    fn set_connection_condition(&mut self, condition: ErrorCondition);
    /// Send our open.
    fn open_connection(&mut self);
    /// Send our close.
    fn close_connection(&mut self);

    /// Set the session's incoming byte capacity.
    fn set_session_incoming_capacity(&mut self, session: SessionHandle, capacity: usize);
    /// Send our begin.
    fn open_session(&mut self, session: SessionHandle);
    /// Send our end.
    fn close_session(&mut self, session: SessionHandle);
    /// Release the engine's session object.
    fn free_session(&mut self, session: SessionHandle);
    /// Links currently attached on `session`.
    fn session_links(&self, session: SessionHandle) -> Vec<LinkHandle>;

    /// Session owning `link`.
    fn link_session(&self, link: LinkHandle) -> Option<SessionHandle>;
    /// Our role on `link`.
    fn link_role(&self, link: LinkHandle) -> Option<LinkRole>;
    /// Link name.
    fn link_name(&self, link: LinkHandle) -> String;
    /// Source the peer supplied.
    fn remote_source(&self, link: LinkHandle) -> Option<Source>;
    /// Target the peer supplied.
    fn remote_target(&self, link: LinkHandle) -> Option<RemoteTarget>;
    /// Set our source.
    fn set_source(&mut self, link: LinkHandle, source: Option<Source>);
    /// Set our target.
    fn set_target(&mut self, link: LinkHandle, target: Option<RemoteTarget>);
    /// Attach an error condition to our detach.
    fn set_link_condition(&mut self, link: LinkHandle, condition: ErrorCondition);
    /// Settlement mode requested for deliveries we send.
    fn remote_sender_settle_mode(&self, link: LinkHandle) -> SenderSettleMode;
    /// Current link credit. May be negative after the peer revokes credit.
    fn credit(&self, link: LinkHandle) -> i32;
    /// Grant `credit` additional credit to the peer.
    fn flow(&mut self, link: LinkHandle, credit: u32);
    /// Report that nothing more is queued while draining.
    fn drained(&mut self, link: LinkHandle);
    /// Send our attach.
    fn open_link(&mut self, link: LinkHandle);
    /// Send a closing detach.
    fn close_link(&mut self, link: LinkHandle);
    /// Send a non-closing detach.
    fn detach_link(&mut self, link: LinkHandle);
    /// Release the engine's link object.
    fn free_link(&mut self, link: LinkHandle);
    /// Read bytes of the current incoming delivery.
    fn recv(&mut self, link: LinkHandle) -> RecvChunk;
    /// Move past the current delivery.
    fn advance(&mut self, link: LinkHandle);
    /// Start a new outgoing delivery with `tag`.
    fn create_delivery(&mut self, link: LinkHandle, tag: Bytes) -> DeliveryHandle;
    /// Write bytes of the current outgoing delivery; returns how many were
    /// accepted. Zero means the engine buffer is full.
    fn send(&mut self, link: LinkHandle, bytes: &[u8]) -> usize;

    /// Link carrying `delivery`.
    fn delivery_link(&self, delivery: DeliveryHandle) -> Option<LinkHandle>;
    /// Whether `delivery` is the current incoming delivery of its link.
    fn is_readable(&self, delivery: DeliveryHandle) -> bool;
    /// Whether the peer settled `delivery`.
    fn remotely_settled(&self, delivery: DeliveryHandle) -> bool;
    /// State the peer set on `delivery`.
    fn remote_state(&self, delivery: DeliveryHandle) -> Option<DeliveryState>;
    /// Message format code of `delivery`.
    fn message_format(&self, delivery: DeliveryHandle) -> u32;
    /// Tag of `delivery`.
    fn delivery_tag(&self, delivery: DeliveryHandle) -> Bytes;
    /// Set our state on `delivery`.
    fn disposition(&mut self, delivery: DeliveryHandle, state: DeliveryState);
    /// Settle `delivery` locally.
    fn settle(&mut self, delivery: DeliveryHandle);

    /// Decode the body of a coordinator message.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Control`] when the body is not a control
    /// message.
    fn decode_control(&self, body: &[u8]) -> Result<ControlAction, EngineError>;
}
