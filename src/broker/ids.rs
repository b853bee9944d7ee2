//! Broker-side identifiers.
//!
//! Connection ids are process-unique; every other id is scoped to its parent
//! and minted from a counter the parent owns, so no cross-connection
//! coordination is needed.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Identity of a broker connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Wrap an existing id.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self { Self(Arc::from(value.as_ref())) }

    /// Mint a process-unique id.
    #[must_use]
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("ID:{}-{seq}", std::process::id()))
    }

    /// Borrow the id text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

macro_rules! child_id {
    ($(#[$meta:meta])* $name:ident, $parent:ty, $field:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            $field: $parent,
            value: u64,
        }

        impl $name {
            /// Create an id under `parent`.
            #[must_use]
            pub fn new($field: $parent, value: u64) -> Self { Self { $field, value } }

            /// Parent id.
            #[must_use]
            pub fn $field(&self) -> &$parent { &self.$field }

            /// Sequence number within the parent.
            #[must_use]
            pub fn value(&self) -> u64 { self.value }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", self.$field, self.value)
            }
        }
    };
}

child_id!(
    /// Identity of a session within a connection.
    SessionId,
    ConnectionId,
    connection
);
child_id!(
    /// Identity of a producer within a session.
    ProducerId,
    SessionId,
    session
);
child_id!(
    /// Identity of a consumer within a session.
    ConsumerId,
    SessionId,
    session
);
child_id!(
    /// A transaction local to one connection.
    LocalTransactionId,
    ConnectionId,
    connection
);

/// Identity of a message.
///
/// The bridge always mints its own ids from the producer id and a local
/// sequence; the id the client supplied survives only as a display string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId {
    /// Producer that sent the message.
    pub producer: ProducerId,
    /// Sequence within the producer, starting at 1.
    pub producer_sequence: u64,
    /// Sequence assigned by the broker when the message was stored.
    pub broker_sequence: u64,
    /// Client-supplied id, kept for display.
    pub text_view: Option<String>,
}

impl MessageId {
    /// Create an id for the `producer_sequence`th message of `producer`.
    #[must_use]
    pub fn new(producer: ProducerId, producer_sequence: u64) -> Self {
        Self {
            producer,
            producer_sequence,
            broker_sequence: 0,
            text_view: None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text_view {
            Some(text) => f.write_str(text),
            None => write!(f, "{}:{}", self.producer, self.producer_sequence),
        }
    }
}
