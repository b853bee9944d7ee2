//! Broker destinations and the address parser used on attach.

use std::fmt;

use thiserror::Error;

const QUEUE_SCHEME: &str = "queue://";
const TOPIC_SCHEME: &str = "topic://";
const TEMP_QUEUE_SCHEME: &str = "temp-queue://";
const TEMP_TOPIC_SCHEME: &str = "temp-topic://";

/// Kind of a broker destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    /// Point-to-point queue.
    Queue,
    /// Publish/subscribe topic.
    Topic,
    /// Queue that lives as long as its creating connection.
    TempQueue,
    /// Topic that lives as long as its creating connection.
    TempTopic,
}

impl DestinationKind {
    /// Address prefix naming this kind.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Queue => QUEUE_SCHEME,
            Self::Topic => TOPIC_SCHEME,
            Self::TempQueue => TEMP_QUEUE_SCHEME,
            Self::TempTopic => TEMP_TOPIC_SCHEME,
        }
    }
}

/// Failure to interpret a terminus address.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DestinationError {
    /// The address was empty once any scheme was removed.
    #[error("destination address not set")]
    Empty,
}

/// A named broker destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    kind: DestinationKind,
    name: String,
}

impl Destination {
    /// Create a destination of `kind` named `name`.
    #[must_use]
    pub fn new(kind: DestinationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for a queue.
    #[must_use]
    pub fn queue(name: impl Into<String>) -> Self { Self::new(DestinationKind::Queue, name) }

    /// Shorthand for a topic.
    #[must_use]
    pub fn topic(name: impl Into<String>) -> Self { Self::new(DestinationKind::Topic, name) }

    /// Parse an address, honouring `queue://`, `topic://`, `temp-queue://`
    /// and `temp-topic://` prefixes. Unprefixed names get `default_kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DestinationError::Empty`] when no name remains.
    pub fn parse(address: &str, default_kind: DestinationKind) -> Result<Self, DestinationError> {
        let (kind, name) = [
            DestinationKind::Queue,
            DestinationKind::Topic,
            DestinationKind::TempQueue,
            DestinationKind::TempTopic,
        ]
        .into_iter()
        .find_map(|kind| address.strip_prefix(kind.scheme()).map(|rest| (kind, rest)))
        .unwrap_or((default_kind, address));
        if name.is_empty() {
            return Err(DestinationError::Empty);
        }
        Ok(Self::new(kind, name))
    }

    /// Destination kind.
    #[must_use]
    pub fn kind(&self) -> DestinationKind { self.kind }

    /// Physical name without scheme.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Name prefixed with its scheme, as advertised to peers.
    #[must_use]
    pub fn qualified_name(&self) -> String { format!("{}{}", self.kind.scheme(), self.name) }

    /// Whether this is a queue (temporary or not).
    #[must_use]
    pub fn is_queue(&self) -> bool {
        matches!(self.kind, DestinationKind::Queue | DestinationKind::TempQueue)
    }

    /// Whether this is a topic (temporary or not).
    #[must_use]
    pub fn is_topic(&self) -> bool {
        matches!(self.kind, DestinationKind::Topic | DestinationKind::TempTopic)
    }

    /// Whether this destination is temporary.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self.kind, DestinationKind::TempQueue | DestinationKind::TempTopic)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.qualified_name()) }
}
