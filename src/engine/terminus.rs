//! Link termini: the source and target descriptors a peer supplies on
//! attach, plus the well-known symbols and filter identifiers the bridge
//! inspects.

use std::borrow::Cow;

use derive_more::Display;

/// A protocol symbol (an ASCII identifier).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct Symbol(Cow<'static, str>);

impl Symbol {
    /// Wrap a static symbol.
    #[must_use]
    pub const fn from_static(value: &'static str) -> Self { Self(Cow::Borrowed(value)) }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&'static str> for Symbol {
    fn from(value: &'static str) -> Self { Self::from_static(value) }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self { Self(Cow::Owned(value)) }
}

/// Connection capability announcing support for anonymous producers.
pub const ANONYMOUS_RELAY: Symbol = Symbol::from_static("ANONYMOUS-RELAY");
/// Connection property advertising the queue address prefix.
pub const QUEUE_PREFIX: Symbol = Symbol::from_static("queue-prefix");
/// Connection property advertising the topic address prefix.
pub const TOPIC_PREFIX: Symbol = Symbol::from_static("topic-prefix");
/// Connection property flagging a refused open.
pub const CONNECTION_OPEN_FAILED: Symbol =
    Symbol::from_static("amqp:connection-establishment-failed");
/// Terminus capability requesting a temporary queue.
pub const TEMP_QUEUE_CAPABILITY: Symbol = Symbol::from_static("temporary-queue");
/// Terminus capability requesting a temporary topic.
pub const TEMP_TOPIC_CAPABILITY: Symbol = Symbol::from_static("temporary-topic");
/// Distribution mode under which a queue consumer only browses.
pub const COPY: Symbol = Symbol::from_static("copy");

/// Key or descriptor identifying a filter in a source filter map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterId {
    /// Symbolic identifier.
    Symbol(Symbol),
    /// Numeric descriptor code.
    Code(u64),
}

/// Descriptors under which peers send a selector filter.
pub const JMS_SELECTOR_FILTER_IDS: [FilterId; 2] = [
    FilterId::Symbol(Symbol::from_static("apache.org:selector-filter:string")),
    FilterId::Code(0x0000_468C_0000_0004),
];

/// Descriptors under which peers send a no-local filter.
pub const NO_LOCAL_FILTER_IDS: [FilterId; 2] = [
    FilterId::Symbol(Symbol::from_static("apache.org:no-local-filter:list")),
    FilterId::Code(0x0000_468C_0000_0003),
];

/// One entry of a source filter map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterEntry {
    /// Map key chosen by the peer.
    pub key: Symbol,
    /// Descriptor of the described value.
    pub descriptor: FilterId,
    /// Rendered described value (the selector text for selector filters).
    pub value: String,
}

/// Find the first filter whose descriptor matches one of `ids`.
#[must_use]
pub fn find_filter<'a>(filters: &'a [FilterEntry], ids: &[FilterId]) -> Option<&'a FilterEntry> {
    filters.iter().find(|entry| ids.contains(&entry.descriptor))
}

/// How long a terminus and its state survive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TerminusDurability {
    /// Nothing is retained.
    #[default]
    None,
    /// Only the terminus configuration is retained.
    Configuration,
    /// Configuration and unsettled delivery state are retained.
    UnsettledState,
}

impl TerminusDurability {
    /// Whether this durability requests a durable subscription.
    #[must_use]
    pub const fn is_durable(self) -> bool { !matches!(self, Self::None) }
}

/// When a terminus expires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Expire when the link detaches.
    LinkDetach,
    /// Expire when the session ends.
    #[default]
    SessionEnd,
    /// Expire when the connection closes.
    ConnectionClose,
    /// Never expire.
    Never,
}

/// Source terminus of a link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Source {
    /// Node address.
    pub address: Option<String>,
    /// Whether the node should be created on demand.
    pub dynamic: bool,
    /// Capabilities requested by the peer.
    pub capabilities: Vec<Symbol>,
    /// Message filters.
    pub filter: Vec<FilterEntry>,
    /// Durability.
    pub durable: TerminusDurability,
    /// Expiry policy.
    pub expiry_policy: ExpiryPolicy,
    /// Distribution mode (`move` or `copy`).
    pub distribution_mode: Option<Symbol>,
}

impl Source {
    /// Whether the peer asked for `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &Symbol) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Target terminus of a message-carrying link.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Target {
    /// Node address.
    pub address: Option<String>,
    /// Whether the node should be created on demand.
    pub dynamic: bool,
    /// Capabilities requested by the peer.
    pub capabilities: Vec<Symbol>,
}

impl Target {
    /// Whether the peer asked for `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &Symbol) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Target supplied by a peer attaching as a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteTarget {
    /// An ordinary message target.
    Target(Target),
    /// A transaction coordinator.
    Coordinator,
}
