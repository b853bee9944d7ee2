//! Command identifiers and response correlation.
//!
//! Every command sent to the broker carries a per-connection
//! [`CommandId`]. Commands that expect an answer register a pending
//! continuation under that id; the broker's response removes it again. Removal
//! and lookup are one atomic step, so a continuation can never fire twice even
//! when responses race with the connection pump.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use derive_more::{Display, From, Into};

/// Identifier stamped on a command sent to the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0}")]
pub struct CommandId(u32);

impl CommandId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the numeric value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

/// Monotonic per-connection command id source. The first id is `1`; ids wrap
/// after `u32::MAX`.
#[derive(Debug, Default)]
pub struct CommandIdGenerator(AtomicU32);

impl CommandIdGenerator {
    /// Create a generator starting at `1`.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Allocate the next id.
    pub fn next_id(&self) -> CommandId {
        CommandId(self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }
}

/// Table of continuations awaiting a broker response.
#[derive(Debug)]
pub struct ResponseCorrelator<P>(DashMap<CommandId, P>);

impl<P> Default for ResponseCorrelator<P> {
    fn default() -> Self { Self(DashMap::new()) }
}

impl<P> ResponseCorrelator<P> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `pending` under `id`.
    ///
    /// Ids come from a [`CommandIdGenerator`] and are never reused, so a
    /// displaced entry indicates a caller bug; it is returned rather than
    /// silently dropped.
    pub fn register(&self, id: CommandId, pending: P) -> Option<P> { self.0.insert(id, pending) }

    /// Remove and return the continuation for `id`.
    ///
    /// Returns `None` for unknown ids and for ids already completed.
    pub fn complete(&self, id: CommandId) -> Option<P> { self.0.remove(&id).map(|(_, p)| p) }

    /// Whether `id` is still awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: CommandId) -> bool { self.0.contains_key(&id) }

    /// Number of outstanding continuations.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether no continuation is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use rstest::{fixture, rstest};

    use super::*;

    #[expect(
        unused_braces,
        reason = "rustc false positive for single-line rstest fixtures"
    )]
    #[fixture]
    fn correlator() -> ResponseCorrelator<&'static str> { ResponseCorrelator::new() }

    #[test]
    fn ids_start_at_one_and_increase() {
        let ids = CommandIdGenerator::new();
        assert_eq!(ids.next_id(), CommandId::new(1));
        assert_eq!(ids.next_id(), CommandId::new(2));
    }

    #[test]
    fn ids_wrap_after_the_last_value() {
        let ids = CommandIdGenerator(AtomicU32::new(u32::MAX - 1));
        assert_eq!(ids.next_id(), CommandId::new(u32::MAX));
        assert_eq!(ids.next_id(), CommandId::new(0));
        assert_eq!(ids.next_id(), CommandId::new(1));
    }

    #[rstest]
    fn completes_exactly_once(correlator: ResponseCorrelator<&'static str>) {
        let id = CommandId::new(7);
        assert!(correlator.register(id, "open").is_none());
        assert!(correlator.is_pending(id));
        assert_eq!(correlator.complete(id), Some("open"));
        assert_eq!(correlator.complete(id), None);
        assert!(correlator.is_empty());
    }

    #[rstest]
    fn unknown_ids_are_ignored(correlator: ResponseCorrelator<&'static str>) {
        assert_eq!(correlator.complete(CommandId::new(99)), None);
    }

    #[test]
    fn concurrent_completion_fires_once() {
        let correlator = Arc::new(ResponseCorrelator::<usize>::new());
        let ids = CommandIdGenerator::new();
        let registered: Vec<CommandId> = (0..64)
            .map(|n| {
                let id = ids.next_id();
                correlator.register(id, n);
                id
            })
            .collect();
        let fired = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let correlator = Arc::clone(&correlator);
                let fired = Arc::clone(&fired);
                let registered = registered.clone();
                thread::spawn(move || {
                    for id in registered {
                        if correlator.complete(id).is_some() {
                            fired.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }

        assert_eq!(fired.load(Ordering::SeqCst), registered.len());
        assert!(correlator.is_empty());
    }
}
