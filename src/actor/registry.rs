//! Process-wide registry of running bridge tasks, keyed by broker connection.

use std::sync::LazyLock;

use dashmap::DashSet;
use log::debug;

use crate::broker::ConnectionId;

static ACTIVE_BRIDGES: LazyLock<DashSet<ConnectionId>> = LazyLock::new(DashSet::new);

/// Held by a [`super::BridgeActor`]; the connection counts as active until
/// the guard is dropped.
pub(super) struct ActiveBridge {
    connection_id: ConnectionId,
}

impl ActiveBridge {
    pub(super) fn new(connection_id: ConnectionId) -> Self {
        if ACTIVE_BRIDGES.insert(connection_id.clone()) {
            crate::metrics::inc_connections();
        }
        debug!("bridge registered: connection={connection_id}");
        Self { connection_id }
    }
}

impl Drop for ActiveBridge {
    fn drop(&mut self) {
        if ACTIVE_BRIDGES.remove(&self.connection_id).is_some() {
            crate::metrics::dec_connections();
        }
        debug!("bridge deregistered: connection={}", self.connection_id);
    }
}

/// Number of bridge actors currently alive in this process.
#[must_use]
pub fn active_bridge_count() -> usize { ACTIVE_BRIDGES.len() }

/// Whether a bridge actor for `connection_id` is alive.
#[must_use]
pub fn is_bridge_active(connection_id: &ConnectionId) -> bool {
    ACTIVE_BRIDGES.contains(connection_id)
}
