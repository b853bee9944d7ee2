//! Delivery states, transaction identifiers and coordinator control actions.

use bytes::Bytes;

use crate::error::ErrorCondition;

/// Disposition state of a delivery, as set by either peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    /// The message was processed.
    Accepted,
    /// The message is invalid and will not be processed.
    Rejected(Option<ErrorCondition>),
    /// The message was not processed and may be redelivered.
    Released,
    /// The message was modified and may be redelivered.
    Modified {
        /// Count this attempt as a failed delivery.
        delivery_failed: bool,
        /// Do not redeliver to this link.
        undeliverable_here: Option<bool>,
    },
    /// A transaction was declared.
    Declared(Bytes),
    /// A state scoped to a transaction.
    Transactional {
        /// Transaction the outcome belongs to.
        txn_id: Bytes,
        /// Provisional outcome, if any.
        outcome: Option<Box<DeliveryState>>,
    },
}

impl DeliveryState {
    /// Wrap `outcome` in a transactional state for `txn_id`.
    #[must_use]
    pub fn transactional(txn_id: Bytes, outcome: Self) -> Self {
        Self::Transactional {
            txn_id,
            outcome: Some(Box::new(outcome)),
        }
    }

    /// Transaction id carried by a transactional state.
    #[must_use]
    pub fn txn_id(&self) -> Option<&Bytes> {
        match self {
            Self::Transactional { txn_id, .. } => Some(txn_id),
            _ => None,
        }
    }
}

/// Encode a numeric transaction id as eight big-endian bytes.
#[must_use]
pub fn encode_txn_id(id: u64) -> Bytes { Bytes::copy_from_slice(&id.to_be_bytes()) }

/// Decode a big-endian transaction id of one to eight bytes.
#[must_use]
pub fn decode_txn_id(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Body of a message received on a coordinator link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlAction {
    /// Start a transaction.
    Declare {
        /// Global transaction id; distributed transactions are unsupported.
        global_id: Option<Bytes>,
    },
    /// End a transaction.
    Discharge {
        /// Transaction being discharged.
        txn_id: Bytes,
        /// Roll back instead of committing.
        fail: bool,
    },
    /// Anything else, described for diagnostics.
    Other(String),
}
