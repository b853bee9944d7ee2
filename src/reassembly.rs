//! Reassembly of multi-transfer deliveries on receiving links.
//!
//! A large message may arrive over several transfer frames. The assembler
//! accumulates whatever the engine has buffered for the link's current
//! delivery and yields the whole message once the engine signals its end.

use bytes::{Bytes, BytesMut};

use crate::engine::{LinkHandle, ProtocolEngine, RecvChunk};

/// Per-link buffer for the delivery currently being received.
#[derive(Debug, Default)]
pub struct TransferAssembler {
    buffer: BytesMut,
    completed: u64,
}

impl TransferAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a fragment of the current delivery.
    pub fn push(&mut self, fragment: &[u8]) { self.buffer.extend_from_slice(fragment); }

    /// Take the reassembled delivery and reset for the next one.
    pub fn finish(&mut self) -> Bytes {
        self.completed += 1;
        self.buffer.split().freeze()
    }

    /// Read everything the engine has buffered for `link`.
    ///
    /// Returns the complete delivery once the engine reports its end, or
    /// `None` while more transfers are expected.
    pub fn read_from<E>(&mut self, engine: &mut E, link: LinkHandle) -> Option<Bytes>
    where
        E: ProtocolEngine + ?Sized,
    {
        loop {
            match engine.recv(link) {
                RecvChunk::Data(bytes) => self.push(&bytes),
                RecvChunk::Pending => return None,
                RecvChunk::End => return Some(self.finish()),
            }
        }
    }

    /// Bytes buffered for the delivery in progress.
    #[must_use]
    pub fn buffered(&self) -> usize { self.buffer.len() }

    /// Number of deliveries completed so far.
    #[must_use]
    pub fn completed(&self) -> u64 { self.completed }
}
