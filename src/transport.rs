//! Boundary to the network transport carrying one connection.

use bytes::Bytes;

use crate::{auth::PeerCertificate, header::ProtocolHeader};

/// A chunk read from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportInput {
    /// The protocol header that opens the stream (and reopens it after
    /// SASL).
    Header(ProtocolHeader),
    /// Framed bytes.
    Frame(Bytes),
}

/// Byte sink and control surface of the underlying connection.
pub trait Transport {
    /// Write as much of `bytes` as the transport accepts without blocking and
    /// return the count. Unwritten bytes stay buffered in the engine.
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Client certificate chain from the TLS handshake, empty without TLS.
    fn peer_certificates(&self) -> Vec<PeerCertificate>;

    /// Disable the inactivity check that guards a connection which has not
    /// finished opening. Called once the broker accepts the connection.
    fn stop_connect_checker(&mut self);

    /// Stop the transport. Called at most once per connection.
    fn stop(&mut self);
}
