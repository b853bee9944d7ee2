//! A [`Transport`] writing into memory.

use amqp_bridge::{auth::PeerCertificate, transport::Transport};

/// In-memory transport.
#[derive(Clone, Debug, Default)]
pub struct VecTransport {
    /// Bytes written by the converter.
    pub written: Vec<u8>,
    /// Bytes accepted per write; `None` accepts everything.
    pub write_limit: Option<usize>,
    /// Certificates reported to the converter.
    pub certificates: Vec<PeerCertificate>,
    /// Whether the connect inactivity check was disabled.
    pub connect_checker_stopped: bool,
    /// Number of `stop` calls.
    pub stops: usize,
}

impl VecTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Report `certificates` as the peer's TLS chain.
    #[must_use]
    pub fn with_certificates(mut self, certificates: Vec<PeerCertificate>) -> Self {
        self.certificates = certificates;
        self
    }

    /// Whether the converter stopped the transport.
    #[must_use]
    pub fn is_stopped(&self) -> bool { self.stops > 0 }
}

impl Transport for VecTransport {
    fn write(&mut self, bytes: &[u8]) -> usize {
        let count = self.write_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        self.written.extend_from_slice(&bytes[..count]);
        count
    }

    fn peer_certificates(&self) -> Vec<PeerCertificate> { self.certificates.clone() }

    fn stop_connect_checker(&mut self) { self.connect_checker_stopped = true; }

    fn stop(&mut self) { self.stops += 1; }
}
