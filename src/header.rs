//! The fixed eight-byte protocol header exchanged before any frame.
//!
//! Layout: the ASCII magic `AMQP`, a protocol id (`0` for plain framing,
//! `3` for SASL), then major, minor and revision version octets. Only
//! version 1.0.0 is spoken.

use bytes::Bytes;
use thiserror::Error;

/// Length of an encoded header.
pub const HEADER_LEN: usize = 8;

const MAGIC: [u8; 4] = *b"AMQP";

/// Protocol id selecting plain framing.
pub const PROTOCOL_PLAIN: u8 = 0;
/// Protocol id selecting a SASL security layer.
pub const PROTOCOL_SASL: u8 = 3;

/// Errors raised while reading a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// Fewer or more than [`HEADER_LEN`] bytes were supplied.
    #[error("protocol header must be {HEADER_LEN} bytes, got {0}")]
    Length(usize),
}

/// A decoded protocol header. The magic is kept verbatim so invalid headers
/// can still be reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolHeader {
    magic: [u8; 4],
    protocol_id: u8,
    major: u8,
    minor: u8,
    revision: u8,
}

impl ProtocolHeader {
    /// Header for plain (non-SASL) framing, version 1.0.0.
    #[must_use]
    pub const fn plain() -> Self { Self::with_protocol(PROTOCOL_PLAIN) }

    /// Header announcing a SASL layer, version 1.0.0.
    #[must_use]
    pub const fn sasl() -> Self { Self::with_protocol(PROTOCOL_SASL) }

    const fn with_protocol(protocol_id: u8) -> Self {
        Self {
            magic: MAGIC,
            protocol_id,
            major: 1,
            minor: 0,
            revision: 0,
        }
    }

    /// The header offered back to peers that open with something unsupported.
    #[must_use]
    pub const fn minimally_supported() -> Self { Self::sasl() }

    /// Decode a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::Length`] when `bytes` is not eight bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HeaderError> {
        let raw: [u8; HEADER_LEN] = bytes
            .try_into()
            .map_err(|_| HeaderError::Length(bytes.len()))?;
        Ok(Self::from_bytes(raw))
    }

    /// Decode a header from its fixed-size encoding.
    #[must_use]
    pub const fn from_bytes(raw: [u8; HEADER_LEN]) -> Self {
        Self {
            magic: [raw[0], raw[1], raw[2], raw[3]],
            protocol_id: raw[4],
            major: raw[5],
            minor: raw[6],
            revision: raw[7],
        }
    }

    /// Encode the header.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut raw = Vec::with_capacity(HEADER_LEN);
        raw.extend_from_slice(&self.magic);
        raw.extend_from_slice(&[self.protocol_id, self.major, self.minor, self.revision]);
        Bytes::from(raw)
    }

    /// Protocol id octet.
    #[must_use]
    pub const fn protocol_id(&self) -> u8 { self.protocol_id }

    /// Whether the peer asked for a SASL layer.
    #[must_use]
    pub const fn is_sasl(&self) -> bool { self.protocol_id == PROTOCOL_SASL }

    /// Whether this bridge can speak the announced protocol.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
            && matches!(self.protocol_id, PROTOCOL_PLAIN | PROTOCOL_SASL)
            && (self.major, self.minor, self.revision) == (1, 0, 0)
    }
}

impl std::fmt::Display for ProtocolHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}.{}.{}",
            String::from_utf8_lossy(&self.magic),
            self.protocol_id,
            self.major,
            self.minor,
            self.revision
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(*b"AMQP\x00\x01\x00\x00", true, false)]
    #[case(*b"AMQP\x03\x01\x00\x00", true, true)]
    #[case(*b"AMQP\x02\x01\x00\x00", false, false)]
    #[case(*b"AMQP\x00\x00\x09\x01", false, false)]
    #[case(*b"HTTP\x00\x01\x00\x00", false, false)]
    fn validates_headers(#[case] raw: [u8; 8], #[case] valid: bool, #[case] sasl: bool) {
        let header = ProtocolHeader::from_bytes(raw);
        assert_eq!(header.is_valid(), valid);
        assert_eq!(header.is_sasl(), sasl);
        assert_eq!(header.to_bytes().as_ref(), raw.as_slice());
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(
            ProtocolHeader::from_slice(b"AMQP"),
            Err(HeaderError::Length(4))
        );
    }

    #[test]
    fn displays_version() {
        assert_eq!(ProtocolHeader::sasl().to_string(), "AMQP:3:1.0.0");
    }
}
