//! Message transformation between wire encoding and broker messages.
//!
//! Transformers are pluggable. The bridge ships the two that need no
//! knowledge of message sections: `native` keeps the encoded message intact
//! as the broker message body, `raw` does the same but flags the body as
//! opaque. A section-mapping (`jms`) transformer is supplied by the embedding
//! broker through [`Transformers::with_inbound`].

use std::{fmt, sync::Arc};

use bytes::Bytes;
use log::warn;
use thiserror::Error;

use crate::{
    broker::{BrokerMessage, MESSAGE_FORMAT_PROPERTY},
    config::TransformerKind,
    value::PropertyValue,
};

/// Property flagging whether the body is an intact wire message.
pub const NATIVE_PROPERTY: &str = "JMS_AMQP_NATIVE";

/// A message in wire encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedMessage {
    /// Message format code from the transfer frame.
    pub format: u32,
    /// Encoded bytes.
    pub data: Bytes,
}

impl EncodedMessage {
    /// Wrap encoded bytes.
    #[must_use]
    pub fn new(format: u32, data: impl Into<Bytes>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    /// Whether there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
}

/// Failure to convert a message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The wire message could not be interpreted.
    #[error("cannot decode message: {0}")]
    Decode(String),
    /// The broker message could not be encoded.
    #[error("cannot encode message: {0}")]
    Encode(String),
}

/// Converts wire messages into broker messages.
pub trait InboundTransformer: Send + Sync {
    /// Convert `message`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Decode`] when the message is unusable.
    fn transform(&self, message: EncodedMessage) -> Result<BrokerMessage, TransformError>;
}

/// Converts broker messages into wire messages.
pub trait OutboundTransformer: Send + Sync {
    /// Convert `message`. An empty result means nothing should be sent.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Encode`] when the message cannot be encoded.
    fn transform(&self, message: &BrokerMessage) -> Result<EncodedMessage, TransformError>;
}

fn wrap(message: EncodedMessage, native: bool) -> BrokerMessage {
    let mut out = BrokerMessage::with_body(message.data);
    out.properties.insert(
        MESSAGE_FORMAT_PROPERTY.to_owned(),
        PropertyValue::Int(i64::from(message.format)),
    );
    out.properties
        .insert(NATIVE_PROPERTY.to_owned(), PropertyValue::Bool(native));
    out
}

/// Keeps the encoded message as the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeInboundTransformer;

impl InboundTransformer for NativeInboundTransformer {
    fn transform(&self, message: EncodedMessage) -> Result<BrokerMessage, TransformError> {
        Ok(wrap(message, true))
    }
}

/// Keeps the encoded message as an opaque body.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawInboundTransformer;

impl InboundTransformer for RawInboundTransformer {
    fn transform(&self, message: EncodedMessage) -> Result<BrokerMessage, TransformError> {
        Ok(wrap(message, false))
    }
}

/// Sends the body as-is with the recorded message format.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeOutboundTransformer;

impl OutboundTransformer for NativeOutboundTransformer {
    fn transform(&self, message: &BrokerMessage) -> Result<EncodedMessage, TransformError> {
        let format = match message
            .properties
            .get(MESSAGE_FORMAT_PROPERTY)
            .and_then(PropertyValue::as_int)
        {
            Some(value) => u32::try_from(value).map_err(|_| {
                TransformError::Encode(format!("message format out of range: {value}"))
            })?,
            None => 0,
        };
        Ok(EncodedMessage::new(format, message.body.clone()))
    }
}

/// The transformer pair used by one connection.
#[derive(Clone)]
pub struct Transformers {
    inbound: Arc<dyn InboundTransformer>,
    outbound: Arc<dyn OutboundTransformer>,
}

impl Transformers {
    /// Built-in transformers for `kind`.
    ///
    /// `jms` has no built-in implementation; it falls back to `native` with a
    /// warning unless the caller installs one with [`Self::with_inbound`].
    #[must_use]
    pub fn for_kind(kind: TransformerKind) -> Self {
        let inbound: Arc<dyn InboundTransformer> = match kind {
            TransformerKind::Native => Arc::new(NativeInboundTransformer),
            TransformerKind::Raw => Arc::new(RawInboundTransformer),
            TransformerKind::Jms => {
                warn!("no jms transformer installed, using native instead");
                Arc::new(NativeInboundTransformer)
            }
        };
        Self {
            inbound,
            outbound: Arc::new(NativeOutboundTransformer),
        }
    }

    /// Replace the inbound transformer.
    #[must_use]
    pub fn with_inbound(mut self, inbound: Arc<dyn InboundTransformer>) -> Self {
        self.inbound = inbound;
        self
    }

    /// Replace the outbound transformer.
    #[must_use]
    pub fn with_outbound(mut self, outbound: Arc<dyn OutboundTransformer>) -> Self {
        self.outbound = outbound;
        self
    }

    /// Inbound transformer.
    #[must_use]
    pub fn inbound(&self) -> &dyn InboundTransformer { self.inbound.as_ref() }

    /// Outbound transformer.
    #[must_use]
    pub fn outbound(&self) -> &dyn OutboundTransformer { self.outbound.as_ref() }
}

impl Default for Transformers {
    fn default() -> Self { Self::for_kind(TransformerKind::Native) }
}

impl fmt::Debug for Transformers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformers").finish_non_exhaustive()
    }
}
