//! Per-connection bridge configuration.
//!
//! The embedding broker owns loading (files, URIs, environment); this module
//! only defines the values, their defaults and the parsing of symbolic
//! options.

use std::str::FromStr;

use log::warn;
use serde::Deserialize;
use static_assertions::const_assert;

/// Credit granted to producers when none is configured.
pub const DEFAULT_PRODUCER_CREDIT: u32 = 10_000;

/// Highest channel number offered to peers.
///
/// Some clients store the negotiated channel max in a signed 16-bit field,
/// so the default stays below `i16::MAX`.
pub const DEFAULT_CHANNEL_MAX: u16 = 32_767;

const_assert!(DEFAULT_CHANNEL_MAX <= i16::MAX.unsigned_abs());

/// Message transformer family used for inbound conversion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformerKind {
    /// Keep the encoded message intact inside the broker message.
    #[default]
    Native,
    /// Map message sections onto broker message headers and properties.
    Jms,
    /// Store the raw body bytes only.
    Raw,
}

impl TransformerKind {
    /// Parse a configured transformer name, falling back to
    /// [`TransformerKind::Native`] with a warning on unknown values.
    #[must_use]
    pub fn parse_or_native(name: &str) -> Self {
        name.parse().unwrap_or_else(|()| {
            warn!("unknown transformer type, using native instead: transformer={name}");
            Self::Native
        })
    }

    /// Canonical configuration name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Jms => "jms",
            Self::Raw => "raw",
        }
    }
}

impl FromStr for TransformerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "jms" => Ok(Self::Jms),
            "raw" => Ok(Self::Raw),
            _ => Err(()),
        }
    }
}

/// How broker errors that match no outstanding command are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsyncErrorPolicy {
    /// Always tear the connection down.
    #[default]
    Teardown,
    /// Tear down only while the connection is still being established.
    TeardownDuringBringUp,
    /// Log the error and keep the connection.
    LogOnly,
}

/// Configuration applied to every connection handled by the bridge.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Link credit granted to producers, and the refill target.
    pub producer_credit: u32,
    /// Configured transformer name; see [`BridgeConfig::transformer_kind`].
    pub transformer: String,
    /// Optional cap on the negotiated frame size.
    pub max_frame_size: Option<u32>,
    /// Highest channel number offered to peers.
    pub channel_max: u16,
    /// Log every inbound and outbound chunk at trace level.
    pub trace_frames: bool,
    /// Handling of uncorrelated broker errors.
    pub async_error_policy: AsyncErrorPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            producer_credit: DEFAULT_PRODUCER_CREDIT,
            transformer: TransformerKind::Native.as_str().to_owned(),
            max_frame_size: None,
            channel_max: DEFAULT_CHANNEL_MAX,
            trace_frames: false,
            async_error_policy: AsyncErrorPolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// Set the producer credit.
    #[must_use]
    pub fn with_producer_credit(mut self, credit: u32) -> Self {
        self.producer_credit = credit;
        self
    }

    /// Set the transformer name.
    #[must_use]
    pub fn with_transformer(mut self, name: impl Into<String>) -> Self {
        self.transformer = name.into();
        self
    }

    /// Cap the negotiated frame size.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Enable or disable frame tracing.
    #[must_use]
    pub fn with_trace_frames(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    /// Choose the uncorrelated broker error policy.
    #[must_use]
    pub fn with_async_error_policy(mut self, policy: AsyncErrorPolicy) -> Self {
        self.async_error_policy = policy;
        self
    }

    /// Resolve the configured transformer name.
    #[must_use]
    pub fn transformer_kind(&self) -> TransformerKind {
        TransformerKind::parse_or_native(&self.transformer)
    }
}
