#![doc(html_root_url = "https://docs.rs/amqp-bridge/latest")]
//! Public API for the `amqp-bridge` library.
//!
//! This crate translates between an AMQP 1.0 protocol engine and a
//! JMS-style message broker: one [`Converter`] per client connection maps
//! connections, sessions and links onto broker connections, producers and
//! consumers, moves messages in both directions with flow control and
//! handles local transactions through a coordinator link.

pub mod actor;
pub mod auth;
pub mod broker;
pub mod config;
pub mod converter;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod header;
pub mod metrics;
pub mod reassembly;
pub mod tag_pool;
pub mod transform;
pub mod transport;
pub mod value;

pub use actor::{BridgeActor, BrokerHandle, broker_channel, spawn_bridge};
pub use config::{AsyncErrorPolicy, BridgeConfig, TransformerKind};
pub use converter::{ConnectionState, ConsumerSnapshot, Converter};
pub use error::{BridgeError, ConditionKind, ErrorCondition, ProtocolViolation, Result};
pub use metrics::{CONNECTIONS_ACTIVE, DELIVERIES_TOTAL, Direction, ERRORS_TOTAL};
pub use transport::{Transport, TransportInput};
