//! Test harness for `amqp-bridge`.
//!
//! Provides a scripted in-memory protocol engine, a broker that records
//! commands and answers on demand, an in-memory transport and a serialised
//! log capture handle.
//!
//! ```rust
//! use amqp_bridge::BridgeConfig;
//! use bridge_testing::{converter, open_connection};
//!
//! let mut bridge = converter(BridgeConfig::default());
//! open_connection(&mut bridge, Some("client"));
//! assert!(bridge.engine().connection().opened);
//! ```

pub mod broker;
pub mod engine;
pub mod harness;
pub mod logging;
pub mod transport;

pub use broker::RecordingBroker;
pub use engine::{
    ConnectionRecord,
    DeliveryRecord,
    LinkRecord,
    ScriptedEngine,
    SessionRecord,
    encode_control,
};
pub use harness::{
    TestConverter,
    answer_all,
    answer_matching,
    connected,
    converter,
    converter_with,
    open_connection,
    open_session,
    pump,
    respond,
};
pub use logging::{LoggerHandle, logger};
pub use transport::VecTransport;
