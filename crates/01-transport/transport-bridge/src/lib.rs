//! Thread-safe facade over a single-threaded point-to-point transport.
//!
//! Any number of worker threads post sends and receives through a shared
//! [`TransportBridge`]; exactly one thread runs the poll loop that drives the
//! underlying transport and signals each request's [`Handle`] when it
//! completes.

mod bridge;
mod config;
mod error;
mod handle;
mod metrics;
mod thread;

pub use bridge::{BridgeState, ConversationKey, TransportBridge};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use handle::{Completed, Handle};
pub use metrics::BridgeMetricsSnapshot;
pub use thread::BridgeThread;
