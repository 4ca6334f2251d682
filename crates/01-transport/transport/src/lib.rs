//! Point-to-point transport primitives shared by the transpose layers.
//!
//! This crate exposes the leaf pieces every other crate builds on:
//! * [`Rank`] / [`Tag`] / [`RequestId`] – addressing and request identity.
//! * [`PointToPoint`] – a non-blocking post + poll-many transport that may only be
//!   driven from one thread at a time.
//! * [`loopback`] – an in-process fabric implementing [`PointToPoint`] for every rank.
//! * [`wait`] – futex-backed wait/notify shims and the one-shot [`wait::Completion`].
//! * [`TransportError`] – the error surface for post and poll failures.

mod endpoint;
mod error;
mod ids;
pub mod loopback;
pub mod wait;

pub use endpoint::{Outcome, PointToPoint};
pub use error::{TransportError, TransportResult};
pub use ids::{Direction, Rank, RequestId, Tag};
pub use loopback::{LoopbackEndpoint, LoopbackFabric};
