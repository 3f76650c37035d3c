//! clusterlink agent core: command dispatch and per-namespace sync lifecycle.
//!
//! Exposed as a library so the integration tests can drive it directly.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod allow_list;
pub mod error;
pub mod handlers;
pub mod infra;
pub mod lifecycle;
pub mod pipeline;
pub mod ports;
pub mod router;
pub mod transport;
pub mod worker;
