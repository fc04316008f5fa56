//! Gateway service in front of an external agent-society framework.
//!
//! Clients submit natural-language tasks over HTTP or WebSocket; the
//! gateway registers them, routes each one to an execution backend
//! (in-process, one-shot isolated child, or the persistent browser
//! worker pool) and streams progress and results back out of a shared
//! task registry.
//!
//! The crate splits into four layers:
//!
//! - [`registry`]: the canonical task store, cancellation tokens and
//!   crash-recovery snapshots.
//! - [`society`]: module manifests and the opaque runner boundary to the
//!   external framework.
//! - [`execution`]: the dispatcher, worker processes and process pools.
//! - [`web`]: the axum HTTP/WebSocket surface.

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod registry;
pub mod society;
pub mod web;

pub use error::{GatewayError, Result};
