//! modelver-daemon - Controller daemon for model template versioning
//!
//! This library drives the handlers of `modelver-core` from the store's
//! change log. It tails the store, fans keys out to one work queue per
//! resource kind and runs the registered handlers on a worker pool, with
//! per-key exponential backoff on failure.
//!
//! # Runtime Requirements
//!
//! Workers and the informer are tokio tasks; store calls run on the blocking
//! pool. Use a multi-threaded runtime:
//!
//! ```rust,ignore
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() {
//!     let daemon = Daemon::new(store, &config.controller, None)?;
//!     let running = daemon.start();
//!     // ...
//!     running.shutdown().await?;
//! }
//! ```
//!
//! # Modules
//!
//! - [`controller`]: work queue, per-kind `Controller` and the `Informer`
//! - [`register`]: handler registration for templates and versions
//! - [`daemon`]: assembles and starts the controllers
//! - [`metrics`]: Prometheus metrics for the controller loops

pub mod controller;
pub mod daemon;
pub mod metrics;
pub mod register;
