//! modelver-core - Model template versioning core
//!
//! This library holds everything that decides *what* a model template and
//! its versions should look like: the resource types, the object store they
//! live in, and the handlers that number versions and keep template status
//! in sync. It has no async runtime dependency; the daemon crate drives the
//! handlers from its own worker pool.
//!
//! # Modules
//!
//! - [`model`]: `ModelTemplate` / `ModelTemplateVersion` resources, object
//!   metadata, conditions and owner references
//! - [`store`]: the `Store` contract and its `SQLite` implementation with a
//!   revisioned change log
//! - [`versioning`]: `VersionCache`, `VersionAssigner` and
//!   `TemplateSynchronizer`
//! - [`config`]: TOML configuration shared by the daemon and the CLI

pub mod config;
pub mod model;
pub mod store;
pub mod versioning;
