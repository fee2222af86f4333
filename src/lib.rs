//! folio library crate.
//!
//! Structured datasets stored as plain files inside git working copies.
//! The layers stack bottom-up:
//!
//! - [`buffer`]: raw files on disk and at historical commits.
//! - [`object`]: typed objects assembled from buffers by [`object::ObjectSpec`]s.
//! - [`diff`]: change classification between two snapshots.
//! - [`index`]: persistent default and filtered indexes with live status.
//! - [`commit`]: validate, write, stage and commit a changeset atomically.
//! - [`worker`]: the [`Worker`] facade that owns dataset registrations and
//!   serializes mutating work per working copy.
//!
//! The `folio` binary is a thin CLI over [`Worker`].

pub mod buffer;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod index;
pub mod object;
pub mod paths;
pub mod query;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use worker::Worker;
