//! Git abstraction layer for folio.
//!
//! This crate defines the [`GitRepo`] trait, the single interface through
//! which the dataset engine touches git objects, refs and the index. Nothing
//! outside this crate imports gix directly.
//!
//! # Crate layout
//!
//! - [`repo`]: the [`GitRepo`] trait definition.
//! - [`types`]: value types used in trait signatures ([`GitOid`], [`RefName`],
//!   [`TreeEntry`], [`Signature`], etc.).
//! - [`error`]: the [`GitError`] enum returned by all trait methods.
//! - [`lock`]: advisory cross-process locks on a working copy.

pub mod error;
pub mod lock;
pub mod repo;
pub mod types;

// gix-backed implementation modules
mod gix_repo;
mod index_impl;
mod objects_impl;
mod refs_impl;

pub use gix_repo::GixRepo;

pub use error::GitError;
pub use lock::{LockWait, WorktreeLock};
pub use repo::GitRepo;
pub use types::{
    CommitInfo, EntryMode, GitOid, IndexEntry, OidParseError, RefName, RefNameError, Signature,
    TreeEdit, TreeEntry,
};
