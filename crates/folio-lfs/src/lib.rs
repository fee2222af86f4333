//! Git LFS support for folio.
//!
//! Buffers committed through LFS live in the working copy as small pointer
//! files; the real content sits in the local object store under
//! `.git/lfs/objects/<aa>/<bb>/<oid>`. This crate parses pointers
//! ([`Pointer`]) and resolves them to content through the [`LfsResolver`]
//! trait, with [`LocalObjectStore`] as the on-disk implementation.
//!
//! Resolution failures are errors, never "absent": a pointer whose object is
//! missing or corrupt must not be mistaken for a deleted buffer.

pub mod error;
pub mod pointer;
pub mod store;

pub use error::LfsError;
pub use pointer::Pointer;
pub use store::LocalObjectStore;

/// Resolves LFS pointers to their content.
pub trait LfsResolver: Send + Sync {
    /// Return the content `pointer` refers to.
    fn resolve(&self, pointer: &Pointer) -> Result<Vec<u8>, LfsError>;
}

/// Resolve `data` if it is a pointer file, otherwise return it unchanged.
pub fn resolve_if_pointer(resolver: &dyn LfsResolver, data: Vec<u8>) -> Result<Vec<u8>, LfsError> {
    match Pointer::parse(&data) {
        Some(pointer) => {
            tracing::trace!(oid = %pointer.oid, size = pointer.size, "resolving lfs pointer");
            resolver.resolve(&pointer)
        }
        None => Ok(data),
    }
}
