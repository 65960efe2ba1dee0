//! Block-by-block tree syncing with a bounded, reference-counted cache.
//!
//! A wallet-style consumer does not need the whole tree: it needs the
//! current root, the right edge required to extend or trim the tree as
//! blocks come and go, and full membership paths for the outputs it has
//! registered. [`TreeSyncMemory`] keeps exactly those chunks, each pinned by
//! a reference count, and drops everything else once blocks leave the reorg
//! window.

#![warn(missing_docs)]

mod cache;
mod error;
mod sync;

#[cfg(test)]
mod tests;

pub use cache::BlockMeta;
pub use error::{Result, TreeSyncError};
pub use sync::TreeSyncMemory;
