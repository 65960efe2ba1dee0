//! Reference-counted chunk storage.
//!
//! Chunks are pinned by whoever needs them: each block in the reorg window
//! pins the tree's right edge as of that block, and each assigned registered
//! output pins every chunk along its path. A chunk whose count reaches zero
//! is dropped immediately.

use std::collections::HashMap;

use curvetree::{ENCODED_LEN, Leaves, OutputPair};

use crate::{Result, TreeSyncError};

/// Identity and resulting leaf count of a synced block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    /// Height of the block.
    pub block_idx: u64,
    /// Hash of the block, as the chain defines it.
    pub block_hash: [u8; 32],
    /// Total leaf tuples in the tree after this block.
    pub n_leaf_tuples: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct CachedLeafChunk {
    pub leaves: Vec<OutputPair>,
    pub ref_count: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct CachedTreeElemChunk {
    pub tree_elems: Vec<[u8; ENCODED_LEN]>,
    pub ref_count: u64,
}

pub(crate) type LeafCache = HashMap<u64, CachedLeafChunk>;
pub(crate) type LayerChunkCache = HashMap<u64, CachedTreeElemChunk>;
/// Layer index -> chunk index -> chunk.
pub(crate) type TreeElemCache = HashMap<usize, LayerChunkCache>;

/// One layer's extension with hashes flattened to canonical encodings.
#[derive(Clone, Debug)]
pub(crate) struct ByteLayerExtension {
    pub start_idx: u64,
    pub update_existing_last_hash: bool,
    pub hashes: Vec<[u8; ENCODED_LEN]>,
}

/// Cache the leaf chunk `chunk_idx` of a tree holding `n_leaf_tuples`
/// tuples, pulling any missing tail elements out of `leaves`.
///
/// On a cache hit the count is bumped at most once; a newly created chunk
/// starts with a count of 1.
pub(crate) fn cache_leaf_chunk(
    chunk_idx: u64,
    chunk_width: usize,
    leaves: &Leaves,
    n_leaf_tuples: u64,
    bump_ref_count: bool,
    leaf_cache: &mut LeafCache,
) -> Result<()> {
    if n_leaf_tuples == 0 {
        return Ok(());
    }
    let start_leaf_idx = chunk_idx * chunk_width as u64;
    let end_leaf_idx = n_leaf_tuples.min(start_leaf_idx + chunk_width as u64);
    if end_leaf_idx <= start_leaf_idx {
        return Err(TreeSyncError::CacheConsistency(format!(
            "leaf chunk {chunk_idx} is out of range at {n_leaf_tuples} leaf tuples"
        )));
    }

    let missing = |leaf_idx: u64| {
        TreeSyncError::CacheConsistency(format!("leaf {leaf_idx} not present in the extension"))
    };

    if let Some(cached) = leaf_cache.get_mut(&chunk_idx) {
        if bump_ref_count {
            cached.ref_count += 1;
        }
        let cached_end = start_leaf_idx + cached.leaves.len() as u64;
        for leaf_idx in cached_end..end_leaf_idx {
            let ext_idx = leaf_idx
                .checked_sub(leaves.start_leaf_tuple_idx)
                .ok_or_else(|| missing(leaf_idx))? as usize;
            let output = leaves.tuples.get(ext_idx).ok_or_else(|| missing(leaf_idx))?;
            cached.leaves.push(output.output_pair);
        }
        return Ok(());
    }

    let mut chunk_leaves = Vec::with_capacity((end_leaf_idx - start_leaf_idx) as usize);
    for leaf_idx in start_leaf_idx..end_leaf_idx {
        let ext_idx = leaf_idx
            .checked_sub(leaves.start_leaf_tuple_idx)
            .ok_or_else(|| missing(leaf_idx))? as usize;
        let output = leaves.tuples.get(ext_idx).ok_or_else(|| missing(leaf_idx))?;
        chunk_leaves.push(output.output_pair);
    }
    leaf_cache.insert(
        chunk_idx,
        CachedLeafChunk {
            leaves: chunk_leaves,
            ref_count: 1,
        },
    );
    Ok(())
}

/// Cache chunk `chunk_idx` of layer `layer_idx`, pulling missing tail
/// elements out of the layer's extension. Same counting rules as
/// [`cache_leaf_chunk`].
pub(crate) fn cache_path_chunk(
    layer_ext: &ByteLayerExtension,
    layer_idx: usize,
    chunk_idx: u64,
    chunk_width: usize,
    n_layer_elems: u64,
    bump_ref_count: bool,
    tree_elem_cache: &mut TreeElemCache,
) -> Result<()> {
    let start_idx = chunk_idx * chunk_width as u64;
    let end_idx = n_layer_elems.min(start_idx + chunk_width as u64);
    if end_idx <= start_idx {
        return Err(TreeSyncError::CacheConsistency(format!(
            "chunk {chunk_idx} of layer {layer_idx} is out of range"
        )));
    }

    let missing = |elem_idx: u64| {
        TreeSyncError::CacheConsistency(format!(
            "element {elem_idx} of layer {layer_idx} not present in the extension"
        ))
    };

    let layer_cache = tree_elem_cache.entry(layer_idx).or_default();
    if let Some(cached) = layer_cache.get_mut(&chunk_idx) {
        if bump_ref_count {
            cached.ref_count += 1;
        }
        let cached_end = start_idx + cached.tree_elems.len() as u64;
        for elem_idx in cached_end..end_idx {
            let ext_idx = elem_idx
                .checked_sub(layer_ext.start_idx)
                .ok_or_else(|| missing(elem_idx))? as usize;
            let elem = layer_ext.hashes.get(ext_idx).ok_or_else(|| missing(elem_idx))?;
            cached.tree_elems.push(*elem);
        }
        return Ok(());
    }

    let mut tree_elems = Vec::with_capacity((end_idx - start_idx) as usize);
    for elem_idx in start_idx..end_idx {
        let ext_idx = elem_idx
            .checked_sub(layer_ext.start_idx)
            .ok_or_else(|| missing(elem_idx))? as usize;
        let elem = layer_ext.hashes.get(ext_idx).ok_or_else(|| missing(elem_idx))?;
        tree_elems.push(*elem);
    }
    layer_cache.insert(
        chunk_idx,
        CachedTreeElemChunk {
            tree_elems,
            ref_count: 1,
        },
    );
    Ok(())
}

/// Drop one reference to a leaf chunk, removing it at zero.
pub(crate) fn remove_leaf_chunk_ref(chunk_idx: u64, leaf_cache: &mut LeafCache) -> Result<()> {
    let cached = leaf_cache.get_mut(&chunk_idx).ok_or_else(|| {
        TreeSyncError::CacheConsistency(format!("dropping a ref to missing leaf chunk {chunk_idx}"))
    })?;
    if cached.ref_count == 0 {
        return Err(TreeSyncError::CacheConsistency(format!(
            "leaf chunk {chunk_idx} already at zero refs"
        )));
    }
    cached.ref_count -= 1;
    if cached.ref_count == 0 {
        leaf_cache.remove(&chunk_idx);
    }
    Ok(())
}

/// Drop one reference to a layer chunk, removing it (and an emptied layer
/// map) at zero.
pub(crate) fn remove_path_chunk_ref(
    layer_idx: usize,
    chunk_idx: u64,
    tree_elem_cache: &mut TreeElemCache,
) -> Result<()> {
    let layer_cache = tree_elem_cache.get_mut(&layer_idx).ok_or_else(|| {
        TreeSyncError::CacheConsistency(format!("dropping a ref in missing layer {layer_idx}"))
    })?;
    let cached = layer_cache.get_mut(&chunk_idx).ok_or_else(|| {
        TreeSyncError::CacheConsistency(format!(
            "dropping a ref to missing chunk {chunk_idx} of layer {layer_idx}"
        ))
    })?;
    if cached.ref_count == 0 {
        return Err(TreeSyncError::CacheConsistency(format!(
            "chunk {chunk_idx} of layer {layer_idx} already at zero refs"
        )));
    }
    cached.ref_count -= 1;
    if cached.ref_count == 0 {
        layer_cache.remove(&chunk_idx);
    }
    if layer_cache.is_empty() {
        tree_elem_cache.remove(&layer_idx);
    }
    Ok(())
}
