//! The block-synced tree cache.

use std::collections::{HashMap, VecDeque, hash_map::Entry};

use curvetree::{
    CurveCycle, CurveOps, CurveTree, ENCODED_LEN, LEAF_TUPLE_SIZE, LastChunkData, LastChunks,
    Leaves, OutputContext, OutputPair, OutputRef, Path, PathIndexes, TreeExtension, leaf_tuple,
};

use crate::{
    Result, TreeSyncError,
    cache::{
        BlockMeta, ByteLayerExtension, CachedLeafChunk, CachedTreeElemChunk, LeafCache,
        TreeElemCache, cache_leaf_chunk, cache_path_chunk, remove_leaf_chunk_ref,
        remove_path_chunk_ref,
    },
};

/// A tree kept in sync with the chain, one block at a time, holding only the
/// chunks pinned by the reorg window and by registered outputs.
///
/// Blocks must be synced contiguously. The last `max_reorg_depth` blocks can
/// be popped again; each pop trims the tree back to the previous block's
/// leaf count by regrowing the right edge from cached chunks.
#[derive(Clone, Debug)]
pub struct TreeSyncMemory<C: CurveCycle> {
    curve_tree: CurveTree<C>,
    max_reorg_depth: usize,
    pub(crate) registered_outputs: HashMap<OutputRef, Option<u64>>,
    pub(crate) leaf_cache: LeafCache,
    pub(crate) tree_elem_cache: TreeElemCache,
    cached_blocks: VecDeque<BlockMeta>,
}

impl<C: CurveCycle> TreeSyncMemory<C> {
    /// A cache over `curve_tree` retaining the last `max_reorg_depth` blocks.
    pub fn new(curve_tree: CurveTree<C>, max_reorg_depth: usize) -> Result<Self> {
        if max_reorg_depth == 0 {
            return Err(TreeSyncError::InvalidInput(
                "max reorg depth must be at least 1".into(),
            ));
        }
        Ok(Self {
            curve_tree,
            max_reorg_depth,
            registered_outputs: HashMap::new(),
            leaf_cache: LeafCache::new(),
            tree_elem_cache: TreeElemCache::new(),
            cached_blocks: VecDeque::new(),
        })
    }

    /// Bootstrap an empty cache from a trusted checkpoint instead of
    /// replaying the chain from the tree's first leaf.
    ///
    /// `start_block` becomes the window's anchor, and `last_path` (the path
    /// of the checkpointed tree's last leaf) supplies the right-edge chunks
    /// needed to grow, trim, and serve paths from here on. Outputs may be
    /// registered before calling this; outputs already in the checkpointed
    /// tree get their paths via
    /// [`TreeSyncMemory::force_add_output_path`].
    pub fn init(&mut self, start_block: BlockMeta, last_path: &Path<C>) -> Result<()> {
        if !self.cached_blocks.is_empty() {
            return Err(TreeSyncError::InvalidInput(
                "initializing a cache that already synced blocks".into(),
            ));
        }
        let n_leaf_tuples = start_block.n_leaf_tuples;
        if n_leaf_tuples == 0 {
            if !last_path.is_empty() {
                return Err(TreeSyncError::InvalidInput(
                    "checkpoint path for an empty tree must be empty".into(),
                ));
            }
            self.cached_blocks.push_back(start_block);
            return Ok(());
        }

        let last_leaf_idx = n_leaf_tuples - 1;
        let path_indexes = self.check_path_shape(n_leaf_tuples, last_leaf_idx, last_path)?;
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, last_leaf_idx);

        // The anchor pins the right edge exactly as a synced block would.
        self.leaf_cache.insert(
            chunk_indexes[0],
            CachedLeafChunk {
                leaves: last_path.leaves.clone(),
                ref_count: 1,
            },
        );
        for layer_idx in 0..path_indexes.layer_ranges.len() {
            let tree_elems = if layer_idx % 2 == 0 {
                last_path.b_layer_chunks[layer_idx / 2]
                    .iter()
                    .map(<C::B as CurveOps>::point_to_bytes)
                    .collect()
            } else {
                last_path.a_layer_chunks[layer_idx / 2]
                    .iter()
                    .map(<C::A as CurveOps>::point_to_bytes)
                    .collect()
            };
            self.tree_elem_cache.entry(layer_idx).or_default().insert(
                chunk_indexes[layer_idx + 1],
                CachedTreeElemChunk {
                    tree_elems,
                    ref_count: 1,
                },
            );
        }
        self.cached_blocks.push_back(start_block);
        Ok(())
    }

    /// The tree parameters this cache syncs against.
    pub fn curve_tree(&self) -> &CurveTree<C> {
        &self.curve_tree
    }

    /// Leaf tuples in the tree as of the last synced block.
    pub fn n_leaf_tuples(&self) -> u64 {
        self.cached_blocks.back().map_or(0, |b| b.n_leaf_tuples)
    }

    /// Number of blocks currently in the reorg window.
    pub fn n_synced_blocks(&self) -> usize {
        self.cached_blocks.len()
    }

    /// The last synced block.
    pub fn top_block(&self) -> Option<&BlockMeta> {
        self.cached_blocks.back()
    }

    /// Start watching an output so its membership path stays cached once it
    /// enters the tree at `unlock_block_idx`.
    ///
    /// Returns false without registering when the output is already
    /// registered, or when the chain tip has already passed the unlock block
    /// (its insertion would have been missed).
    pub fn register_output(&mut self, output: &OutputPair, unlock_block_idx: u64) -> bool {
        if let Some(top) = self.cached_blocks.back() {
            if unlock_block_idx <= top.block_idx {
                return false;
            }
        }
        match self.registered_outputs.entry(output.output_ref()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(None);
                true
            }
        }
    }

    /// Assign a registered, unassigned output its known membership path
    /// without replaying the blocks that inserted it.
    ///
    /// Pairs with [`TreeSyncMemory::init`] when restoring from a trusted
    /// checkpoint: the caller supplies the output's leaf index and full path
    /// as of the current tree, and the chunks are cached and pinned exactly
    /// as if they had been observed while syncing.
    pub fn force_add_output_path(
        &mut self,
        output: &OutputPair,
        leaf_idx: u64,
        path: &Path<C>,
    ) -> Result<()> {
        let n_leaf_tuples = self.n_leaf_tuples();
        if leaf_idx >= n_leaf_tuples {
            return Err(TreeSyncError::InvalidInput(format!(
                "leaf {leaf_idx} out of range, tree has {n_leaf_tuples} leaf tuples"
            )));
        }
        match self.registered_outputs.get(&output.output_ref()) {
            None => {
                return Err(TreeSyncError::InvalidInput(
                    "force-adding a path for an unregistered output".into(),
                ));
            }
            Some(Some(_)) => {
                return Err(TreeSyncError::InvalidInput(
                    "force-adding a path for an already assigned output".into(),
                ));
            }
            Some(None) => {}
        }

        let path_indexes = self.check_path_shape(n_leaf_tuples, leaf_idx, path)?;
        let (leaf_start, _) = path_indexes.leaf_range;
        if path.leaves.get((leaf_idx - leaf_start) as usize) != Some(output) {
            return Err(TreeSyncError::InvalidInput(format!(
                "path does not hold the output at leaf {leaf_idx}"
            )));
        }

        // Present the path as the extension that would have inserted it, so
        // chunks already pinned by the anchor or other outputs are bumped
        // rather than replaced.
        let leaves = Leaves {
            start_leaf_tuple_idx: leaf_start,
            tuples: path
                .leaves
                .iter()
                .enumerate()
                .map(|(i, output_pair)| OutputContext {
                    output_id: leaf_start + i as u64,
                    output_pair: *output_pair,
                })
                .collect(),
        };
        let byte_layer_exts: Vec<ByteLayerExtension> = path_indexes
            .layer_ranges
            .iter()
            .enumerate()
            .map(|(layer_idx, &(start, _))| {
                let hashes = if layer_idx % 2 == 0 {
                    path.b_layer_chunks[layer_idx / 2]
                        .iter()
                        .map(<C::B as CurveOps>::point_to_bytes)
                        .collect()
                } else {
                    path.a_layer_chunks[layer_idx / 2]
                        .iter()
                        .map(<C::A as CurveOps>::point_to_bytes)
                        .collect()
                };
                ByteLayerExtension {
                    start_idx: start,
                    update_existing_last_hash: false,
                    hashes,
                }
            })
            .collect();

        cache_leaf_chunk(
            leaf_idx / self.curve_tree.b_width() as u64,
            self.curve_tree.b_width(),
            &leaves,
            n_leaf_tuples,
            true,
            &mut self.leaf_cache,
        )?;
        self.cache_path_chunks(
            leaf_idx,
            &byte_layer_exts,
            n_leaf_tuples,
            n_leaf_tuples,
            true,
        )?;
        self.registered_outputs
            .insert(output.output_ref(), Some(leaf_idx));
        Ok(())
    }

    /// Grow the tree with one block's newly unlocked outputs.
    ///
    /// The block must directly follow the last synced block, matching both
    /// index and previous-block hash; the first synced block is accepted
    /// as-is. Outputs that fail to decode are skipped and never enter the
    /// tree. Once the window exceeds the reorg depth, the oldest block's
    /// pins are dropped.
    pub fn sync_block(
        &mut self,
        block_idx: u64,
        block_hash: [u8; 32],
        prev_block_hash: [u8; 32],
        new_outputs: Vec<OutputContext>,
    ) -> Result<()> {
        if let Some(top) = self.cached_blocks.back() {
            if block_idx != top.block_idx + 1 {
                return Err(TreeSyncError::Contiguity(format!(
                    "syncing block {block_idx} on top of block {}",
                    top.block_idx
                )));
            }
            if prev_block_hash != top.block_hash {
                return Err(TreeSyncError::Contiguity(format!(
                    "previous block hash mismatch at block {block_idx}"
                )));
            }
        }

        let old_n_leaf_tuples = self.n_leaf_tuples();
        let last_chunks = self.get_last_chunks()?;
        let tree_extension = self.curve_tree.get_tree_extension(&last_chunks, new_outputs)?;
        let n_leaf_tuples = old_n_leaf_tuples + tree_extension.leaves.tuples.len() as u64;

        if tree_extension.leaves.tuples.is_empty() {
            // No tree change; the block still pins the current right edge so
            // popping it later stays balanced.
            self.bump_tail_refs(n_leaf_tuples)?;
        } else {
            let byte_layer_exts = extension_to_byte_layers(&tree_extension);
            self.update_existing_last_hashes(old_n_leaf_tuples, &byte_layer_exts)?;

            // Assign registered outputs their leaf position; the first
            // occurrence of a pair wins.
            for (i, output) in tree_extension.leaves.tuples.iter().enumerate() {
                let leaf_idx = old_n_leaf_tuples + i as u64;
                if let Some(assigned) = self
                    .registered_outputs
                    .get_mut(&output.output_pair.output_ref())
                {
                    if assigned.is_none() {
                        *assigned = Some(leaf_idx);
                    }
                }
            }

            let assigned: Vec<u64> = self.registered_outputs.values().filter_map(|a| *a).collect();
            for leaf_idx in assigned {
                self.update_registered_path(
                    leaf_idx,
                    &tree_extension,
                    &byte_layer_exts,
                    old_n_leaf_tuples,
                    n_leaf_tuples,
                )?;
            }

            // Pin the tree's new right edge for this block.
            cache_leaf_chunk(
                (n_leaf_tuples - 1) / self.curve_tree.b_width() as u64,
                self.curve_tree.b_width(),
                &tree_extension.leaves,
                n_leaf_tuples,
                true,
                &mut self.leaf_cache,
            )?;
            self.cache_path_chunks(
                n_leaf_tuples - 1,
                &byte_layer_exts,
                old_n_leaf_tuples,
                n_leaf_tuples,
                true,
            )?;
        }

        self.cached_blocks.push_back(BlockMeta {
            block_idx,
            block_hash,
            n_leaf_tuples,
        });

        while self.cached_blocks.len() > self.max_reorg_depth {
            if let Some(oldest) = self.cached_blocks.pop_front() {
                self.deque_block(oldest.n_leaf_tuples)?;
            }
        }
        Ok(())
    }

    /// Undo the last synced block, trimming the tree back to the previous
    /// block's leaf count and unassigning registered outputs that fell off.
    ///
    /// Returns false when fewer than two blocks are cached: the oldest
    /// remaining block is the window's anchor and cannot be undone.
    pub fn pop_block(&mut self) -> Result<bool> {
        if self.cached_blocks.len() < 2 {
            return Ok(false);
        }
        let Some(popped) = self.cached_blocks.pop_back() else {
            return Ok(false);
        };
        let old_n_leaf_tuples = popped.n_leaf_tuples;
        self.deque_block(old_n_leaf_tuples)?;

        let new_n_leaf_tuples = self.n_leaf_tuples();
        if new_n_leaf_tuples == old_n_leaf_tuples {
            return Ok(true);
        }

        if new_n_leaf_tuples > 0 {
            self.shrink_cached_last_leaf_chunk(new_n_leaf_tuples)?;
            let edge_hashes = self.get_tree_edge(new_n_leaf_tuples)?;
            self.reduce_cached_last_chunks(new_n_leaf_tuples, &edge_hashes)?;
        }

        // Outputs past the new end leave the tree; their pins were taken at
        // the pre-pop shape, so they are dropped at that shape too.
        let unassign: Vec<(OutputRef, u64)> = self
            .registered_outputs
            .iter()
            .filter_map(|(output_ref, assigned)| {
                (*assigned)
                    .filter(|leaf_idx| *leaf_idx >= new_n_leaf_tuples)
                    .map(|leaf_idx| (*output_ref, leaf_idx))
            })
            .collect();
        for (output_ref, leaf_idx) in unassign {
            remove_leaf_chunk_ref(
                leaf_idx / self.curve_tree.b_width() as u64,
                &mut self.leaf_cache,
            )?;
            self.remove_path_chunks_refs(leaf_idx, old_n_leaf_tuples)?;
            self.registered_outputs.insert(output_ref, None);
        }

        let new_n_layers = self.curve_tree.n_layers(new_n_leaf_tuples);
        self.tree_elem_cache
            .retain(|layer_idx, _| *layer_idx < new_n_layers);
        Ok(true)
    }

    /// Membership path of a registered output.
    ///
    /// `None` when the output was never registered; an empty path when it is
    /// registered but has not entered the tree (or fell back out in a
    /// reorg).
    pub fn get_output_path(&self, output: &OutputPair) -> Result<Option<Path<C>>> {
        let Some(assigned) = self.registered_outputs.get(&output.output_ref()) else {
            return Ok(None);
        };
        let Some(leaf_idx) = assigned else {
            return Ok(Some(Path::default()));
        };
        Ok(Some(self.get_leaf_path(self.n_leaf_tuples(), *leaf_idx)?))
    }

    /// The current root hash encoding, `None` for an empty tree.
    pub fn get_tree_root(&self) -> Result<Option<[u8; ENCODED_LEN]>> {
        let n_leaf_tuples = self.n_leaf_tuples();
        if n_leaf_tuples == 0 {
            return Ok(None);
        }
        let top_layer_idx = self.curve_tree.n_layers(n_leaf_tuples) - 1;
        let chunk = self
            .tree_elem_cache
            .get(&top_layer_idx)
            .and_then(|layer| layer.get(&0))
            .ok_or_else(|| TreeSyncError::CacheConsistency("root chunk not cached".into()))?;
        if chunk.tree_elems.len() != 1 {
            return Err(TreeSyncError::CacheConsistency(format!(
                "root chunk holds {} elements",
                chunk.tree_elems.len()
            )));
        }
        Ok(Some(chunk.tree_elems[0]))
    }

    /// Rebuild last-chunk state for the whole right edge from cached chunks.
    fn get_last_chunks(&self) -> Result<LastChunks<C>> {
        let mut last_chunks = LastChunks::default();
        let n_leaf_tuples = self.n_leaf_tuples();
        if n_leaf_tuples == 0 {
            return Ok(last_chunks);
        }

        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, n_leaf_tuples - 1);
        let n_elems_per_layer = self.curve_tree.n_elems_per_layer(n_leaf_tuples);

        let last_elem_bytes = |layer_idx: usize| -> Result<[u8; ENCODED_LEN]> {
            let chunk_idx = chunk_indexes[layer_idx + 1];
            let chunk = self
                .tree_elem_cache
                .get(&layer_idx)
                .and_then(|layer| layer.get(&chunk_idx))
                .ok_or_else(|| {
                    TreeSyncError::CacheConsistency(format!(
                        "tail chunk {chunk_idx} of layer {layer_idx} not cached"
                    ))
                })?;
            chunk.tree_elems.last().copied().ok_or_else(|| {
                TreeSyncError::CacheConsistency(format!("empty tail chunk in layer {layer_idx}"))
            })
        };

        let leaf_chunk = self.leaf_cache.get(&chunk_indexes[0]).ok_or_else(|| {
            TreeSyncError::CacheConsistency("tail leaf chunk not cached".into())
        })?;
        let last_output = leaf_chunk.leaves.last().ok_or_else(|| {
            TreeSyncError::CacheConsistency("empty tail leaf chunk".into())
        })?;
        let last_leaf_tuple =
            leaf_tuple::<C>(self.curve_tree.a_ops(), last_output).map_err(|e| {
                TreeSyncError::CacheConsistency(format!("cached output does not decode: {e}"))
            })?;

        let n_leaf_scalars = n_leaf_tuples * LEAF_TUPLE_SIZE as u64;
        for layer_idx in 0..n_elems_per_layer.len() {
            let parent_layer_size = n_elems_per_layer[layer_idx];
            let last_parent_bytes = last_elem_bytes(layer_idx)?;

            if layer_idx % 2 == 0 {
                let last_parent = <C::B as CurveOps>::point_from_bytes(&last_parent_bytes)
                    .map_err(|e| bad_cached_point(layer_idx, e))?;
                let (child_layer_size, child_offset, last_child) = if layer_idx == 0 {
                    (
                        n_leaf_scalars,
                        (n_leaf_scalars % self.curve_tree.leaf_chunk_width() as u64) as usize,
                        last_leaf_tuple.c_x,
                    )
                } else {
                    let child_layer_size = n_elems_per_layer[layer_idx - 1];
                    let child = <C::A as CurveOps>::point_from_bytes(&last_elem_bytes(
                        layer_idx - 1,
                    )?)
                    .map_err(|e| bad_cached_point(layer_idx - 1, e))?;
                    (
                        child_layer_size,
                        (child_layer_size % self.curve_tree.b_width() as u64) as usize,
                        <C::A as CurveOps>::point_to_cycle_scalar(&child),
                    )
                };
                last_chunks.b_last_chunks.push(LastChunkData {
                    child_offset,
                    last_child,
                    last_parent,
                    child_layer_size,
                    parent_layer_size,
                });
            } else {
                let last_parent = <C::A as CurveOps>::point_from_bytes(&last_parent_bytes)
                    .map_err(|e| bad_cached_point(layer_idx, e))?;
                let child_layer_size = n_elems_per_layer[layer_idx - 1];
                let child = <C::B as CurveOps>::point_from_bytes(&last_elem_bytes(layer_idx - 1)?)
                    .map_err(|e| bad_cached_point(layer_idx - 1, e))?;
                last_chunks.a_last_chunks.push(LastChunkData {
                    child_offset: (child_layer_size % self.curve_tree.a_width() as u64) as usize,
                    last_child: <C::B as CurveOps>::point_to_cycle_scalar(&child),
                    last_parent,
                    child_layer_size,
                    parent_layer_size,
                });
            }
        }
        Ok(last_chunks)
    }

    /// Read a full membership path out of cached chunks.
    fn get_leaf_path(&self, n_leaf_tuples: u64, leaf_idx: u64) -> Result<Path<C>> {
        let path_indexes = self.curve_tree.get_path_indexes(n_leaf_tuples, leaf_idx)?;
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, leaf_idx);

        let mut path = Path::default();

        let leaf_chunk_idx = chunk_indexes[0];
        let cached = self.leaf_cache.get(&leaf_chunk_idx).ok_or_else(|| {
            TreeSyncError::CacheConsistency(format!("leaf chunk {leaf_chunk_idx} not cached"))
        })?;
        let (leaf_start, leaf_end) = path_indexes.leaf_range;
        let n_chunk_leaves = (leaf_end - leaf_start) as usize;
        if cached.leaves.len() < n_chunk_leaves {
            return Err(TreeSyncError::CacheConsistency(format!(
                "leaf chunk {leaf_chunk_idx} holds {} of {n_chunk_leaves} leaves",
                cached.leaves.len()
            )));
        }
        path.leaves = cached.leaves[..n_chunk_leaves].to_vec();

        for (layer_idx, &(start, end)) in path_indexes.layer_ranges.iter().enumerate() {
            let chunk_idx = chunk_indexes[layer_idx + 1];
            let cached = self
                .tree_elem_cache
                .get(&layer_idx)
                .and_then(|layer| layer.get(&chunk_idx))
                .ok_or_else(|| {
                    TreeSyncError::CacheConsistency(format!(
                        "chunk {chunk_idx} of layer {layer_idx} not cached"
                    ))
                })?;
            let n_chunk_elems = (end - start) as usize;
            if cached.tree_elems.len() < n_chunk_elems {
                return Err(TreeSyncError::CacheConsistency(format!(
                    "chunk {chunk_idx} of layer {layer_idx} holds {} of {n_chunk_elems} elements",
                    cached.tree_elems.len()
                )));
            }
            let elems = &cached.tree_elems[..n_chunk_elems];
            if layer_idx % 2 == 0 {
                let chunk = elems
                    .iter()
                    .map(|bytes| {
                        <C::B as CurveOps>::point_from_bytes(bytes)
                            .map_err(|e| bad_cached_point(layer_idx, e))
                    })
                    .collect::<Result<Vec<_>>>()?;
                path.b_layer_chunks.push(chunk);
            } else {
                let chunk = elems
                    .iter()
                    .map(|bytes| {
                        <C::A as CurveOps>::point_from_bytes(bytes)
                            .map_err(|e| bad_cached_point(layer_idx, e))
                    })
                    .collect::<Result<Vec<_>>>()?;
                path.a_layer_chunks.push(chunk);
            }
        }
        Ok(path)
    }

    /// Verify a caller-supplied path has exactly the chunk sizes the tree
    /// prescribes for `leaf_idx` at `n_leaf_tuples` leaves.
    fn check_path_shape(
        &self,
        n_leaf_tuples: u64,
        leaf_idx: u64,
        path: &Path<C>,
    ) -> Result<PathIndexes> {
        let path_indexes = self.curve_tree.get_path_indexes(n_leaf_tuples, leaf_idx)?;
        let (leaf_start, leaf_end) = path_indexes.leaf_range;
        if path.leaves.len() != (leaf_end - leaf_start) as usize {
            return Err(TreeSyncError::InvalidInput(format!(
                "path holds {} leaves, expected {}",
                path.leaves.len(),
                leaf_end - leaf_start
            )));
        }
        if path.n_layers() != path_indexes.layer_ranges.len() {
            return Err(TreeSyncError::InvalidInput(format!(
                "path spans {} layers, expected {}",
                path.n_layers(),
                path_indexes.layer_ranges.len()
            )));
        }
        for (layer_idx, &(start, end)) in path_indexes.layer_ranges.iter().enumerate() {
            let len = if layer_idx % 2 == 0 {
                path.b_layer_chunks.get(layer_idx / 2).map(Vec::len)
            } else {
                path.a_layer_chunks.get(layer_idx / 2).map(Vec::len)
            };
            if len != Some((end - start) as usize) {
                return Err(TreeSyncError::InvalidInput(format!(
                    "path chunk at layer {layer_idx} does not match the tree shape"
                )));
            }
        }
        Ok(path_indexes)
    }

    /// Regrow the right-edge hash of every layer at the reduced size.
    fn get_tree_edge(&self, n_leaf_tuples: u64) -> Result<Vec<[u8; ENCODED_LEN]>> {
        let edge_path = self.get_leaf_path(n_leaf_tuples, n_leaf_tuples - 1)?;
        Ok(self.curve_tree.calc_hashes_from_path(&edge_path, true)?)
    }

    /// Rewrite stale cached copies of last hashes the extension replaces.
    fn update_existing_last_hashes(
        &mut self,
        old_n_leaf_tuples: u64,
        byte_layer_exts: &[ByteLayerExtension],
    ) -> Result<()> {
        if old_n_leaf_tuples == 0 {
            return Ok(());
        }
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(old_n_leaf_tuples, old_n_leaf_tuples - 1);
        let old_n_layers = chunk_indexes.len() - 1;
        if byte_layer_exts.len() < old_n_layers {
            return Err(TreeSyncError::CacheConsistency(format!(
                "extension spans {} layers, tree has {old_n_layers}",
                byte_layer_exts.len()
            )));
        }
        for (layer_idx, layer_ext) in byte_layer_exts.iter().enumerate().take(old_n_layers) {
            if !layer_ext.update_existing_last_hash {
                continue;
            }
            // Every layer's tail chunk is pinned while any block is cached;
            // a missing one means the cache is corrupt, not skippable.
            let chunk = self
                .tree_elem_cache
                .get_mut(&layer_idx)
                .and_then(|layer| layer.get_mut(&chunk_indexes[layer_idx + 1]))
                .ok_or_else(|| {
                    TreeSyncError::CacheConsistency(format!(
                        "tail chunk of layer {layer_idx} not cached"
                    ))
                })?;
            let replacement = layer_ext.hashes.first().ok_or_else(|| {
                TreeSyncError::CacheConsistency(format!("empty extension for layer {layer_idx}"))
            })?;
            let stale = chunk.tree_elems.last_mut().ok_or_else(|| {
                TreeSyncError::CacheConsistency(format!("empty cached chunk in layer {layer_idx}"))
            })?;
            *stale = *replacement;
        }
        Ok(())
    }

    /// Cache (or extend) every chunk along `leaf_idx`'s path, bumping counts
    /// for newly pinned chunks.
    fn cache_path_chunks(
        &mut self,
        leaf_idx: u64,
        byte_layer_exts: &[ByteLayerExtension],
        old_n_leaf_tuples: u64,
        n_leaf_tuples: u64,
        bump_ref_count: bool,
    ) -> Result<()> {
        let n_elems_per_layer = self.curve_tree.n_elems_per_layer(n_leaf_tuples);
        if byte_layer_exts.len() < n_elems_per_layer.len() {
            return Err(TreeSyncError::CacheConsistency(format!(
                "extension spans {} layers, tree needs {}",
                byte_layer_exts.len(),
                n_elems_per_layer.len()
            )));
        }
        let old_n_layers = self.curve_tree.n_layers(old_n_leaf_tuples);
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, leaf_idx);

        for (layer_idx, &n_layer_elems) in n_elems_per_layer.iter().enumerate() {
            // A brand new layer's chunk is pinned regardless: existing
            // holders of this path gained a chunk they never counted.
            let is_new_layer = layer_idx >= old_n_layers;
            let chunk_width = if layer_idx % 2 == 0 {
                self.curve_tree.a_width()
            } else {
                self.curve_tree.b_width()
            };
            cache_path_chunk(
                &byte_layer_exts[layer_idx],
                layer_idx,
                chunk_indexes[layer_idx + 1],
                chunk_width,
                n_layer_elems,
                bump_ref_count || is_new_layer,
                &mut self.tree_elem_cache,
            )?;
        }
        Ok(())
    }

    /// Refresh one registered output's pinned path after an extension.
    fn update_registered_path(
        &mut self,
        leaf_idx: u64,
        tree_extension: &TreeExtension<C>,
        byte_layer_exts: &[ByteLayerExtension],
        old_n_leaf_tuples: u64,
        n_leaf_tuples: u64,
    ) -> Result<()> {
        // Only a leaf included by this extension takes new pins; existing
        // assignments already hold theirs.
        let bump_ref_count = leaf_idx >= old_n_leaf_tuples && leaf_idx < n_leaf_tuples;
        cache_leaf_chunk(
            leaf_idx / self.curve_tree.b_width() as u64,
            self.curve_tree.b_width(),
            &tree_extension.leaves,
            n_leaf_tuples,
            bump_ref_count,
            &mut self.leaf_cache,
        )?;
        self.cache_path_chunks(
            leaf_idx,
            byte_layer_exts,
            old_n_leaf_tuples,
            n_leaf_tuples,
            bump_ref_count,
        )
    }

    /// Add one pin to every chunk of the current right edge.
    fn bump_tail_refs(&mut self, n_leaf_tuples: u64) -> Result<()> {
        if n_leaf_tuples == 0 {
            return Ok(());
        }
        let last_leaf_idx = n_leaf_tuples - 1;
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, last_leaf_idx);

        let leaf_chunk = self.leaf_cache.get_mut(&chunk_indexes[0]).ok_or_else(|| {
            TreeSyncError::CacheConsistency("tail leaf chunk not cached".into())
        })?;
        leaf_chunk.ref_count += 1;

        for layer_idx in 0..chunk_indexes.len() - 1 {
            let chunk_idx = chunk_indexes[layer_idx + 1];
            let chunk = self
                .tree_elem_cache
                .get_mut(&layer_idx)
                .and_then(|layer| layer.get_mut(&chunk_idx))
                .ok_or_else(|| {
                    TreeSyncError::CacheConsistency(format!(
                        "tail chunk {chunk_idx} of layer {layer_idx} not cached"
                    ))
                })?;
            chunk.ref_count += 1;
        }
        Ok(())
    }

    /// Drop the pins a block placed on the right edge as of its leaf count.
    fn deque_block(&mut self, n_leaf_tuples: u64) -> Result<()> {
        if n_leaf_tuples == 0 {
            return Ok(());
        }
        let last_leaf_idx = n_leaf_tuples - 1;
        remove_leaf_chunk_ref(
            last_leaf_idx / self.curve_tree.b_width() as u64,
            &mut self.leaf_cache,
        )?;
        self.remove_path_chunks_refs(last_leaf_idx, n_leaf_tuples)
    }

    /// Drop one pin from every layer chunk along `leaf_idx`'s path in a tree
    /// of `n_leaf_tuples` leaves.
    fn remove_path_chunks_refs(&mut self, leaf_idx: u64, n_leaf_tuples: u64) -> Result<()> {
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, leaf_idx);
        for layer_idx in 0..chunk_indexes.len().saturating_sub(1) {
            remove_path_chunk_ref(
                layer_idx,
                chunk_indexes[layer_idx + 1],
                &mut self.tree_elem_cache,
            )?;
        }
        Ok(())
    }

    /// Truncate the cached tail leaf chunk to the reduced tree's occupancy.
    fn shrink_cached_last_leaf_chunk(&mut self, n_leaf_tuples: u64) -> Result<()> {
        let offset = (n_leaf_tuples % self.curve_tree.b_width() as u64) as usize;
        if offset == 0 {
            return Ok(());
        }
        let chunk_idx = (n_leaf_tuples - 1) / self.curve_tree.b_width() as u64;
        let chunk = self.leaf_cache.get_mut(&chunk_idx).ok_or_else(|| {
            TreeSyncError::CacheConsistency(format!("tail leaf chunk {chunk_idx} not cached"))
        })?;
        if chunk.leaves.len() < offset {
            return Err(TreeSyncError::CacheConsistency(format!(
                "tail leaf chunk holds {} of {offset} leaves",
                chunk.leaves.len()
            )));
        }
        chunk.leaves.truncate(offset);
        Ok(())
    }

    /// Truncate every layer's cached tail chunk to the reduced size and
    /// overwrite its last element with the regrown edge hash.
    fn reduce_cached_last_chunks(
        &mut self,
        n_leaf_tuples: u64,
        edge_hashes: &[[u8; ENCODED_LEN]],
    ) -> Result<()> {
        let chunk_indexes = self
            .curve_tree
            .get_child_chunk_indexes(n_leaf_tuples, n_leaf_tuples - 1);
        let n_elems_per_layer = self.curve_tree.n_elems_per_layer(n_leaf_tuples);
        if edge_hashes.len() != n_elems_per_layer.len() {
            return Err(TreeSyncError::CacheConsistency(format!(
                "{} edge hashes for {} layers",
                edge_hashes.len(),
                n_elems_per_layer.len()
            )));
        }

        for (layer_idx, &n_layer_elems) in n_elems_per_layer.iter().enumerate() {
            let chunk_width = if layer_idx % 2 == 0 {
                self.curve_tree.a_width()
            } else {
                self.curve_tree.b_width()
            };
            let chunk_idx = chunk_indexes[layer_idx + 1];
            let new_size = (n_layer_elems - chunk_idx * chunk_width as u64) as usize;
            let chunk = self
                .tree_elem_cache
                .get_mut(&layer_idx)
                .and_then(|layer| layer.get_mut(&chunk_idx))
                .ok_or_else(|| {
                    TreeSyncError::CacheConsistency(format!(
                        "tail chunk {chunk_idx} of layer {layer_idx} not cached"
                    ))
                })?;
            if chunk.tree_elems.len() < new_size {
                return Err(TreeSyncError::CacheConsistency(format!(
                    "tail chunk of layer {layer_idx} holds {} of {new_size} elements",
                    chunk.tree_elems.len()
                )));
            }
            chunk.tree_elems.truncate(new_size);
            let last = chunk.tree_elems.last_mut().ok_or_else(|| {
                TreeSyncError::CacheConsistency(format!("empty tail chunk in layer {layer_idx}"))
            })?;
            *last = edge_hashes[layer_idx];
        }
        Ok(())
    }
}

fn bad_cached_point(layer_idx: usize, err: curvetree::CycleError) -> TreeSyncError {
    TreeSyncError::CacheConsistency(format!("cached point in layer {layer_idx} is invalid: {err}"))
}

/// Flatten an extension's typed layer hashes into byte encodings, in global
/// layer order.
fn extension_to_byte_layers<C: CurveCycle>(
    tree_extension: &TreeExtension<C>,
) -> Vec<ByteLayerExtension> {
    let n_layers =
        tree_extension.a_layer_extensions.len() + tree_extension.b_layer_extensions.len();
    let mut byte_layers = Vec::with_capacity(n_layers);
    for layer_idx in 0..n_layers {
        if layer_idx % 2 == 0 {
            let ext = &tree_extension.b_layer_extensions[layer_idx / 2];
            byte_layers.push(ByteLayerExtension {
                start_idx: ext.start_idx,
                update_existing_last_hash: ext.update_existing_last_hash,
                hashes: ext
                    .hashes
                    .iter()
                    .map(<C::B as CurveOps>::point_to_bytes)
                    .collect(),
            });
        } else {
            let ext = &tree_extension.a_layer_extensions[layer_idx / 2];
            byte_layers.push(ByteLayerExtension {
                start_idx: ext.start_idx,
                update_existing_last_hash: ext.update_existing_last_hash,
                hashes: ext
                    .hashes
                    .iter()
                    .map(<C::A as CurveOps>::point_to_bytes)
                    .collect(),
            });
        }
    }
    byte_layers
}
