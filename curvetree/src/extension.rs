//! Growing the tree: extension types and the extension builder.

use curvetree_cycle::{CurveCycle, CurveOps};

use crate::{
    CurveTreeError, Result,
    hash::{hash_layer, next_child_scalars},
    leaf::{LEAF_TUPLE_SIZE, flatten_leaves, leaf_tuple},
    output::OutputContext,
    tree::CurveTree,
};

/// New parent hashes for one layer.
#[derive(Clone, Debug)]
pub struct LayerExtension<Op: CurveOps> {
    /// Position in the layer of `hashes[0]`.
    pub start_idx: u64,
    /// True when `hashes[0]` replaces the layer's current last hash rather
    /// than appending after it.
    pub update_existing_last_hash: bool,
    /// The new hashes, contiguous from `start_idx`.
    pub hashes: Vec<Op::Point>,
}

/// The outputs appended to the leaf layer by an extension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Leaves {
    /// Leaf tuple index of the first new output.
    pub start_leaf_tuple_idx: u64,
    /// The new outputs, in insertion order. Outputs that failed to decode
    /// are already excluded.
    pub tuples: Vec<OutputContext>,
}

/// Everything needed to grow a tree: the new leaves plus one extension per
/// layer, bottom up. `b_layer_extensions[i]` covers layer `2i`,
/// `a_layer_extensions[i]` covers layer `2i + 1`.
#[derive(Clone, Debug)]
pub struct TreeExtension<C: CurveCycle> {
    /// New leaf layer outputs.
    pub leaves: Leaves,
    /// Extensions of odd layers.
    pub a_layer_extensions: Vec<LayerExtension<C::A>>,
    /// Extensions of even layers.
    pub b_layer_extensions: Vec<LayerExtension<C::B>>,
}

/// State of one layer's partially filled last chunk, captured before an
/// extension is built.
///
/// For the parent layer of the leaves (`layer 0`), child counts and offsets
/// are in scalars, not tuples.
#[derive(Clone, Debug)]
pub struct LastChunkData<Op: CurveOps> {
    /// Number of children occupying the last chunk, 0 when it is exactly
    /// full.
    pub child_offset: usize,
    /// The last child scalar folded into the last chunk hash.
    pub last_child: Op::Scalar,
    /// The last parent hash of this layer.
    pub last_parent: Op::Point,
    /// Total number of children in the child layer.
    pub child_layer_size: u64,
    /// Total number of hashes in this layer.
    pub parent_layer_size: u64,
}

/// Last-chunk state for every layer of the tree, bottom up.
/// `b_last_chunks[i]` describes layer `2i`, `a_last_chunks[i]` layer
/// `2i + 1`. Both empty for an empty tree.
#[derive(Clone, Debug)]
pub struct LastChunks<C: CurveCycle> {
    /// Odd layer states.
    pub a_last_chunks: Vec<LastChunkData<C::A>>,
    /// Even layer states.
    pub b_last_chunks: Vec<LastChunkData<C::B>>,
}

impl<C: CurveCycle> Default for LastChunks<C> {
    fn default() -> Self {
        Self {
            a_last_chunks: Vec::new(),
            b_last_chunks: Vec::new(),
        }
    }
}

impl<C: CurveCycle> CurveTree<C> {
    /// Build the extension that grows the tree by `new_outputs`.
    ///
    /// `last_chunks` must describe the tree as it currently stands (default
    /// for an empty tree). Outputs whose point encodings do not decode are
    /// skipped; the returned leaves hold only the outputs that entered the
    /// tree. The returned extension reaches up to the tree's new root.
    pub fn get_tree_extension(
        &self,
        last_chunks: &LastChunks<C>,
        new_outputs: Vec<OutputContext>,
    ) -> Result<TreeExtension<C>> {
        let a_last_chunks = &last_chunks.a_last_chunks;
        let b_last_chunks = &last_chunks.b_last_chunks;

        let start_leaf_tuple_idx = b_last_chunks
            .first()
            .map_or(0, |c| c.child_layer_size / LEAF_TUPLE_SIZE as u64);

        let mut tree_extension = TreeExtension {
            leaves: Leaves {
                start_leaf_tuple_idx,
                tuples: Vec::with_capacity(new_outputs.len()),
            },
            a_layer_extensions: Vec::new(),
            b_layer_extensions: Vec::new(),
        };

        let mut leaf_tuples = Vec::with_capacity(new_outputs.len());
        for output in new_outputs {
            // Outputs with invalid point encodings never enter the tree.
            if let Ok(tuple) = leaf_tuple::<C>(self.a_ops(), &output.output_pair) {
                leaf_tuples.push(tuple);
                tree_extension.leaves.tuples.push(output);
            }
        }
        if leaf_tuples.is_empty() {
            return Ok(tree_extension);
        }

        let flattened_leaves = flatten_leaves::<C>(&leaf_tuples);
        let leaf_parents = hash_layer(
            self.b_ops(),
            b_last_chunks.first(),
            &flattened_leaves,
            start_leaf_tuple_idx * LEAF_TUPLE_SIZE as u64,
            self.leaf_chunk_width(),
        )?;
        let reached_root = leaf_parents.hashes.len() == 1 && leaf_parents.start_idx == 0;
        tree_extension.b_layer_extensions.push(leaf_parents);
        if reached_root {
            return Ok(tree_extension);
        }

        // Climb, alternating curves, until a layer collapses to one hash at
        // position 0.
        let mut parent_is_a = true;
        let mut a_last_idx = 0;
        let mut b_last_idx = 0;
        loop {
            if parent_is_a {
                let child_ext = tree_extension
                    .b_layer_extensions
                    .get(b_last_idx)
                    .ok_or_else(|| {
                        CurveTreeError::InconsistentTree("missing curve B child extension".into())
                    })?;
                let parent_chunk = a_last_chunks.get(a_last_idx);
                let child_scalars =
                    next_child_scalars::<C::B>(b_last_chunks.get(b_last_idx), parent_chunk.is_some(), child_ext)?;
                let children_start_idx = child_ext.start_idx;

                let layer_ext = hash_layer(
                    self.a_ops(),
                    parent_chunk,
                    &child_scalars,
                    children_start_idx,
                    self.a_width(),
                )?;
                let reached_root = layer_ext.hashes.len() == 1 && layer_ext.start_idx == 0;
                tree_extension.a_layer_extensions.push(layer_ext);
                if reached_root {
                    return Ok(tree_extension);
                }
                b_last_idx += 1;
            } else {
                let child_ext = tree_extension
                    .a_layer_extensions
                    .get(a_last_idx)
                    .ok_or_else(|| {
                        CurveTreeError::InconsistentTree("missing curve A child extension".into())
                    })?;
                let parent_chunk = b_last_chunks.get(b_last_idx);
                let child_scalars =
                    next_child_scalars::<C::A>(a_last_chunks.get(a_last_idx), parent_chunk.is_some(), child_ext)?;
                let children_start_idx = child_ext.start_idx;

                let layer_ext = hash_layer(
                    self.b_ops(),
                    parent_chunk,
                    &child_scalars,
                    children_start_idx,
                    self.b_width(),
                )?;
                let reached_root = layer_ext.hashes.len() == 1 && layer_ext.start_idx == 0;
                tree_extension.b_layer_extensions.push(layer_ext);
                if reached_root {
                    return Ok(tree_extension);
                }
                a_last_idx += 1;
            }
            parent_is_a = !parent_is_a;
        }
    }
}
