//! A complete in-memory tree.
//!
//! Stores every layer in full. Used to apply extensions and reductions, to
//! capture last-chunk state for the next extension, and to serve membership
//! paths. Callers needing a bounded-memory view should layer a cache on top
//! instead of holding one of these per chain tip.

use curvetree_cycle::{APoint, BPoint, BScalar, CurveCycle, CurveOps, ENCODED_LEN};

use crate::{
    CurveTreeError, Result,
    extension::{LastChunkData, LastChunks, LayerExtension, TreeExtension},
    leaf::{LEAF_TUPLE_SIZE, leaf_tuple},
    output::OutputPair,
    path::Path,
    reduction::TreeReduction,
    tree::CurveTree,
};

/// Every layer of a curve-cycle tree, held in memory.
#[derive(Clone, Debug)]
pub struct MemTree<C: CurveCycle> {
    pub(crate) leaf_outputs: Vec<OutputPair>,
    pub(crate) leaf_scalars: Vec<BScalar<C>>,
    pub(crate) a_layers: Vec<Vec<APoint<C>>>,
    pub(crate) b_layers: Vec<Vec<BPoint<C>>>,
}

impl<C: CurveCycle> Default for MemTree<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CurveCycle> MemTree<C> {
    /// An empty tree.
    pub fn new() -> Self {
        Self {
            leaf_outputs: Vec::new(),
            leaf_scalars: Vec::new(),
            a_layers: Vec::new(),
            b_layers: Vec::new(),
        }
    }

    /// Number of leaf tuples in the tree.
    pub fn n_leaf_tuples(&self) -> u64 {
        self.leaf_outputs.len() as u64
    }

    /// Number of layers above the leaf layer.
    pub fn n_layers(&self) -> usize {
        self.a_layers.len() + self.b_layers.len()
    }

    /// Canonical encoding of the root hash, `None` for an empty tree.
    pub fn root_bytes(&self) -> Result<Option<[u8; ENCODED_LEN]>> {
        let n_layers = self.n_layers();
        if n_layers == 0 {
            return Ok(None);
        }
        let top_layer_idx = n_layers - 1;
        if top_layer_idx % 2 == 0 {
            let layer = &self.b_layers[top_layer_idx / 2];
            if layer.len() != 1 {
                return Err(CurveTreeError::InconsistentTree(format!(
                    "top layer holds {} hashes",
                    layer.len()
                )));
            }
            Ok(Some(<C::B as CurveOps>::point_to_bytes(&layer[0])))
        } else {
            let layer = &self.a_layers[top_layer_idx / 2];
            if layer.len() != 1 {
                return Err(CurveTreeError::InconsistentTree(format!(
                    "top layer holds {} hashes",
                    layer.len()
                )));
            }
            Ok(Some(<C::A as CurveOps>::point_to_bytes(&layer[0])))
        }
    }

    /// Capture the last-chunk state of every layer, as
    /// [`CurveTree::get_tree_extension`] expects it.
    pub fn get_last_chunks(&self, tree: &CurveTree<C>) -> Result<LastChunks<C>> {
        let mut last_chunks = LastChunks::default();
        if self.n_leaf_tuples() == 0 {
            return Ok(last_chunks);
        }

        for layer_idx in 0..self.n_layers() {
            if layer_idx % 2 == 0 {
                let parent_layer = self.b_layers.get(layer_idx / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {layer_idx}"))
                })?;
                let last_parent = *parent_layer.last().ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("empty layer {layer_idx}"))
                })?;
                let (child_layer_size, child_offset, last_child) = if layer_idx == 0 {
                    let last_child = *self.leaf_scalars.last().ok_or_else(|| {
                        CurveTreeError::InconsistentTree("no leaf scalars".into())
                    })?;
                    (
                        self.leaf_scalars.len() as u64,
                        self.leaf_scalars.len() % tree.leaf_chunk_width(),
                        last_child,
                    )
                } else {
                    let child_layer =
                        self.a_layers.get((layer_idx - 1) / 2).ok_or_else(|| {
                            CurveTreeError::InconsistentTree(format!(
                                "missing layer {}",
                                layer_idx - 1
                            ))
                        })?;
                    let last = child_layer.last().ok_or_else(|| {
                        CurveTreeError::InconsistentTree(format!("empty layer {}", layer_idx - 1))
                    })?;
                    (
                        child_layer.len() as u64,
                        child_layer.len() % tree.b_width(),
                        <C::A as CurveOps>::point_to_cycle_scalar(last),
                    )
                };
                last_chunks.b_last_chunks.push(LastChunkData {
                    child_offset,
                    last_child,
                    last_parent,
                    child_layer_size,
                    parent_layer_size: parent_layer.len() as u64,
                });
            } else {
                let parent_layer = self.a_layers.get(layer_idx / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {layer_idx}"))
                })?;
                let last_parent = *parent_layer.last().ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("empty layer {layer_idx}"))
                })?;
                let child_layer = self.b_layers.get((layer_idx - 1) / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {}", layer_idx - 1))
                })?;
                let last = child_layer.last().ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("empty layer {}", layer_idx - 1))
                })?;
                last_chunks.a_last_chunks.push(LastChunkData {
                    child_offset: child_layer.len() % tree.a_width(),
                    last_child: <C::B as CurveOps>::point_to_cycle_scalar(last),
                    last_parent,
                    child_layer_size: child_layer.len() as u64,
                    parent_layer_size: parent_layer.len() as u64,
                });
            }
        }
        Ok(last_chunks)
    }

    /// Apply an extension built against this tree's current state.
    pub fn apply_extension(
        &mut self,
        tree: &CurveTree<C>,
        extension: &TreeExtension<C>,
    ) -> Result<()> {
        if extension.leaves.start_leaf_tuple_idx != self.n_leaf_tuples() {
            return Err(CurveTreeError::InconsistentTree(format!(
                "extension starts at leaf tuple {}, tree has {}",
                extension.leaves.start_leaf_tuple_idx,
                self.n_leaf_tuples()
            )));
        }
        if extension.leaves.tuples.is_empty() {
            return Ok(());
        }

        for output in &extension.leaves.tuples {
            let tuple = leaf_tuple::<C>(tree.a_ops(), &output.output_pair)?;
            self.leaf_outputs.push(output.output_pair);
            self.leaf_scalars.push(tuple.o_x);
            self.leaf_scalars.push(tuple.i_x);
            self.leaf_scalars.push(tuple.c_x);
        }

        for (layer_idx, layer_ext) in extension.b_layer_extensions.iter().enumerate() {
            apply_layer_extension(&mut self.b_layers, layer_idx, layer_ext)?;
        }
        for (layer_idx, layer_ext) in extension.a_layer_extensions.iter().enumerate() {
            apply_layer_extension(&mut self.a_layers, layer_idx, layer_ext)?;
        }
        Ok(())
    }

    /// Apply a trim computed by [`CurveTree::get_tree_reduction`].
    pub fn apply_reduction(&mut self, reduction: &TreeReduction) -> Result<()> {
        let new_n = reduction.new_total_leaf_tuples;
        if new_n > self.n_leaf_tuples() {
            return Err(CurveTreeError::InvalidInput(format!(
                "reduction to {new_n} leaf tuples, tree has {}",
                self.n_leaf_tuples()
            )));
        }
        self.leaf_outputs.truncate(new_n as usize);
        self.leaf_scalars.truncate(new_n as usize * LEAF_TUPLE_SIZE);

        let n_layers = reduction.layer_reductions.len();
        for (layer_idx, layer) in reduction.layer_reductions.iter().enumerate() {
            if layer_idx % 2 == 0 {
                let hashes = self.b_layers.get_mut(layer_idx / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {layer_idx}"))
                })?;
                hashes.truncate(layer.new_total_parents as usize);
                let last = hashes.last_mut().ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("layer {layer_idx} trimmed to empty"))
                })?;
                *last = <C::B as CurveOps>::point_from_bytes(&layer.new_last_hash)?;
            } else {
                let hashes = self.a_layers.get_mut(layer_idx / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {layer_idx}"))
                })?;
                hashes.truncate(layer.new_total_parents as usize);
                let last = hashes.last_mut().ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("layer {layer_idx} trimmed to empty"))
                })?;
                *last = <C::A as CurveOps>::point_from_bytes(&layer.new_last_hash)?;
            }
        }

        self.b_layers.truncate(n_layers.div_ceil(2));
        self.a_layers.truncate(n_layers / 2);
        Ok(())
    }

    /// Membership path of `leaf_tuple_idx` at the tree's current size.
    pub fn get_path(&self, tree: &CurveTree<C>, leaf_tuple_idx: u64) -> Result<Path<C>> {
        self.get_path_at_size(tree, self.n_leaf_tuples(), leaf_tuple_idx)
    }

    /// Membership path of `leaf_tuple_idx` as it would look in a tree of
    /// `n_leaf_tuples` leaves. Layers and chunks must already hold at least
    /// that much data; used to slice out the right edge ahead of a trim.
    pub fn get_path_at_size(
        &self,
        tree: &CurveTree<C>,
        n_leaf_tuples: u64,
        leaf_tuple_idx: u64,
    ) -> Result<Path<C>> {
        if n_leaf_tuples > self.n_leaf_tuples() {
            return Err(CurveTreeError::InvalidInput(format!(
                "path at size {n_leaf_tuples} from a tree of {}",
                self.n_leaf_tuples()
            )));
        }
        let path_indexes = tree.get_path_indexes(n_leaf_tuples, leaf_tuple_idx)?;

        let mut path = Path::default();
        let (leaf_start, leaf_end) = path_indexes.leaf_range;
        path.leaves = self.leaf_outputs[leaf_start as usize..leaf_end as usize].to_vec();

        for (layer_idx, &(start, end)) in path_indexes.layer_ranges.iter().enumerate() {
            if layer_idx % 2 == 0 {
                let layer = self.b_layers.get(layer_idx / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {layer_idx}"))
                })?;
                path.b_layer_chunks
                    .push(layer[start as usize..end as usize].to_vec());
            } else {
                let layer = self.a_layers.get(layer_idx / 2).ok_or_else(|| {
                    CurveTreeError::InconsistentTree(format!("missing layer {layer_idx}"))
                })?;
                path.a_layer_chunks
                    .push(layer[start as usize..end as usize].to_vec());
            }
        }
        Ok(path)
    }

    /// Recompute the whole tree bottom up and compare it against the stored
    /// layers. Errors on the first divergence.
    pub fn validate(&self, tree: &CurveTree<C>) -> Result<()> {
        let n = self.n_leaf_tuples();
        let n_layers = tree.n_layers(n);
        if self.leaf_scalars.len() != self.leaf_outputs.len() * LEAF_TUPLE_SIZE {
            return Err(CurveTreeError::InconsistentTree(format!(
                "{} leaf scalars for {} outputs",
                self.leaf_scalars.len(),
                self.leaf_outputs.len()
            )));
        }
        if self.b_layers.len() != n_layers.div_ceil(2) || self.a_layers.len() != n_layers / 2 {
            return Err(CurveTreeError::InconsistentTree(format!(
                "{} + {} layers stored, {n_layers} expected",
                self.b_layers.len(),
                self.a_layers.len()
            )));
        }

        for (tuple_idx, output) in self.leaf_outputs.iter().enumerate() {
            let tuple = leaf_tuple::<C>(tree.a_ops(), output)?;
            let stored = &self.leaf_scalars[tuple_idx * LEAF_TUPLE_SIZE..][..LEAF_TUPLE_SIZE];
            if stored != &[tuple.o_x, tuple.i_x, tuple.c_x][..] {
                return Err(CurveTreeError::InconsistentTree(format!(
                    "leaf tuple {tuple_idx} diverges from its output"
                )));
            }
        }

        for layer_idx in 0..n_layers {
            if layer_idx % 2 == 0 {
                let child_scalars: Vec<BScalar<C>> = if layer_idx == 0 {
                    self.leaf_scalars.clone()
                } else {
                    self.a_layers[(layer_idx - 1) / 2]
                        .iter()
                        .map(<C::A as CurveOps>::point_to_cycle_scalar)
                        .collect()
                };
                let width = if layer_idx == 0 {
                    tree.leaf_chunk_width()
                } else {
                    tree.b_width()
                };
                let stored = &self.b_layers[layer_idx / 2];
                validate_layer(tree.b_ops(), &child_scalars, width, stored, layer_idx)?;
            } else {
                let child_scalars: Vec<_> = self.b_layers[(layer_idx - 1) / 2]
                    .iter()
                    .map(<C::B as CurveOps>::point_to_cycle_scalar)
                    .collect();
                let stored = &self.a_layers[layer_idx / 2];
                validate_layer(tree.a_ops(), &child_scalars, tree.a_width(), stored, layer_idx)?;
            }
        }
        Ok(())
    }
}

fn apply_layer_extension<Op: CurveOps>(
    layers: &mut Vec<Vec<Op::Point>>,
    layer_idx: usize,
    layer_ext: &LayerExtension<Op>,
) -> Result<()> {
    if layer_idx > layers.len() {
        return Err(CurveTreeError::InconsistentTree(format!(
            "extension skips past layer {}",
            layers.len()
        )));
    }
    if layer_idx == layers.len() {
        layers.push(Vec::new());
    }
    let layer = &mut layers[layer_idx];

    let start_idx = layer_ext.start_idx as usize;
    let expected_start = if layer_ext.update_existing_last_hash {
        layer.len().checked_sub(1)
    } else {
        Some(layer.len())
    };
    if expected_start != Some(start_idx) {
        return Err(CurveTreeError::InconsistentTree(format!(
            "layer extension starts at {start_idx}, layer holds {} hashes",
            layer.len()
        )));
    }

    layer.truncate(start_idx);
    layer.extend(layer_ext.hashes.iter().copied());
    Ok(())
}

fn validate_layer<Op: CurveOps>(
    ops: &Op,
    child_scalars: &[Op::Scalar],
    chunk_width: usize,
    stored: &[Op::Point],
    layer_idx: usize,
) -> Result<()> {
    let mut expected = Vec::with_capacity(child_scalars.len().div_ceil(chunk_width));
    for chunk in child_scalars.chunks(chunk_width) {
        expected.push(crate::hash::get_new_parent(ops, chunk)?);
    }
    if expected.len() != stored.len() || expected.iter().zip(stored).any(|(e, s)| e != s) {
        return Err(CurveTreeError::InconsistentTree(format!(
            "layer {layer_idx} diverges from its children"
        )));
    }
    Ok(())
}
