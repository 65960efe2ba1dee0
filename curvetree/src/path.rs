//! Membership paths: index ranges, hash recomputation, and auditing.

use curvetree_cycle::{APoint, BPoint, CurveCycle, CurveOps, ENCODED_LEN};

use crate::{
    CurveTreeError, Result,
    hash::get_new_parent,
    leaf::{LEAF_TUPLE_SIZE, leaf_tuple},
    output::OutputPair,
    tree::CurveTree,
};

/// Half-open element ranges `[start, end)` covering one leaf's path chunk at
/// every layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathIndexes {
    /// Range of leaf tuples in the leaf's chunk.
    pub leaf_range: (u64, u64),
    /// Range of hashes in the path's chunk of each layer, bottom up. The
    /// last entry always covers just the root.
    pub layer_ranges: Vec<(u64, u64)>,
}

/// A full membership path: the leaf's chunk of outputs plus the path's chunk
/// of hashes at every layer. `b_layer_chunks[i]` is layer `2i`,
/// `a_layer_chunks[i]` is layer `2i + 1`.
#[derive(Clone, Debug)]
pub struct Path<C: CurveCycle> {
    /// Outputs sharing the leaf's chunk.
    pub leaves: Vec<OutputPair>,
    /// Odd layer chunks.
    pub a_layer_chunks: Vec<Vec<APoint<C>>>,
    /// Even layer chunks.
    pub b_layer_chunks: Vec<Vec<BPoint<C>>>,
}

impl<C: CurveCycle> Default for Path<C> {
    fn default() -> Self {
        Self {
            leaves: Vec::new(),
            a_layer_chunks: Vec::new(),
            b_layer_chunks: Vec::new(),
        }
    }
}

impl<C: CurveCycle> Path<C> {
    /// True when the path carries no data, e.g. for a registered output that
    /// has not entered the tree yet.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.a_layer_chunks.is_empty() && self.b_layer_chunks.is_empty()
    }

    /// Number of layers the path covers.
    pub fn n_layers(&self) -> usize {
        self.a_layer_chunks.len() + self.b_layer_chunks.len()
    }
}

impl<C: CurveCycle> CurveTree<C> {
    /// Element ranges of `leaf_tuple_idx`'s path in a tree with
    /// `n_leaf_tuples` leaves. Errors if the index is out of range.
    pub fn get_path_indexes(&self, n_leaf_tuples: u64, leaf_tuple_idx: u64) -> Result<PathIndexes> {
        if leaf_tuple_idx >= n_leaf_tuples {
            return Err(CurveTreeError::InvalidInput(format!(
                "leaf tuple {leaf_tuple_idx} out of range, tree has {n_leaf_tuples}"
            )));
        }

        let chunk_indexes = self.get_child_chunk_indexes(n_leaf_tuples, leaf_tuple_idx);
        let n_elems_per_layer = self.n_elems_per_layer(n_leaf_tuples);

        let leaf_start = chunk_indexes[0] * self.b_width() as u64;
        let leaf_range = (
            leaf_start,
            n_leaf_tuples.min(leaf_start + self.b_width() as u64),
        );

        // Layer i is chunked by the curve hashing layer i + 1: curve A for
        // even i, curve B for odd i.
        let mut layer_ranges = Vec::with_capacity(n_elems_per_layer.len());
        let mut parent_is_a = true;
        for (layer_idx, &n_layer_elems) in n_elems_per_layer.iter().enumerate() {
            let width = if parent_is_a {
                self.a_width()
            } else {
                self.b_width()
            } as u64;
            let start = chunk_indexes[layer_idx + 1] * width;
            layer_ranges.push((start, n_layer_elems.min(start + width)));
            parent_is_a = !parent_is_a;
        }

        Ok(PathIndexes {
            leaf_range,
            layer_ranges,
        })
    }

    /// Recompute the chunk hash at every layer of a path, bottom up, returned
    /// as canonical point encodings.
    ///
    /// With `replace_last_hash` set, the last element of each chunk is
    /// replaced by the hash computed for the layer below before hashing; this
    /// regrows the right edge of the tree from a trailing path and is the
    /// trim primitive. Without it, chunks are hashed as given, which is the
    /// audit primitive.
    pub fn calc_hashes_from_path(
        &self,
        path: &Path<C>,
        replace_last_hash: bool,
    ) -> Result<Vec<[u8; ENCODED_LEN]>> {
        if path.leaves.is_empty() || path.b_layer_chunks.is_empty() {
            return Err(CurveTreeError::InvalidInput("empty path".into()));
        }
        if path.leaves.len() > self.b_width() {
            return Err(CurveTreeError::InvalidInput(format!(
                "path has {} leaves for chunk width {}",
                path.leaves.len(),
                self.b_width()
            )));
        }

        let mut leaf_scalars = Vec::with_capacity(path.leaves.len() * LEAF_TUPLE_SIZE);
        for output in &path.leaves {
            let tuple = leaf_tuple::<C>(self.a_ops(), output)?;
            leaf_scalars.push(tuple.o_x);
            leaf_scalars.push(tuple.i_x);
            leaf_scalars.push(tuple.c_x);
        }

        let n_layers = path.n_layers();
        let mut a_hashes: Vec<APoint<C>> = Vec::with_capacity(path.a_layer_chunks.len());
        let mut b_hashes: Vec<BPoint<C>> = Vec::with_capacity(path.b_layer_chunks.len());
        b_hashes.push(get_new_parent(self.b_ops(), &leaf_scalars)?);

        for layer_idx in 1..n_layers {
            let child_chunk_idx = (layer_idx - 1) / 2;
            if layer_idx % 2 == 1 {
                let chunk = path.b_layer_chunks.get(child_chunk_idx).ok_or_else(|| {
                    CurveTreeError::InvalidInput(format!(
                        "path missing curve B chunk for layer {}",
                        layer_idx - 1
                    ))
                })?;
                let (last, rest) = chunk.split_last().ok_or_else(|| {
                    CurveTreeError::InvalidInput(format!("empty chunk at layer {}", layer_idx - 1))
                })?;
                let mut child_scalars: Vec<_> = rest
                    .iter()
                    .map(<C::B as CurveOps>::point_to_cycle_scalar)
                    .collect();
                let last = if replace_last_hash {
                    b_hashes[child_chunk_idx]
                } else {
                    *last
                };
                child_scalars.push(<C::B as CurveOps>::point_to_cycle_scalar(&last));
                a_hashes.push(get_new_parent(self.a_ops(), &child_scalars)?);
            } else {
                let chunk = path.a_layer_chunks.get(child_chunk_idx).ok_or_else(|| {
                    CurveTreeError::InvalidInput(format!(
                        "path missing curve A chunk for layer {}",
                        layer_idx - 1
                    ))
                })?;
                let (last, rest) = chunk.split_last().ok_or_else(|| {
                    CurveTreeError::InvalidInput(format!("empty chunk at layer {}", layer_idx - 1))
                })?;
                let mut child_scalars: Vec<_> = rest
                    .iter()
                    .map(<C::A as CurveOps>::point_to_cycle_scalar)
                    .collect();
                let last = if replace_last_hash {
                    a_hashes[child_chunk_idx]
                } else {
                    *last
                };
                child_scalars.push(<C::A as CurveOps>::point_to_cycle_scalar(&last));
                b_hashes.push(get_new_parent(self.b_ops(), &child_scalars)?);
            }
        }

        let mut hash_bytes = Vec::with_capacity(n_layers);
        for layer_idx in 0..n_layers {
            if layer_idx % 2 == 0 {
                hash_bytes.push(<C::B as CurveOps>::point_to_bytes(
                    &b_hashes[layer_idx / 2],
                ));
            } else {
                hash_bytes.push(<C::A as CurveOps>::point_to_bytes(
                    &a_hashes[layer_idx / 2],
                ));
            }
        }
        Ok(hash_bytes)
    }

    /// Verify that `path` proves `output`'s membership in a tree with
    /// `n_leaf_tuples` leaves.
    ///
    /// Recomputes each layer's chunk hash from the layer below and checks it
    /// appears in the chunk above. Returns `Ok(false)` on any mismatch;
    /// errors only when the path data itself cannot be hashed.
    pub fn audit_path(
        &self,
        path: &Path<C>,
        output: &OutputPair,
        n_leaf_tuples: u64,
    ) -> Result<bool> {
        if path.is_empty() {
            return Ok(false);
        }
        if path.n_layers() != self.n_layers(n_leaf_tuples) {
            return Ok(false);
        }
        if !path.leaves.contains(output) {
            return Ok(false);
        }

        let computed = self.calc_hashes_from_path(path, false)?;

        // Each computed hash must appear in its own layer's chunk; the top
        // one is the root itself.
        for (layer_idx, hash) in computed.iter().enumerate() {
            let present = if layer_idx % 2 == 0 {
                let Some(chunk) = path.b_layer_chunks.get(layer_idx / 2) else {
                    return Ok(false);
                };
                chunk
                    .iter()
                    .any(|p| <C::B as CurveOps>::point_to_bytes(p) == *hash)
            } else {
                let Some(chunk) = path.a_layer_chunks.get(layer_idx / 2) else {
                    return Ok(false);
                };
                chunk
                    .iter()
                    .any(|p| <C::A as CurveOps>::point_to_bytes(p) == *hash)
            };
            if !present {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
