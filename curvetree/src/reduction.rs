//! Trimming the tree by regrowing its right edge.
//!
//! A trim never inverts chunk hashes. The surviving children of each layer's
//! new last chunk are re-hashed from scratch, bottom up, exactly as a fresh
//! tree of the reduced size would hash them.

use curvetree_cycle::{CurveCycle, ENCODED_LEN};

use crate::{CurveTreeError, Path, Result, tree::CurveTree};

/// How one layer shrinks under a trim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrimLayerInstructions {
    /// Number of hashes the layer keeps.
    pub new_total_parents: u64,
    /// Range `[start, end)` of surviving children making up the layer's new
    /// last chunk. In leaf tuples for layer 0, in child hashes above.
    pub child_range: (u64, u64),
}

/// Full trim plan for reducing a tree to a smaller leaf count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrimInstructions {
    /// Leaf tuple count before the trim.
    pub old_total_leaf_tuples: u64,
    /// Leaf tuple count after the trim.
    pub new_total_leaf_tuples: u64,
    /// Per-layer shrink instructions, bottom up. Layers past the end are
    /// dropped entirely. Empty when trimming to an empty tree.
    pub layers: Vec<TrimLayerInstructions>,
}

/// New last hash and size of one surviving layer after a trim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerReduction {
    /// Number of hashes the layer keeps.
    pub new_total_parents: u64,
    /// Canonical encoding of the layer's regrown last hash.
    pub new_last_hash: [u8; ENCODED_LEN],
}

/// The computed result of a trim, ready to apply to a stored tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeReduction {
    /// Leaf tuple count after the trim.
    pub new_total_leaf_tuples: u64,
    /// Surviving layers, bottom up. Layers past the end are dropped.
    pub layer_reductions: Vec<LayerReduction>,
}

impl<C: CurveCycle> CurveTree<C> {
    /// Plan a trim from `old_total_leaf_tuples` down to
    /// `new_total_leaf_tuples`.
    pub fn get_trim_instructions(
        &self,
        old_total_leaf_tuples: u64,
        new_total_leaf_tuples: u64,
    ) -> Result<TrimInstructions> {
        if new_total_leaf_tuples > old_total_leaf_tuples {
            return Err(CurveTreeError::InvalidInput(format!(
                "cannot trim {old_total_leaf_tuples} leaf tuples up to {new_total_leaf_tuples}"
            )));
        }
        if new_total_leaf_tuples == 0 {
            return Ok(TrimInstructions {
                old_total_leaf_tuples,
                new_total_leaf_tuples: 0,
                layers: Vec::new(),
            });
        }

        // The surviving children of every layer's new last chunk are exactly
        // the path chunks of the new last leaf.
        let path_indexes =
            self.get_path_indexes(new_total_leaf_tuples, new_total_leaf_tuples - 1)?;
        let n_elems_per_layer = self.n_elems_per_layer(new_total_leaf_tuples);

        let mut layers = Vec::with_capacity(n_elems_per_layer.len());
        for (layer_idx, &new_total_parents) in n_elems_per_layer.iter().enumerate() {
            let child_range = if layer_idx == 0 {
                path_indexes.leaf_range
            } else {
                path_indexes.layer_ranges[layer_idx - 1]
            };
            layers.push(TrimLayerInstructions {
                new_total_parents,
                child_range,
            });
        }

        Ok(TrimInstructions {
            old_total_leaf_tuples,
            new_total_leaf_tuples,
            layers,
        })
    }

    /// Execute a trim plan against the surviving right edge of the tree.
    ///
    /// `edge_path` must be the path of the new last leaf, sliced to the
    /// instructions' child ranges. Each layer's new last hash is regrown from
    /// the chunk below it, with the chunk's last element replaced by the
    /// just-regrown child hash.
    pub fn get_tree_reduction(
        &self,
        instructions: &TrimInstructions,
        edge_path: &Path<C>,
    ) -> Result<TreeReduction> {
        if instructions.new_total_leaf_tuples == 0 {
            return Ok(TreeReduction {
                new_total_leaf_tuples: 0,
                layer_reductions: Vec::new(),
            });
        }

        if edge_path.n_layers() != instructions.layers.len() {
            return Err(CurveTreeError::InvalidInput(format!(
                "edge path has {} layers, trim instructions have {}",
                edge_path.n_layers(),
                instructions.layers.len()
            )));
        }
        for (layer_idx, layer) in instructions.layers.iter().enumerate() {
            let expected = (layer.child_range.1 - layer.child_range.0) as usize;
            let actual = if layer_idx == 0 {
                Some(edge_path.leaves.len())
            } else if (layer_idx - 1) % 2 == 0 {
                edge_path.b_layer_chunks.get((layer_idx - 1) / 2).map(Vec::len)
            } else {
                edge_path.a_layer_chunks.get((layer_idx - 1) / 2).map(Vec::len)
            };
            let Some(actual) = actual else {
                return Err(CurveTreeError::InvalidInput(format!(
                    "edge path missing chunk below layer {layer_idx}"
                )));
            };
            if expected != actual {
                return Err(CurveTreeError::InvalidInput(format!(
                    "edge chunk below layer {layer_idx} has {actual} children, expected {expected}"
                )));
            }
        }

        let new_last_hashes = self.calc_hashes_from_path(edge_path, true)?;

        let layer_reductions = instructions
            .layers
            .iter()
            .zip(new_last_hashes)
            .map(|(layer, new_last_hash)| LayerReduction {
                new_total_parents: layer.new_total_parents,
                new_last_hash,
            })
            .collect();

        Ok(TreeReduction {
            new_total_leaf_tuples: instructions.new_total_leaf_tuples,
            layer_reductions,
        })
    }
}
