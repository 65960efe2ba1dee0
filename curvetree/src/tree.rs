//! Tree parameters and index arithmetic.

use curvetree_cycle::{CurveCycle, CurveOps, PallasOps, PastaCycle, VestaOps};

use crate::{CurveTreeError, Result, leaf::LEAF_TUPLE_SIZE};

/// Chunk width of curve A layers in the default Pasta tree.
pub const DEFAULT_A_WIDTH: usize = 38;
/// Chunk width of curve B layers in the default Pasta tree. Leaf chunks hold
/// this many tuples.
pub const DEFAULT_B_WIDTH: usize = 18;

/// Parameters of a curve-cycle tree: the two hashing instances and the chunk
/// width of each curve's layers.
///
/// Layer numbering: the leaf layer sits below layer 0. Curve B hashes the
/// leaf layer and the children of every even layer; curve A hashes the
/// children of every odd layer. Chunk widths count child elements per parent
/// hash, so the leaf layer's chunk width is `LEAF_TUPLE_SIZE * b_width`
/// scalars for `b_width` tuples.
#[derive(Clone, Debug)]
pub struct CurveTree<C: CurveCycle> {
    a_ops: C::A,
    b_ops: C::B,
    a_width: usize,
    b_width: usize,
}

impl CurveTree<PastaCycle> {
    /// The default Pasta tree with production chunk widths.
    pub fn new_pasta() -> Self {
        Self {
            a_ops: PallasOps::new(DEFAULT_A_WIDTH),
            b_ops: VestaOps::new(LEAF_TUPLE_SIZE * DEFAULT_B_WIDTH),
            a_width: DEFAULT_A_WIDTH,
            b_width: DEFAULT_B_WIDTH,
        }
    }
}

impl<C: CurveCycle> CurveTree<C> {
    /// Build a tree over custom widths.
    ///
    /// Errors if either width is below 2, or if an ops instance carries fewer
    /// generators than its widest chunk needs (`a_width` for curve A,
    /// `LEAF_TUPLE_SIZE * b_width` for curve B).
    pub fn new(a_ops: C::A, b_ops: C::B, a_width: usize, b_width: usize) -> Result<Self> {
        if a_width < 2 || b_width < 2 {
            return Err(CurveTreeError::InvalidInput(format!(
                "chunk widths must be at least 2, got a={a_width} b={b_width}"
            )));
        }
        if a_ops.n_generators() < a_width {
            return Err(CurveTreeError::InvalidInput(format!(
                "curve A has {} generators for chunk width {a_width}",
                a_ops.n_generators()
            )));
        }
        let leaf_chunk_width = LEAF_TUPLE_SIZE * b_width;
        if b_ops.n_generators() < leaf_chunk_width {
            return Err(CurveTreeError::InvalidInput(format!(
                "curve B has {} generators for leaf chunk width {leaf_chunk_width}",
                b_ops.n_generators()
            )));
        }
        Ok(Self {
            a_ops,
            b_ops,
            a_width,
            b_width,
        })
    }

    /// Curve A hashing instance.
    pub fn a_ops(&self) -> &C::A {
        &self.a_ops
    }

    /// Curve B hashing instance.
    pub fn b_ops(&self) -> &C::B {
        &self.b_ops
    }

    /// Chunk width of curve A layers.
    pub fn a_width(&self) -> usize {
        self.a_width
    }

    /// Chunk width of curve B layers, in leaf tuples for the leaf layer.
    pub fn b_width(&self) -> usize {
        self.b_width
    }

    /// Leaf layer chunk width in scalars.
    pub fn leaf_chunk_width(&self) -> usize {
        LEAF_TUPLE_SIZE * self.b_width
    }

    /// Number of hashes in each layer of a tree with `n_leaf_tuples` leaves,
    /// bottom up. Empty for an empty tree; the last entry is always 1 (the
    /// root layer).
    pub fn n_elems_per_layer(&self, n_leaf_tuples: u64) -> Vec<u64> {
        let mut n_elems = Vec::new();
        if n_leaf_tuples == 0 {
            return n_elems;
        }
        let mut n_children = n_leaf_tuples;
        let mut parent_is_b = true;
        loop {
            let width = if parent_is_b {
                self.b_width
            } else {
                self.a_width
            } as u64;
            let n_parents = (n_children - 1) / width + 1;
            n_elems.push(n_parents);
            if n_parents == 1 {
                break;
            }
            n_children = n_parents;
            parent_is_b = !parent_is_b;
        }
        n_elems
    }

    /// Number of layers in a tree with `n_leaf_tuples` leaves.
    pub fn n_layers(&self, n_leaf_tuples: u64) -> usize {
        self.n_elems_per_layer(n_leaf_tuples).len()
    }

    /// Chunk index of `leaf_tuple_idx`'s path at every layer: entry 0 is the
    /// leaf chunk index (equal to the parent hash index in layer 0), entry k
    /// is the chunk index within layer k-1, and the final entry is always 0
    /// for the root. Empty when `leaf_tuple_idx` is out of range.
    pub fn get_child_chunk_indexes(&self, n_leaf_tuples: u64, leaf_tuple_idx: u64) -> Vec<u64> {
        if leaf_tuple_idx >= n_leaf_tuples {
            return Vec::new();
        }
        let n_layers = self.n_layers(n_leaf_tuples);
        let mut chunk_indexes = Vec::with_capacity(n_layers + 1);
        let mut child_idx = leaf_tuple_idx;
        let mut parent_is_b = true;
        for _ in 0..n_layers {
            let width = if parent_is_b {
                self.b_width
            } else {
                self.a_width
            } as u64;
            child_idx /= width;
            chunk_indexes.push(child_idx);
            parent_is_b = !parent_is_b;
        }
        chunk_indexes.push(0);
        chunk_indexes
    }
}
