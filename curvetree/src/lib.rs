//! Append-mostly accumulator over a two-curve cycle.
//!
//! Outputs are summarized as three-scalar leaf tuples and hashed in fixed
//! width chunks. Each chunk hash becomes a child scalar of the next layer,
//! with the hashing curve alternating between the two curves of the cycle,
//! until a layer holds a single hash: the root. Chunk hashes are updatable,
//! so growing the tree touches only the partially filled chunk on the right
//! edge of each layer, and trimming regrows that edge from the surviving
//! children.
//!
//! [`CurveTree`] holds the parameters and the stateless grow/trim/path
//! algorithms; [`MemTree`] is a complete in-memory tree used to apply
//! extensions and reductions and to serve paths.

#![warn(missing_docs)]

mod error;
mod extension;
mod hash;
mod leaf;
mod mem_tree;
mod output;
mod path;
mod reduction;
mod tree;

pub mod test_utils;

#[cfg(test)]
mod tests;

pub use curvetree_cycle::{
    APoint, AScalar, BPoint, BScalar, CurveCycle, CurveOps, CycleError, ENCODED_LEN, PallasOps,
    PastaCycle, VestaOps,
};
pub use error::{CurveTreeError, Result};
pub use extension::{LastChunkData, LastChunks, LayerExtension, Leaves, TreeExtension};
pub use leaf::{LEAF_TUPLE_SIZE, LeafTuple, flatten_leaves, leaf_tuple};
pub use mem_tree::MemTree;
pub use output::{OutputContext, OutputPair, OutputRef};
pub use path::{Path, PathIndexes};
pub use reduction::{LayerReduction, TreeReduction, TrimInstructions, TrimLayerInstructions};
pub use tree::{CurveTree, DEFAULT_A_WIDTH, DEFAULT_B_WIDTH};
