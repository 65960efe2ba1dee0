//! Deterministic fixtures shared by tests and benches.

use curvetree_cycle::{CurveOps, PallasOps, PastaCycle, VestaOps};

use crate::{CurveTree, LEAF_TUPLE_SIZE, OutputContext, OutputPair};

/// Curve A chunk width of [`small_pasta_tree`].
pub const TEST_A_WIDTH: usize = 3;
/// Curve B chunk width of [`small_pasta_tree`].
pub const TEST_B_WIDTH: usize = 5;

/// A Pasta tree with small chunk widths so a handful of outputs already
/// spans several layers.
pub fn small_pasta_tree() -> CurveTree<PastaCycle> {
    pasta_tree_with_widths(TEST_A_WIDTH, TEST_B_WIDTH)
}

/// A Pasta tree over arbitrary chunk widths, with exactly as many generators
/// as the widths need.
pub fn pasta_tree_with_widths(a_width: usize, b_width: usize) -> CurveTree<PastaCycle> {
    CurveTree::new(
        PallasOps::new(a_width),
        VestaOps::new(LEAF_TUPLE_SIZE * b_width),
        a_width,
        b_width,
    )
    .expect("test widths are valid")
}

/// A deterministic output with valid point encodings, keyed by `seed`.
pub fn test_output_pair(seed: u64) -> OutputPair {
    let ops = PallasOps::new(0);
    let digest = blake3::hash(&seed.to_le_bytes());
    let o = ops.hash_to_point(&[digest.as_bytes().as_slice(), b"output"].concat());
    let c = ops.hash_to_point(&[digest.as_bytes().as_slice(), b"commitment"].concat());
    OutputPair {
        output_pubkey: PallasOps::point_to_bytes(&o),
        commitment: PallasOps::point_to_bytes(&c),
    }
}

/// Outputs with ids and seeds drawn from `ids`.
pub fn test_outputs(ids: core::ops::Range<u64>) -> Vec<OutputContext> {
    ids.map(|output_id| OutputContext {
        output_id,
        output_pair: test_output_pair(output_id),
    })
    .collect()
}
