//! Leaf tuple derivation.

use curvetree_cycle::{BScalar, CurveCycle, CurveOps, Result as CycleResult};

use crate::output::OutputPair;

/// Number of scalars one output contributes to the leaf layer.
pub const LEAF_TUPLE_SIZE: usize = 3;

/// The three curve B scalars summarizing one output: the x-coordinates of
/// the one-time key `O`, its key image generator `I`, and the commitment `C`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafTuple<C: CurveCycle> {
    /// x-coordinate of the one-time output key.
    pub o_x: BScalar<C>,
    /// x-coordinate of the key image generator derived from the output key.
    pub i_x: BScalar<C>,
    /// x-coordinate of the amount commitment.
    pub c_x: BScalar<C>,
}

/// Derive the leaf tuple for an output.
///
/// `I` is obtained by hashing the one-time key's encoding to a curve A point,
/// binding the key image generator to the output key. Errors if either point
/// encoding of the pair is invalid; such outputs never enter the tree.
pub fn leaf_tuple<C: CurveCycle>(a_ops: &C::A, output: &OutputPair) -> CycleResult<LeafTuple<C>> {
    let o = <C::A as CurveOps>::point_from_bytes(&output.output_pubkey)?;
    let c = <C::A as CurveOps>::point_from_bytes(&output.commitment)?;
    let i = a_ops.hash_to_point(&output.output_pubkey);
    Ok(LeafTuple {
        o_x: <C::A as CurveOps>::point_to_cycle_scalar(&o),
        i_x: <C::A as CurveOps>::point_to_cycle_scalar(&i),
        c_x: <C::A as CurveOps>::point_to_cycle_scalar(&c),
    })
}

/// Flatten tuples into the leaf layer's scalar sequence.
pub fn flatten_leaves<C: CurveCycle>(tuples: &[LeafTuple<C>]) -> Vec<BScalar<C>> {
    let mut flattened = Vec::with_capacity(tuples.len() * LEAF_TUPLE_SIZE);
    for tuple in tuples {
        flattened.push(tuple.o_x);
        flattened.push(tuple.i_x);
        flattened.push(tuple.c_x);
    }
    flattened
}
