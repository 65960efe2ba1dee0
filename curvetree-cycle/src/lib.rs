//! Two-curve cycle primitives for alternating-hash tree layers.
//!
//! A 2-cycle pairs curves so that each curve's base field is the other's
//! scalar field: a chunk hash on one curve projects, via its affine
//! x-coordinate, directly into the scalar field of the other curve with no
//! field conversion. Chunk hashes are updatable Pedersen vector commitments,
//! so a partially filled chunk can be extended or have its last element
//! replaced in time proportional to the delta, not the chunk width.

#![warn(missing_docs)]

mod error;
mod pasta;

#[cfg(test)]
mod tests;

use core::fmt::Debug;

pub use error::{CycleError, Result};
pub use pasta::{PallasOps, PastaCycle, VestaOps};
pub use pasta_curves;

/// Width in bytes of serialized points and scalars.
pub const ENCODED_LEN: usize = 32;

/// Hashing operations over a single curve of a 2-cycle.
pub trait CurveOps: Clone + Debug {
    /// Scalar field element. Chunk hash inputs live here.
    type Scalar: Clone + Copy + PartialEq + Eq + Debug + Send + Sync;
    /// Curve point. Chunk hashes are points.
    type Point: Clone + Copy + PartialEq + Eq + Debug + Send + Sync;
    /// The partner curve's scalar field (this curve's base field).
    type CycleScalar;

    /// Number of generators available to [`CurveOps::hash_grow`]. Bounds the
    /// widest chunk this instance can hash.
    fn n_generators(&self) -> usize;

    /// Fixed blinding point added into every chunk hash so that an empty
    /// chunk does not hash to the group identity.
    fn hash_init_point(&self) -> Self::Point;

    /// The additive identity of the scalar field.
    fn zero_scalar() -> Self::Scalar;

    /// Extend or patch a chunk hash in place:
    ///
    /// `existing + sum_i (new_children[i] - prior_children[i]) * G[offset + i]`
    ///
    /// where `prior_children` is implicitly zero-padded to the length of
    /// `new_children`. Passing the init point as `existing` with `offset` 0
    /// and no priors hashes a fresh chunk; passing a previous chunk hash with
    /// the priors that occupied `[offset..]` replaces them.
    ///
    /// Errors if `new_children` is empty, if `prior_children` is longer than
    /// `new_children`, or if `offset + new_children.len()` exceeds
    /// [`CurveOps::n_generators`].
    fn hash_grow(
        &self,
        existing: Self::Point,
        offset: usize,
        prior_children: &[Self::Scalar],
        new_children: &[Self::Scalar],
    ) -> Result<Self::Point>;

    /// Project a point into the partner curve's scalar field via its affine
    /// x-coordinate. The identity maps to zero.
    fn point_to_cycle_scalar(point: &Self::Point) -> Self::CycleScalar;

    /// Deterministically map arbitrary bytes to a curve point.
    fn hash_to_point(&self, bytes: &[u8]) -> Self::Point;

    /// Serialize a point to its canonical 32-byte encoding.
    fn point_to_bytes(point: &Self::Point) -> [u8; ENCODED_LEN];

    /// Deserialize a point from its canonical 32-byte encoding.
    fn point_from_bytes(bytes: &[u8; ENCODED_LEN]) -> Result<Self::Point>;

    /// Serialize a scalar to its canonical 32-byte encoding.
    fn scalar_to_bytes(scalar: &Self::Scalar) -> [u8; ENCODED_LEN];
}

/// A pair of curves forming a 2-cycle.
///
/// Leaf data are points on curve A. Curve B hashes the leaf layer and every
/// even parent layer above it; curve A hashes the odd parent layers. The
/// cross constraints on the associated types guarantee that a chunk hash on
/// either curve is directly usable as a child scalar on the other.
pub trait CurveCycle: Clone + Copy + Debug + Default + PartialEq + Eq + Send + Sync + 'static {
    /// Curve hashing odd parent layers (1, 3, ...).
    type A: CurveOps<CycleScalar = <Self::B as CurveOps>::Scalar>;
    /// Curve hashing the leaf layer and even parent layers (0, 2, ...).
    type B: CurveOps<CycleScalar = <Self::A as CurveOps>::Scalar>;
}

/// Scalar field element of curve A of a cycle.
pub type AScalar<C> = <<C as CurveCycle>::A as CurveOps>::Scalar;
/// Point on curve A of a cycle.
pub type APoint<C> = <<C as CurveCycle>::A as CurveOps>::Point;
/// Scalar field element of curve B of a cycle.
pub type BScalar<C> = <<C as CurveCycle>::B as CurveOps>::Scalar;
/// Point on curve B of a cycle.
pub type BPoint<C> = <<C as CurveCycle>::B as CurveOps>::Point;
