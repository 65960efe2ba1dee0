//! Concrete cycle over the Pasta curves (Pallas / Vesta).
//!
//! Pallas' base field is Vesta's scalar field and vice versa, so the two form
//! a clean 2-cycle. Generators and init points are derived with
//! domain-separated hash-to-curve, making every instance with the same
//! generator count reproduce identical hashes.

use pasta_curves::{
    arithmetic::{Coordinates, CurveAffine, CurveExt},
    group::{
        Curve, GroupEncoding,
        ff::{Field, PrimeField},
    },
    pallas, vesta,
};

use crate::{CurveCycle, CurveOps, CycleError, ENCODED_LEN, Result};

macro_rules! pasta_curve_ops {
    (
        $(#[$attr:meta])*
        $ops:ident, $curve:ident, $gen_domain:literal, $init_domain:literal, $point_domain:literal
    ) => {
        $(#[$attr])*
        #[derive(Clone, Debug)]
        pub struct $ops {
            generators: Vec<$curve::Point>,
            init: $curve::Point,
        }

        impl $ops {
            /// Derive `n_generators` chunk generators and the init point.
            pub fn new(n_generators: usize) -> Self {
                let hasher = <$curve::Point as CurveExt>::hash_to_curve($gen_domain);
                let generators = (0..n_generators)
                    .map(|i| hasher(&(i as u32).to_le_bytes()))
                    .collect();
                let init = <$curve::Point as CurveExt>::hash_to_curve($init_domain)(b"init");
                Self { generators, init }
            }
        }

        impl CurveOps for $ops {
            type Scalar = $curve::Scalar;
            type Point = $curve::Point;
            type CycleScalar = $curve::Base;

            fn n_generators(&self) -> usize {
                self.generators.len()
            }

            fn hash_init_point(&self) -> Self::Point {
                self.init
            }

            fn zero_scalar() -> Self::Scalar {
                <$curve::Scalar as Field>::ZERO
            }

            fn hash_grow(
                &self,
                existing: Self::Point,
                offset: usize,
                prior_children: &[Self::Scalar],
                new_children: &[Self::Scalar],
            ) -> Result<Self::Point> {
                if new_children.is_empty() {
                    return Err(CycleError::InvalidInput(
                        "hash_grow requires at least one new child".into(),
                    ));
                }
                if prior_children.len() > new_children.len() {
                    return Err(CycleError::InvalidInput(format!(
                        "{} prior children for {} new children",
                        prior_children.len(),
                        new_children.len()
                    )));
                }
                if offset + new_children.len() > self.generators.len() {
                    return Err(CycleError::GeneratorRange(format!(
                        "children [{}, {}) with {} generators",
                        offset,
                        offset + new_children.len(),
                        self.generators.len()
                    )));
                }
                let mut hash = existing;
                for (i, new_child) in new_children.iter().enumerate() {
                    let prior = prior_children
                        .get(i)
                        .copied()
                        .unwrap_or(<$curve::Scalar as Field>::ZERO);
                    let delta = *new_child - prior;
                    if !bool::from(delta.is_zero()) {
                        hash += self.generators[offset + i] * delta;
                    }
                }
                Ok(hash)
            }

            fn point_to_cycle_scalar(point: &Self::Point) -> Self::CycleScalar {
                Option::<Coordinates<$curve::Affine>>::from(point.to_affine().coordinates())
                    .map(|coords| *coords.x())
                    .unwrap_or(<$curve::Base as Field>::ZERO)
            }

            fn hash_to_point(&self, bytes: &[u8]) -> Self::Point {
                <$curve::Point as CurveExt>::hash_to_curve($point_domain)(bytes)
            }

            fn point_to_bytes(point: &Self::Point) -> [u8; ENCODED_LEN] {
                point.to_bytes()
            }

            fn point_from_bytes(bytes: &[u8; ENCODED_LEN]) -> Result<Self::Point> {
                Option::from(<$curve::Point as GroupEncoding>::from_bytes(bytes))
                    .ok_or_else(|| CycleError::InvalidPoint(hex::encode(bytes)))
            }

            fn scalar_to_bytes(scalar: &Self::Scalar) -> [u8; ENCODED_LEN] {
                scalar.to_repr()
            }
        }
    };
}

pasta_curve_ops!(
    /// Chunk hashing over Pallas, curve A of the Pasta cycle.
    PallasOps,
    pallas,
    "curvetree:pallas-generators",
    "curvetree:pallas-init",
    "curvetree:pallas-point"
);

pasta_curve_ops!(
    /// Chunk hashing over Vesta, curve B of the Pasta cycle.
    VestaOps,
    vesta,
    "curvetree:vesta-generators",
    "curvetree:vesta-init",
    "curvetree:vesta-point"
);

/// The Pallas/Vesta cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PastaCycle;

impl CurveCycle for PastaCycle {
    type A = PallasOps;
    type B = VestaOps;
}
