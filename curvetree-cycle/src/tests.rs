use pasta_curves::{
    group::{Group, ff::Field},
    pallas, vesta,
};

use crate::{CurveOps, CycleError, PallasOps, VestaOps};

fn scalars(vals: &[u64]) -> Vec<vesta::Scalar> {
    vals.iter().map(|v| vesta::Scalar::from(*v)).collect()
}

#[test]
fn grow_in_steps_matches_one_shot() {
    let ops = VestaOps::new(8);
    let children = scalars(&[3, 1, 4, 1, 5]);

    let one_shot = ops
        .hash_grow(ops.hash_init_point(), 0, &[], &children)
        .unwrap();

    let mut stepped = ops
        .hash_grow(ops.hash_init_point(), 0, &[], &children[..2])
        .unwrap();
    stepped = ops.hash_grow(stepped, 2, &[], &children[2..]).unwrap();

    assert_eq!(one_shot, stepped);
}

#[test]
fn replacing_last_child_matches_fresh_hash() {
    let ops = VestaOps::new(8);
    let children = scalars(&[9, 8, 7]);
    let full = ops
        .hash_grow(ops.hash_init_point(), 0, &[], &children)
        .unwrap();

    let replacement = vesta::Scalar::from(70u64);
    let patched = ops
        .hash_grow(full, 2, &[children[2]], &[replacement])
        .unwrap();

    let expected = ops
        .hash_grow(
            ops.hash_init_point(),
            0,
            &[],
            &scalars(&[9, 8]).into_iter().chain([replacement]).collect::<Vec<_>>(),
        )
        .unwrap();
    assert_eq!(patched, expected);
}

#[test]
fn chunk_past_generator_range_rejected() {
    let ops = VestaOps::new(4);
    let children = scalars(&[1, 2, 3]);
    let err = ops
        .hash_grow(ops.hash_init_point(), 2, &[], &children)
        .unwrap_err();
    assert!(matches!(err, CycleError::GeneratorRange(_)));
}

#[test]
fn more_priors_than_new_children_rejected() {
    let ops = VestaOps::new(4);
    let err = ops
        .hash_grow(
            ops.hash_init_point(),
            0,
            &scalars(&[1, 2]),
            &scalars(&[3]),
        )
        .unwrap_err();
    assert!(matches!(err, CycleError::InvalidInput(_)));
}

#[test]
fn empty_new_children_rejected() {
    let ops = VestaOps::new(4);
    let err = ops
        .hash_grow(ops.hash_init_point(), 0, &[], &[])
        .unwrap_err();
    assert!(matches!(err, CycleError::InvalidInput(_)));
}

#[test]
fn identity_projects_to_zero() {
    let zero = PallasOps::point_to_cycle_scalar(&pallas::Point::identity());
    assert_eq!(zero, vesta::Scalar::ZERO);
    let zero = VestaOps::point_to_cycle_scalar(&vesta::Point::identity());
    assert_eq!(zero, pallas::Scalar::ZERO);
}

#[test]
fn layer_hashes_alternate_across_the_cycle() {
    let a_ops = PallasOps::new(4);
    let b_ops = VestaOps::new(4);

    let leaf_hash = b_ops
        .hash_grow(b_ops.hash_init_point(), 0, &[], &scalars(&[11, 22]))
        .unwrap();
    // The projected chunk hash is a curve A scalar with no conversion.
    let child: pallas::Scalar = VestaOps::point_to_cycle_scalar(&leaf_hash);
    let parent = a_ops
        .hash_grow(a_ops.hash_init_point(), 0, &[], &[child])
        .unwrap();
    assert_ne!(parent, pallas::Point::identity());
}

#[test]
fn point_bytes_round_trip() {
    let ops = PallasOps::new(2);
    let point = ops.hash_to_point(b"round trip");
    let bytes = PallasOps::point_to_bytes(&point);
    assert_eq!(PallasOps::point_from_bytes(&bytes).unwrap(), point);
}

#[test]
fn non_canonical_point_encoding_rejected() {
    let err = PallasOps::point_from_bytes(&[0xFF; 32]).unwrap_err();
    assert!(matches!(err, CycleError::InvalidPoint(_)));
}

#[test]
fn generators_are_distinct() {
    let ops = VestaOps::new(16);
    let bytes: Vec<_> = (0..16)
        .map(|i| {
            let g = ops
                .hash_grow(
                    vesta::Point::identity(),
                    i,
                    &[],
                    &[vesta::Scalar::ONE],
                )
                .unwrap();
            VestaOps::point_to_bytes(&g)
        })
        .collect();
    for i in 0..bytes.len() {
        for j in i + 1..bytes.len() {
            assert_ne!(bytes[i], bytes[j]);
        }
    }
}
