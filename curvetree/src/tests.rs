use curvetree_cycle::{CurveOps, PallasOps, PastaCycle, VestaOps};
use proptest::prelude::*;

use crate::{
    CurveTree, CurveTreeError, LastChunks, MemTree, OutputContext, OutputPair, Path,
    leaf::{flatten_leaves, leaf_tuple},
    test_utils::{small_pasta_tree, test_output_pair, test_outputs},
};

fn grow(
    tree: &CurveTree<PastaCycle>,
    mut mem: MemTree<PastaCycle>,
    ids: core::ops::Range<u64>,
) -> MemTree<PastaCycle> {
    let last_chunks = mem.get_last_chunks(tree).unwrap();
    let ext = tree
        .get_tree_extension(&last_chunks, test_outputs(ids))
        .unwrap();
    mem.apply_extension(tree, &ext).unwrap();
    mem
}

fn grown_tree(tree: &CurveTree<PastaCycle>, n: u64) -> MemTree<PastaCycle> {
    grow(tree, MemTree::new(), 0..n)
}

#[test]
fn single_batch_growth_validates_at_boundary_sizes() {
    let tree = small_pasta_tree();
    // Sizes straddling each chunk and layer capacity of widths a=3, b=5.
    for n in [1, 2, 4, 5, 6, 14, 15, 16, 74, 75, 76, 225, 226] {
        let mem = grown_tree(&tree, n);
        mem.validate(&tree).unwrap();
        assert_eq!(mem.n_leaf_tuples(), n);
        assert_eq!(mem.n_layers(), tree.n_layers(n));
        assert!(mem.root_bytes().unwrap().is_some());
    }
}

#[test]
fn incremental_growth_matches_one_shot() {
    let tree = small_pasta_tree();
    let batches = [1u64, 4, 1, 10, 5, 55];
    let mut mem = MemTree::new();
    let mut next = 0;
    for batch in batches {
        mem = grow(&tree, mem, next..next + batch);
        next += batch;
    }
    mem.validate(&tree).unwrap();

    let one_shot = grown_tree(&tree, next);
    assert_eq!(mem.root_bytes().unwrap(), one_shot.root_bytes().unwrap());
}

#[test]
fn filling_the_first_leaf_chunk_roots_without_continuation() {
    let tree = small_pasta_tree();
    let mem = grown_tree(&tree, 5);
    assert_eq!(mem.n_layers(), 1);

    let tuples: Vec<_> = (0..5)
        .map(|i| leaf_tuple::<PastaCycle>(tree.a_ops(), &test_output_pair(i)).unwrap())
        .collect();
    let expected = tree
        .b_ops()
        .hash_grow(
            tree.b_ops().hash_init_point(),
            0,
            &[],
            &flatten_leaves::<PastaCycle>(&tuples),
        )
        .unwrap();
    assert_eq!(
        mem.root_bytes().unwrap().unwrap(),
        VestaOps::point_to_bytes(&expected)
    );
}

#[test]
fn sixth_output_opens_a_new_chunk_without_touching_the_first() {
    let tree = small_pasta_tree();
    let mut mem = grown_tree(&tree, 5);
    let first_parent = mem.b_layers[0][0];

    let last_chunks = mem.get_last_chunks(&tree).unwrap();
    let ext = tree
        .get_tree_extension(&last_chunks, test_outputs(5..6))
        .unwrap();
    let leaf_ext = &ext.b_layer_extensions[0];
    assert_eq!(leaf_ext.start_idx, 1);
    assert!(!leaf_ext.update_existing_last_hash);

    mem.apply_extension(&tree, &ext).unwrap();
    mem.validate(&tree).unwrap();
    assert_eq!(mem.b_layers[0][0], first_parent);
    assert_eq!(mem.n_layers(), 2);
}

#[test]
fn growing_a_partial_chunk_rewrites_only_the_last_parent() {
    let tree = small_pasta_tree();
    let mut mem = grown_tree(&tree, 7);
    let untouched = mem.b_layers[0][0];

    let last_chunks = mem.get_last_chunks(&tree).unwrap();
    let ext = tree
        .get_tree_extension(&last_chunks, test_outputs(7..9))
        .unwrap();
    let leaf_ext = &ext.b_layer_extensions[0];
    assert_eq!(leaf_ext.start_idx, 1);
    assert!(leaf_ext.update_existing_last_hash);
    assert_eq!(leaf_ext.hashes.len(), 1);

    mem.apply_extension(&tree, &ext).unwrap();
    mem.validate(&tree).unwrap();
    assert_eq!(mem.b_layers[0][0], untouched);
}

#[test]
fn undecodable_outputs_are_skipped() {
    let tree = small_pasta_tree();
    let mut outputs = test_outputs(0..3);
    outputs.insert(
        1,
        OutputContext {
            output_id: 99,
            output_pair: OutputPair {
                output_pubkey: [0xFF; 32],
                commitment: [0xFF; 32],
            },
        },
    );

    let ext = tree
        .get_tree_extension(&LastChunks::default(), outputs)
        .unwrap();
    assert_eq!(ext.leaves.tuples.len(), 3);
    assert!(ext.leaves.tuples.iter().all(|o| o.output_id != 99));
}

#[test]
fn extension_with_no_outputs_is_empty() {
    let tree = small_pasta_tree();
    let ext = tree
        .get_tree_extension(&LastChunks::default(), Vec::new())
        .unwrap();
    assert!(ext.leaves.tuples.is_empty());
    assert!(ext.a_layer_extensions.is_empty());
    assert!(ext.b_layer_extensions.is_empty());
}

#[test]
fn trimming_matches_a_tree_grown_to_the_smaller_size() {
    let tree = small_pasta_tree();
    for (grown, trimmed) in [(6, 5), (16, 15), (16, 3), (76, 75), (76, 74), (80, 1)] {
        let mut mem = grown_tree(&tree, grown);
        let instructions = tree.get_trim_instructions(grown, trimmed).unwrap();
        let edge = mem.get_path_at_size(&tree, trimmed, trimmed - 1).unwrap();
        let reduction = tree.get_tree_reduction(&instructions, &edge).unwrap();
        mem.apply_reduction(&reduction).unwrap();
        mem.validate(&tree).unwrap();

        let fresh = grown_tree(&tree, trimmed);
        assert_eq!(mem.n_layers(), fresh.n_layers());
        assert_eq!(mem.root_bytes().unwrap(), fresh.root_bytes().unwrap());
    }
}

#[test]
fn trimming_to_zero_empties_the_tree() {
    let tree = small_pasta_tree();
    let mut mem = grown_tree(&tree, 7);
    let instructions = tree.get_trim_instructions(7, 0).unwrap();
    let reduction = tree
        .get_tree_reduction(&instructions, &Path::default())
        .unwrap();
    mem.apply_reduction(&reduction).unwrap();
    assert_eq!(mem.n_leaf_tuples(), 0);
    assert_eq!(mem.root_bytes().unwrap(), None);
}

#[test]
fn trimming_upward_is_rejected() {
    let tree = small_pasta_tree();
    let err = tree.get_trim_instructions(5, 6).unwrap_err();
    assert!(matches!(err, CurveTreeError::InvalidInput(_)));
}

#[test]
fn paths_audit_against_the_tree() {
    let tree = small_pasta_tree();
    for n in [1u64, 5, 16, 76] {
        let mem = grown_tree(&tree, n);
        let mut leaf_idxs = vec![0, n / 2, n - 1];
        leaf_idxs.dedup();
        for leaf_idx in leaf_idxs {
            let path = mem.get_path(&tree, leaf_idx).unwrap();
            let output = test_output_pair(leaf_idx);
            assert!(tree.audit_path(&path, &output, n).unwrap());
        }
    }
}

#[test]
fn audit_rejects_a_corrupted_path() {
    let tree = small_pasta_tree();
    let mem = grown_tree(&tree, 16);

    // Leaf 7's chunk covers tuples [5, 10); corrupting a sibling leaf breaks
    // the recomputed chunk hash.
    let mut path = mem.get_path(&tree, 7).unwrap();
    path.leaves[0] = test_output_pair(999);
    assert!(!tree.audit_path(&path, &test_output_pair(7), 16).unwrap());

    // An output outside the chunk is not proven by it.
    let path = mem.get_path(&tree, 7).unwrap();
    assert!(!tree.audit_path(&path, &test_output_pair(12), 16).unwrap());
}

#[test]
fn recomputed_path_hashes_match_stored_layers() {
    let tree = small_pasta_tree();
    let n = 76;
    let mem = grown_tree(&tree, n);
    let leaf_idx = 33;

    let path = mem.get_path(&tree, leaf_idx).unwrap();
    let hashes = tree.calc_hashes_from_path(&path, false).unwrap();
    let chunk_indexes = tree.get_child_chunk_indexes(n, leaf_idx);
    assert_eq!(hashes.len(), tree.n_layers(n));

    for (layer_idx, hash) in hashes.iter().enumerate() {
        let elem_idx = chunk_indexes[layer_idx] as usize;
        let stored = if layer_idx % 2 == 0 {
            VestaOps::point_to_bytes(&mem.b_layers[layer_idx / 2][elem_idx])
        } else {
            PallasOps::point_to_bytes(&mem.a_layers[layer_idx / 2][elem_idx])
        };
        assert_eq!(*hash, stored);
    }
}

#[test]
fn output_refs_are_stable_and_distinct() {
    let a = test_output_pair(1);
    let b = test_output_pair(2);
    assert_eq!(a.output_ref(), a.output_ref());
    assert_ne!(a.output_ref(), b.output_ref());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn grow_then_trim_equals_direct_growth(n in 1u64..90, extra in 1u64..40) {
        let tree = small_pasta_tree();
        let mut mem = grown_tree(&tree, n + extra);
        let instructions = tree.get_trim_instructions(n + extra, n).unwrap();
        let edge = mem.get_path_at_size(&tree, n, n - 1).unwrap();
        let reduction = tree.get_tree_reduction(&instructions, &edge).unwrap();
        mem.apply_reduction(&reduction).unwrap();
        mem.validate(&tree).unwrap();

        let fresh = grown_tree(&tree, n);
        prop_assert_eq!(mem.root_bytes().unwrap(), fresh.root_bytes().unwrap());
    }

    #[test]
    fn batched_growth_is_independent_of_batching(batches in prop::collection::vec(1u64..12, 1..6)) {
        let tree = small_pasta_tree();
        let mut mem = MemTree::new();
        let mut next = 0;
        for batch in batches {
            mem = grow(&tree, mem, next..next + batch);
            next += batch;
        }
        mem.validate(&tree).unwrap();

        let one_shot = grown_tree(&tree, next);
        prop_assert_eq!(mem.root_bytes().unwrap(), one_shot.root_bytes().unwrap());
    }
}
