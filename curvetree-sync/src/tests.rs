use curvetree::{
    MemTree, OutputContext, PastaCycle,
    test_utils::{small_pasta_tree, test_output_pair, test_outputs},
};
use proptest::prelude::*;

use crate::{BlockMeta, TreeSyncError, TreeSyncMemory};

fn block_hash(block_idx: u64) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&block_idx.to_le_bytes());
    hash
}

fn sync_block_ids(
    sync: &mut TreeSyncMemory<PastaCycle>,
    block_idx: u64,
    ids: core::ops::Range<u64>,
) {
    sync.sync_block(
        block_idx,
        block_hash(block_idx),
        block_hash(block_idx.wrapping_sub(1)),
        test_outputs(ids),
    )
    .unwrap();
}

fn mem_grown(tree: &curvetree::CurveTree<PastaCycle>, n: u64) -> MemTree<PastaCycle> {
    let mut mem = MemTree::new();
    let last_chunks = mem.get_last_chunks(tree).unwrap();
    let ext = tree.get_tree_extension(&last_chunks, test_outputs(0..n)).unwrap();
    mem.apply_extension(tree, &ext).unwrap();
    mem
}

#[test]
fn synced_root_matches_a_mem_tree() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree.clone(), 8).unwrap();
    sync_block_ids(&mut sync, 10, 0..4);
    sync_block_ids(&mut sync, 11, 4..7);
    sync_block_ids(&mut sync, 12, 7..23);

    assert_eq!(sync.n_leaf_tuples(), 23);
    assert_eq!(sync.n_synced_blocks(), 3);
    let mem = mem_grown(&tree, 23);
    assert_eq!(sync.get_tree_root().unwrap(), mem.root_bytes().unwrap());
}

#[test]
fn non_contiguous_blocks_are_rejected() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    sync_block_ids(&mut sync, 0, 0..3);

    let err = sync
        .sync_block(2, block_hash(2), block_hash(1), test_outputs(3..4))
        .unwrap_err();
    assert!(matches!(err, TreeSyncError::Contiguity(_)));

    let err = sync
        .sync_block(1, block_hash(1), [0xAB; 32], test_outputs(3..4))
        .unwrap_err();
    assert!(matches!(err, TreeSyncError::Contiguity(_)));

    // The failed syncs changed nothing.
    sync_block_ids(&mut sync, 1, 3..4);
    assert_eq!(sync.n_leaf_tuples(), 4);
}

#[test]
fn registered_output_path_matches_the_mem_tree_and_audits() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree.clone(), 8).unwrap();
    let output = test_output_pair(5);
    assert!(sync.register_output(&output, 11));

    sync_block_ids(&mut sync, 10, 0..4);
    sync_block_ids(&mut sync, 11, 4..9);
    sync_block_ids(&mut sync, 12, 9..17);

    let path = sync.get_output_path(&output).unwrap().unwrap();
    assert!(!path.is_empty());
    assert!(sync
        .curve_tree()
        .audit_path(&path, &output, sync.n_leaf_tuples())
        .unwrap());

    let mem = mem_grown(&tree, 17);
    let mem_path = mem.get_path(&tree, 5).unwrap();
    assert_eq!(path.leaves, mem_path.leaves);
    assert_eq!(path.a_layer_chunks, mem_path.a_layer_chunks);
    assert_eq!(path.b_layer_chunks, mem_path.b_layer_chunks);
}

#[test]
fn unregistered_and_unassigned_outputs() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    sync_block_ids(&mut sync, 0, 0..3);

    assert!(sync.get_output_path(&test_output_pair(77)).unwrap().is_none());

    let pending = test_output_pair(50);
    assert!(sync.register_output(&pending, 99));
    let path = sync.get_output_path(&pending).unwrap().unwrap();
    assert!(path.is_empty());
}

#[test]
fn register_refuses_duplicates_and_passed_unlocks() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    sync_block_ids(&mut sync, 5, 0..2);

    let output = test_output_pair(9);
    assert!(sync.register_output(&output, 6));
    assert!(!sync.register_output(&output, 6));

    // The tip is block 5; an output unlocked at or before it was missed.
    assert!(!sync.register_output(&test_output_pair(10), 5));
    assert!(!sync.register_output(&test_output_pair(11), 4));
}

#[test]
fn duplicate_output_assignment_keeps_the_first_position() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    let dup = test_output_pair(0);
    assert!(sync.register_output(&dup, 0));

    // The pair appears at leaf 0 and again at leaf 8, in different chunks.
    let mut outputs = test_outputs(0..8);
    outputs.push(OutputContext {
        output_id: 100,
        output_pair: dup,
    });
    sync.sync_block(0, block_hash(0), block_hash(u64::MAX), outputs)
        .unwrap();
    assert_eq!(sync.n_leaf_tuples(), 9);

    // Leaf 0's chunk spans tuples [0, 5); leaf 8's would span [5, 9).
    let path = sync.get_output_path(&dup).unwrap().unwrap();
    assert_eq!(path.leaves.len(), 5);
    assert_eq!(path.leaves[0], dup);
}

#[test]
fn unpinned_chunks_are_evicted_with_the_reorg_window() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 2).unwrap();
    sync_block_ids(&mut sync, 0, 0..5);
    sync_block_ids(&mut sync, 1, 5..10);
    sync_block_ids(&mut sync, 2, 10..15);

    // Block 0 left the window; nothing pins leaf chunk 0 anymore.
    assert_eq!(sync.n_synced_blocks(), 2);
    assert!(!sync.leaf_cache.contains_key(&0));
    assert!(sync.leaf_cache.contains_key(&1));
    assert!(sync.leaf_cache.contains_key(&2));
}

#[test]
fn registered_outputs_keep_their_chunks_past_eviction() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree.clone(), 2).unwrap();
    let output = test_output_pair(1);
    assert!(sync.register_output(&output, 0));

    sync_block_ids(&mut sync, 0, 0..5);
    sync_block_ids(&mut sync, 1, 5..10);
    sync_block_ids(&mut sync, 2, 10..15);

    assert!(sync.leaf_cache.contains_key(&0));
    let path = sync.get_output_path(&output).unwrap().unwrap();
    assert!(tree.audit_path(&path, &output, 15).unwrap());
}

#[test]
fn popping_restores_the_previous_root_and_unassigns() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree.clone(), 8).unwrap();
    sync_block_ids(&mut sync, 0, 0..4);
    let root_before = sync.get_tree_root().unwrap();

    let output = test_output_pair(100);
    assert!(sync.register_output(&output, 1));
    let mut outputs = test_outputs(4..7);
    outputs.push(OutputContext {
        output_id: 100,
        output_pair: output,
    });
    sync.sync_block(1, block_hash(1), block_hash(0), outputs)
        .unwrap();
    assert!(!sync.get_output_path(&output).unwrap().unwrap().is_empty());

    assert!(sync.pop_block().unwrap());
    assert_eq!(sync.n_leaf_tuples(), 4);
    assert_eq!(sync.get_tree_root().unwrap(), root_before);
    assert!(sync.get_output_path(&output).unwrap().unwrap().is_empty());

    // A competing block re-introduces the output at a different position.
    let mut outputs = vec![OutputContext {
        output_id: 200,
        output_pair: output,
    }];
    outputs.extend(test_outputs(40..42));
    sync.sync_block(1, block_hash(91), block_hash(0), outputs)
        .unwrap();
    let path = sync.get_output_path(&output).unwrap().unwrap();
    assert!(tree.audit_path(&path, &output, sync.n_leaf_tuples()).unwrap());
    // The output re-entered at leaf 4, position 4 of leaf chunk 0.
    assert_eq!(path.leaves[4], output);
}

#[test]
fn popping_across_a_layer_boundary() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree.clone(), 8).unwrap();
    sync_block_ids(&mut sync, 0, 0..5);
    let root_small = sync.get_tree_root().unwrap();
    sync_block_ids(&mut sync, 1, 5..20);
    let root_mid = sync.get_tree_root().unwrap();
    sync_block_ids(&mut sync, 2, 20..23);

    assert!(sync.pop_block().unwrap());
    assert_eq!(sync.get_tree_root().unwrap(), root_mid);
    assert!(sync.pop_block().unwrap());
    assert_eq!(sync.get_tree_root().unwrap(), root_small);
    assert_eq!(sync.n_leaf_tuples(), 5);

    // Layers the 20-leaf tree had are gone from the cache.
    let n_layers = tree.n_layers(5);
    assert!(sync.tree_elem_cache.keys().all(|layer| *layer < n_layers));
}

#[test]
fn the_anchor_block_cannot_be_popped() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    assert!(!sync.pop_block().unwrap());
    sync_block_ids(&mut sync, 0, 0..3);
    assert!(!sync.pop_block().unwrap());
    assert_eq!(sync.n_leaf_tuples(), 3);
}

#[test]
fn empty_blocks_sync_and_pop_cleanly() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    sync_block_ids(&mut sync, 0, 0..5);
    let root = sync.get_tree_root().unwrap();

    sync.sync_block(1, block_hash(1), block_hash(0), Vec::new())
        .unwrap();
    assert_eq!(sync.n_leaf_tuples(), 5);
    assert_eq!(sync.get_tree_root().unwrap(), root);

    assert!(sync.pop_block().unwrap());
    assert_eq!(sync.get_tree_root().unwrap(), root);
    assert_eq!(sync.n_synced_blocks(), 1);
}

#[test]
fn initialized_cache_syncs_and_pops_like_a_replayed_one() {
    let tree = small_pasta_tree();
    let checkpoint = mem_grown(&tree, 17);

    let mut sync = TreeSyncMemory::new(tree.clone(), 8).unwrap();
    sync.init(
        BlockMeta {
            block_idx: 7,
            block_hash: block_hash(7),
            n_leaf_tuples: 17,
        },
        &checkpoint.get_path(&tree, 16).unwrap(),
    )
    .unwrap();
    assert_eq!(sync.n_leaf_tuples(), 17);
    assert_eq!(
        sync.get_tree_root().unwrap(),
        checkpoint.root_bytes().unwrap()
    );

    // Grows from the checkpoint like a cache that replayed every block.
    sync_block_ids(&mut sync, 8, 17..23);
    let grown = mem_grown(&tree, 23);
    assert_eq!(sync.get_tree_root().unwrap(), grown.root_bytes().unwrap());

    // Pops back to the checkpoint; the anchor itself stays.
    assert!(sync.pop_block().unwrap());
    assert_eq!(sync.n_leaf_tuples(), 17);
    assert_eq!(
        sync.get_tree_root().unwrap(),
        checkpoint.root_bytes().unwrap()
    );
    assert!(!sync.pop_block().unwrap());
}

#[test]
fn init_refuses_a_non_empty_cache_and_a_malformed_path() {
    let tree = small_pasta_tree();
    let checkpoint = mem_grown(&tree, 17);
    let anchor = BlockMeta {
        block_idx: 7,
        block_hash: block_hash(7),
        n_leaf_tuples: 17,
    };

    let mut sync = TreeSyncMemory::new(tree.clone(), 4).unwrap();
    sync_block_ids(&mut sync, 0, 0..2);
    let err = sync
        .init(anchor, &checkpoint.get_path(&tree, 16).unwrap())
        .unwrap_err();
    assert!(matches!(err, TreeSyncError::InvalidInput(_)));

    // A path of the wrong leaf's chunk does not match the edge shape.
    let mut sync = TreeSyncMemory::new(tree.clone(), 4).unwrap();
    let err = sync
        .init(anchor, &checkpoint.get_path(&tree, 0).unwrap())
        .unwrap_err();
    assert!(matches!(err, TreeSyncError::InvalidInput(_)));
    assert_eq!(sync.n_synced_blocks(), 0);
}

#[test]
fn force_added_output_serves_its_path_from_a_checkpoint() {
    let tree = small_pasta_tree();
    let checkpoint = mem_grown(&tree, 17);
    let output = test_output_pair(3);

    let mut sync = TreeSyncMemory::new(tree.clone(), 4).unwrap();
    assert!(sync.register_output(&output, 0));
    sync.init(
        BlockMeta {
            block_idx: 7,
            block_hash: block_hash(7),
            n_leaf_tuples: 17,
        },
        &checkpoint.get_path(&tree, 16).unwrap(),
    )
    .unwrap();

    sync.force_add_output_path(&output, 3, &checkpoint.get_path(&tree, 3).unwrap())
        .unwrap();
    let path = sync.get_output_path(&output).unwrap().unwrap();
    assert!(tree.audit_path(&path, &output, 17).unwrap());

    // The pinned path stays current as the tree grows past the checkpoint.
    sync_block_ids(&mut sync, 8, 17..20);
    let path = sync.get_output_path(&output).unwrap().unwrap();
    assert!(tree.audit_path(&path, &output, 20).unwrap());

    // A second force-add for the same output is refused.
    let err = sync
        .force_add_output_path(&output, 3, &checkpoint.get_path(&tree, 3).unwrap())
        .unwrap_err();
    assert!(matches!(err, TreeSyncError::InvalidInput(_)));
}

#[test]
fn a_corrupted_cache_fails_the_next_sync_instead_of_going_stale() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    sync_block_ids(&mut sync, 0, 0..3);

    // Drop layer 0's pinned tail chunk behind the cache's back. The next
    // block continues the partial leaf chunk, which must rewrite that
    // chunk's cached last hash; with it gone the sync has to fail rather
    // than leave a stale edge in place.
    sync.tree_elem_cache
        .get_mut(&0)
        .unwrap()
        .remove(&0)
        .unwrap();
    let err = sync
        .sync_block(1, block_hash(1), block_hash(0), test_outputs(3..4))
        .unwrap_err();
    assert!(matches!(err, TreeSyncError::CacheConsistency(_)));
}

#[test]
fn undecodable_outputs_never_enter_the_synced_tree() {
    let tree = small_pasta_tree();
    let mut sync = TreeSyncMemory::new(tree, 4).unwrap();
    let mut outputs = test_outputs(0..2);
    outputs.push(OutputContext {
        output_id: 9,
        output_pair: curvetree::OutputPair {
            output_pubkey: [0xFF; 32],
            commitment: [0xFF; 32],
        },
    });
    sync.sync_block(0, block_hash(0), block_hash(u64::MAX), outputs)
        .unwrap();
    assert_eq!(sync.n_leaf_tuples(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn random_grow_and_pop_tracks_a_mem_tree(
        sizes in prop::collection::vec(0u64..8, 1..6),
        n_pops in 0usize..3,
    ) {
        let tree = small_pasta_tree();
        let mut sync = TreeSyncMemory::new(tree.clone(), 10).unwrap();
        let mut counts = vec![0u64];
        let mut next = 0;
        for (i, size) in sizes.iter().enumerate() {
            sync_block_ids(&mut sync, i as u64, next..next + size);
            next += size;
            counts.push(next);
        }

        let n_pops = n_pops.min(sizes.len() - 1);
        for _ in 0..n_pops {
            prop_assert!(sync.pop_block().unwrap());
        }

        let n = counts[sizes.len() - n_pops];
        let mem = mem_grown(&tree, n);
        prop_assert_eq!(sync.get_tree_root().unwrap(), mem.root_bytes().unwrap());
    }
}
