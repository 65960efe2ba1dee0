use criterion::{Criterion, criterion_group, criterion_main};
use curvetree::{
    CurveTree, MemTree,
    test_utils::test_outputs,
};

fn bench_tree_extension(c: &mut Criterion) {
    let tree = CurveTree::new_pasta();
    let mut mem = MemTree::new();
    let ext = tree
        .get_tree_extension(&mem.get_last_chunks(&tree).unwrap(), test_outputs(0..4096))
        .unwrap();
    mem.apply_extension(&tree, &ext).unwrap();

    let last_chunks = mem.get_last_chunks(&tree).unwrap();
    let batch = test_outputs(4096..4352);
    c.bench_function("extend_256_outputs_onto_4096", |b| {
        b.iter(|| {
            tree.get_tree_extension(&last_chunks, batch.clone())
                .unwrap()
        })
    });
}

fn bench_audit_path(c: &mut Criterion) {
    let tree = CurveTree::new_pasta();
    let mut mem = MemTree::new();
    let ext = tree
        .get_tree_extension(&mem.get_last_chunks(&tree).unwrap(), test_outputs(0..4096))
        .unwrap();
    mem.apply_extension(&tree, &ext).unwrap();

    let path = mem.get_path(&tree, 1234).unwrap();
    let output = ext.leaves.tuples[1234].output_pair;
    c.bench_function("audit_path_4096", |b| {
        b.iter(|| tree.audit_path(&path, &output, 4096).unwrap())
    });
}

criterion_group!(benches, bench_tree_extension, bench_audit_path);
criterion_main!(benches);
