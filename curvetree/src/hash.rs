//! Layer hashing with chunk continuation.

use curvetree_cycle::CurveOps;

use crate::{
    CurveTreeError, Result,
    extension::{LastChunkData, LayerExtension},
};

/// Hash a fresh chunk of children with no prior state.
pub(crate) fn get_new_parent<Op: CurveOps>(ops: &Op, children: &[Op::Scalar]) -> Result<Op::Point> {
    Ok(ops.hash_grow(ops.hash_init_point(), 0, &[], children)?)
}

/// Hash the first chunk of a layer extension, continuing the existing last
/// chunk when the prior state says it is partially filled or its last child
/// changed.
fn get_first_parent<Op: CurveOps>(
    ops: &Op,
    chunk: &[Op::Scalar],
    child_layer_last_hash_updated: bool,
    last_chunk: Option<&LastChunkData<Op>>,
    offset: usize,
) -> Result<Op::Point> {
    let Some(last_chunk) = last_chunk else {
        return get_new_parent(ops, chunk);
    };

    let mut prior_children = Vec::new();
    if child_layer_last_hash_updated {
        // Fold the prior value of the replaced child back out.
        prior_children.push(last_chunk.last_child);
    } else if offset == 0 {
        // Last chunk is full and untouched, start a fresh one.
        return get_new_parent(ops, chunk);
    }

    Ok(ops.hash_grow(last_chunk.last_parent, offset, &prior_children, chunk)?)
}

/// Hash a layer's new child scalars into parent hashes.
///
/// `children_start_idx` is the position of `child_scalars[0]` in the child
/// layer, in the same units as `last_parent_chunk.child_layer_size`.
pub(crate) fn hash_layer<Op: CurveOps>(
    ops: &Op,
    last_parent_chunk: Option<&LastChunkData<Op>>,
    child_scalars: &[Op::Scalar],
    children_start_idx: u64,
    chunk_width: usize,
) -> Result<LayerExtension<Op>> {
    if child_scalars.is_empty() {
        return Err(CurveTreeError::InconsistentTree(
            "hashing a layer with no new children".into(),
        ));
    }

    let mut start_idx = last_parent_chunk.map_or(0, |c| c.parent_layer_size);

    // The child layer's last hash was just replaced if the new children start
    // at its last occupied position. Never the case for the leaf layer, which
    // is strictly append-only.
    let child_layer_last_hash_updated =
        last_parent_chunk.is_some_and(|c| c.child_layer_size == children_start_idx + 1);

    let mut offset = last_parent_chunk.map_or(0, |c| c.child_offset);
    if offset >= chunk_width {
        return Err(CurveTreeError::InconsistentTree(format!(
            "child offset {offset} at or past chunk width {chunk_width}"
        )));
    }

    // The replaced child sits one position before the recorded offset.
    if child_layer_last_hash_updated {
        offset = if offset > 0 { offset - 1 } else { chunk_width - 1 };
    }

    // Continuing the last chunk rewrites its parent hash, so the extension
    // starts one position before the end of the parent layer.
    let update_existing_last_hash = offset > 0 || child_layer_last_hash_updated;
    if update_existing_last_hash {
        if start_idx == 0 {
            return Err(CurveTreeError::InconsistentTree(
                "continuing the last chunk of an empty parent layer".into(),
            ));
        }
        start_idx -= 1;
    }

    let mut hashes = Vec::new();
    let mut chunk_start = 0;
    let mut chunk_size = child_scalars.len().min(chunk_width - offset);
    while chunk_start < child_scalars.len() {
        let chunk = &child_scalars[chunk_start..chunk_start + chunk_size];
        let hash = if chunk_start == 0 {
            get_first_parent(
                ops,
                chunk,
                child_layer_last_hash_updated,
                last_parent_chunk,
                offset,
            )?
        } else {
            get_new_parent(ops, chunk)?
        };
        hashes.push(hash);

        chunk_start += chunk_size;
        chunk_size = chunk_width.min(child_scalars.len() - chunk_start);
    }

    Ok(LayerExtension {
        start_idx,
        update_existing_last_hash,
        hashes,
    })
}

/// Project a child layer's new hashes into parent-curve scalars.
///
/// When the child layer is the current root and the extension does not
/// already rewrite it, the old root is prepended so it gets re-hashed into
/// the brand new layer growing above it.
pub(crate) fn next_child_scalars<Child: CurveOps>(
    child_chunk: Option<&LastChunkData<Child>>,
    parent_chunk_exists: bool,
    children: &LayerExtension<Child>,
) -> Result<Vec<Child::CycleScalar>> {
    let mut child_scalars = Vec::with_capacity(children.hashes.len() + 1);

    if let Some(child_chunk) = child_chunk {
        if child_chunk.parent_layer_size == 1 {
            if parent_chunk_exists {
                return Err(CurveTreeError::InconsistentTree(
                    "parent chunk data recorded above the root layer".into(),
                ));
            }
            if children.start_idx > 0 {
                child_scalars.push(Child::point_to_cycle_scalar(&child_chunk.last_parent));
            }
        }
    }

    child_scalars.extend(children.hashes.iter().map(Child::point_to_cycle_scalar));
    Ok(child_scalars)
}
