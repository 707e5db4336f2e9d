//! Directional Tree Updates
//!
//! Every state's tree is updated independently from its own row of values
//! and visits, so the strategies below differ only in where the work runs.
//! They produce identical trees and values.

use crate::buffers::*;
use crate::dtree::*;
use crate::error::*;
use common::pbrt::*;

/// Updates every tree on the calling thread.
///
/// * `trees`     - One tree per state.
/// * `values`    - Row-major `[n_s, n_a]` node values.
/// * `visits`    - Row-major `[n_s, n_a]` node visits.
/// * `threshold` - Energy share above which a leaf subdivides.
pub fn update_sequential(
    trees: &mut [DirectionalTree],
    values: &mut [Float],
    visits: &[u32],
    threshold: Float,
) -> TreeUpdateStats {
    let mut stats = TreeUpdateStats::default();
    if trees.is_empty() {
        return stats;
    }
    let n_a = values.len() / trees.len();
    for ((tree, v), n) in trees.iter_mut().zip(values.chunks_mut(n_a)).zip(visits.chunks(n_a)) {
        stats += tree.update(v, n, threshold);
    }
    stats
}

/// Updates the trees on a pool of worker threads fed with chunks of states.
///
/// * `trees`     - One tree per state.
/// * `values`    - Row-major `[n_s, n_a]` node values.
/// * `visits`    - Row-major `[n_s, n_a]` node visits.
/// * `threshold` - Energy share above which a leaf subdivides.
/// * `n_threads` - Number of workers.
pub fn update_parallel(
    trees: &mut [DirectionalTree],
    values: &mut [Float],
    visits: &[u32],
    threshold: Float,
    n_threads: usize,
) -> Result<TreeUpdateStats> {
    if trees.is_empty() {
        return Ok(TreeUpdateStats::default());
    }
    let n_threads = max(n_threads, 1);
    let n_a = values.len() / trees.len();
    let chunk_size = max(trees.len() / (4 * n_threads), 1);

    crossbeam::scope(|scope| {
        let (tx, rx) = crossbeam_channel::bounded::<(&mut [DirectionalTree], &mut [Float], &[u32])>(n_threads);

        // Spawn worker threads.
        let workers: Vec<_> = (0..n_threads)
            .map(|_| {
                let rxc = rx.clone();
                scope.spawn(move |_| {
                    let mut stats = TreeUpdateStats::default();
                    for (t, v, n) in rxc.iter() {
                        stats += update_sequential(t, v, n, threshold);
                    }
                    stats
                })
            })
            .collect();
        drop(rx); // Drop extra rx since we've cloned one for each worker.

        // Send work.
        let work = trees
            .chunks_mut(chunk_size)
            .zip(values.chunks_mut(chunk_size * n_a))
            .zip(visits.chunks(chunk_size * n_a));
        for ((t, v), n) in work {
            tx.send((t, v, n)).map_err(|e| GuidingError::Worker(e.to_string()))?;
        }
        drop(tx);

        let mut stats = TreeUpdateStats::default();
        for worker in workers {
            stats += worker
                .join()
                .map_err(|_| GuidingError::Worker("directional tree worker panicked".to_string()))?;
        }
        Ok(stats)
    })
    .map_err(|_| GuidingError::Worker("directional tree update panicked".to_string()))?
}

/// Updates every state's tree in place in the sampler buffers. This is the
/// per-tree algorithm an external executor runs for
/// `QuadTreeUpdateType::ExternalParallel`.
///
/// * `buffers`   - The shared buffers holding values, visits and layouts.
/// * `threshold` - Energy share above which a leaf subdivides.
/// * `max_depth` - Nodes at this depth never subdivide.
pub fn update_buffers(buffers: &mut GuidingBuffers, threshold: Float, max_depth: u32) -> Result<TreeUpdateStats> {
    let n_s = buffers.state_count();
    let n_a = buffers.action_count();
    let shape = [n_s, n_a];
    buffers.q_table.check_shape(&shape)?;
    buffers.q_table_visit_counts.check_shape(&shape)?;
    buffers.dtree_index.check_shape(&shape)?;
    buffers.dtree_rank.check_shape(&shape)?;
    buffers.dtree_depth.check_shape(&shape)?;
    buffers.dtree_select.check_shape(&shape)?;
    buffers.dtree_current_size.check_shape(&[n_s])?;

    let mut stats = TreeUpdateStats::default();
    for s in 0..n_s {
        let mut tree = DirectionalTree::from_layout(
            buffers.dtree_index.row(s),
            buffers.dtree_rank.row(s),
            buffers.dtree_depth.row(s),
            buffers.dtree_select.row(s),
            buffers.dtree_current_size.data()[s] as usize,
            max_depth,
        )?;
        stats += tree.update(buffers.q_table.row_mut(s), buffers.q_table_visit_counts.row(s), threshold);
        tree.write_layout(
            buffers.dtree_index.row_mut(s),
            buffers.dtree_rank.row_mut(s),
            buffers.dtree_depth.row_mut(s),
            buffers.dtree_select.row_mut(s),
        )?;
        buffers.dtree_current_size.data_mut()[s] = tree.size() as u32;
    }
    Ok(stats)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use common::rng::RNG;

    const N_S: usize = 37;
    const N_A: usize = 64;

    fn random_inputs(seed: u64) -> (Vec<Float>, Vec<u32>) {
        let mut rng = RNG::new(seed);
        let values = (0..N_S * N_A).map(|_| 10.0 * rng.uniform_float().powi(4)).collect();
        let visits = (0..N_S * N_A).map(|_| rng.uniform_u32() % 3).collect();
        (values, visits)
    }

    fn fresh_trees() -> Vec<DirectionalTree> {
        (0..N_S).map(|_| DirectionalTree::new(N_A, 8)).collect()
    }

    #[test]
    fn parallel_matches_sequential_for_any_thread_count() {
        for n_threads in [1, 2, 3, 8] {
            let mut seq_trees = fresh_trees();
            let mut par_trees = fresh_trees();
            for round in 0..4 {
                let (values, visits) = random_inputs(round);
                let mut seq_values = values.clone();
                let mut par_values = values;

                let a = update_sequential(&mut seq_trees, &mut seq_values, &visits, 0.01);
                let b = update_parallel(&mut par_trees, &mut par_values, &visits, 0.01, n_threads).unwrap();
                assert_eq!(a, b);
                assert_eq!(seq_values, par_values);
                assert_eq!(seq_trees, par_trees);
            }
        }
    }

    #[test]
    fn buffer_update_matches_in_memory_update() {
        let mut trees = fresh_trees();
        let mut buffers = GuidingBuffers::empty();
        buffers.valid_sample_counts = Buffer::zeros("valid_sample_counts", &[N_S]);
        buffers.q_table = Buffer::zeros("q_table", &[N_S, N_A]);
        buffers.q_table_visit_counts = Buffer::zeros("q_table_visit_counts", &[N_S, N_A]);
        buffers.dtree_index = Buffer::zeros("dtree_index", &[N_S, N_A]);
        buffers.dtree_rank = Buffer::zeros("dtree_rank", &[N_S, N_A]);
        buffers.dtree_depth = Buffer::zeros("dtree_depth", &[N_S, N_A]);
        buffers.dtree_select = Buffer::zeros("dtree_select", &[N_S, N_A]);
        buffers.dtree_current_size = Buffer::zeros("dtree_current_size", &[N_S]);
        for (s, t) in trees.iter().enumerate() {
            t.write_layout(
                buffers.dtree_index.row_mut(s),
                buffers.dtree_rank.row_mut(s),
                buffers.dtree_depth.row_mut(s),
                buffers.dtree_select.row_mut(s),
            )
            .unwrap();
            buffers.dtree_current_size.data_mut()[s] = t.size() as u32;
        }

        for round in 0..3 {
            let (mut values, visits) = random_inputs(100 + round);
            buffers.q_table.write(&[N_S, N_A], &values).unwrap();
            buffers.q_table_visit_counts.write(&[N_S, N_A], &visits).unwrap();

            let a = update_sequential(&mut trees, &mut values, &visits, 0.01);
            let b = update_buffers(&mut buffers, 0.01, 8).unwrap();
            assert_eq!(a, b);
            assert_eq!(buffers.q_table.data(), values.as_slice());
            for (s, t) in trees.iter().enumerate() {
                assert_eq!(buffers.dtree_index.row(s), t.index());
                assert_eq!(buffers.dtree_current_size.data()[s] as usize, t.size());
            }
        }
    }

    #[test]
    fn buffer_update_requires_registered_trees() {
        let mut buffers = GuidingBuffers::empty();
        buffers.valid_sample_counts = Buffer::zeros("valid_sample_counts", &[2]);
        buffers.q_table = Buffer::zeros("q_table", &[2, 4]);
        buffers.q_table_visit_counts = Buffer::zeros("q_table_visit_counts", &[2, 4]);
        assert!(matches!(
            update_buffers(&mut buffers, 0.01, 8),
            Err(GuidingError::MissingBuffer("dtree_index"))
        ));
    }

    #[test]
    fn no_trees_is_a_no_op() {
        let stats = update_parallel(&mut [], &mut [], &[], 0.01, 4).unwrap();
        assert_eq!(stats, TreeUpdateStats::default());
    }
}
