//! Descent over the relocate and swap neighborhoods.

use divgroup_model::{DissimilarityMatrix, GroupBounds, Solution};

use crate::delta::DeltaMatrix;

/// Minimum gain for a move to count as improving; guards the descent
/// against floating-point noise.
pub const GAIN_EPSILON: f64 = 1e-4;

/// Drive the solution to a local optimum of the diversity objective.
///
/// Each pass scans every single-item relocation (feasible when the source
/// group stays at or above its lower bound and the target stays under its
/// upper bound) and then every cross-group pair swap, committing each
/// improving move as soon as it is found. The loop ends when a full pass
/// commits nothing; at that point no single move gains more than
/// [`GAIN_EPSILON`].
///
/// The delta matrix is rebuilt on entry, so callers may hand over a
/// solution whose bookkeeping is stale (e.g. straight after a
/// perturbation). Returns the number of committed moves.
pub fn local_search(
    d: &DissimilarityMatrix,
    bounds: &GroupBounds,
    solution: &mut Solution,
    delta: &mut DeltaMatrix,
) -> usize {
    let n = d.n();
    let k = bounds.k();
    delta.rebuild(d, solution);

    let mut moves = 0;
    loop {
        let mut improved = false;
        for v in 0..n {
            for g in 0..k {
                let from = solution.assignment[v];
                if g != from
                    && solution.sizes[from] > bounds.lb(from)
                    && solution.sizes[g] < bounds.ub(g)
                    && delta.relocate_gain(solution, v, g) > GAIN_EPSILON
                {
                    delta.apply_relocate(d, solution, v, g);
                    improved = true;
                    moves += 1;
                }
            }
        }
        for x in 0..n {
            for y in (x + 1)..n {
                if solution.assignment[x] != solution.assignment[y]
                    && delta.swap_gain(d, solution, x, y) > GAIN_EPSILON
                {
                    delta.apply_swap(d, solution, x, y);
                    improved = true;
                    moves += 1;
                }
            }
        }
        if !improved {
            return moves;
        }
    }
}
