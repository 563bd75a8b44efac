//! Escape operators: random kicks and the eject-and-reinsert routine.

use ndarray::Array2;
use rand::Rng;

use divgroup_model::{DissimilarityMatrix, GroupBounds, Solution};

use crate::delta::DeltaMatrix;

/// Apply `strength` random feasible kicks, accepted regardless of sign.
///
/// Neighbors are sampled uniformly from the combined enumeration of the
/// `N*K` relocations followed by the `N*(N-1)/2` pair swaps. Infeasible
/// samples are discarded and do not count. The delta matrix is left stale
/// on purpose; the next [`crate::local_search`] call rebuilds it.
pub fn strong_perturbation<R: Rng + ?Sized>(
    bounds: &GroupBounds,
    solution: &mut Solution,
    strength: usize,
    rng: &mut R,
) {
    let n = solution.n();
    let k = bounds.k();
    if k < 2 || n < 2 {
        return;
    }
    let relocations = n * k;
    let neighborhood = relocations + n * (n - 1) / 2;

    let mut kicks = 0;
    while kicks < strength {
        let pick = rng.random_range(0..neighborhood);
        if pick < relocations {
            let v = pick / k;
            let g = pick % k;
            let from = solution.assignment[v];
            if g != from && solution.sizes[from] > bounds.lb(from) && solution.sizes[g] < bounds.ub(g)
            {
                solution.assignment[v] = g;
                solution.sizes[from] -= 1;
                solution.sizes[g] += 1;
                kicks += 1;
            }
        } else {
            let (x, y) = pair_from_index(n, pick - relocations);
            if solution.assignment[x] != solution.assignment[y] {
                solution.assignment.swap(x, y);
                kicks += 1;
            }
        }
    }
}

/// Decode position `t` of the `x < y` pair enumeration.
fn pair_from_index(n: usize, mut t: usize) -> (usize, usize) {
    let mut x = 0;
    let mut row = n - 1;
    while t >= row {
        t -= row;
        x += 1;
        row -= 1;
    }
    (x, x + 1 + t)
}

/// Deterministic eject-and-reinsert escape, repeated `rounds` times.
///
/// Each round removes the least-connected member of every group, discounts
/// the dissimilarities inside the ejected pool, then reinserts: first one
/// item into every group that fell below its lower bound (picked by
/// highest average connection), then the remainder greedily into the group
/// with the highest average connection that still has room. Average
/// connections are tracked per (source group, target group) since at most
/// one item leaves each group per round. The delta matrix is rebuilt after
/// every round.
pub fn directed_perturbation<R: Rng + ?Sized>(
    d: &DissimilarityMatrix,
    bounds: &GroupBounds,
    solution: &mut Solution,
    delta: &mut DeltaMatrix,
    rounds: usize,
    rng: &mut R,
) {
    let n = d.n();
    let k = bounds.k();
    if k < 2 || n < 2 {
        return;
    }
    delta.rebuild(d, solution);

    let mut ejected: Vec<Option<usize>> = vec![None; k];
    let mut under_lb = vec![false; k];
    let mut avg_con = Array2::<f64>::zeros((k, k));

    for _ in 0..rounds {
        avg_con.fill(0.0);
        let mut deficits = 0;
        for g in 0..k {
            under_lb[g] = false;
            ejected[g] = None;
            let mut weakest = None;
            let mut min_con = f64::INFINITY;
            for i in 0..n {
                if solution.assignment[i] == g && delta.get(i, g) < min_con {
                    min_con = delta.get(i, g);
                    weakest = Some(i);
                }
            }
            if let Some(i) = weakest {
                ejected[g] = Some(i);
                solution.sizes[g] -= 1;
                if solution.sizes[g] < bounds.lb(g) {
                    under_lb[g] = true;
                    deficits += 1;
                }
            }
        }

        // discount pool-internal edges so ejected items do not count each
        // other as group attraction
        for i in 0..k {
            let Some(ri) = ejected[i] else { continue };
            for j in 0..k {
                let Some(rj) = ejected[j] else { continue };
                let discounted = delta.get(ri, j) - d.get(ri, rj);
                delta.set(ri, j, discounted);
                avg_con[[i, j]] = discounted / solution.sizes[j] as f64;
            }
        }

        // every deficit group takes back the ejected item most attracted
        // to it
        let mut filled = 0;
        while filled < deficits {
            let g = cycle_from_random(k, rng, |g| under_lb[g]);
            let mut best = f64::NEG_INFINITY;
            let mut source = None;
            for e in 0..k {
                if ejected[e].is_some() && avg_con[[e, g]] > best {
                    best = avg_con[[e, g]];
                    source = Some(e);
                }
            }
            let Some(e) = source else { break };
            let Some(item) = ejected[e] else { break };
            insert_ejected(d, solution, delta, &mut avg_con, &ejected, item, e, g);
            under_lb[g] = false;
            ejected[e] = None;
            filled += 1;
        }

        // the remaining ejected items chase their best-connected group;
        // full groups get their column masked and the pick is retried
        let mut remaining = ejected.iter().filter(|e| e.is_some()).count();
        while remaining > 0 {
            let e = cycle_from_random(k, rng, |e| ejected[e].is_some());
            let Some(item) = ejected[e] else { break };
            let mut attempts = 0;
            loop {
                let mut best = f64::NEG_INFINITY;
                let mut target = 0;
                for g in 0..k {
                    if avg_con[[e, g]] > best {
                        best = avg_con[[e, g]];
                        target = g;
                    }
                }
                if solution.sizes[target] < bounds.ub(target) {
                    insert_ejected(d, solution, delta, &mut avg_con, &ejected, item, e, target);
                    ejected[e] = None;
                    remaining -= 1;
                    break;
                }
                for row in 0..k {
                    avg_con[[row, target]] = 0.0;
                }
                attempts += 1;
                if attempts > k {
                    // every column exhausted; any open group will do
                    if let Some(g) = (0..k).find(|&g| solution.sizes[g] < bounds.ub(g)) {
                        insert_ejected(d, solution, delta, &mut avg_con, &ejected, item, e, g);
                        ejected[e] = None;
                        remaining -= 1;
                    } else {
                        remaining = 0;
                    }
                    break;
                }
            }
        }

        delta.rebuild(d, solution);
    }
}

/// Commit one ejected item into `target`: bump the size, refresh the
/// remaining pool's connections to `target`, retire the item's source row.
#[allow(clippy::too_many_arguments)]
fn insert_ejected(
    d: &DissimilarityMatrix,
    solution: &mut Solution,
    delta: &mut DeltaMatrix,
    avg_con: &mut Array2<f64>,
    ejected: &[Option<usize>],
    item: usize,
    source: usize,
    target: usize,
) {
    let k = ejected.len();
    solution.sizes[target] += 1;
    for t in 0..k {
        if let Some(rt) = ejected[t] {
            let updated = delta.get(rt, target) + d.get(rt, item);
            delta.set(rt, target, updated);
            avg_con[[t, target]] = updated / solution.sizes[target] as f64;
        }
    }
    for col in 0..k {
        avg_con[[source, col]] = 0.0;
    }
    solution.assignment[item] = target;
}

/// Pick an index satisfying `keep`, cycling upward from a random start.
/// At least one index must satisfy the predicate.
pub(crate) fn cycle_from_random<R, F>(k: usize, rng: &mut R, keep: F) -> usize
where
    R: Rng + ?Sized,
    F: Fn(usize) -> bool,
{
    let mut g = rng.random_range(0..k);
    loop {
        g = (g + 1) % k;
        if keep(g) {
            return g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divgroup_model::GroupBounds;
    use ndarray::Array2 as Matrix;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn random_problem(n: usize, k: usize, seed: u64) -> (DissimilarityMatrix, GroupBounds, Solution, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut d = Matrix::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let w: f64 = rng.random();
                d[[i, j]] = w;
                d[[j, i]] = w;
            }
        }
        let d = DissimilarityMatrix::from_dense(d).unwrap();
        let bounds = GroupBounds::uniform(k, n / k - 1, n / k + 1).unwrap();
        let s = Solution::random(n, &bounds, &mut rng);
        (d, bounds, s, rng)
    }

    #[test]
    fn pair_index_enumerates_upper_triangle() {
        let n = 5;
        let mut seen = Vec::new();
        for t in 0..n * (n - 1) / 2 {
            seen.push(pair_from_index(n, t));
        }
        assert_eq!(seen.first(), Some(&(0, 1)));
        assert_eq!(seen.last(), Some(&(3, 4)));
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), n * (n - 1) / 2);
        assert!(seen.iter().all(|&(x, y)| x < y && y < n));
    }

    #[test]
    fn strong_kicks_preserve_feasibility() {
        let (_, bounds, mut s, mut rng) = random_problem(15, 3, 21);
        for _ in 0..20 {
            strong_perturbation(&bounds, &mut s, 6, &mut rng);
            assert!(s.is_feasible(&bounds));
            assert_eq!(s.sizes.iter().sum::<usize>(), 15);
        }
    }

    #[test]
    fn directed_rounds_preserve_feasibility_and_consistency() {
        let (d, bounds, mut s, mut rng) = random_problem(18, 3, 33);
        let mut delta = DeltaMatrix::new(18, 3);
        for _ in 0..5 {
            directed_perturbation(&d, &bounds, &mut s, &mut delta, 3, &mut rng);
            assert!(s.is_feasible(&bounds));
            // the closing rebuild grounds the stored cost again
            assert!((s.objective(&d) - s.cost).abs() < 1e-6);
        }
    }

    #[test]
    fn directed_moves_some_partition() {
        // greedy reinsertion may hand every ejected item straight back on
        // an unlucky instance, so check across several seeds
        let mut any_changed = false;
        for seed in 0..6 {
            let (d, bounds, mut s, mut rng) = random_problem(20, 4, seed);
            let mut delta = DeltaMatrix::new(20, 4);
            let before = s.assignment.clone();
            directed_perturbation(&d, &bounds, &mut s, &mut delta, 3, &mut rng);
            if before != s.assignment {
                any_changed = true;
                break;
            }
        }
        assert!(any_changed);
    }
}
