//! Incremental bookkeeping for move evaluation.

use ndarray::Array2;

use divgroup_model::{DissimilarityMatrix, Solution};

/// The delta matrix: `delta[[i, g]]` holds the total dissimilarity from
/// item `i` to the current members of group `g`, excluding `i` itself.
///
/// With it, relocating an item or swapping two items is scored in O(1)
/// and committed in O(N). The invariant
/// `delta[[i, g]] == sum of D[i][j] over j != i with assignment[j] == g`
/// holds after every public call; batch mutations that bypass
/// [`DeltaMatrix::apply_relocate`] / [`DeltaMatrix::apply_swap`] must be
/// followed by a [`DeltaMatrix::rebuild`].
#[derive(Debug, Clone)]
pub struct DeltaMatrix {
    delta: Array2<f64>,
}

impl DeltaMatrix {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            delta: Array2::zeros((n, k)),
        }
    }

    /// Recompute the whole matrix in O(N^2) and reset the solution's cost
    /// from it: the objective equals half the sum of each item's
    /// connection to its own group.
    pub fn rebuild(&mut self, d: &DissimilarityMatrix, solution: &mut Solution) {
        let n = d.n();
        self.delta.fill(0.0);
        for i in 0..n {
            for j in 0..n {
                self.delta[[i, solution.assignment[j]]] += d.get(i, j);
            }
        }
        let mut f = 0.0;
        for i in 0..n {
            f += self.delta[[i, solution.assignment[i]]];
        }
        solution.cost = f / 2.0;
    }

    #[inline]
    pub fn get(&self, i: usize, g: usize) -> f64 {
        self.delta[[i, g]]
    }

    #[inline]
    pub(crate) fn set(&mut self, i: usize, g: usize, value: f64) {
        self.delta[[i, g]] = value;
    }

    /// Objective change from moving item `i` into group `to`.
    #[inline]
    pub fn relocate_gain(&self, solution: &Solution, i: usize, to: usize) -> f64 {
        self.delta[[i, to]] - self.delta[[i, solution.assignment[i]]]
    }

    /// Objective change from exchanging the groups of `x` and `y`.
    #[inline]
    pub fn swap_gain(
        &self,
        d: &DissimilarityMatrix,
        solution: &Solution,
        x: usize,
        y: usize,
    ) -> f64 {
        let a = solution.assignment[x];
        let b = solution.assignment[y];
        (self.delta[[x, b]] - self.delta[[x, a]]) + (self.delta[[y, a]] - self.delta[[y, b]])
            - 2.0 * d.get(x, y)
    }

    /// Move item `i` to group `to`, maintaining the matrix, the group
    /// sizes and the stored cost. O(N).
    pub fn apply_relocate(
        &mut self,
        d: &DissimilarityMatrix,
        solution: &mut Solution,
        i: usize,
        to: usize,
    ) {
        let from = solution.assignment[i];
        debug_assert_ne!(from, to);
        solution.cost += self.relocate_gain(solution, i, to);
        for j in 0..d.n() {
            if j != i {
                let w = d.get(i, j);
                self.delta[[j, from]] -= w;
                self.delta[[j, to]] += w;
            }
        }
        solution.assignment[i] = to;
        solution.sizes[from] -= 1;
        solution.sizes[to] += 1;
    }

    /// Exchange the groups of `x` and `y` (which must differ), maintaining
    /// the matrix and the stored cost. Group sizes are unchanged.
    pub fn apply_swap(
        &mut self,
        d: &DissimilarityMatrix,
        solution: &mut Solution,
        x: usize,
        y: usize,
    ) {
        let a = solution.assignment[x];
        let b = solution.assignment[y];
        debug_assert_ne!(a, b);
        solution.cost += self.swap_gain(d, solution, x, y);
        for j in 0..d.n() {
            if j != x {
                let w = d.get(x, j);
                self.delta[[j, a]] -= w;
                self.delta[[j, b]] += w;
            }
        }
        for j in 0..d.n() {
            if j != y {
                let w = d.get(y, j);
                self.delta[[j, b]] -= w;
                self.delta[[j, a]] += w;
            }
        }
        solution.assignment[x] = b;
        solution.assignment[y] = a;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divgroup_model::GroupBounds;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_matrix(n: usize, rng: &mut StdRng) -> DissimilarityMatrix {
        let mut d = Array2::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let w: f64 = rng.random();
                d[[i, j]] = w;
                d[[j, i]] = w;
            }
        }
        DissimilarityMatrix::from_dense(d).unwrap()
    }

    fn check_invariant(delta: &DeltaMatrix, d: &DissimilarityMatrix, s: &Solution, k: usize) {
        for i in 0..d.n() {
            for g in 0..k {
                let expected: f64 = (0..d.n())
                    .filter(|&j| j != i && s.assignment[j] == g)
                    .map(|j| d.get(i, j))
                    .sum();
                assert!(
                    (delta.get(i, g) - expected).abs() < 1e-9,
                    "delta[{i}][{g}] = {} but members sum to {expected}",
                    delta.get(i, g)
                );
            }
        }
    }

    #[test]
    fn invariant_survives_random_move_sequences() {
        let n = 14;
        let k = 3;
        let mut rng = StdRng::seed_from_u64(42);
        let d = random_matrix(n, &mut rng);
        let bounds = GroupBounds::uniform(k, 2, 8).unwrap();
        let mut s = Solution::random(n, &bounds, &mut rng);
        let mut delta = DeltaMatrix::new(n, k);
        delta.rebuild(&d, &mut s);
        check_invariant(&delta, &d, &s, k);

        for _ in 0..200 {
            if rng.random::<f64>() < 0.5 {
                let i = rng.random_range(0..n);
                let to = rng.random_range(0..k);
                let from = s.assignment[i];
                if to != from && s.sizes[from] > bounds.lb(from) && s.sizes[to] < bounds.ub(to) {
                    delta.apply_relocate(&d, &mut s, i, to);
                }
            } else {
                let x = rng.random_range(0..n);
                let y = rng.random_range(0..n);
                if s.assignment[x] != s.assignment[y] {
                    delta.apply_swap(&d, &mut s, x, y);
                }
            }
        }
        check_invariant(&delta, &d, &s, k);
        assert!((s.objective(&d) - s.cost).abs() < 1e-6);
        assert!(s.is_feasible(&bounds));
    }

    #[test]
    fn rebuild_recovers_cost() {
        let mut rng = StdRng::seed_from_u64(5);
        let d = random_matrix(8, &mut rng);
        let bounds = GroupBounds::uniform(2, 3, 5).unwrap();
        let mut s = Solution::random(8, &bounds, &mut rng);
        let expected = s.objective(&d);
        let mut delta = DeltaMatrix::new(8, 2);
        delta.rebuild(&d, &mut s);
        assert!((s.cost - expected).abs() < 1e-9);
    }

    #[test]
    fn gains_predict_cost_changes() {
        let mut rng = StdRng::seed_from_u64(11);
        let d = random_matrix(10, &mut rng);
        let bounds = GroupBounds::uniform(2, 3, 7).unwrap();
        let mut s = Solution::random(10, &bounds, &mut rng);
        let mut delta = DeltaMatrix::new(10, 2);
        delta.rebuild(&d, &mut s);

        let x = s.assignment.iter().position(|&g| g == 0).unwrap();
        let y = s.assignment.iter().position(|&g| g == 1).unwrap();
        let before = s.cost;
        let gain = delta.swap_gain(&d, &s, x, y);
        delta.apply_swap(&d, &mut s, x, y);
        assert!((s.cost - (before + gain)).abs() < 1e-9);
        assert!((s.objective(&d) - s.cost).abs() < 1e-9);
    }
}
