use rand::Rng;
use rand::seq::SliceRandom;

use crate::{DissimilarityMatrix, GroupBounds, ModelError};

/// Tolerance when comparing a stored objective against a full recompute.
pub const COST_EPSILON: f64 = 1e-6;

/// A partition of the items into groups, with cached group sizes and
/// objective value.
///
/// The stored `cost` is the MDGP diversity objective: the sum of pairwise
/// dissimilarities between co-grouped items. Engines maintain it
/// incrementally; [`Solution::verify`] checks it against a recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub assignment: Vec<usize>,
    pub sizes: Vec<usize>,
    pub cost: f64,
}

impl Solution {
    /// Wrap an existing assignment, deriving group sizes. The cost is left
    /// at zero until evaluated.
    pub fn from_assignment(assignment: Vec<usize>, k: usize) -> Result<Self, ModelError> {
        let mut sizes = vec![0usize; k];
        for (i, &g) in assignment.iter().enumerate() {
            if g >= k {
                return Err(ModelError::AssignmentMismatch(format!(
                    "item {i} assigned to group {g}, only {k} groups exist"
                )));
            }
            sizes[g] += 1;
        }
        Ok(Self {
            assignment,
            sizes,
            cost: 0.0,
        })
    }

    /// Random feasible construction: visit the items in random order,
    /// satisfying every lower bound first, then place the remainder into
    /// random groups that still have room.
    pub fn random<R: Rng + ?Sized>(n: usize, bounds: &GroupBounds, rng: &mut R) -> Self {
        let k = bounds.k();
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);

        let quota: usize = bounds.lower().iter().sum();
        let mut assignment = vec![0usize; n];
        let mut sizes = vec![0usize; k];

        let (head, tail) = order.split_at(quota.min(n));
        // lower-bound quotas fill in group order; sizes only grow, so the
        // first group below its bound never moves backwards
        let mut g = 0;
        for &item in head {
            while sizes[g] >= bounds.lb(g) {
                g += 1;
            }
            assignment[item] = g;
            sizes[g] += 1;
        }
        for &item in tail {
            loop {
                let g = rng.random_range(0..k);
                if sizes[g] < bounds.ub(g) {
                    assignment[item] = g;
                    sizes[g] += 1;
                    break;
                }
            }
        }
        Self {
            assignment,
            sizes,
            cost: 0.0,
        }
    }

    /// The diversity objective recomputed from scratch, without touching
    /// the stored cost.
    pub fn objective(&self, d: &DissimilarityMatrix) -> f64 {
        let n = self.assignment.len();
        let mut f = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                if self.assignment[i] == self.assignment[j] {
                    f += d.get(i, j);
                }
            }
        }
        f
    }

    /// Recompute and store the diversity objective.
    pub fn evaluate(&mut self, d: &DissimilarityMatrix) -> f64 {
        self.cost = self.objective(d);
        self.cost
    }

    /// Acceptance predicate: the stored cost matches a recompute and every
    /// group size sits within its bounds.
    pub fn verify(&self, d: &DissimilarityMatrix, bounds: &GroupBounds) -> bool {
        (self.objective(d) - self.cost).abs() <= COST_EPSILON && self.is_feasible(bounds)
    }

    pub fn is_feasible(&self, bounds: &GroupBounds) -> bool {
        self.sizes.len() == bounds.k()
            && (0..bounds.k())
                .all(|g| self.sizes[g] >= bounds.lb(g) && self.sizes[g] <= bounds.ub(g))
    }

    /// Number of unordered item pairs on which two partitions disagree
    /// about being co-grouped. Used by the replacement rule as a distance.
    pub fn pair_disagreements(&self, other: &Solution) -> usize {
        let n = self.assignment.len();
        let mut count = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let same_here = self.assignment[i] == self.assignment[j];
                let same_there = other.assignment[i] == other.assignment[j];
                if same_here != same_there {
                    count += 1;
                }
            }
        }
        count
    }

    pub fn n(&self) -> usize {
        self.assignment.len()
    }

    pub fn k(&self) -> usize {
        self.sizes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn from_assignment_derives_sizes() {
        let s = Solution::from_assignment(vec![0, 1, 0, 1, 1], 2).unwrap();
        assert_eq!(s.sizes, vec![2, 3]);
    }

    #[test]
    fn from_assignment_rejects_bad_label() {
        assert!(Solution::from_assignment(vec![0, 2], 2).is_err());
    }

    #[test]
    fn random_construction_is_feasible() {
        let bounds = GroupBounds::new(vec![2, 1, 3], vec![4, 2, 5]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let s = Solution::random(10, &bounds, &mut rng);
            assert!(s.is_feasible(&bounds));
            assert_eq!(s.sizes.iter().sum::<usize>(), 10);
        }
    }

    #[test]
    fn objective_counts_cogrouped_pairs() {
        let d = DissimilarityMatrix::from_dense(array![
            [0.0, 1.0, 2.0],
            [1.0, 0.0, 4.0],
            [2.0, 4.0, 0.0]
        ])
        .unwrap();
        let mut s = Solution::from_assignment(vec![0, 0, 1], 2).unwrap();
        assert_eq!(s.evaluate(&d), 1.0);
        let mut all = Solution::from_assignment(vec![0, 0, 0], 2).unwrap();
        assert_eq!(all.evaluate(&d), 7.0);
    }

    #[test]
    fn verify_spots_stale_cost() {
        let d = DissimilarityMatrix::from_dense(array![[0.0, 3.0], [3.0, 0.0]]).unwrap();
        let bounds = GroupBounds::uniform(2, 0, 2).unwrap();
        let mut s = Solution::from_assignment(vec![0, 0], 2).unwrap();
        s.evaluate(&d);
        assert!(s.verify(&d, &bounds));
        s.cost += 1.0;
        assert!(!s.verify(&d, &bounds));
    }

    #[test]
    fn pair_disagreements_counts_both_directions() {
        let a = Solution::from_assignment(vec![0, 0, 1, 1], 2).unwrap();
        let b = Solution::from_assignment(vec![0, 1, 0, 1], 2).unwrap();
        // pairs (0,1) (2,3) co-grouped only in a; (0,2) (1,3) only in b
        assert_eq!(a.pair_disagreements(&b), 4);
        assert_eq!(b.pair_disagreements(&a), 4);
        assert_eq!(a.pair_disagreements(&a), 0);
    }
}
