//! Group-wise recombination of two parent partitions.

use ndarray::Array2;
use rand::Rng;
use rand::seq::SliceRandom;

use divgroup_model::{DissimilarityMatrix, GroupBounds, Solution};

use crate::perturbation::cycle_from_random;

/// Sentinel for "not assigned yet" in the scratch partitions.
const FREE: usize = usize::MAX;

/// Produce one feasible offspring from two parents.
///
/// K donor rounds each flip a fair coin to pick a parent, take its group
/// with the highest remaining internal diversity, and install that member
/// set into a random offspring group whose capacity admits it. When no
/// group fits, the nearest-fitting group receives a random subset and the
/// leftovers return to the unassigned pool. Installed items are struck
/// from both parents so later rounds draw from what remains. Three repair
/// stages then restore feasibility: free members of over-filled groups
/// until the lower-bound budget is coverable, top every deficit group up
/// to its lower bound, and finally spread the leftovers across groups
/// with room.
pub fn crossover<R: Rng + ?Sized>(
    d: &DissimilarityMatrix,
    bounds: &GroupBounds,
    parent1: &Solution,
    parent2: &Solution,
    rng: &mut R,
) -> Solution {
    let n = d.n();
    let k = bounds.k();

    let (delta1, mut gdiv1) = parent_state(d, k, &parent1.assignment);
    let (delta2, mut gdiv2) = parent_state(d, k, &parent2.assignment);
    let mut p1 = parent1.assignment.clone();
    let mut p2 = parent2.assignment.clone();

    let mut child = vec![FREE; n];
    let mut unassigned = vec![true; n];
    let mut child_sizes = vec![0usize; k];
    // remaining capacity per offspring group; None once consumed by a donor
    let mut capacity: Vec<Option<usize>> = (0..k).map(|g| Some(bounds.ub(g))).collect();

    let mut members: Vec<usize> = Vec::with_capacity(n);
    let mut installed: Vec<usize> = Vec::with_capacity(n);

    for _ in 0..k {
        let from_first = rng.random::<f64>() < 0.5;
        // donor group: maximum remaining internal diversity
        let donor = {
            let gdiv = if from_first { &gdiv1 } else { &gdiv2 };
            let mut best = f64::NEG_INFINITY;
            let mut pick = 0;
            for g in 0..k {
                if gdiv[g] > best {
                    best = gdiv[g];
                    pick = g;
                }
            }
            pick
        };
        members.clear();
        {
            let parent = if from_first { &p1 } else { &p2 };
            for i in 0..n {
                if parent[i] == donor {
                    members.push(i);
                }
            }
        }
        let need = members.len();

        let open: Vec<usize> = (0..k)
            .filter(|&g| matches!(capacity[g], Some(u) if u >= need))
            .collect();
        installed.clear();
        let target;
        if open.is_empty() {
            // nearest fit: the group short by the fewest items takes a
            // random subset that exactly fills it
            let mut shortfall = usize::MAX;
            let mut pick = 0;
            for g in 0..k {
                if let Some(u) = capacity[g] {
                    if need - u < shortfall {
                        shortfall = need - u;
                        pick = g;
                    }
                }
            }
            target = pick;
            let fit = need - shortfall;
            let (chosen, _) = members.partial_shuffle(rng, fit);
            for &i in chosen.iter() {
                child[i] = target;
                unassigned[i] = false;
                installed.push(i);
            }
        } else {
            target = open[rng.random_range(0..open.len())];
            for &i in &members {
                child[i] = target;
                unassigned[i] = false;
                installed.push(i);
            }
        }
        // strike the installed items from both parents
        for &i in &installed {
            if p1[i] != FREE {
                gdiv1[p1[i]] -= delta1[[i, p1[i]]];
                p1[i] = FREE;
            }
            if p2[i] != FREE {
                gdiv2[p2[i]] -= delta2[[i, p2[i]]];
                p2[i] = FREE;
            }
        }
        capacity[target] = None;
        child_sizes[target] = installed.len();
    }

    // repair down: groups above their lower bound shed random members
    // until the pool plus the kept members can cover every lower bound
    let sum_lb: usize = bounds.lower().iter().sum();
    let mut deficit = vec![false; k];
    let mut above_lb = vec![false; k];
    let mut coverable = 0usize;
    let mut deficit_members = 0usize;
    for g in 0..k {
        if child_sizes[g] < bounds.lb(g) {
            coverable += child_sizes[g];
            deficit_members += child_sizes[g];
            deficit[g] = true;
        } else {
            coverable += bounds.lb(g);
        }
        if child_sizes[g] > bounds.lb(g) {
            above_lb[g] = true;
        }
    }
    coverable += unassigned.iter().filter(|&&free| free).count();
    while coverable < sum_lb {
        let g = cycle_from_random(k, rng, |g| above_lb[g]);
        members.clear();
        for i in 0..n {
            if child[i] == g {
                members.push(i);
            }
        }
        let v = members[rng.random_range(0..members.len())];
        child[v] = FREE;
        unassigned[v] = true;
        child_sizes[g] -= 1;
        if child_sizes[g] == bounds.lb(g) {
            above_lb[g] = false;
        }
        coverable += 1;
    }

    // repair up: fill every deficit group to its lower bound from the pool
    let need_total: usize = (0..k).filter(|&g| deficit[g]).map(|g| bounds.lb(g)).sum();
    while deficit_members < need_total {
        let g = cycle_from_random(k, rng, |g| deficit[g]);
        let v = pick_unassigned(&unassigned, rng);
        child[v] = g;
        unassigned[v] = false;
        child_sizes[g] += 1;
        if child_sizes[g] == bounds.lb(g) {
            deficit[g] = false;
        }
        deficit_members += 1;
    }

    // fill: leftovers land in random groups with room
    let mut placed: usize = child_sizes.iter().sum();
    let mut open_ub: Vec<bool> = (0..k).map(|g| child_sizes[g] < bounds.ub(g)).collect();
    while placed < n {
        let g = cycle_from_random(k, rng, |g| open_ub[g]);
        let v = pick_unassigned(&unassigned, rng);
        child[v] = g;
        unassigned[v] = false;
        child_sizes[g] += 1;
        if child_sizes[g] == bounds.ub(g) {
            open_ub[g] = false;
        }
        placed += 1;
    }

    let mut offspring = Solution {
        assignment: child,
        sizes: child_sizes,
        cost: 0.0,
    };
    offspring.evaluate(d);
    offspring
}

/// Per-parent scratch state: the parent's delta matrix and each group's
/// internal diversity (the sum of each member's connection to its own
/// group, i.e. twice the intra-group pair total).
fn parent_state(d: &DissimilarityMatrix, k: usize, assignment: &[usize]) -> (Array2<f64>, Vec<f64>) {
    let n = d.n();
    let mut delta = Array2::zeros((n, k));
    for i in 0..n {
        for j in 0..n {
            delta[[i, assignment[j]]] += d.get(i, j);
        }
    }
    let mut gdiv = vec![0.0; k];
    for i in 0..n {
        gdiv[assignment[i]] += delta[[i, assignment[i]]];
    }
    (delta, gdiv)
}

fn pick_unassigned<R: Rng + ?Sized>(unassigned: &[bool], rng: &mut R) -> usize {
    let pool: Vec<usize> = (0..unassigned.len()).filter(|&i| unassigned[i]).collect();
    pool[rng.random_range(0..pool.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2 as Matrix;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn random_matrix(n: usize, rng: &mut StdRng) -> DissimilarityMatrix {
        let mut d = Matrix::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let w: f64 = rng.random();
                d[[i, j]] = w;
                d[[j, i]] = w;
            }
        }
        DissimilarityMatrix::from_dense(d).unwrap()
    }

    #[test]
    fn offspring_is_always_feasible() {
        let mut rng = StdRng::seed_from_u64(77);
        let d = random_matrix(21, &mut rng);
        let bounds = GroupBounds::new(vec![4, 5, 6], vec![8, 8, 9]).unwrap();
        for _ in 0..300 {
            let p1 = {
                let mut s = Solution::random(21, &bounds, &mut rng);
                s.evaluate(&d);
                s
            };
            let p2 = {
                let mut s = Solution::random(21, &bounds, &mut rng);
                s.evaluate(&d);
                s
            };
            let child = crossover(&d, &bounds, &p1, &p2, &mut rng);
            assert!(child.is_feasible(&bounds), "sizes {:?}", child.sizes);
            assert_eq!(child.sizes.iter().sum::<usize>(), 21);
            assert!((child.objective(&d) - child.cost).abs() < 1e-6);
        }
    }

    #[test]
    fn offspring_inherits_whole_groups_when_they_fit() {
        // exact sizes: every donor set fits an untouched offspring group,
        // so each offspring group equals some parent group as a set
        let mut rng = StdRng::seed_from_u64(5);
        let d = random_matrix(12, &mut rng);
        let bounds = GroupBounds::exact(&[4, 4, 4]).unwrap();
        let mut p1 = Solution::random(12, &bounds, &mut rng);
        p1.evaluate(&d);
        let mut p2 = Solution::random(12, &bounds, &mut rng);
        p2.evaluate(&d);
        let child = crossover(&d, &bounds, &p1, &p2, &mut rng);
        assert!(child.is_feasible(&bounds));

        let group_of = |s: &Solution, g: usize| {
            let mut v: Vec<usize> = (0..12).filter(|&i| s.assignment[i] == g).collect();
            v.sort();
            v
        };
        let mut parent_groups = Vec::new();
        for g in 0..3 {
            parent_groups.push(group_of(&p1, g));
            parent_groups.push(group_of(&p2, g));
        }
        // the first donated group is inherited intact from one parent
        let inherited = (0..3).any(|g| parent_groups.contains(&group_of(&child, g)));
        assert!(inherited);
    }
}
