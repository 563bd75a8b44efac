//! Exchange method for anticlustering.
//!
//! Anticlustering partitions items into groups of fixed sizes so that the
//! groups resemble one another, which is the reverse of k-means: the
//! within-cluster variance is *maximized*. The engine sweeps over the
//! items and, for each one, commits the exchange partner that improves
//! the variance objective the most. When category labels are supplied,
//! only same-category partners are considered, so any categorical balance
//! present in the initial partition is preserved.
//!
//! The caller supplies the initial feasible partition; group sizes are
//! fixed (`frequencies`) and never change, since every move is a swap.

use ndarray::{Array2, ArrayView1};

use divgroup_model::ModelError;

/// Exchange engine state: item features, the fixed group sizes, the
/// current partition, and incrementally maintained cluster centers and
/// per-cluster variances.
#[derive(Debug, Clone)]
pub struct ExchangeAnticlustering {
    values: Array2<f64>,
    frequencies: Vec<usize>,
    assignment: Vec<usize>,
    /// Partner buckets: with categories, one bucket per category;
    /// without, a single bucket with every item.
    partner_buckets: Vec<Vec<usize>>,
    /// Bucket of each item.
    bucket_of: Vec<usize>,
    /// Inverted membership index, `members[g]` in no particular order.
    members: Vec<Vec<usize>>,
    centers: Array2<f64>,
    objectives: Vec<f64>,
    total: f64,
}

impl ExchangeAnticlustering {
    /// Validate the inputs and set up centers, variances and indexes.
    ///
    /// `frequencies` are exact group sizes and must agree with the
    /// initial assignment; `categories`, when given, must cover every
    /// item. Balancing the categories across groups is the caller's
    /// responsibility, as only swaps within a category are ever made.
    pub fn new(
        values: Array2<f64>,
        frequencies: &[usize],
        initial: &[usize],
        categories: Option<&[usize]>,
    ) -> Result<Self, ModelError> {
        let n = values.nrows();
        let k = frequencies.len();
        if k == 0 {
            return Err(ModelError::InfeasibleBounds(
                "at least one group is required".into(),
            ));
        }
        if frequencies.iter().any(|&f| f == 0) {
            return Err(ModelError::InfeasibleBounds(
                "every group needs at least one member".into(),
            ));
        }
        let total_freq: usize = frequencies.iter().sum();
        if total_freq != n {
            return Err(ModelError::AssignmentMismatch(format!(
                "frequencies sum to {total_freq} but there are {n} items"
            )));
        }
        if initial.len() != n {
            return Err(ModelError::AssignmentMismatch(format!(
                "initial assignment covers {} of {n} items",
                initial.len()
            )));
        }
        let mut counts = vec![0usize; k];
        for (i, &g) in initial.iter().enumerate() {
            if g >= k {
                return Err(ModelError::AssignmentMismatch(format!(
                    "item {i} assigned to group {g}, only {k} groups exist"
                )));
            }
            counts[g] += 1;
        }
        for g in 0..k {
            if counts[g] != frequencies[g] {
                return Err(ModelError::AssignmentMismatch(format!(
                    "group {g} holds {} items but its frequency is {}",
                    counts[g], frequencies[g]
                )));
            }
        }

        let (partner_buckets, bucket_of) = match categories {
            Some(cats) => {
                if cats.len() != n {
                    return Err(ModelError::AssignmentMismatch(format!(
                        "categories cover {} of {n} items",
                        cats.len()
                    )));
                }
                let c = cats.iter().copied().max().map_or(1, |m| m + 1);
                let mut buckets = vec![Vec::new(); c];
                for (i, &cat) in cats.iter().enumerate() {
                    buckets[cat].push(i);
                }
                (buckets, cats.to_vec())
            }
            None => (vec![(0..n).collect()], vec![0; n]),
        };

        let mut members = vec![Vec::new(); k];
        for (i, &g) in initial.iter().enumerate() {
            members[g].push(i);
        }

        let m = values.ncols();
        let mut centers = Array2::zeros((k, m));
        for g in 0..k {
            for &i in &members[g] {
                for c in 0..m {
                    centers[[g, c]] += values[[i, c]];
                }
            }
            for c in 0..m {
                centers[[g, c]] /= frequencies[g] as f64;
            }
        }

        let mut engine = Self {
            values,
            frequencies: frequencies.to_vec(),
            assignment: initial.to_vec(),
            partner_buckets,
            bucket_of,
            members,
            centers,
            objectives: vec![0.0; k],
            total: 0.0,
        };
        for g in 0..k {
            engine.objectives[g] = engine.cluster_var(g);
        }
        engine.total = engine.objectives.iter().sum();
        Ok(engine)
    }

    /// One sweep over all items. For each item the best-improving legal
    /// exchange partner is sought; the swap is committed only when it
    /// beats the current total objective. Returns whether any swap was
    /// committed.
    pub fn pass(&mut self) -> bool {
        let n = self.assignment.len();
        let m = self.values.ncols();
        let mut center_a = vec![0.0; m];
        let mut center_b = vec![0.0; m];
        let mut improved = false;

        for i in 0..n {
            let home = self.assignment[i];
            let mut best_obj = 0.0;
            let mut best_partner = None;
            for b in 0..self.partner_buckets[self.bucket_of[i]].len() {
                let j = self.partner_buckets[self.bucket_of[i]][b];
                if self.assignment[j] == home {
                    continue;
                }
                let tmp_obj = self.swapped_objective(i, j, &mut center_a, &mut center_b);
                if tmp_obj > best_obj {
                    best_obj = tmp_obj;
                    best_partner = Some(j);
                }
            }
            if best_obj > self.total {
                if let Some(j) = best_partner {
                    self.commit_swap(i, j);
                    improved = true;
                }
            }
        }
        improved
    }

    /// Sweep until a pass commits nothing. Returns the number of sweeps.
    pub fn run(&mut self) -> usize {
        let mut passes = 0;
        loop {
            passes += 1;
            if !self.pass() {
                return passes;
            }
        }
    }

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    /// Current total within-cluster variance (the maximized objective).
    pub fn objective(&self) -> f64 {
        self.total
    }

    pub fn centers(&self) -> &Array2<f64> {
        &self.centers
    }

    /// Total objective after tentatively swapping `i` and `j`, using the
    /// incremental centroid update and recomputing only the two affected
    /// cluster variances. `center_a`/`center_b` are caller-owned scratch.
    fn swapped_objective(
        &self,
        i: usize,
        j: usize,
        center_a: &mut [f64],
        center_b: &mut [f64],
    ) -> f64 {
        let a = self.assignment[i];
        let b = self.assignment[j];
        let m = self.values.ncols();
        for c in 0..m {
            let shift = self.values[[j, c]] - self.values[[i, c]];
            center_a[c] = self.centers[[a, c]] + shift / self.frequencies[a] as f64;
            center_b[c] = self.centers[[b, c]] - shift / self.frequencies[b] as f64;
        }
        let mut var_a = 0.0;
        for &x in &self.members[a] {
            let row = if x == i { j } else { x };
            var_a += squared_distance(self.values.row(row), center_a);
        }
        let mut var_b = 0.0;
        for &x in &self.members[b] {
            let row = if x == j { i } else { x };
            var_b += squared_distance(self.values.row(row), center_b);
        }
        self.total - self.objectives[a] - self.objectives[b] + var_a + var_b
    }

    /// Commit the exchange: group labels follow the items, the two
    /// centers move incrementally, the two variances are recomputed.
    fn commit_swap(&mut self, i: usize, j: usize) {
        let a = self.assignment[i];
        let b = self.assignment[j];
        let m = self.values.ncols();
        for c in 0..m {
            let shift = self.values[[j, c]] - self.values[[i, c]];
            self.centers[[a, c]] += shift / self.frequencies[a] as f64;
            self.centers[[b, c]] -= shift / self.frequencies[b] as f64;
        }
        self.assignment[i] = b;
        self.assignment[j] = a;
        if let Some(slot) = self.members[a].iter().position(|&x| x == i) {
            self.members[a][slot] = j;
        }
        if let Some(slot) = self.members[b].iter().position(|&x| x == j) {
            self.members[b][slot] = i;
        }
        self.objectives[a] = self.cluster_var(a);
        self.objectives[b] = self.cluster_var(b);
        self.total = self.objectives.iter().sum();
    }

    /// Sum of squared distances from the members of `g` to its center.
    fn cluster_var(&self, g: usize) -> f64 {
        let mut sum = 0.0;
        for &i in &self.members[g] {
            let mut dist = 0.0;
            for c in 0..self.values.ncols() {
                let diff = self.values[[i, c]] - self.centers[[g, c]];
                dist += diff * diff;
            }
            sum += dist;
        }
        sum
    }
}

fn squared_distance(row: ArrayView1<'_, f64>, center: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (c, &v) in row.iter().enumerate() {
        let diff = v - center[c];
        sum += diff * diff;
    }
    sum
}

/// Refine an initial partition in place: run exchange sweeps to a local
/// optimum and return the final assignment.
pub fn anticlustering(
    values: &Array2<f64>,
    frequencies: &[usize],
    initial: &[usize],
    categories: Option<&[usize]>,
) -> Result<Vec<usize>, ModelError> {
    let mut engine = ExchangeAnticlustering::new(values.clone(), frequencies, initial, categories)?;
    engine.run();
    Ok(engine.assignment().to_vec())
}
