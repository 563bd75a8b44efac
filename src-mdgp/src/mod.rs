//! Three-phase memetic search with a dynamic population for the
//! maximally diverse grouping problem (MDGP).
//!
//! The solver partitions `N` items into `K` groups under per-group size
//! bounds, maximizing the total dissimilarity between co-grouped items.
//!
//! Supported features:
//! - Delta-matrix bookkeeping: every relocate/swap scored in O(1),
//!   committed in O(N)
//! - Local search over the relocate and swap neighborhoods
//! - Strong (random kicks) and directed (eject-and-reinsert)
//!   perturbations
//! - Group-wise crossover with size-bound repair
//! - Diversity-aware replacement rule
//! - Population and kick strength shrinking linearly over the wall-clock
//!   budget
//! - Optional per-iteration callback (may stop early)
//! - Benchmark instance/result file formats and a CSV convergence
//!   recorder

use std::fmt;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use divgroup_model::{DissimilarityMatrix, GroupBounds, ModelError, Solution};

pub mod crossover;
pub mod delta;
pub mod instance;
pub mod local_search;
pub mod perturbation;
pub mod population;
pub mod recorder;

pub use crossover::crossover;
pub use delta::DeltaMatrix;
pub use divgroup_model as model;
pub use instance::{
    Instance, InstanceError, default_time_limit, read_instance, write_solution, write_summary,
};
pub use local_search::{GAIN_EPSILON, local_search};
pub use perturbation::{directed_perturbation, strong_perturbation};
pub use population::{Population, fit_ratio, replaces, scheduled_pop_size, scheduled_theta};
pub use recorder::{ConvergenceRecord, ConvergenceRecorder, run_recorded_three_phase_search};

/// Relative tolerance before the stored cost is declared drifted and the
/// delta matrix force-rebuilt.
const DRIFT_EPSILON: f64 = 1e-4;

/// Rounds of the directed perturbation per outer iteration.
const DEFAULT_LMAX: usize = 3;

/// Initial population size.
const DEFAULT_POP_SIZE: usize = 15;

/// Configuration for the three-phase search.
pub struct TpsConfig {
    /// Initial population size.
    pub pop_size: usize,
    /// Final population size; `None` picks the size-dependent default
    /// (2 for `N <= 400`, else 1).
    pub pop_min: Option<usize>,
    /// Initial kick strength factor; `None` picks the size-dependent
    /// default (1.2 for `N <= 400`, else 2.0).
    pub theta_max: Option<f64>,
    /// Final kick strength factor; `None` picks the size-dependent
    /// default (0.1 for `N <= 400`, else 1.0).
    pub theta_min: Option<f64>,
    /// Rounds of the directed perturbation per iteration.
    pub lmax: usize,
    /// Soft wall-clock budget; the iteration in flight always finishes.
    pub time_limit: Duration,
    pub seed: Option<u64>,
    /// Print progress at each outer iteration.
    pub disp: bool,
    /// Optional per-iteration callback (may stop early).
    pub callback: Option<Box<dyn FnMut(&TpsIntermediate) -> CallbackAction + Send>>,
}

impl Default for TpsConfig {
    fn default() -> Self {
        Self {
            pop_size: DEFAULT_POP_SIZE,
            pop_min: None,
            theta_max: None,
            theta_min: None,
            lmax: DEFAULT_LMAX,
            time_limit: Duration::from_secs(10),
            seed: None,
            disp: false,
            callback: None,
        }
    }
}

/// Fluent builder for `TpsConfig`.
pub struct TpsConfigBuilder {
    cfg: TpsConfig,
}

impl TpsConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: TpsConfig::default(),
        }
    }
    pub fn pop_size(mut self, v: usize) -> Self {
        self.cfg.pop_size = v.max(1);
        self
    }
    pub fn pop_min(mut self, v: usize) -> Self {
        self.cfg.pop_min = Some(v.max(1));
        self
    }
    pub fn theta(mut self, max: f64, min: f64) -> Self {
        self.cfg.theta_max = Some(max);
        self.cfg.theta_min = Some(min);
        self
    }
    pub fn lmax(mut self, v: usize) -> Self {
        self.cfg.lmax = v;
        self
    }
    pub fn time_limit(mut self, v: Duration) -> Self {
        self.cfg.time_limit = v;
        self
    }
    pub fn seed(mut self, v: u64) -> Self {
        self.cfg.seed = Some(v);
        self
    }
    pub fn disp(mut self, v: bool) -> Self {
        self.cfg.disp = v;
        self
    }
    pub fn callback(
        mut self,
        cb: Box<dyn FnMut(&TpsIntermediate) -> CallbackAction + Send>,
    ) -> Self {
        self.cfg.callback = Some(cb);
        self
    }
    pub fn build(self) -> TpsConfig {
        self.cfg
    }
}

impl Default for TpsConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot passed to the callback after each outer iteration.
pub struct TpsIntermediate {
    pub best_cost: f64,
    pub iteration: usize,
    pub pop_size: usize,
    pub elapsed: Duration,
}

/// Action returned by the callback.
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Result of a three-phase search run.
#[derive(Clone)]
pub struct TpsReport {
    pub assignment: Vec<usize>,
    pub sizes: Vec<usize>,
    pub cost: f64,
    pub iterations: usize,
    /// Committed local-search moves across the whole run.
    pub moves: usize,
    pub elapsed: Duration,
    /// Whether the returned solution passed verification.
    pub success: bool,
    pub message: String,
    pub population_costs: Vec<f64>,
}

impl TpsReport {
    /// The best solution as a standalone value.
    pub fn best_solution(&self) -> Solution {
        Solution {
            assignment: self.assignment.clone(),
            sizes: self.sizes.clone(),
            cost: self.cost,
        }
    }
}

impl fmt::Debug for TpsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpsReport")
            .field("assignment", &format!("len={}", self.assignment.len()))
            .field("cost", &self.cost)
            .field("iterations", &self.iterations)
            .field("moves", &self.moves)
            .field("elapsed", &self.elapsed)
            .field("success", &self.success)
            .field("message", &self.message)
            .field(
                "population_costs",
                &format!("len={}", self.population_costs.len()),
            )
            .finish()
    }
}

/// Three-phase search solver. Owns its RNG and all scratch state; two
/// instances are fully independent.
pub struct ThreePhaseSearch<'a> {
    matrix: &'a DissimilarityMatrix,
    bounds: GroupBounds,
    config: TpsConfig,
}

impl<'a> ThreePhaseSearch<'a> {
    /// Create a solver after validating that the bounds admit a partition
    /// of the items.
    pub fn new(matrix: &'a DissimilarityMatrix, bounds: GroupBounds) -> Result<Self, ModelError> {
        bounds.validate(matrix.n())?;
        Ok(Self {
            matrix,
            bounds,
            config: TpsConfig::default(),
        })
    }

    /// Mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut TpsConfig {
        &mut self.config
    }

    /// Run until the time budget is spent and return the best solution
    /// ever observed.
    pub fn solve(&mut self) -> TpsReport {
        let matrix = self.matrix;
        let bounds = self.bounds.clone();
        let n = matrix.n();
        let k = bounds.k();
        let disp = self.config.disp;
        let pop_initial = self.config.pop_size.max(1);
        let lmax = self.config.lmax;

        let small = n <= 400;
        let theta_max = self.config.theta_max.unwrap_or(if small { 1.2 } else { 2.0 });
        let theta_min = self.config.theta_min.unwrap_or(if small { 0.1 } else { 1.0 });
        let pop_min = self
            .config
            .pop_min
            .unwrap_or(if small { 2 } else { 1 })
            .clamp(1, pop_initial);

        let mut rng: StdRng = match self.config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => {
                let mut thread_rng = rand::rng();
                StdRng::from_rng(&mut thread_rng)
            }
        };

        let started = Instant::now();
        let time_limit = self.config.time_limit.as_secs_f64();
        let mut delta = DeltaMatrix::new(n, k);
        let mut moves = 0usize;
        let mut drift_warned = false;

        if disp {
            eprintln!(
                "TPS init: N={} K={} pop={} theta=[{:.2}, {:.2}] budget={:.1}s",
                n, k, pop_initial, theta_min, theta_max, time_limit
            );
        }

        let mut seeds = Vec::with_capacity(pop_initial);
        for _ in 0..pop_initial {
            let mut member = Solution::random(n, &bounds, &mut rng);
            moves += local_search(matrix, &bounds, &mut member, &mut delta);
            seeds.push(member);
        }
        let mut pop = Population::new(seeds);

        if disp {
            eprintln!("TPS iter    0  best={:.6e}", pop.best().cost);
        }

        let mut iterations = 0usize;
        let mut message = String::new();
        while started.elapsed().as_secs_f64() < time_limit {
            iterations += 1;
            let frac = started.elapsed().as_secs_f64() / time_limit;
            let theta = scheduled_theta(theta_max, theta_min, frac);
            let strength = (theta * n as f64 / k as f64) as usize;

            // phase 1: random kicks followed by local search
            for i in 0..pop.len() {
                {
                    let member = &mut pop.members_mut()[i];
                    strong_perturbation(&bounds, member, strength, &mut rng);
                    moves += local_search(matrix, &bounds, member, &mut delta);
                    check_drift(matrix, member, &mut delta, &mut drift_warned);
                }
                pop.track_index(i);
            }

            // phase 2: recombination with a random peer, replacement rule
            if pop.len() > 1 {
                let mut brood = Vec::with_capacity(pop.len());
                for i in 0..pop.len() {
                    let peer = pick_peer(pop.len(), i, &mut rng);
                    let mut child =
                        crossover(matrix, &bounds, &pop.members()[i], &pop.members()[peer], &mut rng);
                    moves += local_search(matrix, &bounds, &mut child, &mut delta);
                    check_drift(matrix, &mut child, &mut delta, &mut drift_warned);
                    brood.push(child);
                }
                for (i, child) in brood.into_iter().enumerate() {
                    if replaces(&child, &pop.members()[i], k) {
                        pop.replace(i, child);
                    }
                    pop.track_index(i);
                }
            }

            // phase 3: directed perturbation followed by local search
            for i in 0..pop.len() {
                {
                    let member = &mut pop.members_mut()[i];
                    directed_perturbation(matrix, &bounds, member, &mut delta, lmax, &mut rng);
                    moves += local_search(matrix, &bounds, member, &mut delta);
                    check_drift(matrix, member, &mut delta, &mut drift_warned);
                }
                pop.track_index(i);
            }

            pop.sort_descending();
            let frac = started.elapsed().as_secs_f64() / time_limit;
            pop.shrink_to(scheduled_pop_size(pop_initial, pop_min, frac));

            if disp {
                eprintln!(
                    "TPS iter {:4}  best={:.6e}  pop={}  theta={:.3}",
                    iterations,
                    pop.best().cost,
                    pop.len(),
                    theta
                );
            }

            if let Some(cb) = self.config.callback.as_mut() {
                let intermediate = TpsIntermediate {
                    best_cost: pop.best().cost,
                    iteration: iterations,
                    pop_size: pop.len(),
                    elapsed: started.elapsed(),
                };
                if matches!(cb(&intermediate), CallbackAction::Stop) {
                    message = "Stopped by callback".into();
                    break;
                }
            }
        }
        if message.is_empty() {
            message = "Time budget exhausted".into();
        }

        let best = pop.best();
        let success = best.verify(matrix, &bounds);
        TpsReport {
            assignment: best.assignment.clone(),
            sizes: best.sizes.clone(),
            cost: best.cost,
            iterations,
            moves,
            elapsed: started.elapsed(),
            success,
            message,
            population_costs: pop.costs(),
        }
    }
}

/// Convenience wrapper constructing and running a solver in one call.
pub fn three_phase_search(
    matrix: &DissimilarityMatrix,
    bounds: GroupBounds,
    config: TpsConfig,
) -> Result<TpsReport, ModelError> {
    let mut solver = ThreePhaseSearch::new(matrix, bounds)?;
    *solver.config_mut() = config;
    Ok(solver.solve())
}

/// Compare the incrementally maintained cost against a full recompute;
/// on divergence force a rebuild and warn once. Drift is never fatal.
fn check_drift(
    matrix: &DissimilarityMatrix,
    solution: &mut Solution,
    delta: &mut DeltaMatrix,
    warned: &mut bool,
) {
    let stored = solution.cost;
    let recomputed = solution.objective(matrix);
    if (recomputed - stored).abs() > DRIFT_EPSILON * stored.abs().max(1.0) {
        delta.rebuild(matrix, solution);
        if !*warned {
            eprintln!(
                "TPS: stored objective {stored:.6} drifted from recompute {recomputed:.6}; delta matrix rebuilt"
            );
            *warned = true;
        }
    }
}

/// A random population index other than `me` (the pool holds at least
/// two members).
fn pick_peer<R: Rng + ?Sized>(len: usize, me: usize, rng: &mut R) -> usize {
    let mut p = rng.random_range(0..len);
    loop {
        p = (p + 1) % len;
        if p != me {
            return p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;

    fn random_matrix(n: usize, seed: u64) -> DissimilarityMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
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

    #[test]
    fn rejects_infeasible_bounds() {
        let d = random_matrix(6, 1);
        let bounds = GroupBounds::uniform(2, 4, 5).unwrap();
        assert!(ThreePhaseSearch::new(&d, bounds).is_err());
    }

    #[test]
    fn returns_a_verified_solution() {
        let d = random_matrix(15, 2);
        let bounds = GroupBounds::uniform(3, 4, 6).unwrap();
        let config = TpsConfigBuilder::new()
            .seed(9)
            .pop_size(5)
            .time_limit(Duration::from_millis(100))
            .build();
        let report = three_phase_search(&d, bounds.clone(), config).unwrap();
        assert!(report.success, "{report:?}");
        assert!(report.best_solution().verify(&d, &bounds));
        assert!(report.iterations > 0);
    }

    #[test]
    fn callback_can_stop_the_run() {
        let d = random_matrix(12, 3);
        let bounds = GroupBounds::uniform(2, 5, 7).unwrap();
        let config = TpsConfigBuilder::new()
            .seed(4)
            .pop_size(3)
            .time_limit(Duration::from_secs(60))
            .callback(Box::new(|_| CallbackAction::Stop))
            .build();
        let report = three_phase_search(&d, bounds, config).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.message, "Stopped by callback");
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let d = random_matrix(14, 6);
        let bounds = GroupBounds::uniform(2, 6, 8).unwrap();
        // stop on iteration count, not wall clock, so both runs walk the
        // exact same trajectory
        let run = |seed| {
            let config = TpsConfigBuilder::new()
                .seed(seed)
                .pop_size(4)
                .time_limit(Duration::from_secs(60))
                .callback(Box::new(|im: &TpsIntermediate| {
                    if im.iteration >= 3 {
                        CallbackAction::Stop
                    } else {
                        CallbackAction::Continue
                    }
                }))
                .build();
            let report = three_phase_search(&d, bounds.clone(), config).unwrap();
            (report.cost, report.assignment)
        };
        assert_eq!(run(11), run(11));
    }
}
