//! Recording wrapper for the three-phase search, for testing and
//! convergence analysis.

use std::fs::create_dir_all;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use divgroup_model::{DissimilarityMatrix, GroupBounds};

use crate::{CallbackAction, TpsConfig, TpsIntermediate, TpsReport, three_phase_search};

/// One outer iteration of a recorded run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub iteration: usize,
    pub elapsed_secs: f64,
    pub best_cost: f64,
    pub pop_size: usize,
    pub is_improvement: bool,
}

/// Collects per-iteration progress via the solver callback.
#[derive(Debug)]
pub struct ConvergenceRecorder {
    name: String,
    records: Arc<Mutex<Vec<ConvergenceRecord>>>,
    best_seen: Arc<Mutex<Option<f64>>>,
}

impl ConvergenceRecorder {
    pub fn new(name: String) -> Self {
        Self {
            name,
            records: Arc::new(Mutex::new(Vec::new())),
            best_seen: Arc::new(Mutex::new(None)),
        }
    }

    /// A callback that appends one record per outer iteration.
    pub fn create_callback(&self) -> Box<dyn FnMut(&TpsIntermediate) -> CallbackAction + Send> {
        let records = self.records.clone();
        let best_seen = self.best_seen.clone();
        Box::new(move |intermediate: &TpsIntermediate| -> CallbackAction {
            let mut best_guard = best_seen.lock().unwrap();
            let is_improvement = match *best_guard {
                Some(best) => intermediate.best_cost > best,
                None => true,
            };
            if is_improvement {
                *best_guard = Some(intermediate.best_cost);
            }
            drop(best_guard);

            records.lock().unwrap().push(ConvergenceRecord {
                iteration: intermediate.iteration,
                elapsed_secs: intermediate.elapsed.as_secs_f64(),
                best_cost: intermediate.best_cost,
                pop_size: intermediate.pop_size,
                is_improvement,
            });
            CallbackAction::Continue
        })
    }

    /// Write all records to `<output_dir>/<name>.csv` and return the path.
    pub fn save_to_csv(&self, output_dir: &str) -> Result<String, Box<dyn std::error::Error>> {
        create_dir_all(output_dir)?;
        let filename = format!("{}/{}.csv", output_dir, self.name);
        let mut writer = csv::Writer::from_path(&filename)?;
        for record in self.records.lock().unwrap().iter() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(filename)
    }

    pub fn records(&self) -> Vec<ConvergenceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn num_iterations(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

/// Run the three-phase search with per-iteration recording to CSV.
///
/// Returns the report plus the CSV path. Primarily used by tests and the
/// convergence plots.
pub fn run_recorded_three_phase_search(
    name: &str,
    matrix: &DissimilarityMatrix,
    bounds: GroupBounds,
    mut config: TpsConfig,
    output_dir: &str,
) -> Result<(TpsReport, String), Box<dyn std::error::Error>> {
    let recorder = ConvergenceRecorder::new(name.to_string());
    config.callback = Some(recorder.create_callback());
    let report = three_phase_search(matrix, bounds, config)?;
    let csv_path = recorder.save_to_csv(output_dir)?;
    Ok((report, csv_path))
}
