use std::time::Duration;

use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::Rng;

use divgroup_mdgp::model::{DissimilarityMatrix, GroupBounds};
use divgroup_mdgp::{TpsConfigBuilder, run_recorded_three_phase_search};

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
fn recorded_run_writes_a_monotone_trace() {
    let d = random_matrix(20, 7);
    let bounds = GroupBounds::uniform(4, 4, 6).unwrap();
    let config = TpsConfigBuilder::new()
        .seed(42)
        .pop_size(6)
        .time_limit(Duration::from_millis(200))
        .build();

    let dir = tempfile::tempdir().unwrap();
    let (report, csv_path) = run_recorded_three_phase_search(
        "random_20",
        &d,
        bounds.clone(),
        config,
        dir.path().to_str().unwrap(),
    )
    .unwrap();
    assert!(report.success);
    assert!(std::path::Path::new(&csv_path).exists());

    // the best-ever cost never decreases over a run
    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let mut rows = 0;
    let mut last_best = f64::NEG_INFINITY;
    let mut last_pop = usize::MAX;
    for record in reader.deserialize() {
        let record: divgroup_mdgp::ConvergenceRecord = record.unwrap();
        assert!(record.best_cost >= last_best);
        assert!(record.pop_size <= last_pop);
        last_best = record.best_cost;
        last_pop = record.pop_size;
        rows += 1;
    }
    assert!(rows >= 1, "at least one iteration should be recorded");
    assert!((last_best - report.cost).abs() < 1e-9);
}
