use std::time::Duration;

use clap::Parser;
use rayon::prelude::*;
use serde::Serialize;

use divgroup_mdgp::{
    TpsConfigBuilder, TpsReport, default_time_limit, read_instance, three_phase_search,
    write_solution, write_summary,
};

/// Batch driver for the three-phase MDGP search: repeated independent
/// runs per instance, summary per instance.
#[derive(Parser)]
#[command(name = "divgroup_mdgp")]
#[command(about = "Solve MDGP benchmark instances with the three-phase memetic search")]
struct Args {
    /// Instance files in the benchmark text format
    #[arg(required = true)]
    instances: Vec<String>,

    /// Independent runs per instance
    #[arg(short, long, default_value = "20")]
    runs: usize,

    /// Wall-clock budget per run in seconds (default depends on N)
    #[arg(short, long)]
    time_limit: Option<f64>,

    /// Base random seed; run r uses seed + r
    #[arg(short, long)]
    seed: Option<u64>,

    /// Initial population size
    #[arg(short, long, default_value = "15")]
    pop_size: usize,

    /// Append per-instance summary lines (instance best average worst) here
    #[arg(short, long)]
    output: Option<String>,

    /// Append the best solution found per instance here
    #[arg(long)]
    solution: Option<String>,

    /// Print the batch summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Worker threads for the independent runs (0 = rayon default)
    #[arg(short, long, default_value = "0")]
    jobs: usize,

    /// Print per-iteration progress of the first run
    #[arg(short, long)]
    disp: bool,
}

#[derive(Serialize)]
struct InstanceSummary {
    instance: String,
    runs: usize,
    time_limit_secs: f64,
    best: f64,
    average: f64,
    worst: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.jobs > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.jobs)
            .build_global()?;
    }
    let runs = args.runs.max(1);
    let base_seed = args.seed.unwrap_or_else(rand::random::<u64>);

    let mut summaries = Vec::new();
    for path in &args.instances {
        let instance = read_instance(path)?;
        let limit = args
            .time_limit
            .unwrap_or_else(|| default_time_limit(instance.matrix.n()));
        eprintln!(
            "{}: N={} K={} runs={} budget={:.1}s seed={}",
            instance.name,
            instance.matrix.n(),
            instance.bounds.k(),
            runs,
            limit,
            base_seed
        );

        // independent runs are embarrassingly parallel
        let reports: Vec<TpsReport> = (0..runs)
            .into_par_iter()
            .map(|run| {
                let config = TpsConfigBuilder::new()
                    .pop_size(args.pop_size)
                    .time_limit(Duration::from_secs_f64(limit))
                    .seed(base_seed.wrapping_add(run as u64))
                    .disp(args.disp && run == 0)
                    .build();
                three_phase_search(&instance.matrix, instance.bounds.clone(), config)
            })
            .collect::<Result<_, _>>()?;

        let mut best = f64::NEG_INFINITY;
        let mut worst = f64::INFINITY;
        let mut total = 0.0;
        let mut champion = &reports[0];
        for report in &reports {
            println!("{:.6}", report.cost);
            total += report.cost;
            if report.cost > best {
                best = report.cost;
                champion = report;
            }
            if report.cost < worst {
                worst = report.cost;
            }
        }
        let average = total / reports.len() as f64;

        if let Some(output) = &args.output {
            write_summary(output, &instance.name, best, average, worst)?;
        }
        if let Some(solution) = &args.solution {
            write_solution(
                solution,
                &champion.best_solution(),
                &instance.matrix,
                &instance.bounds,
            )?;
        }
        summaries.push(InstanceSummary {
            instance: instance.name.clone(),
            runs,
            time_limit_secs: limit,
            best,
            average,
            worst,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for s in &summaries {
            println!("{} {} {} {}", s.instance, s.best, s.average, s.worst);
        }
    }
    Ok(())
}
