//! Benchmark instance and result files.
//!
//! The instance format is the plain-text one used by the MDGP benchmark
//! suites: `N`, then `K`, a `ds`/`ss` tag and `K` pairs `LB UB`, then
//! `i j d` triples (unlisted pairs default to zero). Instances with
//! `N == 3000` follow the MDG-c convention instead: no group header,
//! `K = 50` with bounds `[48, 72]` for every group.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use divgroup_model::{DissimilarityMatrix, GroupBounds, ModelError, Solution};

/// Errors while reading or writing problem and result files.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {message}")]
    Format { path: String, message: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    /// Refusal to write a solution that fails verification.
    #[error("solution failed verification: {0}")]
    Unverified(String),
}

/// A parsed benchmark instance.
pub struct Instance {
    pub name: String,
    pub matrix: DissimilarityMatrix,
    pub bounds: GroupBounds,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("n", &self.matrix.n())
            .field("k", &self.bounds.k())
            .finish()
    }
}

/// Number of items at which the MDG-c convention kicks in.
const MDG_C_SIZE: usize = 3000;

pub fn read_instance(path: impl AsRef<Path>) -> Result<Instance, InstanceError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| InstanceError::Io {
        path: display.clone(),
        source,
    })?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("instance")
        .to_string();

    let fmt_err = |message: String| InstanceError::Format {
        path: display.clone(),
        message,
    };

    let mut tokens = text.split_whitespace();
    let next_usize = |what: &str, tokens: &mut std::str::SplitWhitespace<'_>| {
        tokens
            .next()
            .ok_or_else(|| fmt_err(format!("missing {what}")))?
            .parse::<usize>()
            .map_err(|e| fmt_err(format!("bad {what}: {e}")))
    };

    let n = next_usize("item count", &mut tokens)?;
    let bounds = if n == MDG_C_SIZE {
        GroupBounds::uniform(50, 48, 72)?
    } else {
        let k = next_usize("group count", &mut tokens)?;
        let tag = tokens
            .next()
            .ok_or_else(|| fmt_err("missing size-bound tag".into()))?;
        if tag != "ds" && tag != "ss" {
            return Err(fmt_err(format!("unknown size-bound tag {tag:?}")));
        }
        let mut lb = Vec::with_capacity(k);
        let mut ub = Vec::with_capacity(k);
        for g in 0..k {
            lb.push(next_usize(&format!("lower bound of group {g}"), &mut tokens)?);
            ub.push(next_usize(&format!("upper bound of group {g}"), &mut tokens)?);
        }
        GroupBounds::new(lb, ub)?
    };
    bounds.validate(n)?;

    let mut edges = Vec::new();
    loop {
        let Some(first) = tokens.next() else { break };
        let i = first
            .parse::<usize>()
            .map_err(|e| fmt_err(format!("bad edge endpoint: {e}")))?;
        let j = next_usize("edge endpoint", &mut tokens)?;
        let w = tokens
            .next()
            .ok_or_else(|| fmt_err("truncated edge record".into()))?
            .parse::<f64>()
            .map_err(|e| fmt_err(format!("bad edge weight: {e}")))?;
        edges.push((i, j, w));
    }
    let matrix = DissimilarityMatrix::from_edges(n, edges)?;

    Ok(Instance {
        name,
        matrix,
        bounds,
    })
}

/// The wall-clock budget the benchmark protocol grants an instance of
/// `n` items, in seconds.
pub fn default_time_limit(n: usize) -> f64 {
    match n {
        120 => 3.0,
        240 => 20.0,
        480 => 120.0,
        960 => 600.0,
        2000 => 1200.0,
        3000 => 3000.0,
        _ => (n as f64 / 40.0).clamp(3.0, 3000.0),
    }
}

/// Append a verified solution to a result file: the record `N K cost`,
/// then one `LB UB size` line per group, then one `item group` line per
/// item. Unverifiable solutions are refused.
pub fn write_solution(
    path: impl AsRef<Path>,
    solution: &Solution,
    matrix: &DissimilarityMatrix,
    bounds: &GroupBounds,
) -> Result<(), InstanceError> {
    if !solution.verify(matrix, bounds) {
        return Err(InstanceError::Unverified(format!(
            "cost {} does not match a recompute or sizes break the bounds",
            solution.cost
        )));
    }
    let display = path.as_ref().display().to_string();
    let io_err = |source| InstanceError::Io {
        path: display.clone(),
        source,
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())
        .map_err(io_err)?;
    writeln!(file, "{} {} {}", solution.n(), solution.k(), solution.cost).map_err(io_err)?;
    for g in 0..solution.k() {
        writeln!(file, "{} {} {}", bounds.lb(g), bounds.ub(g), solution.sizes[g]).map_err(io_err)?;
    }
    for (i, &g) in solution.assignment.iter().enumerate() {
        writeln!(file, "{i} {g}").map_err(io_err)?;
    }
    Ok(())
}

/// Append one batch summary line: `instance best average worst`.
pub fn write_summary(
    path: impl AsRef<Path>,
    instance: &str,
    best: f64,
    average: f64,
    worst: f64,
) -> Result<(), InstanceError> {
    let display = path.as_ref().display().to_string();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())
        .map_err(|source| InstanceError::Io {
            path: display.clone(),
            source,
        })?;
    writeln!(file, "{instance} {best} {average} {worst}").map_err(|source| InstanceError::Io {
        path: display,
        source,
    })
}
