//! Root-finding driver over the parameter grid.
//!
//! Two strategies, selected by `random_warmup`:
//!
//! - Warm-up continuation: solve one representative point from scratch with
//!   a total-degree start, at parameters perturbed off the real axis so the
//!   start system is generic, then track every found root to all grid
//!   points in one batched continuation call. This pays the expensive
//!   maximum-path search once per sweep. If the perturbed system is itself
//!   degenerate the whole sweep silently undercounts roots; there is no
//!   detection or retry for that case.
//! - Independent total-degree: solve every grid point from scratch,
//!   strictly sequentially. The oracle carries internal state that is not
//!   safe for concurrent entry, so grid points are never solved in
//!   parallel here.

use anyhow::Result;
use log::{debug, info};
use num_complex::Complex;
use rand::Rng;

use crate::error::AtlasError;
use crate::grid::ParameterGrid;
use crate::oracle::RootOracle;
use crate::problem::Problem;
use crate::solutions::SolutionGrid;

/// Relative scale of the complex offset applied to swept parameters when
/// building the warm-up system.
const WARMUP_PERTURBATION: f64 = 1e-3;

pub fn solve_grid(
    problem: &Problem,
    oracle: &mut dyn RootOracle,
    grid: &ParameterGrid,
    random_warmup: bool,
) -> Result<SolutionGrid> {
    let points = if random_warmup {
        solve_with_warmup(problem, oracle, grid)?
    } else {
        solve_sequentially(problem, oracle, grid)?
    };

    if points.iter().all(|roots| roots.is_empty()) {
        return Err(AtlasError::NoSolutionsFound.into());
    }
    SolutionGrid::new(grid.shape().to_vec(), points)
}

fn solve_with_warmup(
    problem: &Problem,
    oracle: &mut dyn RootOracle,
    grid: &ParameterGrid,
) -> Result<Vec<Vec<Vec<Complex<f64>>>>> {
    let middle = grid.len() / 2;
    let warmup_params = perturb_swept(grid.point(middle), grid.swept_indices());
    debug!(
        "warm-up system at grid point {} of {}, perturbed parameters {:?}",
        middle,
        grid.len(),
        warmup_params
    );

    let starts = oracle.solve_total_degree(problem, &warmup_params)?;
    info!(
        "warm-up solve found {} start paths; tracking to {} grid points",
        starts.len(),
        grid.len()
    );

    oracle.solve_continuation(problem, &starts, &warmup_params, grid.points())
}

fn solve_sequentially(
    problem: &Problem,
    oracle: &mut dyn RootOracle,
    grid: &ParameterGrid,
) -> Result<Vec<Vec<Vec<Complex<f64>>>>> {
    let mut points = Vec::with_capacity(grid.len());
    for (i, params) in grid.points().iter().enumerate() {
        let complex_params: Vec<Complex<f64>> =
            params.iter().map(|&p| Complex::new(p, 0.0)).collect();
        let roots = oracle.solve_total_degree(problem, &complex_params)?;
        info!(
            "solved grid point {}/{}: {} roots",
            i + 1,
            grid.len(),
            roots.len()
        );
        points.push(roots);
    }
    Ok(points)
}

/// Copies a real parameter vector into the complex plane, displacing only
/// the swept components by a small random complex offset. Fixed components
/// stay exact so the warm-up system remains on the fixed-parameter slice.
fn perturb_swept(params: &[f64], swept_indices: &[usize]) -> Vec<Complex<f64>> {
    let mut rng = rand::thread_rng();
    let mut complex_params: Vec<Complex<f64>> =
        params.iter().map(|&p| Complex::new(p, 0.0)).collect();
    for &index in swept_indices {
        let scale = WARMUP_PERTURBATION * (1.0 + complex_params[index].re.abs());
        let offset = Complex::new(
            rng.gen_range(-1.0..1.0) * scale,
            rng.gen_range(-1.0..1.0) * scale,
        );
        complex_params[index] += offset;
    }
    complex_params
}
