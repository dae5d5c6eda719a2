//! Per-branch, per-point classification.
//!
//! Predicates evaluate over the full variable-and-parameter assignment of
//! one (grid point, branch) pair and produce named boolean label arrays
//! stored alongside the solutions. Sentinel branches never satisfy any
//! built-in class.

use anyhow::{anyhow, Result};
use nalgebra::DMatrix;
use num_complex::Complex;
use rayon::prelude::*;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::grid::ParameterGrid;
use crate::problem::{CompiledJacobian, Problem};
use crate::solutions::{is_sentinel, SolutionGrid};

/// `labels[point][branch]`, same shape and branch count as the grid.
pub type LabelArray = Vec<Vec<bool>>;

/// One named classification over the whole grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassLabels {
    pub name: String,
    pub labels: LabelArray,
}

/// A branch is physical when every component is numerically real: the
/// imaginary part stays below `tol * (1 + |re|)` (absolute plus relative).
/// Domain-specific range constraints go through `classify_custom`.
pub fn classify_physical(solutions: &SolutionGrid, tolerance: f64) -> LabelArray {
    (0..solutions.len())
        .map(|i| {
            solutions
                .point(i)
                .iter()
                .map(|branch| {
                    !is_sentinel(branch)
                        && branch
                            .iter()
                            .all(|c| c.im.abs() <= tolerance * (1.0 + c.re.abs()))
                })
                .collect()
        })
        .collect()
}

/// A branch is linearly stable when every Jacobian eigenvalue has real part
/// below `-tolerance`. Sentinel branches are always unstable. A Jacobian
/// evaluation failure (degenerate implicit linearization, eigenvalue
/// non-convergence) aborts the whole call, leaving the label undetermined
/// rather than silently false.
pub fn classify_stable(
    solutions: &SolutionGrid,
    grid: &ParameterGrid,
    jacobian: &CompiledJacobian,
    tolerance: f64,
    threading: bool,
) -> Result<LabelArray> {
    classify_by_eigenvalues(solutions, grid, jacobian, threading, move |eigenvalues| {
        eigenvalues.iter().all(|lambda| lambda.re < -tolerance)
    })
}

/// A branch sits on a neutrally stable (limit-cycle) mode when exactly one
/// eigenvalue vanishes within tolerance while every other eigenvalue is
/// strictly negative. Distinguishes the zero mode of an added symmetry from
/// genuine instability.
pub fn classify_hopf(
    solutions: &SolutionGrid,
    grid: &ParameterGrid,
    jacobian: &CompiledJacobian,
    tolerance: f64,
    threading: bool,
) -> Result<LabelArray> {
    classify_by_eigenvalues(solutions, grid, jacobian, threading, move |eigenvalues| {
        let zero_modes = eigenvalues
            .iter()
            .filter(|lambda| lambda.norm() <= tolerance)
            .count();
        let rest_negative = eigenvalues
            .iter()
            .filter(|lambda| lambda.norm() > tolerance)
            .all(|lambda| lambda.re < -tolerance);
        zero_modes == 1 && rest_negative
    })
}

fn classify_by_eigenvalues<F>(
    solutions: &SolutionGrid,
    grid: &ParameterGrid,
    jacobian: &CompiledJacobian,
    threading: bool,
    accept: F,
) -> Result<LabelArray>
where
    F: Fn(&[Complex<f64>]) -> bool + Sync,
{
    let point_labels = |i: usize| -> Result<Vec<bool>> {
        let params: Vec<Complex<f64>> = grid
            .point(i)
            .iter()
            .map(|&p| Complex::new(p, 0.0))
            .collect();
        let mut stack = Vec::new();
        solutions
            .point(i)
            .iter()
            .map(|branch| {
                if is_sentinel(branch) {
                    return Ok(false);
                }
                let jac = jacobian.evaluate(branch, &params, &mut stack, i)?;
                let eigenvalues = eigenvalues_of(&jac, i)?;
                Ok(accept(&eigenvalues))
            })
            .collect()
    };

    if threading {
        (0..solutions.len())
            .into_par_iter()
            .map(point_labels)
            .collect()
    } else {
        (0..solutions.len()).map(point_labels).collect()
    }
}

fn eigenvalues_of(jacobian: &DMatrix<Complex<f64>>, point: usize) -> Result<Vec<Complex<f64>>> {
    let values = jacobian
        .eigenvalues()
        .ok_or_else(|| anyhow!("eigenvalue computation did not converge at grid point {point}"))?;
    Ok(values.iter().cloned().collect())
}

/// Evaluates an arbitrary predicate over the full assignment of each
/// (point, branch) pair. Sentinel branches are labelled false without
/// invoking the predicate.
pub fn classify_custom<F>(
    solutions: &SolutionGrid,
    grid: &ParameterGrid,
    problem: &Problem,
    predicate: F,
) -> LabelArray
where
    F: Fn(&BTreeMap<String, Complex<f64>>) -> bool,
{
    (0..solutions.len())
        .map(|i| {
            solutions
                .point(i)
                .iter()
                .map(|branch| {
                    if is_sentinel(branch) {
                        return false;
                    }
                    predicate(&assignment(problem, branch, grid.point(i)))
                })
                .collect()
        })
        .collect()
}

/// Full symbol-to-value assignment for one (point, branch) pair: variable
/// values from the branch, parameter values from the grid point.
pub(crate) fn assignment(
    problem: &Problem,
    branch: &[Complex<f64>],
    params: &[f64],
) -> BTreeMap<String, Complex<f64>> {
    let mut map = BTreeMap::new();
    for (name, value) in problem.variables().iter().zip(branch) {
        map.insert(name.clone(), *value);
    }
    for (name, &value) in problem.parameters().iter().zip(params) {
        map.insert(name.clone(), Complex::new(value, 0.0));
    }
    map
}

/// Composite label: branches that are simultaneously stable and physical.
pub fn binary_labels(stable: &LabelArray, physical: &LabelArray) -> LabelArray {
    stable
        .iter()
        .zip(physical)
        .map(|(s_row, p_row)| s_row.iter().zip(p_row).map(|(s, p)| *s && *p).collect())
        .collect()
}

/// Encodes each point's true-branch set as a bitmask so that points with
/// different multistability patterns are distinguishable.
pub fn label_codes(labels: &LabelArray) -> Vec<u64> {
    labels
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|(_, on)| **on)
                .fold(0u64, |code, (branch, _)| code | (1u64 << (branch % 64)))
        })
        .collect()
}
