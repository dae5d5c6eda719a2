//! Branch-continuity sorting.
//!
//! After alignment every grid point holds the same number of branch slots,
//! but the oracle assigns roots to slots in arbitrary order. Sorting
//! permutes each point's slot assignment so that slot k follows one
//! physically continuous solution across the grid. Only the index
//! assignment changes; branch content and count never do.

use anyhow::{bail, Result};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::oracle::SolutionVector;
use crate::solutions::{is_sentinel, SolutionGrid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortingStrategy {
    /// Keep the oracle's output order.
    None,
    /// Traverse 1-D grids in natural order, matching successive points.
    Hilbert,
    /// Propagate nearest-neighbor matching across every grid dimension.
    Nearest,
}

impl Default for SortingStrategy {
    fn default() -> Self {
        SortingStrategy::Nearest
    }
}

impl SortingStrategy {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(SortingStrategy::None),
            "hilbert" => Ok(SortingStrategy::Hilbert),
            "nearest" => Ok(SortingStrategy::Nearest),
            other => Err(AtlasError::UnsupportedSorting(other.to_string()).into()),
        }
    }
}

/// Reorders branch slots in place so that slot indices are continuous
/// across the grid. Requires an aligned grid.
pub fn sort_branches(grid: &mut SolutionGrid, strategy: SortingStrategy) -> Result<()> {
    if !grid.is_uniform() {
        bail!("solution grid must be aligned before branch sorting");
    }

    match strategy {
        SortingStrategy::None => Ok(()),
        SortingStrategy::Hilbert => {
            if grid.shape().len() > 1 {
                bail!(
                    "hilbert sorting supports one-dimensional grids only, got shape {:?}",
                    grid.shape()
                );
            }
            for i in 1..grid.len() {
                rematch_point(grid, i - 1, i);
            }
            Ok(())
        }
        SortingStrategy::Nearest => {
            let shape = grid.shape().to_vec();
            let strides = row_major_strides(&shape);
            for i in 1..grid.len() {
                // Reference neighbor: decrement the first dimension with a
                // nonzero coordinate. Its linear index is always below `i`,
                // so it has already been sorted.
                let multi = to_multi_index(i, &shape, &strides);
                let axis = multi
                    .iter()
                    .position(|&c| c > 0)
                    .expect("nonzero linear index has a nonzero coordinate");
                let reference = i - strides[axis];
                rematch_point(grid, reference, i);
            }
            Ok(())
        }
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

fn to_multi_index(linear: usize, shape: &[usize], strides: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .zip(strides)
        .map(|(&extent, &stride)| (linear / stride) % extent)
        .collect()
}

/// Permutes the branches of point `target` to best follow the already
/// sorted point `reference`.
fn rematch_point(grid: &mut SolutionGrid, reference: usize, target: usize) {
    let permutation = {
        let reference = grid.point(reference);
        let target = grid.point(target);
        match_to_reference(reference, target)
    };
    let point = grid.point_mut(target);
    let reordered: Vec<SolutionVector> = permutation.iter().map(|&t| point[t].clone()).collect();
    *point = reordered;
}

/// Greedy bipartite assignment minimizing total displacement: repeatedly
/// takes the globally closest unassigned (reference slot, target branch)
/// pair. Returns, per reference slot, the index of the target branch
/// assigned to it.
fn match_to_reference(reference: &[SolutionVector], target: &[SolutionVector]) -> Vec<usize> {
    let n = reference.len();
    let mut pairs = Vec::with_capacity(n * n);
    for (r, ref_vector) in reference.iter().enumerate() {
        for (t, target_vector) in target.iter().enumerate() {
            pairs.push((displacement(ref_vector, target_vector), r, t));
        }
    }
    // Ties (including sentinel-to-anything at infinite distance) resolve by
    // slot order, keeping the permutation deterministic.
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut assignment = vec![usize::MAX; n];
    let mut target_taken = vec![false; n];
    let mut assigned = 0;
    for (_, r, t) in pairs {
        if assignment[r] != usize::MAX || target_taken[t] {
            continue;
        }
        assignment[r] = t;
        target_taken[t] = true;
        assigned += 1;
        if assigned == n {
            break;
        }
    }
    assignment
}

/// Euclidean displacement in solution space; any sentinel participant is
/// infinitely far so padded slots match last.
fn displacement(a: &[Complex<f64>], b: &[Complex<f64>]) -> f64 {
    if is_sentinel(a) || is_sentinel(b) {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).norm_sqr())
        .sum::<f64>()
        .sqrt()
}
