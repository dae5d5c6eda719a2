//! Solution storage across the parameter grid.
//!
//! Raw oracle output has a variable number of roots per grid point; the
//! aligner pads every point up to the grid-wide maximum with NaN sentinel
//! vectors so downstream passes can assume one fixed branch count.

use anyhow::{bail, Result};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::oracle::SolutionVector;

/// Builds the sentinel vector marking an absent branch.
pub fn sentinel(dim: usize) -> SolutionVector {
    vec![Complex::new(f64::NAN, f64::NAN); dim]
}

/// True when the vector marks an absent (padded) branch.
pub fn is_sentinel(vector: &[Complex<f64>]) -> bool {
    vector.iter().any(|c| c.re.is_nan() || c.im.is_nan())
}

/// A grid index, either flat into the row-major point list or a full
/// multi-dimensional index matching the grid shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridIndex {
    Linear(usize),
    Multi(Vec<usize>),
}

/// Per-point branch lists over the grid, uniform after alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionGrid {
    shape: Vec<usize>,
    points: Vec<Vec<SolutionVector>>,
}

impl SolutionGrid {
    pub fn new(shape: Vec<usize>, points: Vec<Vec<SolutionVector>>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if points.len() != expected {
            bail!(
                "solution grid has {} points but shape {:?} implies {}",
                points.len(),
                shape,
                expected
            );
        }
        Ok(Self { shape, points })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> &[SolutionVector] {
        &self.points[index]
    }

    pub(crate) fn point_mut(&mut self, index: usize) -> &mut Vec<SolutionVector> {
        &mut self.points[index]
    }

    pub fn max_branch_count(&self) -> usize {
        self.points.iter().map(|p| p.len()).max().unwrap_or(0)
    }

    /// Uniform branch count; meaningful once aligned.
    pub fn branch_count(&self) -> usize {
        self.max_branch_count()
    }

    pub fn is_uniform(&self) -> bool {
        let count = self.max_branch_count();
        self.points.iter().all(|p| p.len() == count)
    }

    /// Pads every point with sentinel vectors up to the grid-wide maximum
    /// branch count. Existing roots are never dropped or reordered; padding
    /// only appends, so aligning an already-uniform grid is a no-op.
    /// `dim` is the variable count, needed for points with no roots at all.
    pub fn align(&mut self, dim: usize) {
        let max = self.max_branch_count();
        for point in &mut self.points {
            while point.len() < max {
                point.push(sentinel(dim));
            }
        }
    }

    /// Resolves a grid index to a flat offset. A multi-index must match the
    /// grid's dimensionality and bounds.
    pub fn linear_index(&self, index: &GridIndex) -> Result<usize> {
        match index {
            GridIndex::Linear(i) => {
                if *i >= self.points.len() {
                    bail!(
                        "linear index {} out of range for {} grid points",
                        i,
                        self.points.len()
                    );
                }
                Ok(*i)
            }
            GridIndex::Multi(multi) => {
                if multi.len() != self.shape.len() {
                    return Err(AtlasError::BadIndex {
                        got: multi.len(),
                        ndim: self.shape.len(),
                    }
                    .into());
                }
                let mut flat = 0usize;
                for (axis, (&i, &extent)) in multi.iter().zip(&self.shape).enumerate() {
                    if i >= extent {
                        bail!("index {} out of range for axis {} of extent {}", i, axis, extent);
                    }
                    flat = flat * extent + i;
                }
                Ok(flat)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(values: &[f64]) -> SolutionVector {
        values.iter().map(|&v| Complex::new(v, 0.0)).collect()
    }

    #[test]
    fn test_align_pads_short_points_with_sentinels() {
        let points = vec![
            vec![root(&[1.0, 2.0]), root(&[3.0, 4.0]), root(&[5.0, 6.0])],
            vec![root(&[7.0, 8.0])],
        ];
        let mut grid = SolutionGrid::new(vec![2], points).expect("grid should build");
        grid.align(2);

        assert!(grid.is_uniform());
        assert_eq!(grid.branch_count(), 3);
        assert_eq!(grid.point(1)[0], root(&[7.0, 8.0]), "existing roots keep their slots");
        assert!(is_sentinel(&grid.point(1)[1]));
        assert!(is_sentinel(&grid.point(1)[2]));
    }

    #[test]
    fn test_align_is_idempotent() {
        let points = vec![vec![root(&[1.0])], vec![root(&[2.0])]];
        let mut grid = SolutionGrid::new(vec![2], points).expect("grid should build");
        grid.align(1);
        let before = grid.clone();
        grid.align(1);
        assert_eq!(grid.branch_count(), before.branch_count());
        for i in 0..grid.len() {
            assert_eq!(grid.point(i), before.point(i));
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let points = vec![vec![root(&[1.0])]];
        assert!(SolutionGrid::new(vec![2], points).is_err());
    }

    #[test]
    fn test_linear_index_accepts_both_forms() {
        let points: Vec<Vec<SolutionVector>> =
            (0..6).map(|i| vec![root(&[i as f64])]).collect();
        let grid = SolutionGrid::new(vec![2, 3], points).expect("grid should build");

        assert_eq!(grid.linear_index(&GridIndex::Linear(4)).unwrap(), 4);
        assert_eq!(
            grid.linear_index(&GridIndex::Multi(vec![1, 1])).unwrap(),
            4,
            "row-major with the last axis fastest"
        );

        let err = grid
            .linear_index(&GridIndex::Multi(vec![1]))
            .expect_err("wrong dimensionality must fail");
        match err.downcast_ref::<AtlasError>() {
            Some(AtlasError::BadIndex { got: 1, ndim: 2 }) => {}
            other => panic!("expected BadIndex, got {other:?}"),
        }

        assert!(grid.linear_index(&GridIndex::Linear(6)).is_err());
        assert!(grid.linear_index(&GridIndex::Multi(vec![2, 0])).is_err());
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_sentinel(&sentinel(3)));
        assert!(!is_sentinel(&root(&[0.0, 1.0])));
        let mut partial = root(&[0.0, 1.0]);
        partial[1] = Complex::new(f64::NAN, 0.0);
        assert!(is_sentinel(&partial));
    }
}
