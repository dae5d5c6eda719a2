//! Parameter-grid preparation.
//!
//! Turns a swept-parameter specification and a fixed-parameter
//! specification into one fully-resolved parameter vector per grid point,
//! each ordered to match `Problem::parameters` exactly.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::problem::Problem;

/// Ordered axis list; insertion order defines the grid dimensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSweep {
    axes: Vec<(String, Vec<f64>)>,
}

impl ParameterSweep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis(mut self, name: &str, values: Vec<f64>) -> Self {
        self.axes.push((name.to_string(), values));
        self
    }

    pub fn axes(&self) -> &[(String, Vec<f64>)] {
        &self.axes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.axes.iter().any(|(n, _)| n == name)
    }
}

/// Parameters held constant over the whole grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixedParameters {
    values: Vec<(String, f64)>,
}

impl FixedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.push((name.to_string(), value));
        self
    }

    pub fn values(&self) -> &[(String, f64)] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// The prepared grid: row-major flat point list (last sweep axis fastest),
/// every point already permuted into Problem parameter order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterGrid {
    shape: Vec<usize>,
    points: Vec<Vec<f64>>,
    swept_indices: Vec<usize>,
    sweep: ParameterSweep,
    fixed: FixedParameters,
}

impl ParameterGrid {
    /// Resolves the sweep and fixed specifications against the problem's
    /// parameter order.
    ///
    /// A parameter present in both specifications resolves in favor of the
    /// sweep. A problem parameter covered by neither, or covered twice
    /// within one specification, is a fatal error naming the parameter; so
    /// is a specified name the problem does not declare.
    pub fn prepare(
        problem: &Problem,
        sweep: ParameterSweep,
        fixed: FixedParameters,
    ) -> Result<Self> {
        // Sweep shadows fixed: drop shadowed fixed entries, keep the rest.
        let effective_fixed = FixedParameters {
            values: fixed
                .values
                .iter()
                .filter(|(name, _)| !sweep.contains(name))
                .cloned()
                .collect(),
        };

        let mut working: Vec<&str> = Vec::new();
        for (name, values) in &sweep.axes {
            if values.is_empty() {
                bail!("sweep axis `{}` has no values", name);
            }
            working.push(name.as_str());
        }
        for (name, _) in &effective_fixed.values {
            working.push(name.as_str());
        }

        // Position of every problem parameter within the working order; the
        // mapping must be a bijection.
        let mut positions = Vec::with_capacity(problem.parameters().len());
        for name in problem.parameters() {
            let mut found = working
                .iter()
                .enumerate()
                .filter(|(_, n)| **n == name.as_str());
            match (found.next(), found.next()) {
                (None, _) => return Err(AtlasError::MissingParameter(name.clone()).into()),
                (Some(_), Some(_)) => {
                    return Err(AtlasError::DuplicateParameter(name.clone()).into())
                }
                (Some((pos, _)), None) => positions.push(pos),
            }
        }
        if working.len() != problem.parameters().len() {
            for &name in &working {
                if !problem.parameters().iter().any(|p| p.as_str() == name) {
                    bail!("`{}` is not a parameter of the problem", name);
                }
            }
        }

        let shape: Vec<usize> = sweep.axes.iter().map(|(_, v)| v.len()).collect();
        let total: usize = shape.iter().product();

        let mut points = Vec::with_capacity(total);
        let mut multi = vec![0usize; shape.len()];
        for _ in 0..total {
            let mut working_values: Vec<f64> = sweep
                .axes
                .iter()
                .zip(&multi)
                .map(|((_, values), &i)| values[i])
                .collect();
            working_values.extend(effective_fixed.values.iter().map(|(_, v)| *v));

            points.push(positions.iter().map(|&pos| working_values[pos]).collect());
            increment(&mut multi, &shape);
        }

        let swept_indices = problem
            .parameters()
            .iter()
            .enumerate()
            .filter(|(_, name)| sweep.contains(name.as_str()))
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            shape,
            points,
            swept_indices,
            sweep,
            fixed: effective_fixed,
        })
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

    pub fn point(&self, index: usize) -> &[f64] {
        &self.points[index]
    }

    pub fn points(&self) -> &[Vec<f64>] {
        &self.points
    }

    /// Indices (in Problem parameter order) of the swept parameters.
    pub fn swept_indices(&self) -> &[usize] {
        &self.swept_indices
    }

    pub fn sweep(&self) -> &ParameterSweep {
        &self.sweep
    }

    pub fn fixed(&self) -> &FixedParameters {
        &self.fixed
    }
}

/// Advances a row-major multi-index, last axis fastest.
fn increment(multi: &mut [usize], shape: &[usize]) {
    for axis in (0..multi.len()).rev() {
        multi[axis] += 1;
        if multi[axis] < shape[axis] {
            return;
        }
        multi[axis] = 0;
    }
}
