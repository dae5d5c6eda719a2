//! Result bundle and the consumer-facing solve entry point.

use anyhow::{bail, Result};
use log::info;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classify::{
    self, binary_labels, classify_physical, classify_stable, ClassLabels, LabelArray,
};
use crate::driver::solve_grid;
use crate::grid::{FixedParameters, ParameterGrid, ParameterSweep};
use crate::oracle::RootOracle;
use crate::problem::{CompiledJacobian, Problem};
use crate::reorder::order_branches;
use crate::solutions::{GridIndex, SolutionGrid};
use crate::sorting::{sort_branches, SortingStrategy};

pub const CLASS_PHYSICAL: &str = "physical";
pub const CLASS_STABLE: &str = "stable";
pub const CLASS_BINARY: &str = "binary_labels";

/// Options accepted by `get_steady_states`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Solve one perturbed warm-up point and track everywhere (fast), or
    /// run an independent total-degree solve per grid point (thorough).
    pub random_warmup: bool,
    /// Fan classification out over worker threads. Root finding itself is
    /// never parallelized here; the oracle is not safe for concurrent entry.
    pub threading: bool,
    pub sorting: SortingStrategy,
    /// Absolute-plus-relative bound under which an imaginary part counts
    /// as numerical noise.
    pub real_tolerance: f64,
    /// Margin by which eigenvalue real parts must clear zero.
    pub stability_tolerance: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            random_warmup: true,
            threading: true,
            sorting: SortingStrategy::Nearest,
            real_tolerance: 1e-6,
            stability_tolerance: 1e-10,
        }
    }
}

/// The aligned, sorted, classified solution set for one sweep.
///
/// Built once by `get_steady_states`; the in-place mutators (`order_branches`,
/// the `classify_*` methods) are meant for that same solve flow, after which
/// consumers read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadyStates {
    solutions: SolutionGrid,
    grid: ParameterGrid,
    problem: Problem,
    classes: Vec<ClassLabels>,
    jacobian: CompiledJacobian,
}

impl SteadyStates {
    pub fn solutions(&self) -> &SolutionGrid {
        &self.solutions
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn branch_count(&self) -> usize {
        self.solutions.branch_count()
    }

    pub fn class(&self, name: &str) -> Option<&LabelArray> {
        self.classes
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.labels)
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.name.as_str()).collect()
    }

    /// Stores a custom classification evaluated over the full assignment of
    /// every (point, branch) pair. Replaces any class of the same name.
    pub fn classify_with<F>(&mut self, name: &str, predicate: F)
    where
        F: Fn(&BTreeMap<String, Complex<f64>>) -> bool,
    {
        let labels = classify::classify_custom(&self.solutions, &self.grid, &self.problem, predicate);
        self.store_class(name, labels);
    }

    /// Stores the neutral-mode (`hopf`) classification: one zero eigenvalue,
    /// every other eigenvalue strictly negative.
    pub fn classify_hopf(&mut self, name: &str, tolerance: f64, threading: bool) -> Result<()> {
        let labels = classify::classify_hopf(
            &self.solutions,
            &self.grid,
            &self.jacobian,
            tolerance,
            threading,
        )?;
        self.store_class(name, labels);
        Ok(())
    }

    fn store_class(&mut self, name: &str, labels: LabelArray) {
        self.classes.retain(|c| c.name != name);
        self.classes.push(ClassLabels {
            name: name.to_string(),
            labels,
        });
    }

    /// Per-point bitmask of the branches satisfying `binary_labels`;
    /// points with different multistability patterns get different codes.
    pub fn binary_label_codes(&self) -> Result<Vec<u64>> {
        let labels = self
            .class(CLASS_BINARY)
            .ok_or_else(|| anyhow::anyhow!("no `{}` classification is stored", CLASS_BINARY))?;
        Ok(classify::label_codes(labels))
    }

    /// Applies one branch permutation across the whole grid so branches
    /// satisfying the named classes (descending precedence) come first.
    pub fn order_branches(&mut self, precedence: &[&str]) -> Result<()> {
        order_branches(&mut self.solutions, &mut self.classes, precedence)
    }

    /// Combines variable, swept-parameter, and fixed-parameter values for
    /// one (grid point, branch) pair into a single name-to-value mapping.
    pub fn get_single_solution(
        &self,
        branch: usize,
        index: &GridIndex,
    ) -> Result<BTreeMap<String, Complex<f64>>> {
        let flat = self.solutions.linear_index(index)?;
        let point = self.solutions.point(flat);
        if branch >= point.len() {
            bail!(
                "branch index {} out of range for {} branches",
                branch,
                point.len()
            );
        }
        Ok(classify::assignment(
            &self.problem,
            &point[branch],
            self.grid.point(flat),
        ))
    }
}

/// Finds, aligns, sorts, classifies, and orders all steady states of the
/// problem over the swept-plus-fixed parameter grid.
pub fn get_steady_states(
    problem: Problem,
    oracle: &mut dyn RootOracle,
    sweep: ParameterSweep,
    fixed: FixedParameters,
    options: &SolveOptions,
) -> Result<SteadyStates> {
    let grid = ParameterGrid::prepare(&problem, sweep, fixed)?;
    info!(
        "prepared parameter grid of shape {:?} ({} points)",
        grid.shape(),
        grid.len()
    );

    let mut solutions = solve_grid(&problem, oracle, &grid, options.random_warmup)?;
    solutions.align(problem.dimension());
    sort_branches(&mut solutions, options.sorting)?;

    let jacobian = CompiledJacobian::compile(&problem)?;
    let physical = classify_physical(&solutions, options.real_tolerance);
    let stable = classify_stable(
        &solutions,
        &grid,
        &jacobian,
        options.stability_tolerance,
        options.threading,
    )?;
    let binary = binary_labels(&stable, &physical);

    let classes = vec![
        ClassLabels {
            name: CLASS_PHYSICAL.to_string(),
            labels: physical,
        },
        ClassLabels {
            name: CLASS_STABLE.to_string(),
            labels: stable,
        },
        ClassLabels {
            name: CLASS_BINARY.to_string(),
            labels: binary,
        },
    ];

    let mut result = SteadyStates {
        solutions,
        grid,
        problem,
        classes,
        jacobian,
    };
    result.order_branches(&[CLASS_PHYSICAL, CLASS_STABLE])?;

    info!(
        "solve finished: {} branches over {} grid points",
        result.branch_count(),
        result.solutions.len()
    );
    Ok(result)
}
