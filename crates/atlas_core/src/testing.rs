//! Oracles used by tests across the crate.
//!
//! `ScriptedOracle` replays canned root lists and records how it was
//! called; `NewtonOracle` is a minimal real oracle that polishes a fixed
//! seed set with plain Newton iteration, enough to drive end-to-end solves
//! without a homotopy backend.

use anyhow::{anyhow, Result};
use nalgebra::DVector;
use num_complex::Complex;

use crate::engine::{CompiledMatrix, CompiledSystem};
use crate::oracle::{RootOracle, SolutionVector};
use crate::problem::{Jacobian, Problem};

/// Records calls and replays scripted per-call root lists.
pub(crate) struct ScriptedOracle {
    pub roots_per_call: Vec<Vec<SolutionVector>>,
    pub total_degree_calls: Vec<Vec<Complex<f64>>>,
    pub continuation_calls: usize,
}

impl ScriptedOracle {
    pub fn new(roots_per_call: Vec<Vec<SolutionVector>>) -> Self {
        Self {
            roots_per_call,
            total_degree_calls: Vec::new(),
            continuation_calls: 0,
        }
    }
}

impl RootOracle for ScriptedOracle {
    fn solve_total_degree(
        &mut self,
        _problem: &Problem,
        params: &[Complex<f64>],
    ) -> Result<Vec<SolutionVector>> {
        let call_index = self.total_degree_calls.len();
        self.total_degree_calls.push(params.to_vec());
        Ok(self
            .roots_per_call
            .get(call_index)
            .cloned()
            .unwrap_or_default())
    }

    fn solve_continuation(
        &mut self,
        _problem: &Problem,
        starts: &[SolutionVector],
        _start_params: &[Complex<f64>],
        targets: &[Vec<f64>],
    ) -> Result<Vec<Vec<SolutionVector>>> {
        self.continuation_calls += 1;
        Ok((0..targets.len()).map(|_| starts.to_vec()).collect())
    }
}

/// Newton iteration from a fixed seed set. Total-degree solves polish every
/// seed and deduplicate; continuation polishes each start solution at the
/// target parameters, which is exactly what path tracking degenerates to
/// for well-separated roots.
pub(crate) struct NewtonOracle {
    pub seeds: Vec<SolutionVector>,
    pub max_steps: usize,
    pub tolerance: f64,
}

impl NewtonOracle {
    pub fn new(seeds: Vec<SolutionVector>) -> Self {
        Self {
            seeds,
            max_steps: 50,
            tolerance: 1e-12,
        }
    }

    fn polish(
        &self,
        problem: &Problem,
        system: &CompiledSystem,
        jacobian: &CompiledMatrix,
        params: &[Complex<f64>],
        start: &[Complex<f64>],
    ) -> Option<SolutionVector> {
        let dim = problem.dimension();
        let mut x: Vec<Complex<f64>> = start.to_vec();
        let mut residual = vec![Complex::new(0.0, 0.0); dim];
        let mut stack = Vec::new();

        for _ in 0..self.max_steps {
            system.evaluate_into(&x, params, &mut residual, &mut stack);
            let norm: f64 = residual.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
            if norm <= self.tolerance {
                return Some(x);
            }

            let jac = jacobian.evaluate(&x, params, &mut stack);
            let rhs = DVector::from_column_slice(&residual);
            let delta = jac.lu().solve(&rhs)?;
            for i in 0..dim {
                x[i] -= delta[i];
            }
        }
        None
    }

    fn steady_state_jacobian(problem: &Problem) -> Result<CompiledMatrix> {
        match Jacobian::explicit(problem.equations(), problem.variables()) {
            Jacobian::Explicit { matrix } => CompiledMatrix::compile(&matrix, problem.registry()),
            Jacobian::Implicit { .. } => unreachable!(),
        }
    }
}

impl RootOracle for NewtonOracle {
    fn solve_total_degree(
        &mut self,
        problem: &Problem,
        params: &[Complex<f64>],
    ) -> Result<Vec<SolutionVector>> {
        let system = CompiledSystem::compile(problem.equations(), problem.registry())?;
        let jacobian = Self::steady_state_jacobian(problem)?;

        let mut roots: Vec<SolutionVector> = Vec::new();
        for seed in &self.seeds {
            if let Some(root) = self.polish(problem, &system, &jacobian, params, seed) {
                let duplicate = roots.iter().any(|known| {
                    known
                        .iter()
                        .zip(&root)
                        .map(|(a, b)| (a - b).norm_sqr())
                        .sum::<f64>()
                        .sqrt()
                        < 1e-8
                });
                if !duplicate {
                    roots.push(root);
                }
            }
        }
        if roots.is_empty() && !self.seeds.is_empty() {
            return Err(anyhow!("no seed converged"));
        }
        Ok(roots)
    }

    fn solve_continuation(
        &mut self,
        problem: &Problem,
        starts: &[SolutionVector],
        _start_params: &[Complex<f64>],
        targets: &[Vec<f64>],
    ) -> Result<Vec<Vec<SolutionVector>>> {
        let system = CompiledSystem::compile(problem.equations(), problem.registry())?;
        let jacobian = Self::steady_state_jacobian(problem)?;

        let mut per_target = Vec::with_capacity(targets.len());
        for target in targets {
            let params: Vec<Complex<f64>> =
                target.iter().map(|&p| Complex::new(p, 0.0)).collect();
            let mut roots = Vec::new();
            for start in starts {
                if let Some(root) = self.polish(problem, &system, &jacobian, &params, start) {
                    roots.push(root);
                }
            }
            per_target.push(roots);
        }
        Ok(per_target)
    }
}
