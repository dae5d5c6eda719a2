//! Seam to the external polynomial-system root oracle.
//!
//! The oracle is a black box: given a system and target parameter values it
//! returns complex root vectors, optionally continuing from a previously
//! solved start system. Methods take `&mut self` because real oracles carry
//! internal state that is not safe for concurrent entry; the driver never
//! calls into an oracle from more than one thread.

use anyhow::Result;
use num_complex::Complex;

use crate::problem::Problem;

/// One root of the system: one complex value per problem variable.
pub type SolutionVector = Vec<Complex<f64>>;

pub trait RootOracle {
    /// Solves the system from scratch with a total-degree start, finding
    /// the maximum number of roots for the system's degree structure.
    fn solve_total_degree(
        &mut self,
        problem: &Problem,
        params: &[Complex<f64>],
    ) -> Result<Vec<SolutionVector>>;

    /// Tracks the start solutions from `start_params` to every target in
    /// one batched call, returning one root list per target.
    fn solve_continuation(
        &mut self,
        problem: &Problem,
        starts: &[SolutionVector],
        start_params: &[Complex<f64>],
        targets: &[Vec<f64>],
    ) -> Result<Vec<Vec<SolutionVector>>>;
}
