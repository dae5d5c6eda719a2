//! The `atlas_core` crate finds every steady state of a parameterized
//! nonlinear algebraic system across a multi-dimensional parameter grid,
//! classifies each one (physical validity, linear stability, neutral
//! modes), and organizes the varying-count root sets into continuous
//! branches.
//!
//! Key components:
//! - **Symbolic**: expression trees, differentiation, and the per-problem
//!   symbol registry.
//! - **Engine**: bytecode compilation of expressions for cheap repeated
//!   complex evaluation.
//! - **Problem**: the immutable equation bundle with an explicit or
//!   implicit Jacobian.
//! - **Driver**: warm-up continuation or independent total-degree solves
//!   against an external root oracle.
//! - **Sorting / Classify / Reorder**: branch continuity, per-branch
//!   labels, and precedence ordering over the aligned solution grid.

pub mod classify;
pub mod driver;
pub mod engine;
pub mod error;
pub mod grid;
pub mod oracle;
pub mod problem;
pub mod reorder;
pub mod solutions;
pub mod sorting;
pub mod steady_states;
pub mod symbolic;

#[cfg(test)]
mod testing;

pub use classify::{ClassLabels, LabelArray};
pub use error::AtlasError;
pub use grid::{FixedParameters, ParameterGrid, ParameterSweep};
pub use oracle::{RootOracle, SolutionVector};
pub use problem::{CompiledJacobian, Jacobian, Problem};
pub use solutions::{GridIndex, SolutionGrid};
pub use sorting::SortingStrategy;
pub use steady_states::{get_steady_states, SolveOptions, SteadyStates};
pub use symbolic::{parse, Expr, SymbolRegistry};
