//! The immutable problem bundle and its linearization.
//!
//! A `Problem` couples a square system of steady-state equations with
//! ordered variable and parameter lists and a Jacobian. The Jacobian is a
//! tagged variant: either an explicit symbolic matrix (differentiate the
//! rearranged system once, evaluate cheaply forever) or an implicit pair
//! (J0, J1) whose effective value at a point is `-J1^-1 * J0`, for systems
//! where the symbolic rearrangement is expensive or structurally impossible.

use anyhow::{bail, Context, Result};
use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::engine::CompiledMatrix;
use crate::error::AtlasError;
use crate::symbolic::{Expr, SymbolRegistry};

/// Linearization of the governing equations, kept symbolic until compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Jacobian {
    /// Entry (i, j) is the derivative of equation i with respect to
    /// variable j, differentiated from the rearranged system.
    Explicit { matrix: Vec<Vec<Expr>> },
    /// Derivatives of the unrearranged residuals with respect to the
    /// variables (`j0`) and their first time-derivatives (`j1`), both taken
    /// at steady state. The effective Jacobian is `-j1^-1 * j0`, evaluated
    /// numerically per point.
    Implicit {
        j0: Vec<Vec<Expr>>,
        j1: Vec<Vec<Expr>>,
    },
}

impl Jacobian {
    /// Differentiates an already-rearranged system symbolically.
    pub fn explicit(equations: &[Expr], variables: &[String]) -> Self {
        let matrix = equations
            .iter()
            .map(|eq| variables.iter().map(|v| eq.diff(v)).collect())
            .collect();
        Jacobian::Explicit { matrix }
    }

    /// Differentiates unrearranged residuals with respect to both the
    /// variables and the named derivative symbols, then pins the derivative
    /// symbols to zero (the steady-state condition) so the stored matrices
    /// reference only variables and parameters.
    pub fn implicit(
        residuals: &[Expr],
        variables: &[String],
        derivatives: &[String],
    ) -> Result<Self> {
        if derivatives.len() != variables.len() {
            bail!(
                "expected one derivative symbol per variable, got {} for {} variables",
                derivatives.len(),
                variables.len()
            );
        }

        let zero = Expr::num(0.0);
        let at_steady_state = |expr: Expr| {
            derivatives
                .iter()
                .fold(expr, |e, d| e.substitute(d, &zero))
                .simplified()
        };

        let j0 = residuals
            .iter()
            .map(|res| {
                variables
                    .iter()
                    .map(|v| at_steady_state(res.diff(v)))
                    .collect()
            })
            .collect();
        let j1 = residuals
            .iter()
            .map(|res| {
                derivatives
                    .iter()
                    .map(|d| at_steady_state(res.diff(d)))
                    .collect()
            })
            .collect();
        Ok(Jacobian::Implicit { j0, j1 })
    }

    pub fn side(&self) -> usize {
        match self {
            Jacobian::Explicit { matrix } => matrix.len(),
            Jacobian::Implicit { j0, .. } => j0.len(),
        }
    }
}

/// Immutable bundle of equations, symbol orderings, and linearization.
///
/// Construction checks the square-system invariant once; afterwards nothing
/// mutates a `Problem`. Branch-elimination transforms (`gauge_fixed`)
/// return a fresh `Problem` and leave the source untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    equations: Vec<Expr>,
    variables: Vec<String>,
    parameters: Vec<String>,
    jacobian: Jacobian,
    registry: SymbolRegistry,
}

impl Problem {
    /// Builds a problem from a rearranged system, deriving the explicit
    /// Jacobian symbolically.
    pub fn new(
        equations: Vec<Expr>,
        variables: Vec<String>,
        parameters: Vec<String>,
    ) -> Result<Self> {
        let jacobian = Jacobian::explicit(&equations, &variables);
        Self::with_jacobian(equations, variables, parameters, jacobian)
    }

    /// Builds a problem from unrearranged residuals containing the named
    /// derivative symbols. The stored equations are the residuals at steady
    /// state (derivatives pinned to zero); the Jacobian is implicit.
    pub fn implicit(
        residuals: Vec<Expr>,
        variables: Vec<String>,
        derivatives: Vec<String>,
        parameters: Vec<String>,
    ) -> Result<Self> {
        let jacobian = Jacobian::implicit(&residuals, &variables, &derivatives)?;
        let zero = Expr::num(0.0);
        let equations = residuals
            .into_iter()
            .map(|res| {
                derivatives
                    .iter()
                    .fold(res, |e, d| e.substitute(d, &zero))
                    .simplified()
            })
            .collect();
        Self::with_jacobian(equations, variables, parameters, jacobian)
    }

    /// Builds a problem with a caller-supplied Jacobian.
    pub fn with_jacobian(
        equations: Vec<Expr>,
        variables: Vec<String>,
        parameters: Vec<String>,
        jacobian: Jacobian,
    ) -> Result<Self> {
        if equations.len() != variables.len() {
            return Err(AtlasError::NonSquareSystem {
                equations: equations.len(),
                variables: variables.len(),
            }
            .into());
        }
        if jacobian.side() != variables.len() {
            bail!(
                "Jacobian side {} does not match variable count {}",
                jacobian.side(),
                variables.len()
            );
        }
        let registry = SymbolRegistry::new(&variables, &parameters)?;
        Ok(Self {
            equations,
            variables,
            parameters,
            jacobian,
            registry,
        })
    }

    pub fn equations(&self) -> &[Expr] {
        &self.equations
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn jacobian(&self) -> &Jacobian {
        &self.jacobian
    }

    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    /// Eliminates one variable by pinning it to a constant and dropping its
    /// paired equation, returning a smaller square problem.
    ///
    /// Used to remove a gauge freedom (e.g. a free phase) that would
    /// otherwise produce a structural zero eigenvalue. The Jacobian of the
    /// reduced system is rederived explicitly from the substituted
    /// equations; the source problem is left untouched.
    pub fn gauge_fixed(&self, variable: &str, value: f64) -> Result<Problem> {
        let index = self
            .variables
            .iter()
            .position(|v| v == variable)
            .ok_or_else(|| AtlasError::UnknownSymbol(variable.to_string()))?;

        let pinned = Expr::num(value);
        let equations: Vec<Expr> = self
            .equations
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, eq)| eq.substitute(variable, &pinned).simplified())
            .collect();
        let variables: Vec<String> = self
            .variables
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, v)| v.clone())
            .collect();

        Problem::new(equations, variables, self.parameters.clone())
            .context("gauge-fixed system is no longer well-formed")
    }
}

/// The one evaluator shape both Jacobian modes compile into: a full numeric
/// variable-and-parameter assignment in, a complex square matrix out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompiledJacobian {
    Explicit(CompiledMatrix),
    Implicit {
        j0: CompiledMatrix,
        j1: CompiledMatrix,
    },
}

impl CompiledJacobian {
    pub fn compile(problem: &Problem) -> Result<Self> {
        let registry = problem.registry();
        match problem.jacobian() {
            Jacobian::Explicit { matrix } => Ok(CompiledJacobian::Explicit(
                CompiledMatrix::compile(matrix, registry)?,
            )),
            Jacobian::Implicit { j0, j1 } => Ok(CompiledJacobian::Implicit {
                j0: CompiledMatrix::compile(j0, registry)?,
                j1: CompiledMatrix::compile(j1, registry)?,
            }),
        }
    }

    /// Evaluates the Jacobian at a numeric point. `point` is the grid-point
    /// index reported when the implicit denominator matrix is singular.
    pub fn evaluate(
        &self,
        vars: &[Complex<f64>],
        params: &[Complex<f64>],
        stack: &mut Vec<Complex<f64>>,
        point: usize,
    ) -> Result<DMatrix<Complex<f64>>> {
        match self {
            CompiledJacobian::Explicit(matrix) => Ok(matrix.evaluate(vars, params, stack)),
            CompiledJacobian::Implicit { j0, j1 } => {
                let m0 = j0.evaluate(vars, params, stack);
                let m1 = j1.evaluate(vars, params, stack);
                let solved = m1
                    .lu()
                    .solve(&m0)
                    .ok_or(AtlasError::DegenerateLinearization { point })?;
                Ok(-solved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::parse;
    use num_traits::Zero;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_non_square_system_is_rejected() {
        let equations = vec![parse("u + v").unwrap()];
        let err = Problem::new(equations, names(&["u", "v"]), names(&["a"]))
            .expect_err("one equation for two variables must fail");
        assert!(
            err.downcast_ref::<AtlasError>()
                .map(|e| matches!(e, AtlasError::NonSquareSystem { .. }))
                .unwrap_or(false),
            "expected NonSquareSystem, got {err}"
        );
    }

    #[test]
    fn test_explicit_jacobian_entries() {
        // d/du (a*u^2 + v) = 2*a*u, d/dv = 1
        let equations = vec![parse("a * u^2 + v").unwrap(), parse("u - v").unwrap()];
        let problem = Problem::new(equations, names(&["u", "v"]), names(&["a"]))
            .expect("problem should build");

        let compiled = CompiledJacobian::compile(&problem).expect("should compile");
        let vars = [Complex::new(3.0, 0.0), Complex::new(0.0, 0.0)];
        let params = [Complex::new(2.0, 0.0)];
        let mut stack = Vec::new();
        let jac = compiled
            .evaluate(&vars, &params, &mut stack, 0)
            .expect("explicit evaluation cannot degenerate");

        assert_eq!(jac[(0, 0)], Complex::new(12.0, 0.0));
        assert_eq!(jac[(0, 1)], Complex::new(1.0, 0.0));
        assert_eq!(jac[(1, 0)], Complex::new(1.0, 0.0));
        assert_eq!(jac[(1, 1)], Complex::new(-1.0, 0.0));
    }

    #[test]
    fn test_implicit_matches_explicit_on_rearrangeable_system() {
        // Residual form: du - (a*u + v) = 0, dv - (u - a*v) = 0.
        // J1 = I, so -J1^-1 * J0 must equal the explicit Jacobian of the
        // rearranged right-hand side.
        let residuals = vec![
            parse("du - (a * u + v)").unwrap(),
            parse("dv - (u - a * v)").unwrap(),
        ];
        let implicit = Problem::implicit(
            residuals,
            names(&["u", "v"]),
            names(&["du", "dv"]),
            names(&["a"]),
        )
        .expect("implicit problem should build");

        let rearranged = vec![parse("a * u + v").unwrap(), parse("u - a * v").unwrap()];
        let explicit = Problem::new(rearranged, names(&["u", "v"]), names(&["a"]))
            .expect("explicit problem should build");

        let vars = [Complex::new(0.7, 0.0), Complex::new(-1.3, 0.0)];
        let params = [Complex::new(0.4, 0.0)];
        let mut stack = Vec::new();

        let ja = CompiledJacobian::compile(&implicit)
            .unwrap()
            .evaluate(&vars, &params, &mut stack, 0)
            .expect("J1 is the identity");
        let jb = CompiledJacobian::compile(&explicit)
            .unwrap()
            .evaluate(&vars, &params, &mut stack, 0)
            .expect("explicit evaluation cannot degenerate");

        for i in 0..2 {
            for j in 0..2 {
                assert!(
                    (ja[(i, j)] - jb[(i, j)]).norm() < 1e-12,
                    "entry ({i},{j}): implicit {} vs explicit {}",
                    ja[(i, j)],
                    jb[(i, j)]
                );
            }
        }
    }

    #[test]
    fn test_implicit_singular_denominator_is_fatal() {
        // J1 is identically zero: the residuals do not involve du, dv.
        let residuals = vec![parse("u + v").unwrap(), parse("u - v").unwrap()];
        let problem = Problem::implicit(
            residuals,
            names(&["u", "v"]),
            names(&["du", "dv"]),
            names(&[]),
        )
        .expect("problem should build");

        let compiled = CompiledJacobian::compile(&problem).expect("should compile");
        let vars = [Complex::zero(), Complex::zero()];
        let mut stack = Vec::new();
        let err = compiled
            .evaluate(&vars, &[], &mut stack, 7)
            .expect_err("singular J1 must be reported");
        assert!(
            err.downcast_ref::<AtlasError>()
                .map(|e| matches!(e, AtlasError::DegenerateLinearization { point: 7 }))
                .unwrap_or(false),
            "expected DegenerateLinearization at point 7, got {err}"
        );
    }

    #[test]
    fn test_gauge_fixing_returns_reduced_problem_and_keeps_source() {
        let equations = vec![
            parse("u * w - v").unwrap(),
            parse("v - u").unwrap(),
            parse("w^2 - 1").unwrap(),
        ];
        let problem = Problem::new(equations, names(&["u", "v", "w"]), names(&[]))
            .expect("problem should build");

        let reduced = problem
            .gauge_fixed("w", 1.0)
            .expect("gauge fixing should succeed");
        assert_eq!(reduced.dimension(), 2);
        assert_eq!(reduced.variables(), &names(&["u", "v"])[..]);
        // u * 1 - v folds to u - v.
        assert_eq!(reduced.equations()[0], parse("u - v").unwrap().simplified());

        // The source problem is untouched.
        assert_eq!(problem.dimension(), 3);
        assert_eq!(problem.variables(), &names(&["u", "v", "w"])[..]);

        let missing = problem.gauge_fixed("q", 0.0);
        assert!(missing.is_err(), "unknown variable must be rejected");
    }
}
