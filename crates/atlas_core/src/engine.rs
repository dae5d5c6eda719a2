//! Compiled evaluation of symbolic expressions over complex values.
//!
//! Expressions are flattened once into stack-machine bytecode with all names
//! resolved to dense indices; evaluation then runs without allocation or
//! string lookups. Every repeated-evaluation path in the crate (Jacobians
//! during classification, residuals in tests) goes through this module.

use anyhow::Result;
use nalgebra::DMatrix;
use num_complex::Complex;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::symbolic::{Expr, SymbolRegistry};

/// Stack-machine instructions. Binary ops pop (b, a) and push the result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OpCode {
    LoadConst(f64),
    LoadVar(usize),
    LoadParam(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Sin,
    Cos,
    Exp,
    Ln,
}

/// A compiled sequence of operations evaluating one expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bytecode {
    ops: Vec<OpCode>,
}

/// Compiles an expression, resolving names through the registry.
/// Names known to neither side of the registry are a hard error here, not at
/// evaluation time.
pub fn compile(expr: &Expr, registry: &SymbolRegistry) -> Result<Bytecode> {
    let mut ops = Vec::new();
    compile_into(expr, registry, &mut ops)?;
    Ok(Bytecode { ops })
}

fn compile_into(expr: &Expr, registry: &SymbolRegistry, ops: &mut Vec<OpCode>) -> Result<()> {
    match expr {
        Expr::Const(v) => ops.push(OpCode::LoadConst(*v)),
        Expr::Var(name) => {
            if let Some(idx) = registry.variable(name) {
                ops.push(OpCode::LoadVar(idx));
            } else if let Some(idx) = registry.parameter(name) {
                ops.push(OpCode::LoadParam(idx));
            } else {
                return Err(AtlasError::UnknownSymbol(name.clone()).into());
            }
        }
        Expr::Add(l, r) => {
            compile_into(l, registry, ops)?;
            compile_into(r, registry, ops)?;
            ops.push(OpCode::Add);
        }
        Expr::Sub(l, r) => {
            compile_into(l, registry, ops)?;
            compile_into(r, registry, ops)?;
            ops.push(OpCode::Sub);
        }
        Expr::Mul(l, r) => {
            compile_into(l, registry, ops)?;
            compile_into(r, registry, ops)?;
            ops.push(OpCode::Mul);
        }
        Expr::Div(l, r) => {
            compile_into(l, registry, ops)?;
            compile_into(r, registry, ops)?;
            ops.push(OpCode::Div);
        }
        Expr::Pow(l, r) => {
            compile_into(l, registry, ops)?;
            compile_into(r, registry, ops)?;
            ops.push(OpCode::Pow);
        }
        Expr::Neg(e) => {
            compile_into(e, registry, ops)?;
            ops.push(OpCode::Neg);
        }
        Expr::Sin(e) => {
            compile_into(e, registry, ops)?;
            ops.push(OpCode::Sin);
        }
        Expr::Cos(e) => {
            compile_into(e, registry, ops)?;
            ops.push(OpCode::Cos);
        }
        Expr::Exp(e) => {
            compile_into(e, registry, ops)?;
            ops.push(OpCode::Exp);
        }
        Expr::Ln(e) => {
            compile_into(e, registry, ops)?;
            ops.push(OpCode::Ln);
        }
    }
    Ok(())
}

/// Executes one program. The scratch stack is caller-owned so compiled
/// programs stay shareable across worker threads.
///
/// Compilation guarantees stack discipline, so the pops cannot fail.
pub fn execute(
    bytecode: &Bytecode,
    vars: &[Complex<f64>],
    params: &[Complex<f64>],
    stack: &mut Vec<Complex<f64>>,
) -> Complex<f64> {
    stack.clear();

    for op in &bytecode.ops {
        match op {
            OpCode::LoadConst(v) => stack.push(Complex::new(*v, 0.0)),
            OpCode::LoadVar(idx) => stack.push(vars[*idx]),
            OpCode::LoadParam(idx) => stack.push(params[*idx]),
            OpCode::Add => {
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                stack.push(a + b);
            }
            OpCode::Sub => {
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                stack.push(a - b);
            }
            OpCode::Mul => {
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                stack.push(a * b);
            }
            OpCode::Div => {
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                stack.push(a / b);
            }
            OpCode::Pow => {
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                stack.push(a.powc(b));
            }
            OpCode::Neg => {
                let a = stack.pop().unwrap();
                stack.push(-a);
            }
            OpCode::Sin => {
                let a = stack.pop().unwrap();
                stack.push(a.sin());
            }
            OpCode::Cos => {
                let a = stack.pop().unwrap();
                stack.push(a.cos());
            }
            OpCode::Exp => {
                let a = stack.pop().unwrap();
                stack.push(a.exp());
            }
            OpCode::Ln => {
                let a = stack.pop().unwrap();
                stack.push(a.ln());
            }
        }
    }

    stack.pop().unwrap_or_else(Complex::zero)
}

/// One compiled program per equation of a square system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledSystem {
    programs: Vec<Bytecode>,
}

impl CompiledSystem {
    pub fn compile(equations: &[Expr], registry: &SymbolRegistry) -> Result<Self> {
        let programs = equations
            .iter()
            .map(|eq| compile(eq, registry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { programs })
    }

    pub fn dimension(&self) -> usize {
        self.programs.len()
    }

    pub fn evaluate_into(
        &self,
        vars: &[Complex<f64>],
        params: &[Complex<f64>],
        out: &mut [Complex<f64>],
        stack: &mut Vec<Complex<f64>>,
    ) {
        for (slot, program) in out.iter_mut().zip(&self.programs) {
            *slot = execute(program, vars, params, stack);
        }
    }
}

/// A square matrix of compiled programs, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledMatrix {
    side: usize,
    entries: Vec<Bytecode>,
}

impl CompiledMatrix {
    pub fn compile(matrix: &[Vec<Expr>], registry: &SymbolRegistry) -> Result<Self> {
        let side = matrix.len();
        let mut entries = Vec::with_capacity(side * side);
        for row in matrix {
            anyhow::ensure!(
                row.len() == side,
                "matrix is not square: row of length {} in a {}-row matrix",
                row.len(),
                side
            );
            for entry in row {
                entries.push(compile(entry, registry)?);
            }
        }
        Ok(Self { side, entries })
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn evaluate(
        &self,
        vars: &[Complex<f64>],
        params: &[Complex<f64>],
        stack: &mut Vec<Complex<f64>>,
    ) -> DMatrix<Complex<f64>> {
        DMatrix::from_fn(self.side, self.side, |i, j| {
            execute(&self.entries[i * self.side + j], vars, params, stack)
        })
    }
}
