//! Symbolic expression trees for the governing equations.
//!
//! Expressions are plain recursive enums with eager differentiation and
//! constant folding. This is deliberately not a computer algebra system:
//! trigonometric or exponential rewriting belongs upstream, and everything
//! this crate needs is the chain rule plus enough folding to keep derived
//! Jacobian entries compact.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::AtlasError;

/// A symbolic expression over named variables and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(f64),
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sin(Box<Expr>),
    Cos(Box<Expr>),
    Exp(Box<Expr>),
    Ln(Box<Expr>),
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn num(value: f64) -> Expr {
        Expr::Const(value)
    }

    pub fn boxed(self) -> Box<Expr> {
        Box::new(self)
    }

    pub fn sin(self) -> Expr {
        Expr::Sin(self.boxed())
    }

    pub fn cos(self) -> Expr {
        Expr::Cos(self.boxed())
    }

    pub fn exp(self) -> Expr {
        Expr::Exp(self.boxed())
    }

    pub fn ln(self) -> Expr {
        Expr::Ln(self.boxed())
    }

    pub fn pow(self, exponent: Expr) -> Expr {
        Expr::Pow(self.boxed(), exponent.boxed())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(v) if *v == 0.0)
    }

    fn is_one(&self) -> bool {
        matches!(self, Expr::Const(v) if *v == 1.0)
    }

    /// Partial derivative with respect to `var`, constant-folded.
    ///
    /// Differentiation is eager: the returned tree contains no unevaluated
    /// derivative nodes.
    pub fn diff(&self, var: &str) -> Expr {
        match self {
            Expr::Const(_) => Expr::Const(0.0),
            Expr::Var(name) => {
                if name == var {
                    Expr::Const(1.0)
                } else {
                    Expr::Const(0.0)
                }
            }
            Expr::Add(lhs, rhs) => sum(lhs.diff(var), rhs.diff(var)),
            Expr::Sub(lhs, rhs) => difference(lhs.diff(var), rhs.diff(var)),
            Expr::Mul(lhs, rhs) => sum(
                product(lhs.diff(var), (**rhs).clone()),
                product((**lhs).clone(), rhs.diff(var)),
            ),
            Expr::Div(lhs, rhs) => quotient(
                difference(
                    product(lhs.diff(var), (**rhs).clone()),
                    product((**lhs).clone(), rhs.diff(var)),
                ),
                power((**rhs).clone(), Expr::Const(2.0)),
            ),
            Expr::Pow(base, exponent) => match &**exponent {
                // Power rule when the exponent is constant; the general case
                // goes through f^g * (g' ln f + g f'/f).
                Expr::Const(n) => product(
                    product(
                        Expr::Const(*n),
                        power((**base).clone(), Expr::Const(n - 1.0)),
                    ),
                    base.diff(var),
                ),
                _ => product(
                    power((**base).clone(), (**exponent).clone()),
                    sum(
                        product(exponent.diff(var), Expr::Ln(base.clone())),
                        quotient(
                            product((**exponent).clone(), base.diff(var)),
                            (**base).clone(),
                        ),
                    ),
                ),
            },
            Expr::Neg(inner) => negate(inner.diff(var)),
            Expr::Sin(inner) => product(Expr::Cos(inner.clone()), inner.diff(var)),
            Expr::Cos(inner) => negate(product(Expr::Sin(inner.clone()), inner.diff(var))),
            Expr::Exp(inner) => product(Expr::Exp(inner.clone()), inner.diff(var)),
            Expr::Ln(inner) => quotient(inner.diff(var), (**inner).clone()),
        }
    }

    /// Replace every occurrence of `var` with `replacement`.
    pub fn substitute(&self, var: &str, replacement: &Expr) -> Expr {
        let walk = |e: &Expr| e.substitute(var, replacement);
        match self {
            Expr::Const(_) => self.clone(),
            Expr::Var(name) => {
                if name == var {
                    replacement.clone()
                } else {
                    self.clone()
                }
            }
            Expr::Add(l, r) => Expr::Add(walk(l).boxed(), walk(r).boxed()),
            Expr::Sub(l, r) => Expr::Sub(walk(l).boxed(), walk(r).boxed()),
            Expr::Mul(l, r) => Expr::Mul(walk(l).boxed(), walk(r).boxed()),
            Expr::Div(l, r) => Expr::Div(walk(l).boxed(), walk(r).boxed()),
            Expr::Pow(l, r) => Expr::Pow(walk(l).boxed(), walk(r).boxed()),
            Expr::Neg(e) => Expr::Neg(walk(e).boxed()),
            Expr::Sin(e) => Expr::Sin(walk(e).boxed()),
            Expr::Cos(e) => Expr::Cos(walk(e).boxed()),
            Expr::Exp(e) => Expr::Exp(walk(e).boxed()),
            Expr::Ln(e) => Expr::Ln(walk(e).boxed()),
        }
    }

    /// Bottom-up constant folding and neutral-element elimination.
    pub fn simplified(&self) -> Expr {
        match self {
            Expr::Const(_) | Expr::Var(_) => self.clone(),
            Expr::Add(l, r) => sum(l.simplified(), r.simplified()),
            Expr::Sub(l, r) => difference(l.simplified(), r.simplified()),
            Expr::Mul(l, r) => product(l.simplified(), r.simplified()),
            Expr::Div(l, r) => quotient(l.simplified(), r.simplified()),
            Expr::Pow(l, r) => power(l.simplified(), r.simplified()),
            Expr::Neg(e) => negate(e.simplified()),
            Expr::Sin(e) => match e.simplified() {
                Expr::Const(v) => Expr::Const(v.sin()),
                e => Expr::Sin(e.boxed()),
            },
            Expr::Cos(e) => match e.simplified() {
                Expr::Const(v) => Expr::Const(v.cos()),
                e => Expr::Cos(e.boxed()),
            },
            Expr::Exp(e) => match e.simplified() {
                Expr::Const(v) => Expr::Const(v.exp()),
                e => Expr::Exp(e.boxed()),
            },
            Expr::Ln(e) => match e.simplified() {
                Expr::Const(v) => Expr::Const(v.ln()),
                e => Expr::Ln(e.boxed()),
            },
        }
    }
}

// Folding constructors used by `diff` and `simplified`. These keep derived
// trees compact without attempting any algebraic rewriting.

fn sum(lhs: Expr, rhs: Expr) -> Expr {
    match (&lhs, &rhs) {
        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a + b),
        _ if lhs.is_zero() => rhs,
        _ if rhs.is_zero() => lhs,
        _ => Expr::Add(lhs.boxed(), rhs.boxed()),
    }
}

fn difference(lhs: Expr, rhs: Expr) -> Expr {
    match (&lhs, &rhs) {
        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a - b),
        _ if rhs.is_zero() => lhs,
        _ if lhs.is_zero() => negate(rhs),
        _ => Expr::Sub(lhs.boxed(), rhs.boxed()),
    }
}

fn product(lhs: Expr, rhs: Expr) -> Expr {
    match (&lhs, &rhs) {
        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a * b),
        _ if lhs.is_zero() || rhs.is_zero() => Expr::Const(0.0),
        _ if lhs.is_one() => rhs,
        _ if rhs.is_one() => lhs,
        _ => Expr::Mul(lhs.boxed(), rhs.boxed()),
    }
}

fn quotient(lhs: Expr, rhs: Expr) -> Expr {
    match (&lhs, &rhs) {
        (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Expr::Const(a / b),
        _ if lhs.is_zero() => Expr::Const(0.0),
        _ if rhs.is_one() => lhs,
        _ => Expr::Div(lhs.boxed(), rhs.boxed()),
    }
}

fn power(base: Expr, exponent: Expr) -> Expr {
    match (&base, &exponent) {
        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a.powf(*b)),
        _ if exponent.is_zero() => Expr::Const(1.0),
        _ if exponent.is_one() => base,
        _ => Expr::Pow(base.boxed(), exponent.boxed()),
    }
}

fn negate(inner: Expr) -> Expr {
    match inner {
        Expr::Const(v) => Expr::Const(-v),
        Expr::Neg(e) => *e,
        _ => Expr::Neg(inner.boxed()),
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::Add(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::Div(self.boxed(), rhs.boxed())
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(self.boxed())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Add(l, r) => write!(f, "({} + {})", l, r),
            Expr::Sub(l, r) => write!(f, "({} - {})", l, r),
            Expr::Mul(l, r) => write!(f, "({} * {})", l, r),
            Expr::Div(l, r) => write!(f, "({} / {})", l, r),
            Expr::Pow(l, r) => write!(f, "({} ^ {})", l, r),
            Expr::Neg(e) => write!(f, "(-{})", e),
            Expr::Sin(e) => write!(f, "sin({})", e),
            Expr::Cos(e) => write!(f, "cos({})", e),
            Expr::Exp(e) => write!(f, "exp({})", e),
            Expr::Ln(e) => write!(f, "ln({})", e),
        }
    }
}

// --- Symbol registry ---

/// Per-problem registry resolving variable and parameter names to dense
/// indices. One registry is created with each `Problem` and dropped with it;
/// there is no process-global symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolRegistry {
    variables: HashMap<String, usize>,
    parameters: HashMap<String, usize>,
}

impl SymbolRegistry {
    pub fn new(variables: &[String], parameters: &[String]) -> Result<Self> {
        let mut var_map = HashMap::new();
        for (i, name) in variables.iter().enumerate() {
            if var_map.insert(name.clone(), i).is_some() {
                bail!("variable `{}` is declared more than once", name);
            }
        }
        let mut param_map = HashMap::new();
        for (i, name) in parameters.iter().enumerate() {
            if var_map.contains_key(name) {
                bail!("`{}` is declared as both a variable and a parameter", name);
            }
            if param_map.insert(name.clone(), i).is_some() {
                return Err(AtlasError::DuplicateParameter(name.clone()).into());
            }
        }
        Ok(Self {
            variables: var_map,
            parameters: param_map,
        })
    }

    pub fn variable(&self, name: &str) -> Option<usize> {
        self.variables.get(name).copied()
    }

    pub fn parameter(&self, name: &str) -> Option<usize> {
        self.parameters.get(name).copied()
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }
}

// --- Parser ---

/// Parses a textual expression into an `Expr`.
///
/// Supports `+ - * / ^`, parentheses, unary minus, and the calls
/// `sin`, `cos`, `exp`, `ln`. `^` is right-associative and binds tighter
/// than unary minus, so `-x^2` is `-(x^2)`.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_sum()?;
    if parser.pos != parser.tokens.len() {
        bail!("unexpected trailing input in `{}`", input);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = num
                .parse()
                .map_err(|_| anyhow::anyhow!("malformed number `{}`", num))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            match c {
                '+' => tokens.push(Token::Plus),
                '-' => tokens.push(Token::Minus),
                '*' => tokens.push(Token::Star),
                '/' => tokens.push(Token::Slash),
                '^' => tokens.push(Token::Caret),
                '(' => tokens.push(Token::LParen),
                ')' => tokens.push(Token::RParen),
                _ => bail!("unexpected character `{}`", c),
            }
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.consume();
                    left = left + self.parse_product()?;
                }
                Token::Minus => {
                    self.consume();
                    left = left - self.parse_product()?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.consume();
                    left = left * self.parse_unary()?;
                }
                Token::Slash => {
                    self.consume();
                    left = left / self.parse_unary()?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            return Ok(-self.parse_unary()?);
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // Right-associative; the exponent may carry its own unary minus.
            let exponent = self.parse_unary()?;
            return Ok(base.pow(exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Const(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_sum()?;
                    match self.consume() {
                        Some(Token::RParen) => {}
                        _ => bail!("expected `)` after argument of `{}`", name),
                    }
                    match name.as_str() {
                        "sin" => Ok(arg.sin()),
                        "cos" => Ok(arg.cos()),
                        "exp" => Ok(arg.exp()),
                        "ln" => Ok(arg.ln()),
                        _ => bail!("unknown function `{}`", name),
                    }
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(expr),
                    _ => bail!("expected `)`"),
                }
            }
            other => bail!("unexpected token {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let expr = parse("a + b * c").expect("should parse");
        assert_eq!(
            expr,
            Expr::var("a") + Expr::var("b") * Expr::var("c"),
            "multiplication should bind tighter than addition"
        );
    }

    #[test]
    fn test_parse_unary_minus_and_power() {
        let expr = parse("-x^2").expect("should parse");
        assert_eq!(expr, -Expr::var("x").pow(Expr::num(2.0)));
    }

    #[test]
    fn test_parse_function_calls() {
        let expr = parse("sin(w * t) + exp(-g)").expect("should parse");
        assert_eq!(
            expr,
            (Expr::var("w") * Expr::var("t")).sin() + (-Expr::var("g")).exp()
        );
    }

    #[test]
    fn test_parse_rejects_unknown_function() {
        assert!(parse("sinh(x)").is_err());
        assert!(parse("x +").is_err());
    }

    #[test]
    fn test_diff_product_rule() {
        // d/dx (x * x) = x + x (folded from 1*x + x*1)
        let expr = Expr::var("x") * Expr::var("x");
        let d = expr.diff("x");
        assert_eq!(d, Expr::var("x") + Expr::var("x"));
    }

    #[test]
    fn test_diff_power_rule() {
        // d/dx x^3 = 3 * x^2
        let d = Expr::var("x").pow(Expr::num(3.0)).diff("x");
        assert_eq!(
            d,
            Expr::num(3.0) * Expr::var("x").pow(Expr::num(2.0)),
        );
    }

    #[test]
    fn test_diff_chain_rule_through_sin() {
        // d/dx sin(a*x) = cos(a*x) * a
        let inner = Expr::var("a") * Expr::var("x");
        let d = inner.clone().sin().diff("x");
        assert_eq!(d, inner.cos() * Expr::var("a"));
    }

    #[test]
    fn test_diff_wrt_other_symbol_is_zero() {
        let expr = parse("x^2 + sin(x)").expect("should parse");
        assert!(expr.diff("y").is_zero());
    }

    #[test]
    fn test_substitute_then_fold() {
        let expr = parse("u * v + u").expect("should parse");
        let fixed = expr.substitute("u", &Expr::num(0.0)).simplified();
        assert!(fixed.is_zero(), "0 * v + 0 should fold to 0, got {}", fixed);
    }

    #[test]
    fn test_registry_rejects_collisions() {
        let vars = vec!["u".to_string(), "v".to_string()];
        let params = vec!["a".to_string()];
        assert!(SymbolRegistry::new(&vars, &params).is_ok());

        let dup_vars = vec!["u".to_string(), "u".to_string()];
        assert!(SymbolRegistry::new(&dup_vars, &params).is_err());

        let overlap = vec!["u".to_string()];
        assert!(SymbolRegistry::new(&vars, &overlap).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let vars = vec!["u".to_string(), "v".to_string()];
        let params = vec!["a".to_string(), "b".to_string()];
        let registry = SymbolRegistry::new(&vars, &params).expect("registry should build");
        assert_eq!(registry.variable("v"), Some(1));
        assert_eq!(registry.parameter("a"), Some(0));
        assert_eq!(registry.variable("a"), None);
        assert_eq!(registry.parameter("missing"), None);
    }
}
