//! Formula evaluator
//!
//! Evaluates parsed expressions against materialized cell state. Faults here are
//! local (`Error` status): type mismatch, division by zero, or a reference to an
//! already-faulted cell. Cycles never reach this module — tainted cells are
//! withheld as `Indeterminate` before evaluation is scheduled.

use crate::formula::parser::{BinOp, Expr};
use crate::model::{CellRef, CellValue};
use thiserror::Error;

/// What a referenced cell looks like to the evaluator
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRef {
    /// Missing or cleared cell; reads as `Number(0)`
    Empty,
    Value(CellValue),
    /// Referenced cell is in `Error`
    Faulted,
    /// Referenced cell is withheld; scheduling keeps this unreachable for
    /// evaluable cells, and it surfaces as a fault if it ever leaks through
    Withheld,
}

/// Local evaluation fault
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalFault {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("reference to faulted cell {0}")]
    UpstreamFault(CellRef),

    #[error("reference to withheld cell {0}")]
    UpstreamWithheld(CellRef),
}

/// Evaluation result for one formula cell
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Value(CellValue),
    Fault(EvalFault),
}

/// Evaluate an expression, resolving references through `resolve`.
pub fn evaluate<F>(expr: &Expr, resolve: &F) -> EvalOutcome
where
    F: Fn(&CellRef) -> ResolvedRef,
{
    match eval_inner(expr, resolve) {
        Ok(v) => EvalOutcome::Value(v),
        Err(fault) => EvalOutcome::Fault(fault),
    }
}

fn eval_inner<F>(expr: &Expr, resolve: &F) -> Result<CellValue, EvalFault>
where
    F: Fn(&CellRef) -> ResolvedRef,
{
    match expr {
        Expr::Number(n) => Ok(CellValue::Number(*n)),
        Expr::Ref(cell) => match resolve(cell) {
            ResolvedRef::Empty => Ok(CellValue::Number(0.0)),
            ResolvedRef::Value(v) => Ok(v),
            ResolvedRef::Faulted => Err(EvalFault::UpstreamFault(cell.clone())),
            ResolvedRef::Withheld => Err(EvalFault::UpstreamWithheld(cell.clone())),
        },
        Expr::Neg(inner) => {
            let n = numeric(eval_inner(inner, resolve)?, "unary minus")?;
            Ok(CellValue::Number(-n))
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = numeric(eval_inner(lhs, resolve)?, op_name(*op))?;
            let r = numeric(eval_inner(rhs, resolve)?, op_name(*op))?;
            let out = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => {
                    if r == 0.0 {
                        return Err(EvalFault::DivideByZero);
                    }
                    l / r
                }
            };
            Ok(CellValue::Number(out))
        }
    }
}

fn numeric(value: CellValue, context: &str) -> Result<f64, EvalFault> {
    match value {
        CellValue::Number(n) => Ok(n),
        CellValue::Text(s) => Err(EvalFault::TypeMismatch(format!(
            "text operand '{}' in {}",
            s, context
        ))),
    }
}

fn op_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "addition",
        BinOp::Sub => "subtraction",
        BinOp::Mul => "multiplication",
        BinOp::Div => "division",
    }
}
