// Formula evaluator - walks a validated AST over series bindings

use cairn_core::Series;
use rustc_hash::FxHashMap;

use super::functions::FunctionRegistry;
use super::parser::{Expr, Op};
use crate::error::EngineError;

/// Intermediate value during evaluation. Numeric literals stay scalar
/// until an operation broadcasts them against a series.
#[derive(Debug, Clone)]
pub enum EvalValue {
    Number(f64),
    Series(Series),
}

/// Name -> series bindings for one evaluation: each child's name bound to
/// its current value, plus the self-reference keyword.
pub type Bindings = FxHashMap<String, Series>;

pub fn eval(
    expr: &Expr,
    bindings: &Bindings,
    registry: &FunctionRegistry,
) -> Result<EvalValue, EngineError> {
    match expr {
        Expr::Number(n) => Ok(EvalValue::Number(*n)),
        Expr::Ident(name) => bindings
            .get(name)
            .cloned()
            .map(EvalValue::Series)
            // Validation checks names against the child set at compile
            // time; a child detached since then surfaces here.
            .ok_or_else(|| EngineError::Formula(format!("unbound identifier: {}", name))),
        Expr::Function { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, bindings, registry)?);
            }
            registry.call(name, &values)
        }
        Expr::BinaryOp { op, left, right } => {
            let left = eval(left, bindings, registry)?;
            let right = eval(right, bindings, registry)?;
            Ok(apply_op(*op, left, right))
        }
    }
}

fn apply_op(op: Op, left: EvalValue, right: EvalValue) -> EvalValue {
    let f: fn(f64, f64) -> f64 = match op {
        Op::Add => |a, b| a + b,
        Op::Sub => |a, b| a - b,
        Op::Mul => |a, b| a * b,
        Op::Div => |a, b| a / b,
        Op::Pow => f64::powf,
    };
    match (left, right) {
        (EvalValue::Number(a), EvalValue::Number(b)) => EvalValue::Number(f(a, b)),
        (EvalValue::Series(a), EvalValue::Number(b)) => EvalValue::Series(a.map(|v| f(v, b))),
        (EvalValue::Number(a), EvalValue::Series(b)) => EvalValue::Series(b.map(|v| f(a, v))),
        (EvalValue::Series(a), EvalValue::Series(b)) => EvalValue::Series(a.zip_with(&b, f)),
    }
}
