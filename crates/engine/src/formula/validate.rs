// Formula validation and compilation
//
// Static analysis of formula ASTs without evaluation. Every identifier a
// formula references must be a current child's name or the self-reference
// keyword, and every function it calls must be registered. Anything else
// is rejected before the formula can be stored, so untrusted formula text
// never reaches evaluation with an unknown name.

use super::functions::FunctionRegistry;
use super::parser::{self, Expr};
use crate::error::EngineError;

/// The keyword that binds to the node's own current value.
pub const SELF_KEYWORD: &str = "self";

/// A validated, evaluable formula.
///
/// Cached on the node and invalidated whenever the formula source is
/// reassigned; never stale at evaluation time.
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    pub source: String,
    pub expr: Expr,
    /// Identifiers the formula references, in first-appearance order.
    pub identifiers: Vec<String>,
}

/// Parse and validate formula text against the allowed name set.
///
/// All-or-nothing: any failure leaves the caller's previous formula
/// untouched. Malformed text fails with `Parse`; a well-formed expression
/// referencing an unknown name fails with `Formula`.
pub fn compile(
    source: &str,
    child_names: &[String],
    registry: &FunctionRegistry,
) -> Result<CompiledFormula, EngineError> {
    let expr = parser::parse(source).map_err(EngineError::Parse)?;

    let mut identifiers = Vec::new();
    let mut function_names = Vec::new();
    walk_expr(&expr, &mut |name, is_function| {
        let bucket = if is_function { &mut function_names } else { &mut identifiers };
        if !bucket.iter().any(|n| n == name) {
            bucket.push(name.to_string());
        }
    });

    for ident in &identifiers {
        if ident != SELF_KEYWORD && !child_names.iter().any(|n| n == ident) {
            return Err(EngineError::Formula(format!(
                "unregistered identifier: {}",
                ident
            )));
        }
    }
    for name in &function_names {
        if !registry.is_registered(name) {
            return Err(EngineError::Formula(format!(
                "unregistered function: {}",
                name
            )));
        }
    }

    Ok(CompiledFormula {
        source: source.to_string(),
        expr,
        identifiers,
    })
}

/// Walk the AST and call the visitor for each name encountered.
/// The bool distinguishes function names from plain identifiers.
fn walk_expr<F: FnMut(&str, bool)>(expr: &Expr, visitor: &mut F) {
    match expr {
        Expr::Number(_) => {}
        Expr::Ident(name) => visitor(name, false),
        Expr::Function { name, args } => {
            visitor(name, true);
            for arg in args {
                walk_expr(arg, visitor);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, visitor);
            walk_expr(right, visitor);
        }
    }
}
