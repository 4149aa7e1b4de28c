// Registered series functions available to formulas

use cairn_core::Series;
use rustc_hash::FxHashMap;

use super::eval::EvalValue;
use crate::error::EngineError;

pub type FunctionImpl = fn(args: &[EvalValue]) -> Result<EvalValue, EngineError>;

/// Fixed mapping from function name to a series-transforming operation.
///
/// The validator consults this registry when a formula is compiled, so a
/// formula can only ever call names registered here. Hosts extend the
/// default set with `register`.
pub struct FunctionRegistry {
    funcs: FxHashMap<String, FunctionImpl>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            funcs: FxHashMap::default(),
        };
        registry.register("priority", priority);
        registry.register("minimum", minimum);
        registry.register("maximum", maximum);
        registry
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry, for hosts that want full control over the set.
    pub fn empty() -> Self {
        Self {
            funcs: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, func: FunctionImpl) {
        self.funcs.insert(name.into(), func);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn call(&self, name: &str, args: &[EvalValue]) -> Result<EvalValue, EngineError> {
        let func = self
            .funcs
            .get(name)
            .ok_or_else(|| EngineError::Formula(format!("unregistered function: {}", name)))?;
        func(args)
    }
}

fn series_args<'a>(func: &str, args: &'a [EvalValue]) -> Result<Vec<&'a Series>, EngineError> {
    if args.is_empty() {
        return Err(EngineError::Value(format!(
            "{} expects at least one argument",
            func
        )));
    }
    args.iter()
        .map(|arg| match arg {
            EvalValue::Series(s) => Ok(s),
            EvalValue::Number(n) => Err(EngineError::Value(format!(
                "{} expects series arguments, got the scalar {}",
                func, n
            ))),
        })
        .collect()
}

/// N-ary combine_first: each argument fills the gaps left by the ones
/// before it, first argument wins.
pub fn priority(args: &[EvalValue]) -> Result<EvalValue, EngineError> {
    let series = series_args("priority", args)?;
    let mut result = series[0].clone();
    for s in &series[1..] {
        result = result.combine_first(s);
    }
    Ok(EvalValue::Series(result))
}

/// N-ary elementwise minimum over the union of indices.
pub fn minimum(args: &[EvalValue]) -> Result<EvalValue, EngineError> {
    let series = series_args("minimum", args)?;
    let mut result = series[0].clone();
    for s in &series[1..] {
        result = result.minimum(s);
    }
    Ok(EvalValue::Series(result))
}

/// N-ary elementwise maximum over the union of indices.
pub fn maximum(args: &[EvalValue]) -> Result<EvalValue, EngineError> {
    let series = series_args("maximum", args)?;
    let mut result = series[0].clone();
    for s in &series[1..] {
        result = result.maximum(s);
    }
    Ok(EvalValue::Series(result))
}
