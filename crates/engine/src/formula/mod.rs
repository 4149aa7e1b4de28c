// Formula parsing, validation and evaluation

pub mod eval;
pub mod functions;
pub mod parser;
pub mod validate;
