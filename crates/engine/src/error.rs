//! Error taxonomy for the recalculation engine.
//!
//! Parse failures (malformed text) are reported distinctly from formula
//! validation failures (well-formed text referencing names outside the
//! registered set).

use thiserror::Error;

use crate::node_id::NodeId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Attach/detach attempted while the owning root is read-only.
    #[error("tree is read-only; structural changes are frozen")]
    ReadOnly,

    /// Formula text is not a well-formed expression.
    #[error("invalid formula: {0}")]
    Parse(String),

    /// Formula references an unregistered name, or a node without
    /// children was asked to calculate.
    #[error("formula error: {0}")]
    Formula(String),

    /// Propagation exceeded the recursion guard. The formula graph is
    /// almost certainly cyclic, which is unsupported input.
    #[error("recalculation exceeded depth {0}; formula graph is likely cyclic")]
    Cycle(usize),

    /// Value-contract failure: a formula produced a bare scalar, or a
    /// registered function was handed arguments it cannot accept.
    #[error("value error: {0}")]
    Value(String),

    /// Structural misuse: loop-creating attach, detaching a root,
    /// duplicate child name.
    #[error("invalid structure: {0}")]
    Structure(String),

    /// A handle that does not (or no longer does) name a node.
    #[error("no node with id {0}")]
    UnknownNode(NodeId),
}
