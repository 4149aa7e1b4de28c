pub mod error;
pub mod export;
pub mod formula;
pub mod node;
pub mod node_id;
pub mod render;
pub mod tree;
