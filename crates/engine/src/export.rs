// Structured tree export over the public accessors

use serde::Serialize;

use crate::error::EngineError;
use crate::node_id::NodeId;
use crate::tree::Tree;

/// Snapshot of a subtree for host consumption. A symlink exports its
/// target's name, dirty flag and formula at the alias position.
#[derive(Debug, Serialize)]
pub struct NodeExport {
    pub name: String,
    pub dirty: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub formula: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeExport>,
}

pub fn export(tree: &Tree, id: NodeId) -> Result<NodeExport, EngineError> {
    let mut children = Vec::new();
    for &child in tree.children(id)? {
        children.push(export(tree, child)?);
    }
    Ok(NodeExport {
        name: tree.name(id)?.to_string(),
        dirty: tree.is_dirty(id)?,
        formula: tree.formula(id)?.to_string(),
        children,
    })
}

pub fn to_json(tree: &Tree, id: NodeId) -> Result<String, EngineError> {
    let snapshot = export(tree, id)?;
    serde_json::to_string(&snapshot)
        .map_err(|err| EngineError::Value(format!("export serialization failed: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeSpec;
    use cairn_core::Series;

    #[test]
    fn test_export_shape() {
        let mut tree = Tree::new();
        let full = tree.add_node(NodeSpec::named("full")).unwrap();
        let sunk = tree
            .add_node(NodeSpec {
                parent: Some(full),
                ..NodeSpec::named("sunk")
            })
            .unwrap();
        tree.add_node(NodeSpec {
            parent: Some(full),
            ..NodeSpec::named("be")
        })
        .unwrap();
        tree.set_formula(full, "sunk + be").unwrap();
        tree.set_value(sunk, Series::from_values(&[1.0])).unwrap();

        let snapshot = export(&tree, full).unwrap();
        assert_eq!(snapshot.name, "full");
        assert_eq!(snapshot.formula, "sunk + be");
        assert!(snapshot.dirty);
        assert_eq!(snapshot.children.len(), 2);
        assert_eq!(snapshot.children[0].name, "sunk");
        assert!(snapshot.children[0].dirty);
        assert!(!snapshot.children[1].dirty);
    }

    #[test]
    fn test_to_json_omits_empty_fields() {
        let mut tree = Tree::new();
        let a = tree.add_node(NodeSpec::named("a")).unwrap();
        let json = to_json(&tree, a).unwrap();
        assert_eq!(json, r#"{"name":"a","dirty":false}"#);
    }

    #[test]
    fn test_export_symlink_shows_target_state() {
        let mut tree = Tree::new();
        let full = tree.add_node(NodeSpec::named("full")).unwrap();
        let sunk = tree
            .add_node(NodeSpec {
                parent: Some(full),
                ..NodeSpec::named("sunk")
            })
            .unwrap();
        let flows = tree.add_node(NodeSpec::named("flows")).unwrap();
        tree.create_symlink(sunk, Some(flows)).unwrap();
        tree.set_value(sunk, Series::from_values(&[1.0])).unwrap();

        let snapshot = export(&tree, flows).unwrap();
        assert_eq!(snapshot.children[0].name, "sunk");
        assert!(snapshot.children[0].dirty);
    }
}
