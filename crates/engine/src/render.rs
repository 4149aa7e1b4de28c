// Plain-text tree rendering for diagnostics

use crate::error::EngineError;
use crate::node_id::NodeId;
use crate::tree::Tree;

/// Render a subtree with box-drawing glyphs, one node per line. Dirty
/// nodes carry a `*` marker and computed nodes show their formula.
pub fn render(tree: &Tree, id: NodeId) -> Result<String, EngineError> {
    let mut out = String::new();
    render_line(tree, id, "", &mut out)?;
    render_children(tree, id, "", &mut out)?;
    Ok(out)
}

fn render_line(tree: &Tree, id: NodeId, prefix: &str, out: &mut String) -> Result<(), EngineError> {
    out.push_str(prefix);
    out.push_str(tree.name(id)?);
    if tree.is_dirty(id)? {
        out.push('*');
    }
    let formula = tree.formula(id)?;
    if !formula.is_empty() {
        out.push_str("  = ");
        out.push_str(formula);
    }
    out.push('\n');
    Ok(())
}

fn render_children(
    tree: &Tree,
    id: NodeId,
    prefix: &str,
    out: &mut String,
) -> Result<(), EngineError> {
    let children = tree.children(id)?;
    for (i, &child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let branch = if last { "└── " } else { "├── " };
        render_line(tree, child, &format!("{}{}", prefix, branch), out)?;
        let descent = if last { "    " } else { "│   " };
        render_children(tree, child, &format!("{}{}", prefix, descent), out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeSpec;
    use cairn_core::Series;

    #[test]
    fn test_render_tree_shape() {
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

        let text = render(&tree, full).unwrap();
        let expected = "\
full*  = sunk + be
├── sunk*
└── be
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_nested_prefixes() {
        let mut tree = Tree::new();
        let top = tree.add_node(NodeSpec::named("top")).unwrap();
        let mid = tree
            .add_node(NodeSpec {
                parent: Some(top),
                ..NodeSpec::named("mid")
            })
            .unwrap();
        tree.add_node(NodeSpec {
            parent: Some(mid),
            ..NodeSpec::named("leaf")
        })
        .unwrap();
        tree.add_node(NodeSpec {
            parent: Some(top),
            ..NodeSpec::named("side")
        })
        .unwrap();

        let text = render(&tree, top).unwrap();
        let expected = "\
top
├── mid
│   └── leaf
└── side
";
        assert_eq!(text, expected);
    }
}
