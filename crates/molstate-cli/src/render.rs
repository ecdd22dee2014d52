use molstate::core::models::ids::Ref;
use molstate::core::tree::StateTree;
use molstate::engine::cell::Cell;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub show_hidden: bool,
}

/// Renders the tree one node per line, children indented under their parent.
///
/// Each line reads `[V|H] [-|+] <name> (<transformer>) <status>  <detail>`.
/// Children of collapsed nodes are omitted, as are hidden subtrees unless
/// `show_hidden` is set.
pub fn render_tree(
    tree: &StateTree,
    cells: &HashMap<Ref, Arc<Cell>>,
    options: RenderOptions,
) -> String {
    let mut out = String::new();
    render_node(tree, cells, options, tree.root(), 0, &mut out);
    out
}

fn render_node(
    tree: &StateTree,
    cells: &HashMap<Ref, Arc<Cell>>,
    options: RenderOptions,
    node_ref: Ref,
    depth: usize,
    out: &mut String,
) {
    let Some(node) = tree.node(node_ref) else {
        return;
    };
    if node.flags.hidden && !options.show_hidden {
        return;
    }

    let has_children = tree.children(node_ref).next().is_some();
    let visibility = if node.flags.hidden { "[H]" } else { "[V]" };
    let expander = match (has_children, node.flags.collapsed) {
        (false, _) => "   ",
        (true, false) => "[-]",
        (true, true) => "[+]",
    };
    let name = match &node.tag {
        Some(tag) => tag.clone(),
        None => node_ref.to_string(),
    };

    let _ = write!(
        out,
        "{:indent$}{} {} {}",
        "",
        visibility,
        expander,
        name,
        indent = depth * 2
    );
    if !node.is_root() {
        let _ = write!(out, " ({})", node.transformer);
    }

    match cells.get(&node_ref) {
        Some(cell) => {
            let _ = write!(out, " {}", cell.status);
            if let Some(text) = cell.error_text() {
                let _ = write!(out, "  {}", text);
            } else if let Some(object) = &cell.object {
                let _ = write!(out, "  {}", object.label);
                if let Some(description) = &object.description {
                    let _ = write!(out, ": {}", description);
                }
            }
        }
        None => out.push_str(" -"),
    }
    out.push('\n');

    if node.flags.collapsed {
        return;
    }
    for child in tree.children(node_ref) {
        render_node(tree, cells, options, child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::register_builtins;
    use molstate::core::models::node::{NodeFlags, NodeOptions};
    use molstate::core::models::params::Params;
    use molstate::engine::config::EngineConfig;
    use molstate::engine::transaction::Transaction;
    use molstate::workflows::session::Session;

    async fn calculation(flags: NodeFlags) -> Session {
        let session = Session::new(EngineConfig::default());
        register_builtins(session.registry()).unwrap();
        let mut tx = Transaction::new();
        let a = tx.add_with(
            Ref::ROOT,
            "number.constant",
            Params::new().with("value", 3),
            NodeOptions::new().with_tag("a").with_flags(flags),
        );
        tx.add_with(
            a,
            "number.double",
            Params::new(),
            NodeOptions::new().with_tag("b"),
        );
        tx.add_with(
            a,
            "number.divide",
            Params::new().with("divisor", 0),
            NodeOptions::new().with_tag("c"),
        );
        session.submit_transaction(tx).await.unwrap();
        session
    }

    fn render(session: &Session, show_hidden: bool) -> String {
        render_tree(
            &session.get_tree(),
            &session.cells(),
            RenderOptions { show_hidden },
        )
    }

    #[tokio::test]
    async fn renders_values_errors_and_nesting() {
        let session = calculation(NodeFlags::default()).await;
        let expected = "\
[V] [-] root ok  Root
  [V] [-] a (number.constant) ok  Constant: 3
    [V]     b (number.double) ok  Doubled: 6
    [V]     c (number.divide) error  divide by zero
";
        assert_eq!(render(&session, false), expected);
    }

    #[tokio::test]
    async fn collapsed_nodes_hide_their_children() {
        let flags = NodeFlags {
            collapsed: true,
            hidden: false,
        };
        let session = calculation(flags).await;
        let rendered = render(&session, false);
        assert!(rendered.contains("[V] [+] a (number.constant)"));
        assert!(!rendered.contains("Doubled"));
    }

    #[tokio::test]
    async fn hidden_subtrees_render_only_on_request() {
        let flags = NodeFlags {
            collapsed: false,
            hidden: true,
        };
        let session = calculation(flags).await;

        assert_eq!(render(&session, false), "[V] [-] root ok  Root\n");
        let shown = render(&session, true);
        assert!(shown.contains("[H] [-] a (number.constant)"));
        assert!(shown.contains("Doubled: 6"));
    }
}
