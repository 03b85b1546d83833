//! Accessibility tree indexing.
//!
//! Walks an accessibility tree snapshot into a compact text outline and a
//! reference table with short-lived element refs (e1, e2, ...) for
//! interaction targeting.

use std::collections::BTreeMap;

use surfkit_core::RefEntry;

/// A node of the accessibility tree: role, accessible name, children in
/// document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxNode {
    pub role: String,
    pub name: String,
    pub children: Vec<AxNode>,
}

impl AxNode {
    pub fn new(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<AxNode>) -> Self {
        self.children = children;
        self
    }
}

/// Result of one indexing pass: the outline text and the freshly minted
/// reference table. Refs are local to this pass and are wholesale-replaced
/// by the next one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub outline: String,
    pub refs: BTreeMap<String, RefEntry>,
}

/// Roles that receive a reference token. All other roles appear in the
/// outline but cannot be targeted by ref.
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "checkbox", "radio", "combobox", "menuitem", "tab",
];

fn is_interactive(role: &str) -> bool {
    INTERACTIVE_ROLES.contains(&role)
}

/// Index an accessibility tree: depth-first pre-order, one outline line per
/// node, refs assigned from a counter that restarts at 1 on every call.
pub fn index(root: &AxNode) -> Snapshot {
    let mut outline = String::new();
    let mut refs = BTreeMap::new();
    let mut counter = 0u32;
    walk(root, 0, &mut outline, &mut refs, &mut counter);
    Snapshot { outline, refs }
}

fn walk(
    node: &AxNode,
    depth: usize,
    outline: &mut String,
    refs: &mut BTreeMap<String, RefEntry>,
    counter: &mut u32,
) {
    let mut line = format!("{}- {}", "  ".repeat(depth), node.role);

    if !node.name.is_empty() {
        line.push_str(&format!(" \"{}\"", node.name));
    }

    if is_interactive(&node.role) {
        *counter += 1;
        let token = format!("e{}", counter);
        line.push_str(&format!(" [ref={}]", token));
        refs.insert(
            token,
            RefEntry {
                role: node.role.clone(),
                name: node.name.clone(),
                selector: selector_for(&node.role, &node.name),
            },
        );
    }

    outline.push_str(&line);
    outline.push('\n');

    for child in &node.children {
        walk(child, depth + 1, outline, refs, counter);
    }
}

/// Synthesize a selector from (role, name) alone. Deliberately ambiguous
/// when several nodes share a role and name; disambiguation by path or index
/// is out of contract.
pub fn selector_for(role: &str, name: &str) -> String {
    if name.is_empty() {
        format!("[role=\"{}\"]", role)
    } else {
        format!("[role=\"{}\"][name=\"{}\"]", role, escape_name(name))
    }
}

fn escape_name(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_tree() -> AxNode {
        AxNode::new("RootWebArea", "Login").with_children(vec![
            AxNode::new("heading", "Sign in"),
            AxNode::new("form", "").with_children(vec![
                AxNode::new("textbox", "Email"),
                AxNode::new("textbox", "Password"),
                AxNode::new("checkbox", "Remember me"),
                AxNode::new("button", "Sign in"),
            ]),
            AxNode::new("link", "Forgot password?"),
        ])
    }

    #[test]
    fn test_outline_format() {
        let snapshot = index(&form_tree());
        let lines: Vec<&str> = snapshot.outline.lines().collect();
        assert_eq!(lines[0], "- RootWebArea \"Login\"");
        assert_eq!(lines[1], "  - heading \"Sign in\"");
        assert_eq!(lines[2], "  - form");
        assert_eq!(lines[3], "    - textbox \"Email\" [ref=e1]");
        assert_eq!(lines[6], "    - button \"Sign in\" [ref=e4]");
        assert_eq!(lines[7], "  - link \"Forgot password?\" [ref=e5]");
    }

    #[test]
    fn test_refs_increase_in_preorder() {
        let snapshot = index(&form_tree());
        assert_eq!(snapshot.refs.len(), 5);
        assert_eq!(snapshot.refs["e1"].name, "Email");
        assert_eq!(snapshot.refs["e2"].name, "Password");
        assert_eq!(snapshot.refs["e3"].role, "checkbox");
        assert_eq!(snapshot.refs["e4"].role, "button");
        assert_eq!(snapshot.refs["e5"].role, "link");
    }

    #[test]
    fn test_counter_restarts_each_pass() {
        let tree = form_tree();
        let first = index(&tree);
        let second = index(&tree);
        assert!(second.refs.contains_key("e1"));
        assert_eq!(first.refs, second.refs);
    }

    #[test]
    fn test_non_interactive_roles_get_no_ref() {
        let tree = AxNode::new("RootWebArea", "").with_children(vec![
            AxNode::new("heading", "Title"),
            AxNode::new("paragraph", ""),
            AxNode::new("image", "logo"),
        ]);
        let snapshot = index(&tree);
        assert!(snapshot.refs.is_empty());
        assert!(!snapshot.outline.contains("[ref="));
    }

    #[test]
    fn test_selector_is_deterministic() {
        assert_eq!(
            selector_for("button", "Submit"),
            selector_for("button", "Submit")
        );
        assert_eq!(
            selector_for("button", "Submit"),
            "[role=\"button\"][name=\"Submit\"]"
        );
    }

    #[test]
    fn test_selector_role_only_when_name_empty() {
        assert_eq!(selector_for("textbox", ""), "[role=\"textbox\"]");
    }

    #[test]
    fn test_selector_escapes_quotes() {
        assert_eq!(
            selector_for("link", "Say \"hi\""),
            "[role=\"link\"][name=\"Say \\\"hi\\\"\"]"
        );
    }
}
