//! In-memory accessibility tree: nodes, snapshots and filtering predicates.

use std::collections::HashMap;
use std::time::Instant;

/// Roles the probe is allowed to emit. Anything else normalizes to "unknown".
pub const KNOWN_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "heading",
    "list",
    "listitem",
    "cell",
    "gridcell",
    "row",
    "menuitem",
    "tab",
    "article",
    "region",
    "navigation",
    "main",
    "banner",
    "contentinfo",
    "complementary",
    "image",
    "generic",
];

/// Roles that make a node clickable on their own.
const CLICKABLE_ROLES: &[&str] = &[
    "button", "link", "menuitem", "tab", "checkbox", "radio", "listitem",
];

/// Roles that make a node an input target.
const INPUT_ROLES: &[&str] = &[
    "textbox", "searchbox", "combobox", "listbox", "checkbox", "radio",
];

/// Lower-case `role` or "unknown" when outside the closed set.
pub fn normalize_role(raw: &str) -> String {
    let role = raw.trim().to_lowercase();
    if KNOWN_ROLES.contains(&role.as_str()) {
        role
    } else {
        "unknown".to_string()
    }
}

/// Viewport-relative bounding box. All-zero when the element has no layout.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Element state flags as observed by the probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeState {
    pub visible: bool,
    pub enabled: bool,
    pub focused: bool,
    pub checked: bool,
}

/// One element in the accessibility tree.
#[derive(Debug, Clone)]
pub struct AccessibilityNode {
    /// Lower-case role from [`KNOWN_ROLES`] or "unknown".
    pub role: String,
    /// Accessible name; may be empty.
    pub label: String,
    /// Placeholder attribute for inputs.
    pub placeholder: String,
    /// Whitelisted source attributes (id, class, href, type, aria-label, title, ...).
    pub attributes: HashMap<String, String>,
    /// Stable document-order integer identifying the element in the live page.
    pub backend_node_id: i64,
    pub bounds: Bounds,
    pub state: NodeState,
    /// Children in DOM document order.
    pub children: Vec<AccessibilityNode>,
    /// Short handle (`e1`, `e2`, ...) assigned by the RefID resolver.
    pub ref_id: Option<String>,
    /// Path expression for direct interaction with this exact element.
    pub selector: Option<String>,
}

impl AccessibilityNode {
    pub fn is_clickable(&self) -> bool {
        if CLICKABLE_ROLES.contains(&self.role.as_str()) {
            return true;
        }
        self.attributes.contains_key("onclick")
            || self.attributes.get("role").map(String::as_str) == Some("button")
    }

    pub fn is_input(&self) -> bool {
        if INPUT_ROLES.contains(&self.role.as_str()) {
            return true;
        }
        matches!(
            self.attributes.get("tag").map(String::as_str),
            Some("input") | Some("textarea") | Some("select")
        )
    }

    /// Depth-first walk over this node and all descendants.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a AccessibilityNode)) {
        f(self);
        for child in &self.children {
            child.for_each(f);
        }
    }

    /// Depth-first mutable walk. Used by the RefID assignment pass before a
    /// snapshot is published.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut AccessibilityNode)) {
        f(self);
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }
}

/// An immutable capture of the page's accessibility tree. Published behind an
/// `Arc` once RefIDs are assigned; never patched afterwards.
#[derive(Debug, Clone)]
pub struct AccessibilitySnapshot {
    pub root: AccessibilityNode,
    pub captured_at: Instant,
    pub page_url: String,
    pub page_title: String,
}

impl AccessibilitySnapshot {
    /// Nodes that can receive a click, in document order.
    pub fn clickable_elements(&self) -> Vec<&AccessibilityNode> {
        let mut out = Vec::new();
        self.root.for_each(&mut |n| {
            if n.is_clickable() {
                out.push(n);
            }
        });
        out
    }

    /// Nodes that accept input, in document order.
    pub fn input_elements(&self) -> Vec<&AccessibilityNode> {
        let mut out = Vec::new();
        self.root.for_each(&mut |n| {
            if n.is_input() {
                out.push(n);
            }
        });
        out
    }

    /// First node whose label matches exactly, else first whose label
    /// contains the query (case-insensitive).
    pub fn find_by_label(&self, label: &str) -> Option<&AccessibilityNode> {
        let mut exact = None;
        let mut partial = None;
        let needle = label.to_lowercase();
        self.root.for_each(&mut |n| {
            if exact.is_some() || n.label.is_empty() {
                return;
            }
            if n.label == label {
                exact = Some(n);
            } else if partial.is_none() && n.label.to_lowercase().contains(&needle) {
                partial = Some(n);
            }
        });
        exact.or(partial)
    }

    /// All nodes with the given role, in document order.
    pub fn find_by_role(&self, role: &str) -> Vec<&AccessibilityNode> {
        let mut out = Vec::new();
        self.root.for_each(&mut |n| {
            if n.role == role {
                out.push(n);
            }
        });
        out
    }
}
