//! The resolved dependency tree.
//!
//! Every node exclusively owns its children; nothing points upward, so
//! cycles in the package graph never become cycles in the data structure
//! (the resolver cuts them with its ancestor stack instead).

use crate::pjson::PackageJson;
use crate::registry::ManifestDist;
use crate::version::Range;
use semver::Version;
use std::fmt;
use tracing::debug;

/// One node of the dependency tree.
#[derive(Debug, Default)]
pub struct Dependency {
    pub name: String,
    /// The requesting parent's range. The root node has none.
    pub range: Option<Range>,
    /// The selected concrete version, assigned during resolution.
    pub version: Option<Version>,
    /// Tarball URL and integrity digest from the registry manifest.
    pub dist: Option<ManifestDist>,
    /// Child nodes, kept sorted by name.
    pub dependencies: Vec<Dependency>,
    /// Parsed package metadata, populated after materialization.
    pub pjson: Option<PackageJson>,
}

impl Dependency {
    /// Find a direct child by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// Sort children by name.
    pub fn sort_children(&mut self) {
        self.dependencies.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Render the tree rooted at this node.
    ///
    /// ```text
    /// example@0.0.0
    /// ├── a@1.0.1
    /// │   └── c@2.0.0
    /// └── b@1.2.1
    /// ```
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.to_string());
        out.push('\n');
        render_children(&self.dependencies, "", &mut out);
        out
    }

    /// Hoist packages toward the root to collapse equivalent subtrees.
    ///
    /// Runs to a fixed point: a child moves up to the closest ancestor with
    /// no conflicting entry of the same name; equal versions collapse; a
    /// child never hoists past a conflicting version.
    pub fn dedupe(&mut self) {
        dedupe_node(self, None);
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

fn render_children(children: &[Dependency], prefix: &str, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&child.to_string());
        out.push('\n');

        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_children(&child.dependencies, &child_prefix, out);
    }
}

/// Dedupe `node` against `parent`. Returns whether any child was removed
/// from `node` (hoisted or collapsed).
fn dedupe_node(node: &mut Dependency, parent: Option<&mut Dependency>) -> bool {
    // Children first, restarting until stable: hoisting can hand this node
    // names it has not processed yet.
    loop {
        let mut changed = false;
        for i in 0..node.dependencies.len() {
            // Detach the child so it can dedupe against this node.
            let mut child = std::mem::take(&mut node.dependencies[i]);
            if dedupe_node(&mut child, Some(&mut *node)) {
                changed = true;
            }
            node.dependencies[i] = child;
        }
        if !changed {
            break;
        }
    }
    node.sort_children();

    let Some(parent) = parent else {
        return false;
    };

    let mut removed = false;
    let mut kept = Vec::with_capacity(node.dependencies.len());
    for child in node.dependencies.drain(..) {
        match parent.get(&child.name).map(|p| p.version == child.version) {
            None => {
                debug!("hoisting {child}");
                parent.dependencies.push(child);
                removed = true;
            }
            Some(true) => {
                debug!("removing duplicate {child}");
                removed = true;
            }
            Some(false) => kept.push(child),
        }
    }
    node.dependencies = kept;
    node.sort_children();
    removed
}
