//! Nested repository file tree.
//!
//! Builds an ordered tree from the flat path list the hosting provider
//! returns, renders it as indented text for prompts, and parses that text
//! back into paths. Structure (paths and kinds) survives a serde round trip
//! unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a tree entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One flat entry as returned by the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Full path from the repository root, `/`-separated.
    pub path: String,
    /// File or directory.
    pub kind: EntryKind,
}

impl TreeEntry {
    /// Create a file entry.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
        }
    }

    /// Create a directory entry.
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Dir,
        }
    }

    /// Nesting depth: number of `/` separators in the path.
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

/// A node in the nested tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Last path component.
    pub name: String,
    /// Full path from the repository root.
    pub path: String,
    /// File or directory.
    pub kind: EntryKind,
    /// Children, directories first, each group alphabetical.
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of file descendants (not counting directories).
    pub fn file_count(&self) -> usize {
        let own = usize::from(self.kind == EntryKind::File);
        own + self.children.iter().map(TreeNode::file_count).sum::<usize>()
    }
}

/// The full (possibly truncated) repository tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    /// Top-level nodes.
    pub roots: Vec<TreeNode>,
    /// Number of entries retained after truncation.
    pub entry_count: usize,
    /// Whether deep entries were elided because the tree exceeded the cap.
    pub truncated: bool,
}

impl FileTree {
    /// Build a nested tree from flat entries.
    ///
    /// When the entry list exceeds `max_nodes`, entries deeper than
    /// `truncate_depth` are dropped and the tree is marked truncated; the
    /// rendered form carries a `… (truncated)` marker.
    pub fn from_entries(entries: &[TreeEntry], max_nodes: usize, truncate_depth: usize) -> Self {
        let truncated = entries.len() > max_nodes;
        let kept: Vec<&TreeEntry> = if truncated {
            entries
                .iter()
                .filter(|e| e.depth() < truncate_depth)
                .collect()
        } else {
            entries.iter().collect()
        };

        let mut builder = DirBuilder::default();
        for entry in &kept {
            builder.insert(&entry.path, entry.kind);
        }

        Self {
            roots: builder.into_nodes(""),
            entry_count: kept.len(),
            truncated,
        }
    }

    /// Render as indented text, two spaces per level, directories with a
    /// trailing `/`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in &self.roots {
            render_node(node, 0, usize::MAX, &mut out);
        }
        if self.truncated {
            out.push_str("… (truncated)\n");
        }
        out
    }

    /// Render with subtrees below `max_depth` collapsed to file counts,
    /// e.g. `src/ (… 47 files)`. Used when a prompt context is over budget.
    pub fn render_summarized(&self, max_depth: usize) -> String {
        let mut out = String::new();
        for node in &self.roots {
            render_node(node, 0, max_depth, &mut out);
        }
        if self.truncated {
            out.push_str("… (truncated)\n");
        }
        out
    }

    /// All retained paths in render order.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.entry_count);
        for node in &self.roots {
            collect_paths(node, &mut out);
        }
        out
    }

    /// Whether `path` is a retained entry.
    pub fn contains(&self, path: &str) -> bool {
        self.paths().iter().any(|p| p == path)
    }
}

fn render_node(node: &TreeNode, depth: usize, max_depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    match node.kind {
        EntryKind::Dir => {
            if depth + 1 >= max_depth && !node.children.is_empty() {
                out.push_str(&format!(
                    "{}/ (… {} files)\n",
                    node.name,
                    node.file_count()
                ));
                return;
            }
            out.push_str(&node.name);
            out.push_str("/\n");
            for child in &node.children {
                render_node(child, depth + 1, max_depth, out);
            }
        }
        EntryKind::File => {
            out.push_str(&node.name);
            out.push('\n');
        }
    }
}

fn collect_paths(node: &TreeNode, out: &mut Vec<String>) {
    out.push(node.path.clone());
    for child in &node.children {
        collect_paths(child, out);
    }
}

/// Parse rendered tree text back into full paths.
///
/// Accepts the output of [`FileTree::render`]: two-space indentation,
/// directories with a trailing `/`. Truncation markers and collapsed
/// subtree counts are skipped.
pub fn paths_from_rendered(text: &str) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    let mut paths = Vec::new();

    for raw in text.lines() {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('…') {
            continue;
        }
        let indent = (raw.len() - trimmed.len()) / 2;
        stack.truncate(indent);

        // Collapsed subtrees render as "name/ (… N files)".
        let name = match trimmed.split_once(" (…") {
            Some((head, _)) => head,
            None => trimmed,
        };
        let is_dir = name.ends_with('/');
        let name = name.trim_end_matches('/');

        let full = if stack.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{}", stack.join("/"), name)
        };
        paths.push(full.clone());

        if is_dir {
            stack.push(name.to_owned());
        }
    }

    paths
}

/// Intermediate nested map used while building the tree.
///
/// A `BTreeMap` keyed by name keeps each level deterministic; the final
/// ordering pass puts directories before files.
#[derive(Debug, Default)]
struct DirBuilder {
    children: BTreeMap<String, (EntryKind, DirBuilder)>,
}

impl DirBuilder {
    fn insert(&mut self, path: &str, kind: EntryKind) {
        let mut parts = path.splitn(2, '/');
        let head = match parts.next() {
            Some(h) if !h.is_empty() => h,
            _ => return,
        };
        match parts.next() {
            Some(rest) => {
                let entry = self
                    .children
                    .entry(head.to_owned())
                    .or_insert_with(|| (EntryKind::Dir, DirBuilder::default()));
                // A path component with descendants is a directory even if the
                // provider listed it only implicitly.
                entry.0 = EntryKind::Dir;
                entry.1.insert(rest, kind);
            }
            None => {
                self.children
                    .entry(head.to_owned())
                    .or_insert_with(|| (kind, DirBuilder::default()))
                    .0 = kind;
            }
        }
    }

    fn into_nodes(self, prefix: &str) -> Vec<TreeNode> {
        let mut nodes: Vec<TreeNode> = self
            .children
            .into_iter()
            .map(|(name, (kind, sub))| {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let children = sub.into_nodes(&path);
                TreeNode {
                    name,
                    path,
                    kind,
                    children,
                }
            })
            .collect();
        nodes.sort_by(|a, b| {
            let a_dir = a.kind == EntryKind::Dir;
            let b_dir = b.kind == EntryKind::Dir;
            b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
        });
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<TreeEntry> {
        vec![
            TreeEntry::file("README.md"),
            TreeEntry::dir("src"),
            TreeEntry::file("src/main.rs"),
            TreeEntry::file("src/lib.rs"),
            TreeEntry::dir("src/audio"),
            TreeEntry::file("src/audio/wav.rs"),
            TreeEntry::file("Cargo.toml"),
        ]
    }

    #[test]
    fn builds_nested_structure() {
        let tree = FileTree::from_entries(&sample_entries(), 5_000, 3);
        assert!(!tree.truncated);
        assert_eq!(tree.entry_count, 7);

        let src = tree
            .roots
            .iter()
            .find(|n| n.name == "src")
            .expect("src node");
        assert_eq!(src.kind, EntryKind::Dir);
        assert_eq!(src.children.len(), 3);
        // Directories sort before files.
        assert_eq!(src.children[0].name, "audio");
        assert_eq!(src.children[0].kind, EntryKind::Dir);
    }

    #[test]
    fn render_is_indented() {
        let tree = FileTree::from_entries(&sample_entries(), 5_000, 3);
        let text = tree.render();
        assert!(text.contains("src/\n"));
        assert!(text.contains("  audio/\n"));
        assert!(text.contains("    wav.rs\n"));
        assert!(text.contains("README.md\n"));
    }

    #[test]
    fn serde_round_trip_is_identity() {
        let tree = FileTree::from_entries(&sample_entries(), 5_000, 3);
        let json = serde_json::to_string(&tree).expect("serialize");
        let parsed: FileTree = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, tree);
        assert_eq!(parsed.paths(), tree.paths());
    }

    #[test]
    fn rendered_paths_round_trip() {
        let tree = FileTree::from_entries(&sample_entries(), 5_000, 3);
        let parsed = paths_from_rendered(&tree.render());
        let mut expected = tree.paths();
        expected.sort();
        let mut got = parsed;
        got.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn over_cap_tree_is_truncated() {
        let mut entries = Vec::new();
        for i in 0..20 {
            entries.push(TreeEntry::dir(format!("d{i}")));
            entries.push(TreeEntry::file(format!("d{i}/a.rs")));
            entries.push(TreeEntry::file(format!("d{i}/deep/deeper/b.rs")));
        }
        let tree = FileTree::from_entries(&entries, 30, 2);
        assert!(tree.truncated);
        assert!(tree.entry_count < entries.len());
        assert!(tree.render().contains("… (truncated)"));
        // Deep entries are gone, shallow ones survive.
        assert!(tree.contains("d0/a.rs"));
        assert!(!tree.contains("d0/deep/deeper/b.rs"));
    }

    #[test]
    fn summarized_render_collapses_subtrees() {
        let tree = FileTree::from_entries(&sample_entries(), 5_000, 3);
        let text = tree.render_summarized(1);
        assert!(text.contains("src/ (… 3 files)"), "got: {text}");
        assert!(!text.contains("wav.rs"));
    }

    #[test]
    fn implicit_parent_directories_are_created() {
        // Provider listed only the file, not its directories.
        let entries = vec![TreeEntry::file("a/b/c.rs")];
        let tree = FileTree::from_entries(&entries, 5_000, 5);
        assert!(tree.contains("a"));
        assert!(tree.contains("a/b"));
        assert!(tree.contains("a/b/c.rs"));
    }

    #[test]
    fn empty_tree_renders_empty() {
        let tree = FileTree::from_entries(&[], 5_000, 3);
        assert_eq!(tree.render(), "");
        assert!(tree.paths().is_empty());
    }

    #[test]
    fn file_count_counts_only_files() {
        let tree = FileTree::from_entries(&sample_entries(), 5_000, 3);
        let src = tree
            .roots
            .iter()
            .find(|n| n.name == "src")
            .expect("src node");
        assert_eq!(src.file_count(), 3);
    }
}
