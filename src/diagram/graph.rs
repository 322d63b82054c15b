//! Declarative flowchart grammar: parser, validation, post-processing.
//!
//! The pipeline's final stage emits flowchart text (`flowchart TD`, node
//! declarations, labeled edges, subgraphs, `classDef`/`class` styling). The
//! parser here turns that text into a [`Diagram`], the post-processor
//! guarantees the structural invariants (every edge endpoint is a declared
//! node, no duplicate edges) and [`Diagram::to_text`] renders the cleaned
//! graph back out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Style classes applied by the post-processor.
pub const PALETTE: &[(&str, &str)] = &[
    ("internal", "fill:#FFF8E1,stroke:#F57C00"),
    ("external", "fill:#E8F5E8,stroke:#388E3C"),
    ("storage", "fill:#F3E5F5,stroke:#7B1FA2"),
    ("entry", "fill:#E3F2FD,stroke:#1976D2"),
];

/// A node declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Human-readable label.
    pub label: String,
    /// Style classes assigned via `:::class` or `class` lines.
    pub classes: Vec<String>,
}

/// A directed edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
}

/// A named grouping of nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subgraph {
    pub title: String,
    pub node_ids: Vec<String>,
}

/// A parsed flowchart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagram {
    /// Flow direction (`TD`, `LR`, …).
    pub direction: String,
    /// Declared nodes by id.
    pub nodes: BTreeMap<String, Node>,
    /// Edges in declaration order.
    pub edges: Vec<Edge>,
    /// Subgraphs in declaration order.
    pub subgraphs: Vec<Subgraph>,
    /// Style class definitions by name.
    pub class_defs: BTreeMap<String, String>,
}

/// A parse failure with the offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line_no: usize,
    pub line: String,
    pub reason: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line_no, self.reason, self.line)
    }
}

/// Strip model artifacts the grammar does not allow: code fences, init
/// blocks, `style` and `click` directives, and comment lines.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            continue;
        }
        if trimmed.contains("%%{init") {
            continue;
        }
        if trimmed.starts_with("style ") || trimmed.starts_with("click ") {
            continue;
        }
        if trimmed.starts_with("%%") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

impl Diagram {
    /// Parse flowchart text.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] naming the first unparseable line. The
    /// error text is fed back to the model for the one repair round.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut diagram = Diagram {
            direction: "TD".to_owned(),
            ..Diagram::default()
        };
        let mut current_subgraph: Option<Subgraph> = None;
        let mut saw_header = false;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let err = |reason: &str| ParseError {
                line_no,
                line: line.to_owned(),
                reason: reason.to_owned(),
            };

            if !saw_header {
                let mut parts = line.split_whitespace();
                match parts.next() {
                    Some("flowchart") | Some("graph") => {
                        saw_header = true;
                        if let Some(dir) = parts.next() {
                            diagram.direction = dir.to_owned();
                        }
                        continue;
                    }
                    _ => return Err(err("expected `flowchart <direction>` header")),
                }
            }

            if let Some(rest) = line.strip_prefix("subgraph") {
                if current_subgraph.is_some() {
                    return Err(err("nested subgraphs are not supported"));
                }
                let title = rest.trim().trim_matches('"').to_owned();
                current_subgraph = Some(Subgraph {
                    title,
                    node_ids: Vec::new(),
                });
                continue;
            }
            if line == "end" {
                match current_subgraph.take() {
                    Some(sub) => diagram.subgraphs.push(sub),
                    None => return Err(err("`end` without an open subgraph")),
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("classDef") {
                let mut parts = rest.trim().splitn(2, char::is_whitespace);
                let name = parts.next().unwrap_or_default();
                if name.is_empty() {
                    return Err(err("classDef without a name"));
                }
                let style = parts.next().unwrap_or_default().trim().to_owned();
                diagram.class_defs.insert(name.to_owned(), style);
                continue;
            }
            if let Some(rest) = line.strip_prefix("class ") {
                let mut parts = rest.trim().rsplitn(2, char::is_whitespace);
                let class_name = parts.next().unwrap_or_default().to_owned();
                let ids = parts.next().unwrap_or_default();
                for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    if let Some(node) = diagram.nodes.get_mut(id) {
                        if !node.classes.contains(&class_name) {
                            node.classes.push(class_name.clone());
                        }
                    }
                }
                continue;
            }

            if let Some((lhs, label, rhs)) = split_edge(line) {
                let from = diagram.add_node_token(lhs, current_subgraph.as_mut(), line_no)?;
                let to = diagram.add_node_token(rhs, current_subgraph.as_mut(), line_no)?;
                diagram.edges.push(Edge { from, to, label });
                continue;
            }

            // Plain node declaration.
            diagram.add_node_token(line, current_subgraph.as_mut(), line_no)?;
        }

        if current_subgraph.is_some() {
            return Err(ParseError {
                line_no: text.lines().count(),
                line: "<end of input>".to_owned(),
                reason: "subgraph was never closed with `end`".to_owned(),
            });
        }
        if !saw_header {
            return Err(ParseError {
                line_no: 0,
                line: String::new(),
                reason: "empty diagram".to_owned(),
            });
        }
        Ok(diagram)
    }

    fn add_node_token(
        &mut self,
        token: &str,
        subgraph: Option<&mut Subgraph>,
        line_no: usize,
    ) -> Result<String, ParseError> {
        let (id, label, class) = parse_node_token(token).ok_or(ParseError {
            line_no,
            line: token.to_owned(),
            reason: "unparseable node reference".to_owned(),
        })?;

        let entry = self.nodes.entry(id.clone()).or_insert_with(|| Node {
            label: id.clone(),
            classes: Vec::new(),
        });
        if let Some(label) = label {
            entry.label = label;
        }
        if let Some(class) = class {
            if !entry.classes.contains(&class) {
                entry.classes.push(class);
            }
        }
        if let Some(sub) = subgraph {
            if !sub.node_ids.contains(&id) {
                sub.node_ids.push(id.clone());
            }
        }
        Ok(id)
    }

    /// Post-process a parsed diagram in place.
    ///
    /// Declares missing edge endpoints (label = id), collapses duplicate
    /// edges, and installs the style palette for any class used without a
    /// definition.
    pub fn normalize(&mut self) {
        // Every edge endpoint must be a declared node.
        let endpoint_ids: Vec<String> = self
            .edges
            .iter()
            .flat_map(|e| [e.from.clone(), e.to.clone()])
            .collect();
        for id in endpoint_ids {
            self.nodes.entry(id.clone()).or_insert_with(|| Node {
                label: id,
                classes: Vec::new(),
            });
        }

        // Collapse duplicate edges, keeping first occurrence order.
        let mut seen = BTreeSet::new();
        self.edges.retain(|e| seen.insert(e.clone()));

        // Install palette definitions for used-but-undefined classes and the
        // standard four classes.
        for (name, style) in PALETTE {
            self.class_defs
                .entry((*name).to_owned())
                .or_insert_with(|| (*style).to_owned());
        }
        let used: BTreeSet<String> = self
            .nodes
            .values()
            .flat_map(|n| n.classes.iter().cloned())
            .collect();
        for class in used {
            self.class_defs
                .entry(class)
                .or_insert_with(|| PALETTE[0].1.to_owned());
        }
    }

    /// Ids referenced by edges but not declared. Empty after [`normalize`].
    ///
    /// [`normalize`]: Self::normalize
    pub fn undeclared_endpoints(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for edge in &self.edges {
            for id in [&edge.from, &edge.to] {
                if !self.nodes.contains_key(id) && !missing.contains(id) {
                    missing.push(id.clone());
                }
            }
        }
        missing
    }

    /// Render canonical flowchart text.
    pub fn to_text(&self) -> String {
        let mut out = format!("flowchart {}\n", self.direction);
        let mut grouped: BTreeSet<&str> = BTreeSet::new();

        for sub in &self.subgraphs {
            out.push_str(&format!("    subgraph \"{}\"\n", sub.title));
            for id in &sub.node_ids {
                if let Some(node) = self.nodes.get(id) {
                    out.push_str(&format!("        {}\n", node_decl(id, node)));
                    grouped.insert(id.as_str());
                }
            }
            out.push_str("    end\n");
        }

        for (id, node) in &self.nodes {
            if !grouped.contains(id.as_str()) {
                out.push_str(&format!("    {}\n", node_decl(id, node)));
            }
        }

        for edge in &self.edges {
            match &edge.label {
                Some(label) => out.push_str(&format!(
                    "    {} -->|\"{}\"| {}\n",
                    edge.from, label, edge.to
                )),
                None => out.push_str(&format!("    {} --> {}\n", edge.from, edge.to)),
            }
        }

        for (name, style) in &self.class_defs {
            out.push_str(&format!("    classDef {name} {style}\n"));
        }
        out
    }
}

fn node_decl(id: &str, node: &Node) -> String {
    let mut decl = format!("{id}[\"{}\"]", node.label);
    if let Some(class) = node.classes.first() {
        decl.push_str(&format!(":::{class}"));
    }
    decl
}

/// Split an edge line into `(lhs, label, rhs)`.
///
/// Accepts `-->`, `---`, `-.->` and `==>` arrows, with an optional
/// `|"label"|` after the arrow.
fn split_edge(line: &str) -> Option<(&str, Option<String>, &str)> {
    for arrow in ["-.->", "==>", "-->", "---"] {
        if let Some(pos) = line.find(arrow) {
            let lhs = line[..pos].trim();
            let mut rhs = line[pos + arrow.len()..].trim();
            let mut label = None;
            if let Some(rest) = rhs.strip_prefix('|') {
                let end = rest.find('|')?;
                label = Some(rest[..end].trim().trim_matches('"').to_owned());
                rhs = rest[end + 1..].trim();
            }
            if lhs.is_empty() || rhs.is_empty() {
                return None;
            }
            return Some((lhs, label, rhs));
        }
    }
    None
}

/// Parse a node token into `(id, label, class)`.
///
/// Accepts `id`, `id["Label"]`, `id("Label")`, `id(("Label"))`,
/// `id[("Label")]`, `id{"Label"}`, each optionally followed by `:::class`.
fn parse_node_token(token: &str) -> Option<(String, Option<String>, Option<String>)> {
    let token = token.trim();
    let (token, class) = match token.split_once(":::") {
        Some((head, class)) => (head.trim(), Some(class.trim().to_owned())),
        None => (token, None),
    };

    let id_end = token
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(token.len());
    if id_end == 0 {
        return None;
    }
    let id = token[..id_end].to_owned();
    let rest = token[id_end..].trim();
    if rest.is_empty() {
        return Some((id, None, class));
    }

    let openers: &[(&str, &str)] = &[
        ("[(", ")]"),
        ("((", "))"),
        ("([", "])"),
        ("[", "]"),
        ("(", ")"),
        ("{", "}"),
    ];
    for (open, close) in openers {
        if let Some(inner) = rest.strip_prefix(open) {
            let inner = inner.strip_suffix(close)?;
            let label = inner.trim().trim_matches('"').to_owned();
            return Some((id, Some(label), class));
        }
    }
    None
}
