//! Graph visualization: builds and formats note neighbourhood graphs.
//!
//! Supports DOT, Mermaid, and JSON output formats.
//! Uses BFS traversal from a center note over both link directions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use zk_core::error::{Result, ZkError};
use zk_core::link::LinkType;
use zk_index::IndexConn;

/// A note in the graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub note_type: String,
    pub tags: Vec<String>,
}

/// A typed edge in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub link_type: LinkType,
}

/// A complete neighbourhood graph with nodes and edges.
#[derive(Debug, Clone, Serialize)]
pub struct NoteGraph {
    pub center: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl NoteGraph {
    /// Build a graph centered on a note, following links up to `depth`
    /// hops in either direction (BFS).
    ///
    /// Each stored edge pair is drawn once, using the primary type.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] if the center note is not indexed.
    pub fn neighborhood(conn: &IndexConn<'_>, center: &str, depth: u32) -> Result<Self> {
        if !conn.note_exists(center)? {
            return Err(ZkError::note_not_found(center));
        }

        let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
        let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();

        queue.push_back((center.to_string(), 0));
        visited.insert(center.to_string());

        while let Some((current, current_depth)) = queue.pop_front() {
            if let Some(note) = conn.get_note(&current)? {
                nodes.insert(
                    current.clone(),
                    GraphNode {
                        id: note.id,
                        title: note.title,
                        note_type: note.note_type.to_string(),
                        tags: note.tags.into_iter().collect(),
                    },
                );
            }

            if current_depth >= depth {
                continue;
            }

            // Every edge is stored in both directions, so outbound rows
            // reach every neighbour.
            for link in conn.links_from(&current)? {
                edges.insert(canonical(&link.source_id, &link.target_id, link.link_type));
                if visited.insert(link.target_id.clone()) {
                    queue.push_back((link.target_id, current_depth + 1));
                }
            }
        }

        Ok(Self {
            center: center.to_string(),
            nodes: nodes.into_values().collect(),
            edges: edges.into_iter().collect(),
        })
    }

    /// Format as DOT (Graphviz) output.
    #[must_use]
    pub fn format_dot(&self) -> String {
        let mut out = String::from("digraph zk {\n  rankdir=LR;\n  node [shape=box];\n\n");

        for node in &self.nodes {
            let label = node.title.replace('"', "\\\"");
            let style = if node.id == self.center {
                " style=bold"
            } else {
                ""
            };
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\\n({})\"{}];\n",
                node.id, label, node.note_type, style
            ));
        }

        out.push('\n');

        for edge in &self.edges {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.source, edge.target, edge.link_type
            ));
        }

        out.push_str("}\n");
        out
    }

    /// Format as a Mermaid diagram.
    #[must_use]
    pub fn format_mermaid(&self) -> String {
        let mut out = String::from("graph LR\n");

        for node in &self.nodes {
            let label = node.title.replace('"', "'");
            out.push_str(&format!("  {}[\"{}\"]\n", mermaid_id(&node.id), label));
        }

        out.push('\n');

        for edge in &self.edges {
            out.push_str(&format!(
                "  {} -->|{}| {}\n",
                mermaid_id(&edge.source),
                edge.link_type,
                mermaid_id(&edge.target)
            ));
        }

        out
    }

    /// Format as pretty-printed JSON.
    #[must_use]
    pub fn format_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Orient a stored edge by its primary type: `b -[extended_by]-> a` becomes
/// `a -[extends]-> b`; symmetric types point from the smaller id.
fn canonical(source: &str, target: &str, link_type: LinkType) -> GraphEdge {
    let inverse = link_type.inverse();
    let flip = if link_type.is_symmetric() {
        source > target
    } else {
        inverse < link_type
    };
    if flip {
        GraphEdge {
            source: target.to_string(),
            target: source.to_string(),
            link_type: inverse,
        }
    } else {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            link_type,
        }
    }
}

fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
