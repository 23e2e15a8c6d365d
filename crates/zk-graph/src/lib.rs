//! # zk-graph
//!
//! Structural queries over the note link graph.
//!
//! Everything here works on an [`zk_index::IndexConn`], so callers decide
//! whether a call runs inside a write transaction or a plain read:
//! - [`links`] keeps every edge paired with its inverse
//! - [`query`] answers connectivity, similarity, centrality and orphan questions
//! - [`export`] builds neighbourhood graphs and renders DOT, Mermaid or JSON

pub mod export;
pub mod links;
pub mod query;

pub use export::{GraphEdge, GraphNode, NoteGraph};
pub use links::{connect, disconnect, mirror};
pub use query::{
    find_central, find_orphaned, find_similar, linked_notes, list_by_date, CentralNote,
    Direction, LinkedNote, ScoredNote,
};
