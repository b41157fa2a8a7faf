//! Core graph data model: notes, typed edges, clusters, tags

mod edge;
mod node;

pub use edge::{Edge, Relation};
pub use node::{
    first_line_title, Cluster, NoteId, NoteNode, ProspectiveItem, TagRecord, TimeKind, TimeRef,
};
