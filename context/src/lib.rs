//! Process-wide metadata store for annotation data
//!
//! The context tree interns every hierarchical `(attribute, value)`
//! path an application publishes. Attributes themselves are nodes in
//! the same tree, so attribute metadata shares the storage, merge and
//! stream representation of regular data.

pub mod attributes;
pub mod entry;
pub mod errors;
pub mod record;
pub mod tree;

pub use attributes::{Attribute, Properties, Scope};
pub use entry::Entry;
pub use errors::{Error, Result};
pub use record::EntryList;
pub use tree::{ContextTree, Node, NodeId};
