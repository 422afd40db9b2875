//! Metadata database for stream processing
//!
//! Holds the reader-side context tree plus the globals of every
//! stream read into it. Foreign node ids are translated to local ids
//! through a per-stream id map; merging the same stream twice is
//! idempotent.

use std::collections::HashMap;

use vernier_context::{Attribute, ContextTree, Entry, EntryList, Error, NodeId, Result};
use vernier_transit::Value;

/// Maps foreign node ids of one stream to local ids.
pub type IdMap = HashMap<u64, NodeId>;

#[derive(Default)]
pub struct MetadataDb {
    tree: ContextTree,
    globals: Vec<EntryList>,
}

impl MetadataDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    pub fn get_attribute(&self, name: &str) -> Option<Attribute> {
        self.tree.find_attribute(name)
    }

    pub fn attribute_name(&self, attr: NodeId) -> Option<&str> {
        self.tree.attribute_name(attr)
    }

    /// One globals entry list per stream read into the database.
    pub fn globals(&self) -> &[EntryList] {
        &self.globals
    }

    pub fn add_globals(&mut self, entries: EntryList) {
        self.globals.push(entries);
    }

    /// Translate a foreign id through the stream's id map. Bootstrap
    /// ids are identical in every stream.
    pub fn translate(&self, idmap: &IdMap, foreign: u64) -> Result<NodeId> {
        if foreign < NodeId::FIRST_USER_ID {
            return NodeId::from_u64(foreign).ok_or(Error::DanglingReference(foreign));
        }
        idmap
            .get(&foreign)
            .copied()
            .ok_or(Error::DanglingReference(foreign))
    }

    /// Merge one foreign node: resolve its attribute and parent to
    /// local ids, then get-or-create the child. Attribute definitions
    /// are registered as they arrive.
    pub fn merge_node(
        &self,
        idmap: &mut IdMap,
        foreign_id: u64,
        foreign_attr: u64,
        data: &str,
        foreign_parent: Option<u64>,
    ) -> Result<NodeId> {
        let attr_node = self.translate(idmap, foreign_attr)?;
        let parent = match foreign_parent {
            Some(p) => self.translate(idmap, p)?,
            None => NodeId::ROOT,
        };
        let attr = self.tree.attribute_by_id(attr_node).ok_or_else(|| {
            Error::MalformedRecord(format!("node {foreign_id}: {foreign_attr} is not an attribute"))
        })?;
        let value = Value::from_string(attr.attr_type(), data)
            .map_err(|_| Error::MalformedRecord(format!("node {foreign_id}: bad data \"{data}\"")))?;

        let local = self.tree.get_or_create_child(parent, attr_node, &value)?;
        idmap.insert(foreign_id, local);

        if attr_node == NodeId::ATTR_NAME {
            match self.tree.adopt_attribute(local) {
                Ok(_) => {}
                Err(Error::Duplicate {
                    name,
                    existing_type,
                    new_type,
                }) => {
                    return Err(Error::TypeConflict {
                        name,
                        existing: existing_type,
                        incoming: new_type,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(local)
    }

    /// Translate a snapshot's reference and immediate ids into local
    /// entries.
    pub fn merge_snapshot(
        &self,
        idmap: &IdMap,
        refs: &[u64],
        immediates: &[(u64, String)],
    ) -> Result<EntryList> {
        let mut entries = EntryList::with_capacity(refs.len() + immediates.len());
        for foreign in refs {
            entries.push(Entry::reference(self.translate(idmap, *foreign)?));
        }
        for (foreign_attr, data) in immediates {
            let attr_node = self.translate(idmap, *foreign_attr)?;
            let attr = self.tree.attribute_by_id(attr_node).ok_or_else(|| {
                Error::MalformedRecord(format!("{foreign_attr} is not an attribute"))
            })?;
            let value = Value::from_string(attr.attr_type(), data)
                .map_err(|_| Error::MalformedRecord(format!("bad data \"{data}\"")))?;
            entries.push(Entry::immediate(attr_node, value));
        }
        Ok(entries)
    }
}
