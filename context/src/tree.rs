//! Lock-free append-only tree of `(attribute, value)` nodes
//!
//! Nodes live in a chunked arena addressed by `NodeId` indices; child
//! lists are singly linked through atomic ids with CAS append, so
//! lookups and inserts never take a lock. Nodes are immutable once
//! published and the tree never shrinks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{OnceLock, RwLock};

use crate::attributes::{Attribute, Properties};
use crate::errors::{Error, Result};
use vernier_transit::{AttrType, TransitError, Value};

const RAW_INVALID: u32 = u32::MAX;
const RAW_ROOT: u32 = u32::MAX - 1;

const CHUNK_SIZE: usize = 4096;
const MAX_CHUNKS: usize = 16384;

/// Dense index of a node in the context tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(RAW_INVALID);
    /// The virtual root; never materialized in streams.
    pub const ROOT: NodeId = NodeId(RAW_ROOT);

    /// Meta attribute holding attribute names.
    pub const ATTR_NAME: NodeId = NodeId(8);
    /// Meta attribute holding attribute types.
    pub const ATTR_TYPE: NodeId = NodeId(9);
    /// Meta attribute holding attribute property words.
    pub const ATTR_PROP: NodeId = NodeId(10);

    /// First id available for user data; lower ids are the bootstrap
    /// nodes and are never written to streams.
    pub const FIRST_USER_ID: u64 = 11;

    pub fn from_u64(v: u64) -> Option<NodeId> {
        if v < u64::from(RAW_ROOT) {
            Some(NodeId(v as u32))
        } else {
            None
        }
    }

    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }

    pub fn is_valid(self) -> bool {
        self.0 < RAW_ROOT
    }
}

/// The tree unit. Immutable after insertion; owns its value payload.
#[derive(Debug)]
pub struct Node {
    attribute: NodeId,
    value: Value,
    parent: NodeId,
    first_child: AtomicU32,
    next_sibling: AtomicU32,
}

impl Node {
    fn new(attribute: NodeId, value: Value, parent: NodeId) -> Self {
        Self {
            attribute,
            value,
            parent,
            first_child: AtomicU32::new(RAW_INVALID),
            next_sibling: AtomicU32::new(RAW_INVALID),
        }
    }

    pub fn attribute(&self) -> NodeId {
        self.attribute
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn first_child(&self) -> NodeId {
        NodeId(self.first_child.load(Ordering::Acquire))
    }

    pub fn next_sibling(&self) -> NodeId {
        NodeId(self.next_sibling.load(Ordering::Acquire))
    }

    fn matches(&self, attribute: NodeId, value: &Value) -> bool {
        self.attribute == attribute && self.value == *value
    }
}

/// Chunked node storage. Chunks are allocated on demand and never
/// freed; published slots stay valid for the lifetime of the tree.
struct Arena {
    chunks: Vec<OnceLock<Box<[OnceLock<Node>]>>>,
    next: AtomicU32,
}

impl Arena {
    fn new() -> Self {
        let mut chunks = Vec::with_capacity(MAX_CHUNKS);
        chunks.resize_with(MAX_CHUNKS, OnceLock::new);
        Self {
            chunks,
            next: AtomicU32::new(0),
        }
    }

    fn alloc(&self, node: Node) -> Result<NodeId> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id as usize >= CHUNK_SIZE * MAX_CHUNKS || id >= RAW_ROOT {
            return Err(Error::OutOfMemory);
        }
        let chunk = self.chunks[id as usize / CHUNK_SIZE].get_or_init(|| {
            std::iter::repeat_with(OnceLock::new)
                .take(CHUNK_SIZE)
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        // the id is freshly assigned, so the slot is ours alone
        chunk[id as usize % CHUNK_SIZE]
            .set(node)
            .expect("fresh arena slot");
        Ok(NodeId(id))
    }

    fn get(&self, id: NodeId) -> Option<&Node> {
        if !id.is_valid() {
            return None;
        }
        let idx = id.0 as usize;
        self.chunks
            .get(idx / CHUNK_SIZE)?
            .get()?
            .get(idx % CHUNK_SIZE)?
            .get()
    }

    fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed) as usize
    }
}

/// The process-wide metadata store: node arena plus the attribute
/// name registry.
pub struct ContextTree {
    arena: Arena,
    root: Node,
    names: RwLock<HashMap<String, Attribute>>,
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTree {
    pub fn new() -> Self {
        let tree = Self {
            arena: Arena::new(),
            root: Node::new(NodeId::INVALID, Value::Empty, NodeId::INVALID),
            names: RwLock::new(HashMap::new()),
        };

        // Bootstrap nodes 0..=10. Ids and layout are part of the
        // stream format: 0..=7 are the type nodes, 8..=10 the meta
        // attributes, with each meta attribute parented under its own
        // type node.
        for tag in 1..=8u8 {
            let t = AttrType::from_tag(tag).expect("bootstrap type tag");
            tree.append_node(NodeId::ATTR_TYPE, Value::Type(t), NodeId::ROOT)
                .expect("bootstrap node");
        }
        for (name, type_node) in [
            ("cali.attribute.name", tree.type_node(AttrType::String)),
            ("cali.attribute.type", tree.type_node(AttrType::Type)),
            ("cali.attribute.prop", tree.type_node(AttrType::Int)),
        ] {
            tree.append_node(NodeId::ATTR_NAME, Value::Str(name.into()), type_node)
                .expect("bootstrap node");
        }

        {
            let mut names = tree.names.write().unwrap();
            names.insert(
                "cali.attribute.name".into(),
                Attribute::new(NodeId::ATTR_NAME, AttrType::String, Properties::DEFAULT),
            );
            names.insert(
                "cali.attribute.type".into(),
                Attribute::new(NodeId::ATTR_TYPE, AttrType::Type, Properties::DEFAULT),
            );
            names.insert(
                "cali.attribute.prop".into(),
                Attribute::new(NodeId::ATTR_PROP, AttrType::Int, Properties::DEFAULT),
            );
        }

        tree
    }

    fn type_node(&self, t: AttrType) -> NodeId {
        // type nodes occupy ids 0..=7 in tag order
        NodeId(t as u32 - 1)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if id == NodeId::ROOT {
            Some(&self.root)
        } else {
            self.arena.get(id)
        }
    }

    /// Number of node slots allocated so far.
    pub fn num_nodes(&self) -> usize {
        self.arena.len()
    }

    /// Allocate a node and link it into its parent's child list.
    fn append_node(&self, attribute: NodeId, value: Value, parent: NodeId) -> Result<NodeId> {
        let parent_node = self
            .node(parent)
            .ok_or_else(|| Error::NotFound(format!("node {}", parent.as_u64())))?;
        let id = self.arena.alloc(Node::new(attribute, value, parent))?;
        let node = self.arena.get(id).expect("node just allocated");
        let mut head = parent_node.first_child.load(Ordering::Acquire);
        loop {
            node.next_sibling.store(head, Ordering::Relaxed);
            match parent_node.first_child.compare_exchange_weak(
                head,
                id.0,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(id),
                Err(h) => head = h,
            }
        }
    }

    fn find_child(&self, parent_node: &Node, attribute: NodeId, value: &Value) -> Option<NodeId> {
        let mut cur = parent_node.first_child.load(Ordering::Acquire);
        while cur != RAW_INVALID {
            let n = self.arena.get(NodeId(cur))?;
            if n.matches(attribute, value) {
                return Some(NodeId(cur));
            }
            cur = n.next_sibling.load(Ordering::Acquire);
        }
        None
    }

    /// Returns the unique child of `parent` with the given
    /// `(attribute, value)` pair, appending a new node if necessary.
    ///
    /// Lock-free: a losing racer rescans the sibling list and returns
    /// the winner's node.
    pub fn get_or_create_child(
        &self,
        parent: NodeId,
        attribute: NodeId,
        value: &Value,
    ) -> Result<NodeId> {
        let parent_node = self
            .node(parent)
            .ok_or_else(|| Error::NotFound(format!("node {}", parent.as_u64())))?;
        if let Some(id) = self.find_child(parent_node, attribute, value) {
            return Ok(id);
        }
        let id = self
            .arena
            .alloc(Node::new(attribute, value.clone(), parent))?;
        let node = self.arena.get(id).expect("node just allocated");
        let mut head = parent_node.first_child.load(Ordering::Acquire);
        loop {
            // inserts only prepend, so a full rescan from the current
            // head sees every competing insert
            let mut cur = head;
            while cur != RAW_INVALID {
                let n = self
                    .arena
                    .get(NodeId(cur))
                    .ok_or_else(|| Error::NotFound(format!("node {cur}")))?;
                if n.matches(attribute, value) {
                    return Ok(NodeId(cur));
                }
                cur = n.next_sibling.load(Ordering::Acquire);
            }
            node.next_sibling.store(head, Ordering::Relaxed);
            match parent_node.first_child.compare_exchange(
                head,
                id.0,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(id),
                Err(h) => head = h,
            }
        }
    }

    /// Chain a sequence of `(attribute, value)` pairs under `parent`,
    /// returning the deepest node.
    pub fn make_path(&self, parent: NodeId, path: &[(NodeId, Value)]) -> Result<NodeId> {
        let mut cur = parent;
        for (attribute, value) in path {
            cur = self.get_or_create_child(cur, *attribute, value)?;
        }
        Ok(cur)
    }

    pub fn find_attribute(&self, name: &str) -> Option<Attribute> {
        self.names.read().unwrap().get(name).copied()
    }

    /// Register an attribute, creating its metadata node chain.
    ///
    /// The first registration of a name wins: re-registering with the
    /// same type returns the existing attribute, a mismatched type
    /// reports `Duplicate` (the existing attribute stays valid).
    pub fn create_attribute(
        &self,
        name: &str,
        t: AttrType,
        properties: Properties,
        meta: &[(Attribute, Value)],
    ) -> Result<Attribute> {
        if t == AttrType::Inv {
            return Err(Error::Value(TransitError::InvalidType(t)));
        }
        if let Some(existing) = self.find_attribute(name) {
            return Self::check_existing(name, existing, t);
        }

        let mut parent = self.type_node(t);
        for (meta_attr, meta_value) in meta {
            parent = self.get_or_create_child(parent, meta_attr.id(), meta_value)?;
        }
        if properties != Properties::DEFAULT {
            parent = self.get_or_create_child(
                parent,
                NodeId::ATTR_PROP,
                &Value::Int(i64::from(properties.0)),
            )?;
        }
        let leaf =
            self.get_or_create_child(parent, NodeId::ATTR_NAME, &Value::Str(name.into()))?;
        let attr = Attribute::new(leaf, t, properties);

        let mut names = self.names.write().unwrap();
        let registered = *names.entry(name.to_string()).or_insert(attr);
        drop(names);
        Self::check_existing(name, registered, t)
    }

    fn check_existing(name: &str, existing: Attribute, t: AttrType) -> Result<Attribute> {
        if existing.attr_type() == t {
            Ok(existing)
        } else {
            Err(Error::Duplicate {
                name: name.to_string(),
                existing_type: existing.attr_type(),
                new_type: t,
            })
        }
    }

    /// Register an attribute whose metadata chain already exists in
    /// the tree (a merged foreign attribute definition). The first
    /// registration of a name wins; a later definition with another
    /// type reports `Duplicate`.
    pub fn adopt_attribute(&self, leaf: NodeId) -> Result<Attribute> {
        let attr = self
            .attribute_by_id(leaf)
            .ok_or_else(|| Error::NotFound(format!("attribute node {}", leaf.as_u64())))?;
        let name = self
            .attribute_name(leaf)
            .ok_or_else(|| Error::NotFound(format!("attribute node {}", leaf.as_u64())))?
            .to_string();
        let mut names = self.names.write().unwrap();
        let registered = *names.entry(name.clone()).or_insert(attr);
        drop(names);
        Self::check_existing(&name, registered, attr.attr_type())
    }

    /// Rebuild an `Attribute` from its name-node id by walking the
    /// metadata chain. Returns `None` if the node is not an attribute.
    pub fn attribute_by_id(&self, id: NodeId) -> Option<Attribute> {
        let node = self.node(id)?;
        if node.attribute() != NodeId::ATTR_NAME {
            return None;
        }
        let mut t = None;
        let mut properties = Properties::DEFAULT;
        let mut have_prop = false;
        let mut cur = node.parent();
        while cur.is_valid() {
            let n = self.node(cur)?;
            if n.attribute() == NodeId::ATTR_PROP && !have_prop {
                properties = Properties(n.value().to_int().ok()? as u32);
                have_prop = true;
            }
            if n.attribute() == NodeId::ATTR_TYPE && t.is_none() {
                t = n.value().to_attr_type().ok();
            }
            cur = n.parent();
        }
        Some(Attribute::new(id, t?, properties))
    }

    /// Name of the attribute with the given id.
    pub fn attribute_name(&self, id: NodeId) -> Option<&str> {
        let node = self.node(id)?;
        if node.attribute() != NodeId::ATTR_NAME {
            return None;
        }
        node.value().as_str()
    }

    /// Value of a meta attribute on the metadata chain of `attr`.
    pub fn attribute_meta(&self, attr: NodeId, meta_attr: NodeId) -> Option<Value> {
        let mut cur = self.node(attr)?.parent();
        while cur.is_valid() {
            let n = self.node(cur)?;
            if n.attribute() == meta_attr {
                return Some(n.value().clone());
            }
            cur = n.parent();
        }
        None
    }

    /// All registered attributes, in registration-independent order.
    pub fn attributes(&self) -> Vec<Attribute> {
        self.names.read().unwrap().values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn bootstrap_layout() {
        let tree = ContextTree::new();
        assert_eq!(tree.num_nodes(), 11);
        let name_node = tree.node(NodeId::ATTR_NAME).unwrap();
        assert_eq!(name_node.value().as_str(), Some("cali.attribute.name"));
        assert_eq!(name_node.parent(), tree.type_node(AttrType::String));
        let type_node = tree.node(NodeId::ATTR_TYPE).unwrap();
        assert_eq!(type_node.parent(), tree.type_node(AttrType::Type));
        assert_eq!(
            tree.node(NodeId::from_u64(0).unwrap()).unwrap().value(),
            &Value::Type(AttrType::Usr)
        );
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let tree = ContextTree::new();
        let attr = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let a = tree
            .get_or_create_child(NodeId::ROOT, attr.id(), &Value::Str("init".into()))
            .unwrap();
        let b = tree
            .get_or_create_child(NodeId::ROOT, attr.id(), &Value::Str("init".into()))
            .unwrap();
        assert_eq!(a, b);
        let c = tree
            .get_or_create_child(NodeId::ROOT, attr.id(), &Value::Str("main".into()))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn parent_id_is_always_smaller() {
        let tree = ContextTree::new();
        let attr = tree
            .create_attribute("level", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let mut parent = NodeId::ROOT;
        for i in 0..20 {
            let child = tree
                .get_or_create_child(parent, attr.id(), &Value::Int(i))
                .unwrap();
            if parent.is_valid() {
                assert!(parent < child);
            }
            parent = child;
        }
    }

    #[test]
    fn attribute_roundtrip_through_tree() {
        let tree = ContextTree::new();
        let props = Properties::DEFAULT
            .with(Properties::NESTED)
            .with_scope(crate::attributes::Scope::Process);
        let attr = tree
            .create_attribute("function", AttrType::String, props, &[])
            .unwrap();
        let resolved = tree.attribute_by_id(attr.id()).unwrap();
        assert_eq!(resolved, attr);
        assert_eq!(tree.attribute_name(attr.id()), Some("function"));
        assert!(resolved.is_nested());
    }

    #[test]
    fn duplicate_type_conflict() {
        let tree = ContextTree::new();
        let first = tree
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let again = tree
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        assert_eq!(first, again);
        match tree.create_attribute("x", AttrType::Double, Properties::DEFAULT, &[]) {
            Err(Error::Duplicate {
                existing_type,
                new_type,
                ..
            }) => {
                assert_eq!(existing_type, AttrType::Int);
                assert_eq!(new_type, AttrType::Double);
            }
            other => panic!("expected Duplicate, got {other:?}"),
        }
        // the first registration stays authoritative
        assert_eq!(tree.find_attribute("x").unwrap(), first);
    }

    #[test]
    fn concurrent_get_or_create_yields_unique_children() {
        let tree = Arc::new(ContextTree::new());
        let attr = tree
            .create_attribute("worker", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let mut handles = vec![];
        for _ in 0..8 {
            let tree = tree.clone();
            handles.push(std::thread::spawn(move || {
                let mut seen = vec![];
                for v in 0..64i64 {
                    seen.push(
                        tree.get_or_create_child(NodeId::ROOT, attr.id(), &Value::Int(v))
                            .unwrap(),
                    );
                }
                seen
            }));
        }
        let results: Vec<Vec<NodeId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // every thread resolved each value to the same node
        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
        // and the child list holds no duplicate (attribute, value) pair
        let root = tree.node(NodeId::ROOT).unwrap();
        let mut pairs = std::collections::HashSet::new();
        let mut cur = root.first_child();
        while cur.is_valid() {
            let n = tree.node(cur).unwrap();
            assert!(pairs.insert((n.attribute(), n.value().clone())));
            cur = n.next_sibling();
        }
    }
}
