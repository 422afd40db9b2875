//! Snapshot entries: references into the context tree or immediates

use crate::tree::{ContextTree, NodeId};
use vernier_transit::Value;

/// A single element of a snapshot: empty, a reference to a context
/// tree node, or an explicit `(attribute, value)` pair.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Entry {
    #[default]
    Empty,
    Node(NodeId),
    Immediate(NodeId, Value),
}

impl Entry {
    pub fn reference(node: NodeId) -> Self {
        Entry::Node(node)
    }

    pub fn immediate(attribute: NodeId, value: Value) -> Self {
        Entry::Immediate(attribute, value)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Entry::Empty)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Entry::Node(_))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Entry::Immediate(..))
    }

    pub fn node(&self) -> Option<NodeId> {
        match self {
            Entry::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Top-level attribute of this entry.
    pub fn attribute(&self, tree: &ContextTree) -> NodeId {
        match self {
            Entry::Empty => NodeId::INVALID,
            Entry::Node(id) => tree
                .node(*id)
                .map(|n| n.attribute())
                .unwrap_or(NodeId::INVALID),
            Entry::Immediate(attr, _) => *attr,
        }
    }

    /// Top-level value of this entry.
    pub fn value(&self, tree: &ContextTree) -> Value {
        match self {
            Entry::Empty => Value::Empty,
            Entry::Node(id) => tree
                .node(*id)
                .map(|n| n.value().clone())
                .unwrap_or(Value::Empty),
            Entry::Immediate(_, value) => value.clone(),
        }
    }

    /// Value for `attribute` in this entry: the immediate's own value,
    /// or the deepest node with that attribute on the path to the
    /// root.
    pub fn value_of(&self, tree: &ContextTree, attribute: NodeId) -> Option<Value> {
        match self {
            Entry::Empty => None,
            Entry::Immediate(attr, value) => (*attr == attribute).then(|| value.clone()),
            Entry::Node(id) => {
                let mut cur = *id;
                while cur.is_valid() {
                    let n = tree.node(cur)?;
                    if n.attribute() == attribute {
                        return Some(n.value().clone());
                    }
                    cur = n.parent();
                }
                None
            }
        }
    }

    /// Number of occurrences of `attribute` on this entry's path.
    pub fn count(&self, tree: &ContextTree, attribute: NodeId) -> usize {
        match self {
            Entry::Empty => 0,
            Entry::Immediate(attr, _) => usize::from(*attr == attribute),
            Entry::Node(id) => {
                let mut count = 0;
                let mut cur = *id;
                while cur.is_valid() {
                    match tree.node(cur) {
                        Some(n) => {
                            if n.attribute() == attribute {
                                count += 1;
                            }
                            cur = n.parent();
                        }
                        None => break,
                    }
                }
                count
            }
        }
    }

    /// `(attribute, value)` pairs of this entry's path, root first.
    pub fn path(&self, tree: &ContextTree) -> Vec<(NodeId, Value)> {
        match self {
            Entry::Empty => vec![],
            Entry::Immediate(attr, value) => vec![(*attr, value.clone())],
            Entry::Node(id) => {
                let mut pairs = vec![];
                let mut cur = *id;
                while cur.is_valid() {
                    match tree.node(cur) {
                        Some(n) => {
                            pairs.push((n.attribute(), n.value().clone()));
                            cur = n.parent();
                        }
                        None => break,
                    }
                }
                pairs.reverse();
                pairs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Properties;
    use vernier_transit::AttrType;

    #[test]
    fn value_of_returns_deepest() {
        let tree = ContextTree::new();
        let attr = tree
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let n1 = tree
            .get_or_create_child(NodeId::ROOT, attr.id(), &Value::Int(1))
            .unwrap();
        let n2 = tree
            .get_or_create_child(n1, attr.id(), &Value::Int(2))
            .unwrap();
        let entry = Entry::reference(n2);
        assert_eq!(entry.value_of(&tree, attr.id()), Some(Value::Int(2)));
        assert_eq!(entry.count(&tree, attr.id()), 2);
        assert_eq!(entry.value(&tree), Value::Int(2));
    }

    #[test]
    fn immediate_matches_its_attribute_only() {
        let tree = ContextTree::new();
        let a = tree
            .create_attribute("a", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let b = tree
            .create_attribute("b", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let entry = Entry::immediate(a.id(), Value::Int(7));
        assert_eq!(entry.value_of(&tree, a.id()), Some(Value::Int(7)));
        assert_eq!(entry.value_of(&tree, b.id()), None);
        assert_eq!(entry.count(&tree, b.id()), 0);
    }

    #[test]
    fn path_is_root_first() {
        let tree = ContextTree::new();
        let attr = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let n1 = tree
            .get_or_create_child(NodeId::ROOT, attr.id(), &Value::Str("outer".into()))
            .unwrap();
        let n2 = tree
            .get_or_create_child(n1, attr.id(), &Value::Str("inner".into()))
            .unwrap();
        let path = Entry::reference(n2).path(&tree);
        assert_eq!(
            path,
            vec![
                (attr.id(), Value::Str("outer".into())),
                (attr.id(), Value::Str("inner".into())),
            ]
        );
    }
}
