//! Per-scope annotation state
//!
//! A blackboard holds the current entry for every attribute with at
//! least one open region in its scope: a reference into the context
//! tree, or a stack of immediate values for store-as-value attributes.
//! Nested attributes share one hierarchy slot so their regions build a
//! single tree path across attributes.

use std::collections::HashMap;

use crate::snapshot::SnapshotBuilder;
use vernier_context::{Attribute, ContextTree, Entry, Error, NodeId, Result};
use vernier_transit::Value;

#[derive(Debug)]
pub enum BlackboardEntry {
    Reference(NodeId),
    ImmediateStack(NodeId, Vec<Value>),
}

#[derive(Default)]
pub struct Blackboard {
    entries: HashMap<NodeId, BlackboardEntry>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: NodeId) -> Option<&BlackboardEntry> {
        self.entries.get(&key)
    }

    /// Emit one entry per open attribute into `builder`. Does not
    /// allocate.
    pub fn snapshot(&self, builder: &mut SnapshotBuilder) {
        for slot in self.entries.values() {
            match slot {
                BlackboardEntry::Reference(node) => {
                    builder.push(Entry::reference(*node));
                }
                BlackboardEntry::ImmediateStack(attr, stack) => {
                    if let Some(top) = stack.last() {
                        builder.push(Entry::immediate(*attr, top.clone()));
                    }
                }
            }
        }
    }
}

/// Nested attributes interleave in one shared hierarchy; everything
/// else keys by its own attribute id. The root sentinel can never
/// collide with an attribute id.
fn slot_key(attr: &Attribute) -> NodeId {
    if attr.is_nested() {
        NodeId::ROOT
    } else {
        attr.id()
    }
}

/// Base node a reference chain for `attr` grows from when the slot is
/// empty.
fn base_node(attr: &Attribute) -> NodeId {
    if attr.is_autocombineable() || attr.is_nested() {
        NodeId::ROOT
    } else {
        // no-merge attributes root their chain at the attribute node
        attr.id()
    }
}

fn check_type(attr: &Attribute, value: &Value) -> Result<()> {
    if attr.attr_type() == value.attr_type() {
        Ok(())
    } else {
        Err(Error::Value(vernier_transit::TransitError::InvalidType(
            value.attr_type(),
        )))
    }
}

/// `begin(A, v)`: open a region. Pushes an immediate for
/// store-as-value attributes, otherwise descends to the child
/// `(A, v)` of the current node.
pub fn begin_entry(
    tree: &ContextTree,
    bb: &mut Blackboard,
    attr: &Attribute,
    value: &Value,
) -> Result<()> {
    check_type(attr, value)?;
    if attr.store_as_value() {
        match bb
            .entries
            .entry(attr.id())
            .or_insert_with(|| BlackboardEntry::ImmediateStack(attr.id(), vec![]))
        {
            BlackboardEntry::ImmediateStack(_, stack) => stack.push(value.clone()),
            BlackboardEntry::Reference(_) => {
                return Err(Error::StackMismatch(format!(
                    "attribute {} changed storage kind",
                    attr.id().as_u64()
                )));
            }
        }
        return Ok(());
    }

    let key = slot_key(attr);
    let parent = match bb.entries.get(&key) {
        Some(BlackboardEntry::Reference(node)) => *node,
        Some(BlackboardEntry::ImmediateStack(..)) => {
            return Err(Error::StackMismatch(format!(
                "attribute {} changed storage kind",
                attr.id().as_u64()
            )));
        }
        None => base_node(attr),
    };
    let node = tree.get_or_create_child(parent, attr.id(), value)?;
    bb.entries.insert(key, BlackboardEntry::Reference(node));
    Ok(())
}

/// `set(A, v)`: replace the innermost value. Not defined for nested
/// attributes.
pub fn set_entry(
    tree: &ContextTree,
    bb: &mut Blackboard,
    attr: &Attribute,
    value: &Value,
) -> Result<()> {
    check_type(attr, value)?;
    if attr.is_nested() {
        return Err(Error::StackMismatch(format!(
            "set on nested attribute {}",
            attr.id().as_u64()
        )));
    }
    if attr.store_as_value() {
        match bb
            .entries
            .entry(attr.id())
            .or_insert_with(|| BlackboardEntry::ImmediateStack(attr.id(), vec![]))
        {
            BlackboardEntry::ImmediateStack(_, stack) => {
                stack.pop();
                stack.push(value.clone());
            }
            BlackboardEntry::Reference(_) => {
                return Err(Error::StackMismatch(format!(
                    "attribute {} changed storage kind",
                    attr.id().as_u64()
                )));
            }
        }
        return Ok(());
    }

    let parent = match bb.entries.get(&attr.id()) {
        Some(BlackboardEntry::Reference(node)) => tree
            .node(*node)
            .map(|n| n.parent())
            .unwrap_or(base_node(attr)),
        _ => base_node(attr),
    };
    let node = tree.get_or_create_child(parent, attr.id(), value)?;
    bb.entries.insert(attr.id(), BlackboardEntry::Reference(node));
    Ok(())
}

/// `end(A)`: close the innermost region of `A`. On a mismatch the
/// blackboard is left untouched.
pub fn end_entry(tree: &ContextTree, bb: &mut Blackboard, attr: &Attribute) -> Result<()> {
    if attr.store_as_value() {
        let Some(BlackboardEntry::ImmediateStack(_, stack)) = bb.entries.get_mut(&attr.id())
        else {
            return Err(Error::StackMismatch(format!(
                "end without begin for attribute {}",
                attr.id().as_u64()
            )));
        };
        stack.pop();
        if stack.is_empty() {
            bb.entries.remove(&attr.id());
        }
        return Ok(());
    }

    let key = slot_key(attr);
    let Some(BlackboardEntry::Reference(node)) = bb.entries.get(&key) else {
        return Err(Error::StackMismatch(format!(
            "end without begin for attribute {}",
            attr.id().as_u64()
        )));
    };
    let node = *node;
    let current = tree
        .node(node)
        .ok_or_else(|| Error::NotFound(format!("node {}", node.as_u64())))?;
    if current.attribute() != attr.id() {
        return Err(Error::StackMismatch(format!(
            "end for attribute {} inside an open region of attribute {}",
            attr.id().as_u64(),
            current.attribute().as_u64()
        )));
    }
    let parent = current.parent();
    let keep = parent.is_valid()
        && parent != base_node(attr)
        && tree
            .node(parent)
            .map(|p| attr.is_nested() || p.attribute() == attr.id())
            .unwrap_or(false);
    if keep {
        bb.entries.insert(key, BlackboardEntry::Reference(parent));
    } else {
        bb.entries.remove(&key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::Properties;
    use vernier_transit::AttrType;

    fn nested(tree: &ContextTree, name: &str) -> Attribute {
        tree.create_attribute(
            name,
            AttrType::String,
            Properties::DEFAULT.with(Properties::NESTED),
            &[],
        )
        .unwrap()
    }

    fn entries(bb: &Blackboard) -> Vec<Entry> {
        let mut storage: Vec<Entry> = vec![Entry::Empty; 16];
        let mut builder = SnapshotBuilder::new(&mut storage);
        bb.snapshot(&mut builder);
        builder.entries().to_vec()
    }

    #[test]
    fn reference_chain_follows_begin_end() {
        let tree = ContextTree::new();
        let x = tree
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let mut bb = Blackboard::new();

        begin_entry(&tree, &mut bb, &x, &Value::Int(1)).unwrap();
        begin_entry(&tree, &mut bb, &x, &Value::Int(2)).unwrap();
        let snap = entries(&bb);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].value_of(&tree, x.id()), Some(Value::Int(2)));
        assert_eq!(snap[0].count(&tree, x.id()), 2);

        end_entry(&tree, &mut bb, &x).unwrap();
        let snap = entries(&bb);
        assert_eq!(snap[0].value_of(&tree, x.id()), Some(Value::Int(1)));

        end_entry(&tree, &mut bb, &x).unwrap();
        assert!(bb.is_empty());
    }

    #[test]
    fn nested_attributes_share_one_path() {
        let tree = ContextTree::new();
        let phase = nested(&tree, "phase");
        let function = nested(&tree, "function");
        let mut bb = Blackboard::new();

        begin_entry(&tree, &mut bb, &phase, &Value::Str("init".into())).unwrap();
        begin_entry(&tree, &mut bb, &function, &Value::Str("setup".into())).unwrap();

        let snap = entries(&bb);
        assert_eq!(snap.len(), 1);
        assert_eq!(
            snap[0].value_of(&tree, phase.id()),
            Some(Value::Str("init".into()))
        );
        assert_eq!(
            snap[0].value_of(&tree, function.id()),
            Some(Value::Str("setup".into()))
        );

        // ending the outer region while the inner is open is a mismatch
        assert!(matches!(
            end_entry(&tree, &mut bb, &phase),
            Err(Error::StackMismatch(_))
        ));
        // the blackboard still points at the inner region
        assert_eq!(
            entries(&bb)[0].value_of(&tree, function.id()),
            Some(Value::Str("setup".into()))
        );

        end_entry(&tree, &mut bb, &function).unwrap();
        end_entry(&tree, &mut bb, &phase).unwrap();
        assert!(bb.is_empty());
    }

    #[test]
    fn store_as_value_stacks() {
        let tree = ContextTree::new();
        let iter = tree
            .create_attribute(
                "iteration",
                AttrType::Int,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let mut bb = Blackboard::new();

        begin_entry(&tree, &mut bb, &iter, &Value::Int(1)).unwrap();
        begin_entry(&tree, &mut bb, &iter, &Value::Int(2)).unwrap();
        set_entry(&tree, &mut bb, &iter, &Value::Int(3)).unwrap();

        let snap = entries(&bb);
        assert_eq!(snap, vec![Entry::immediate(iter.id(), Value::Int(3))]);

        end_entry(&tree, &mut bb, &iter).unwrap();
        assert_eq!(
            entries(&bb),
            vec![Entry::immediate(iter.id(), Value::Int(1))]
        );
        end_entry(&tree, &mut bb, &iter).unwrap();
        assert!(bb.is_empty());
    }

    #[test]
    fn set_moves_to_sibling() {
        let tree = ContextTree::new();
        let phase = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let mut bb = Blackboard::new();

        begin_entry(&tree, &mut bb, &phase, &Value::Str("a".into())).unwrap();
        begin_entry(&tree, &mut bb, &phase, &Value::Str("b".into())).unwrap();
        set_entry(&tree, &mut bb, &phase, &Value::Str("c".into())).unwrap();

        let snap = entries(&bb);
        assert_eq!(snap[0].count(&tree, phase.id()), 2);
        assert_eq!(
            snap[0].value_of(&tree, phase.id()),
            Some(Value::Str("c".into()))
        );
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let tree = ContextTree::new();
        let x = tree
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let mut bb = Blackboard::new();
        assert!(begin_entry(&tree, &mut bb, &x, &Value::Str("one".into())).is_err());
        assert!(bb.is_empty());
    }

    #[test]
    fn end_without_begin_is_a_mismatch() {
        let tree = ContextTree::new();
        let x = tree
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let mut bb = Blackboard::new();
        assert!(matches!(
            end_entry(&tree, &mut bb, &x),
            Err(Error::StackMismatch(_))
        ));
    }
}
