//! WHERE-clause record filtering

use crate::metadata::MetadataDb;
use crate::query_spec::{CondOp, Condition, QuerySpec};
use vernier_context::{Entry, NodeId};
use vernier_transit::Value;

pub struct RecordSelector {
    filters: Vec<Condition>,
}

impl RecordSelector {
    pub fn from_spec(spec: &QuerySpec) -> Self {
        Self {
            filters: spec.filter.clone(),
        }
    }

    pub fn from_condition(cond: Condition) -> Self {
        Self {
            filters: vec![cond],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// A record passes iff every condition holds. An attribute
    /// occurrence anywhere on an entry's path counts.
    pub fn pass(&self, db: &MetadataDb, rec: &[Entry]) -> bool {
        self.filters.iter().all(|cond| Self::check(db, rec, cond))
    }

    fn check(db: &MetadataDb, rec: &[Entry], cond: &Condition) -> bool {
        let Some(attr) = db.get_attribute(&cond.attr_name) else {
            // an unknown attribute exists nowhere
            return matches!(cond.op, CondOp::NotExist | CondOp::NotEqual);
        };
        let attr_id = attr.id();

        match cond.op {
            CondOp::Exist => Self::any_match(db, rec, attr_id, |_| true),
            CondOp::NotExist => !Self::any_match(db, rec, attr_id, |_| true),
            op => {
                let Ok(value) = Value::from_string(attr.attr_type(), &cond.value) else {
                    return matches!(op, CondOp::NotEqual);
                };
                match op {
                    CondOp::Equal => Self::any_match(db, rec, attr_id, |v| *v == value),
                    CondOp::NotEqual => !Self::any_match(db, rec, attr_id, |v| *v == value),
                    CondOp::LessThan => Self::any_match(db, rec, attr_id, |v| *v < value),
                    CondOp::GreaterThan => Self::any_match(db, rec, attr_id, |v| *v > value),
                    CondOp::LessOrEqual => Self::any_match(db, rec, attr_id, |v| *v <= value),
                    CondOp::GreaterOrEqual => Self::any_match(db, rec, attr_id, |v| *v >= value),
                    CondOp::Exist | CondOp::NotExist => unreachable!(),
                }
            }
        }
    }

    fn any_match(
        db: &MetadataDb,
        rec: &[Entry],
        attr_id: NodeId,
        matches: impl Fn(&Value) -> bool,
    ) -> bool {
        let tree = db.tree();
        rec.iter().any(|entry| match entry {
            Entry::Empty => false,
            Entry::Immediate(attr, value) => *attr == attr_id && matches(value),
            Entry::Node(id) => {
                let mut cur = *id;
                while cur.is_valid() {
                    match tree.node(cur) {
                        Some(node) => {
                            if node.attribute() == attr_id && matches(node.value()) {
                                return true;
                            }
                            cur = node.parent();
                        }
                        None => break,
                    }
                }
                false
            }
        })
    }
}
