//! ORDER BY sorting of buffered records

use std::cmp::Ordering;

use crate::metadata::MetadataDb;
use crate::query_spec::{SortOrder, SortSpec};
use vernier_context::EntryList;
use vernier_transit::Value;

pub struct Sorter {
    keys: Vec<SortSpec>,
}

impl Sorter {
    pub fn new(keys: Vec<SortSpec>) -> Self {
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Stable sort; records missing a sort attribute order first.
    pub fn sort(&self, db: &MetadataDb, records: &mut [EntryList]) {
        if self.keys.is_empty() {
            return;
        }
        let attrs: Vec<_> = self
            .keys
            .iter()
            .map(|k| db.get_attribute(&k.attribute))
            .collect();
        records.sort_by(|a, b| {
            for (key, attr) in self.keys.iter().zip(&attrs) {
                let Some(attr) = attr else {
                    continue;
                };
                let va = a
                    .iter()
                    .find_map(|e| e.value_of(db.tree(), attr.id()))
                    .unwrap_or(Value::Empty);
                let vb = b
                    .iter()
                    .find_map(|e| e.value_of(db.tree(), attr.id()))
                    .unwrap_or(Value::Empty);
                let ord = match key.order {
                    SortOrder::Ascending => va.cmp(&vb),
                    SortOrder::Descending => vb.cmp(&va),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::{Entry, Properties};
    use vernier_transit::AttrType;

    #[test]
    fn sorts_by_multiple_keys() {
        let db = MetadataDb::new();
        let a = db
            .tree()
            .create_attribute(
                "a",
                AttrType::Int,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let b = db
            .tree()
            .create_attribute(
                "b",
                AttrType::Int,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let rec = |x: i64, y: i64| {
            vec![
                Entry::immediate(a.id(), Value::Int(x)),
                Entry::immediate(b.id(), Value::Int(y)),
            ]
        };
        let mut records = vec![rec(2, 1), rec(1, 2), rec(1, 1), rec(2, 2)];
        let sorter = Sorter::new(vec![
            SortSpec {
                attribute: "a".into(),
                order: SortOrder::Ascending,
            },
            SortSpec {
                attribute: "b".into(),
                order: SortOrder::Descending,
            },
        ]);
        sorter.sort(&db, &mut records);
        let values: Vec<(Value, Value)> = records
            .iter()
            .map(|r| {
                (
                    r[0].value_of(db.tree(), a.id()).unwrap(),
                    r[1].value_of(db.tree(), b.id()).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            values,
            vec![
                (Value::Int(1), Value::Int(2)),
                (Value::Int(1), Value::Int(1)),
                (Value::Int(2), Value::Int(2)),
                (Value::Int(2), Value::Int(1)),
            ]
        );
    }
}
