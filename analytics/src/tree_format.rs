//! Tree formatter: re-materialises the hierarchy of nested regions

use std::collections::HashSet;
use std::io::Write;

use crate::format::{output_columns, record_value_string, OutputColumn};
use crate::metadata::MetadataDb;
use crate::query_spec::QuerySpec;
use vernier_context::{EntryList, NodeId, Result};

#[derive(Default)]
struct TreeNode {
    children: Vec<(String, TreeNode)>,
    record: Option<usize>,
}

impl TreeNode {
    fn insert(&mut self, labels: &[String], record: usize) {
        match labels.split_first() {
            None => self.record = Some(record),
            Some((head, rest)) => {
                let child = match self.children.iter_mut().position(|(l, _)| l == head) {
                    Some(i) => &mut self.children[i].1,
                    None => {
                        self.children.push((head.clone(), TreeNode::default()));
                        &mut self.children.last_mut().unwrap().1
                    }
                };
                child.insert(rest, record);
            }
        }
    }
}

pub struct TreeFormatter {
    spec: QuerySpec,
    path_attr_names: Option<Vec<String>>,
    records: Vec<EntryList>,
}

impl TreeFormatter {
    pub fn new(spec: &QuerySpec, args: &[String]) -> Self {
        let path_attr_names = args.first().map(|arg| {
            arg.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });
        Self {
            spec: spec.clone(),
            path_attr_names,
            records: vec![],
        }
    }

    pub fn process_record(&mut self, rec: EntryList) {
        self.records.push(rec);
    }

    /// Is `attr_id` part of the displayed hierarchy?
    fn is_path_attr(&self, db: &MetadataDb, attr_id: NodeId) -> bool {
        match &self.path_attr_names {
            Some(names) => db
                .attribute_name(attr_id)
                .map(|n| names.iter().any(|p| p == n))
                .unwrap_or(false),
            None => db
                .tree()
                .attribute_by_id(attr_id)
                .map(|a| a.is_nested())
                .unwrap_or(false),
        }
    }

    fn path_labels(&self, db: &MetadataDb, rec: &EntryList) -> Vec<String> {
        let mut labels = vec![];
        for entry in rec {
            if entry.is_reference() {
                for (attr, value) in entry.path(db.tree()) {
                    if self.is_path_attr(db, attr) {
                        labels.push(value.to_string());
                    }
                }
            }
        }
        labels
    }

    pub fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        let mut root = TreeNode::default();
        for (idx, rec) in self.records.iter().enumerate() {
            let labels = self.path_labels(db, rec);
            root.insert(&labels, idx);
        }

        // data columns: everything selected except the path itself
        let path_names: HashSet<String> = self
            .records
            .iter()
            .flat_map(|rec| {
                rec.iter()
                    .filter(|e| e.is_reference())
                    .flat_map(|e| e.path(db.tree()))
                    .filter(|(attr, _)| self.is_path_attr(db, *attr))
                    .filter_map(|(attr, _)| db.attribute_name(attr).map(str::to_string))
            })
            .collect();
        let columns: Vec<OutputColumn> = output_columns(db, &self.spec, &self.records)
            .into_iter()
            .filter(|c| !path_names.contains(&c.name))
            .collect();

        // flatten depth-first
        let mut rows: Vec<(usize, String, Option<usize>)> = vec![];
        fn walk(node: &TreeNode, depth: usize, rows: &mut Vec<(usize, String, Option<usize>)>) {
            for (label, child) in &node.children {
                rows.push((depth, label.clone(), child.record));
                walk(child, depth + 1, rows);
            }
        }
        walk(&root, 0, &mut rows);

        let mut path_width = "Path".len();
        for (depth, label, _) in &rows {
            path_width = path_width.max(2 * depth + label.chars().count());
        }
        let mut widths: Vec<usize> = columns.iter().map(|c| c.title.chars().count()).collect();
        let mut cells: Vec<Vec<String>> = vec![];
        for (_, _, record) in &rows {
            let row: Vec<String> = columns
                .iter()
                .map(|c| match record {
                    Some(idx) => record_value_string(db, &self.records[*idx], &c.name),
                    None => String::new(),
                })
                .collect();
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
            cells.push(row);
        }

        write!(out, "{:<path_width$}", "Path")?;
        for (i, column) in columns.iter().enumerate() {
            write!(out, " {:>width$}", column.title, width = widths[i])?;
        }
        writeln!(out)?;

        for ((depth, label, _), row) in rows.iter().zip(&cells) {
            let indented = format!("{}{label}", "  ".repeat(*depth));
            write!(out, "{indented:<path_width$}")?;
            for (i, cell) in row.iter().enumerate() {
                write!(out, " {:>width$}", cell, width = widths[i])?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::{Entry, Properties};
    use vernier_transit::{AttrType, Value};

    #[test]
    fn nested_regions_print_indented() {
        let db = MetadataDb::new();
        let nested = Properties::DEFAULT.with(Properties::NESTED);
        let phase = db
            .tree()
            .create_attribute("phase", AttrType::String, nested, &[])
            .unwrap();
        let function = db
            .tree()
            .create_attribute("function", AttrType::String, nested, &[])
            .unwrap();
        let count = db
            .tree()
            .create_attribute(
                "count",
                AttrType::Uint,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();

        let outer = db
            .tree()
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str("init".into()))
            .unwrap();
        let inner = db
            .tree()
            .get_or_create_child(outer, function.id(), &Value::Str("setup".into()))
            .unwrap();

        let spec = crate::calql::parse_query("SELECT count").unwrap();
        let mut tree = TreeFormatter::new(&spec, &[]);
        tree.process_record(vec![
            Entry::reference(outer),
            Entry::immediate(count.id(), Value::Uint(2)),
        ]);
        tree.process_record(vec![
            Entry::reference(inner),
            Entry::immediate(count.id(), Value::Uint(1)),
        ]);

        let mut buf = vec![];
        tree.flush(&db, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("Path"));
        assert!(lines[0].ends_with("count"));
        assert!(lines[1].starts_with("init"));
        assert!(lines[1].ends_with("2"));
        assert!(lines[2].starts_with("  setup"));
        assert!(lines[2].ends_with("1"));
    }
}
