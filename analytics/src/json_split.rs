//! Split-JSON formatter: a machine-oriented
//! `{data, columns, column_metadata, nodes, globals}` object
//!
//! Nested regions collapse into one `path` column whose cells index
//! into the shared `nodes` array; all other columns carry their
//! values inline.

use std::collections::HashMap;
use std::io::Write;

use serde_json::{json, Map};

use crate::format::{output_columns, OutputColumn};
use crate::metadata::MetadataDb;
use crate::query_spec::QuerySpec;
use vernier_context::{EntryList, NodeId, Result};

pub struct JsonSplitFormatter {
    spec: QuerySpec,
    records: Vec<EntryList>,
}

impl JsonSplitFormatter {
    pub fn new(spec: &QuerySpec) -> Self {
        Self {
            spec: spec.clone(),
            records: vec![],
        }
    }

    pub fn process_record(&mut self, rec: EntryList) {
        self.records.push(rec);
    }

    pub fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        let tree = db.tree();
        let is_path_attr = |attr_id: NodeId| {
            tree.attribute_by_id(attr_id)
                .map(|a| a.is_nested())
                .unwrap_or(false)
        };

        // shared node array for the hierarchy column
        let mut nodes: Vec<serde_json::Value> = vec![];
        let mut node_index: HashMap<NodeId, usize> = HashMap::new();
        let mut row_nodes: Vec<Option<usize>> = vec![];
        let mut have_path = false;

        for rec in &self.records {
            let mut current: Option<usize> = None;
            for entry in rec {
                if !entry.is_reference() {
                    continue;
                }
                let mut chain = vec![];
                let mut id = entry.node().unwrap();
                while id.is_valid() {
                    let Some(node) = tree.node(id) else { break };
                    if is_path_attr(node.attribute()) {
                        chain.push(id);
                    }
                    id = node.parent();
                }
                for id in chain.into_iter().rev() {
                    let parent = current;
                    current = Some(*node_index.entry(id).or_insert_with(|| {
                        let label = tree
                            .node(id)
                            .map(|n| n.value().to_string())
                            .unwrap_or_default();
                        let mut node = Map::new();
                        node.insert("label".into(), json!(label));
                        node.insert("column".into(), json!("path"));
                        if let Some(p) = parent {
                            node.insert("parent".into(), json!(p));
                        }
                        nodes.push(serde_json::Value::Object(node));
                        nodes.len() - 1
                    }));
                }
            }
            have_path = have_path || current.is_some();
            row_nodes.push(current);
        }

        let path_names: std::collections::HashSet<String> = node_index
            .keys()
            .filter_map(|id| tree.node(*id))
            .filter_map(|n| db.attribute_name(n.attribute()).map(str::to_string))
            .collect();
        let data_columns: Vec<OutputColumn> = output_columns(db, &self.spec, &self.records)
            .into_iter()
            .filter(|c| !path_names.contains(&c.name))
            .collect();

        let mut columns: Vec<serde_json::Value> = vec![];
        let mut column_metadata: Vec<serde_json::Value> = vec![];
        if have_path {
            columns.push(json!("path"));
            column_metadata.push(json!({ "is_value": false }));
        }
        for column in &data_columns {
            columns.push(json!(column.title));
            let is_value = db
                .get_attribute(&column.name)
                .map(|a| a.store_as_value())
                .unwrap_or(false);
            column_metadata.push(json!({ "is_value": is_value }));
        }

        let mut data: Vec<serde_json::Value> = vec![];
        for (rec, node) in self.records.iter().zip(&row_nodes) {
            let mut row: Vec<serde_json::Value> = vec![];
            if have_path {
                row.push(node.map(|i| json!(i)).unwrap_or(serde_json::Value::Null));
            }
            for column in &data_columns {
                let value = db
                    .get_attribute(&column.name)
                    .and_then(|attr| rec.iter().find_map(|e| e.value_of(tree, attr.id())));
                row.push(match value {
                    Some(v) => crate::json::json_value(&v, false),
                    None => serde_json::Value::Null,
                });
            }
            data.push(json!(row));
        }

        let mut globals = Map::new();
        for entries in db.globals() {
            for attr_id in crate::expand::record_attributes(db, entries) {
                if let (Some(name), Some(v)) = (
                    db.attribute_name(attr_id),
                    entries.iter().find_map(|e| e.value_of(tree, attr_id)),
                ) {
                    globals.insert(name.to_string(), json!(v.to_string()));
                }
            }
        }

        let document = json!({
            "data": data,
            "columns": columns,
            "column_metadata": column_metadata,
            "nodes": nodes,
            "globals": globals,
        });
        writeln!(out, "{document}")?;
        Ok(())
    }
}
