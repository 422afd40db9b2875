//! Expand formatter: one key=value line per record

use std::io::Write;

use crate::format::record_value_string;
use crate::metadata::MetadataDb;
use crate::query_spec::{AttributeSelection, QuerySpec};
use vernier_context::{Entry, EntryList, NodeId, Result};

/// Attribute ids appearing in a record: reference path attributes
/// root-first, then immediates. Bootstrap meta attributes are
/// skipped.
pub fn record_attributes(db: &MetadataDb, rec: &EntryList) -> Vec<NodeId> {
    let mut out = vec![];
    let tree = db.tree();
    for entry in rec {
        if entry.is_reference() {
            for (attr, _) in entry.path(tree) {
                if attr.as_u64() >= NodeId::FIRST_USER_ID && !out.contains(&attr) {
                    out.push(attr);
                }
            }
        }
    }
    for entry in rec {
        if let Entry::Immediate(attr, _) = entry {
            if !out.contains(attr) {
                out.push(*attr);
            }
        }
    }
    out
}

pub struct ExpandFormatter {
    select: Option<Vec<(String, String)>>,
}

impl ExpandFormatter {
    pub fn new(spec: &QuerySpec) -> Self {
        let select = match &spec.select {
            AttributeSelection::List(names) => Some(
                names
                    .iter()
                    .map(|n| (n.clone(), spec.alias_for(n).to_string()))
                    .collect(),
            ),
            _ => None,
        };
        Self { select }
    }

    pub fn process_record(
        &mut self,
        db: &MetadataDb,
        rec: &EntryList,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut first = true;
        let mut field = |out: &mut dyn Write, title: &str, value: &str| -> Result<()> {
            if value.is_empty() {
                return Ok(());
            }
            if !first {
                write!(out, ",")?;
            }
            first = false;
            write!(out, "{title}={value}")?;
            Ok(())
        };

        match &self.select {
            Some(columns) => {
                for (name, title) in columns {
                    let value = record_value_string(db, rec, name);
                    field(out, title, &value)?;
                }
            }
            None => {
                for attr_id in record_attributes(db, rec) {
                    let Some(attr) = db.tree().attribute_by_id(attr_id) else {
                        continue;
                    };
                    if attr.is_hidden() {
                        continue;
                    }
                    let Some(name) = db.attribute_name(attr_id) else {
                        continue;
                    };
                    let name = name.to_string();
                    let value = record_value_string(db, rec, &name);
                    field(out, &name, &value)?;
                }
            }
        }
        writeln!(out)?;
        Ok(())
    }
}
