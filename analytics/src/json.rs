//! JSON formatter: one object per record, streamed as an array, or a
//! single `{records, globals, attributes}` object

use std::io::Write;

use serde_json::{json, Map};

use crate::expand::record_attributes;
use crate::format::output_columns;
use crate::metadata::MetadataDb;
use crate::query_spec::{AttributeSelection, QuerySpec};
use vernier_context::{EntryList, Result};
use vernier_transit::Value;

pub(crate) fn json_value(v: &Value, quote_all: bool) -> serde_json::Value {
    if quote_all {
        return json!(v.to_string());
    }
    match v {
        Value::Int(i) => json!(i),
        Value::Uint(u) => json!(u),
        Value::Bool(b) => json!(b),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| json!(d.to_string())),
        Value::Empty => serde_json::Value::Null,
        other => json!(other.to_string()),
    }
}

pub struct JsonFormatter {
    spec: QuerySpec,
    pretty: bool,
    quote_all: bool,
    object_mode: bool,
    records: Vec<serde_json::Value>,
    wrote_first: bool,
}

impl JsonFormatter {
    pub fn new(spec: &QuerySpec, args: &[String]) -> Self {
        Self {
            spec: spec.clone(),
            pretty: args.iter().any(|a| a == "pretty"),
            quote_all: args.iter().any(|a| a == "quote-all"),
            object_mode: args.iter().any(|a| a == "object"),
            records: vec![],
            wrote_first: false,
        }
    }

    fn record_object(&self, db: &MetadataDb, rec: &EntryList) -> serde_json::Value {
        let mut object = Map::new();
        match &self.spec.select {
            AttributeSelection::List(names) => {
                for name in names {
                    let Some(attr) = db.get_attribute(name) else {
                        continue;
                    };
                    if let Some(v) = rec.iter().find_map(|e| e.value_of(db.tree(), attr.id())) {
                        object.insert(
                            self.spec.alias_for(name).to_string(),
                            json_value(&v, self.quote_all),
                        );
                    }
                }
            }
            _ => {
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
                    if let Some(v) = rec.iter().find_map(|e| e.value_of(db.tree(), attr_id)) {
                        object.insert(
                            self.spec.alias_for(name).to_string(),
                            json_value(&v, self.quote_all),
                        );
                    }
                }
            }
        }
        serde_json::Value::Object(object)
    }

    fn render(&self, value: &serde_json::Value) -> String {
        if self.pretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    pub fn process_record(
        &mut self,
        db: &MetadataDb,
        rec: EntryList,
        out: &mut dyn Write,
    ) -> Result<()> {
        let object = self.record_object(db, &rec);
        if self.object_mode {
            self.records.push(object);
            return Ok(());
        }
        if self.wrote_first {
            write!(out, ",\n{}", self.render(&object))?;
        } else {
            write!(out, "[\n{}", self.render(&object))?;
            self.wrote_first = true;
        }
        Ok(())
    }

    pub fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        if !self.object_mode {
            if self.wrote_first {
                writeln!(out, "\n]")?;
            } else {
                writeln!(out, "[]")?;
            }
            return Ok(());
        }

        let globals: Vec<serde_json::Value> = db
            .globals()
            .iter()
            .map(|entries| {
                let mut object = Map::new();
                for attr_id in record_attributes(db, entries) {
                    if let (Some(name), Some(v)) = (
                        db.attribute_name(attr_id),
                        entries
                            .iter()
                            .find_map(|e| e.value_of(db.tree(), attr_id)),
                    ) {
                        object.insert(name.to_string(), json!(v.to_string()));
                    }
                }
                serde_json::Value::Object(object)
            })
            .collect();

        let mut attributes = Map::new();
        for attr in db.tree().attributes() {
            if let Some(name) = db.attribute_name(attr.id()) {
                attributes.insert(
                    name.to_string(),
                    json!({
                        "type": attr.attr_type().name(),
                        "is_value": attr.store_as_value(),
                        "is_nested": attr.is_nested(),
                        "is_global": attr.is_global(),
                    }),
                );
            }
        }

        let document = json!({
            "records": self.records,
            "globals": globals,
            "attributes": attributes,
        });
        writeln!(out, "{}", self.render(&document))?;
        Ok(())
    }
}
