//! Formatter dispatch
//!
//! All formatters sit behind one `process_record`/`flush` interface;
//! the kind is decided once when the pipeline is built. Streaming
//! formatters write each record immediately, buffered ones accumulate
//! and emit on flush.

use std::collections::HashSet;
use std::io::Write;

use crate::expand::ExpandFormatter;
use crate::json::JsonFormatter;
use crate::json_split::JsonSplitFormatter;
use crate::metadata::MetadataDb;
use crate::query_spec::{AttributeSelection, FunctionSignature, QuerySpec};
use crate::table::TableFormatter;
use crate::tree_format::TreeFormatter;
use crate::user_format::UserFormatter;
use crate::{cali_writer, expand};
use vernier_context::{Attribute, EntryList, Error, NodeId, Result};

const FORMAT_ARGS: [&str; 2] = ["format", "title"];
const TABLE_ARGS: [&str; 1] = ["max-column-width"];
const TREE_ARGS: [&str; 1] = ["path-attributes"];
const JSON_ARGS: [&str; 3] = ["pretty", "quote-all", "object"];

const FORMATTER_DEFS: [FunctionSignature; 8] = [
    FunctionSignature {
        name: "cali",
        min_args: 0,
        max_args: 0,
        args: &[],
    },
    // legacy alias of cali
    FunctionSignature {
        name: "csv",
        min_args: 0,
        max_args: 0,
        args: &[],
    },
    FunctionSignature {
        name: "expand",
        min_args: 0,
        max_args: 0,
        args: &[],
    },
    FunctionSignature {
        name: "format",
        min_args: 1,
        max_args: 2,
        args: &FORMAT_ARGS,
    },
    FunctionSignature {
        name: "json",
        min_args: 0,
        max_args: 3,
        args: &JSON_ARGS,
    },
    FunctionSignature {
        name: "json-split",
        min_args: 0,
        max_args: 0,
        args: &[],
    },
    FunctionSignature {
        name: "table",
        min_args: 0,
        max_args: 1,
        args: &TABLE_ARGS,
    },
    FunctionSignature {
        name: "tree",
        min_args: 0,
        max_args: 1,
        args: &TREE_ARGS,
    },
];

/// Formatter signatures advertised to the query parser.
pub fn formatter_defs() -> &'static [FunctionSignature] {
    &FORMATTER_DEFS
}

/// An output column: the attribute name it draws from and the title
/// it displays (the SELECT alias, if any).
#[derive(Clone, Debug)]
pub struct OutputColumn {
    pub name: String,
    pub title: String,
}

/// Resolve the output columns: the SELECT list if one was given,
/// otherwise every attribute appearing in the records except hidden
/// and global ones.
pub fn output_columns(db: &MetadataDb, spec: &QuerySpec, records: &[EntryList]) -> Vec<OutputColumn> {
    let mut columns = vec![];
    match &spec.select {
        AttributeSelection::List(names) => {
            for name in names {
                columns.push(OutputColumn {
                    name: name.clone(),
                    title: spec.alias_for(name).to_string(),
                });
            }
        }
        AttributeSelection::Default | AttributeSelection::All => {
            let mut seen: HashSet<NodeId> = HashSet::new();
            let mut add = |attr: Option<Attribute>| {
                let Some(attr) = attr else { return None };
                if attr.is_hidden() || attr.is_global() || !seen.insert(attr.id()) {
                    return None;
                }
                db.attribute_name(attr.id()).map(|name| OutputColumn {
                    name: name.to_string(),
                    title: spec.alias_for(name).to_string(),
                })
            };
            for rec in records {
                for attr_id in expand::record_attributes(db, rec) {
                    if let Some(column) = add(db.tree().attribute_by_id(attr_id)) {
                        columns.push(column);
                    }
                }
            }
        }
    }
    columns
}

/// String shown for `attr` in a record; empty when absent.
pub fn record_value_string(db: &MetadataDb, rec: &EntryList, attr_name: &str) -> String {
    let Some(attr) = db.get_attribute(attr_name) else {
        return String::new();
    };
    rec.iter()
        .find_map(|e| e.value_of(db.tree(), attr.id()))
        .map(|v| v.to_string())
        .unwrap_or_default()
}

/// Re-emits the stream format; dependencies first, then the record.
pub struct CaliFormatter {
    written: HashSet<NodeId>,
}

impl CaliFormatter {
    fn new() -> Self {
        Self {
            written: HashSet::new(),
        }
    }

    fn process_record(
        &mut self,
        db: &MetadataDb,
        rec: &EntryList,
        out: &mut dyn Write,
    ) -> Result<()> {
        cali_writer::write_entrylist(out, db.tree(), "ctx", rec, &mut self.written)
    }

    fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        for globals in db.globals() {
            cali_writer::write_entrylist(out, db.tree(), "globals", globals, &mut self.written)?;
        }
        Ok(())
    }
}

pub enum Formatter {
    Cali(CaliFormatter),
    Expand(ExpandFormatter),
    UserFormat(UserFormatter),
    Json(JsonFormatter),
    JsonSplit(JsonSplitFormatter),
    Table(TableFormatter),
    Tree(TreeFormatter),
}

impl Formatter {
    /// Decide the formatter kind once, from the FORMAT clause; the
    /// default is the stream format.
    pub fn from_spec(spec: &QuerySpec) -> Result<Self> {
        let (name, args) = match &spec.format {
            Some(f) => (f.formatter.as_str(), f.args.as_slice()),
            None => ("cali", &[] as &[String]),
        };
        match name {
            "cali" | "csv" => Ok(Formatter::Cali(CaliFormatter::new())),
            "expand" => Ok(Formatter::Expand(ExpandFormatter::new(spec))),
            "format" => Ok(Formatter::UserFormat(UserFormatter::new(args)?)),
            "json" => Ok(Formatter::Json(JsonFormatter::new(spec, args))),
            "json-split" => Ok(Formatter::JsonSplit(JsonSplitFormatter::new(spec))),
            "table" => Ok(Formatter::Table(TableFormatter::new(spec, args))),
            "tree" => Ok(Formatter::Tree(TreeFormatter::new(spec, args))),
            other => Err(Error::Config(format!("unknown formatter \"{other}\""))),
        }
    }

    pub fn process_record(
        &mut self,
        db: &MetadataDb,
        rec: EntryList,
        out: &mut dyn Write,
    ) -> Result<()> {
        match self {
            Formatter::Cali(f) => f.process_record(db, &rec, out),
            Formatter::Expand(f) => f.process_record(db, &rec, out),
            Formatter::UserFormat(f) => f.process_record(db, &rec, out),
            Formatter::Json(f) => f.process_record(db, rec, out),
            Formatter::JsonSplit(f) => {
                f.process_record(rec);
                Ok(())
            }
            Formatter::Table(f) => {
                f.process_record(rec);
                Ok(())
            }
            Formatter::Tree(f) => {
                f.process_record(rec);
                Ok(())
            }
        }
    }

    pub fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        match self {
            Formatter::Cali(f) => f.flush(db, out),
            Formatter::Expand(_) | Formatter::UserFormat(_) => Ok(()),
            Formatter::Json(f) => f.flush(db, out),
            Formatter::JsonSplit(f) => f.flush(db, out),
            Formatter::Table(f) => f.flush(db, out),
            Formatter::Tree(f) => f.flush(db, out),
        }
    }
}
