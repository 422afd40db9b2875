//! LET-clause preprocessing: derived columns computed per record

use crate::filter::RecordSelector;
use crate::metadata::MetadataDb;
use crate::query_spec::{AggregationOp, FunctionSignature, PreprocessSpec, QuerySpec};
use vernier_context::{Entry, EntryList, Properties};
use vernier_transit::Value;

const RATIO_ARGS: [&str; 3] = ["numerator", "denominator", "scale"];
const SCALE_ARGS: [&str; 2] = ["attribute", "factor"];
const TRUNCATE_ARGS: [&str; 2] = ["attribute", "step"];
const FIRST_ARGS: [&str; 8] = ["a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8"];

const PREPROCESS_DEFS: [FunctionSignature; 4] = [
    FunctionSignature {
        name: "ratio",
        min_args: 2,
        max_args: 3,
        args: &RATIO_ARGS,
    },
    FunctionSignature {
        name: "scale",
        min_args: 2,
        max_args: 2,
        args: &SCALE_ARGS,
    },
    FunctionSignature {
        name: "truncate",
        min_args: 1,
        max_args: 2,
        args: &TRUNCATE_ARGS,
    },
    FunctionSignature {
        name: "first",
        min_args: 1,
        max_args: 8,
        args: &FIRST_ARGS,
    },
];

/// Signatures advertised to the query parser.
pub fn preprocess_defs() -> &'static [FunctionSignature] {
    &PREPROCESS_DEFS
}

fn record_value(db: &MetadataDb, rec: &EntryList, attr_name: &str) -> Option<Value> {
    let attr = db.get_attribute(attr_name)?;
    rec.iter().find_map(|e| e.value_of(db.tree(), attr.id()))
}

fn eval(db: &MetadataDb, rec: &EntryList, op: &AggregationOp) -> Option<Value> {
    match op.op.as_str() {
        "ratio" => {
            let n = record_value(db, rec, &op.args[0])?.to_double().ok()?;
            let d = record_value(db, rec, &op.args[1])?.to_double().ok()?;
            let scale: f64 = op.args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1.0);
            (d.abs() > 0.0).then(|| Value::Double(scale * n / d))
        }
        "scale" => {
            let v = record_value(db, rec, &op.args[0])?.to_double().ok()?;
            let factor: f64 = op.args.get(1).and_then(|s| s.parse().ok())?;
            Some(Value::Double(v * factor))
        }
        "truncate" => {
            let v = record_value(db, rec, &op.args[0])?.to_double().ok()?;
            let step: f64 = op.args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1.0);
            (step.abs() > 0.0).then(|| Value::Double((v / step).floor() * step))
        }
        "first" => op
            .args
            .iter()
            .find_map(|name| record_value(db, rec, name)),
        _ => None,
    }
}

pub struct Preprocessor {
    ops: Vec<PreprocessSpec>,
}

impl Preprocessor {
    pub fn from_spec(spec: &QuerySpec) -> Self {
        Self {
            ops: spec.let_ops.clone(),
        }
    }

    /// Apply each LET definition in order; a satisfied target appends
    /// one immediate entry, so later definitions see earlier results.
    pub fn process(&self, db: &MetadataDb, rec: &mut EntryList) {
        for pspec in &self.ops {
            if let Some(cond) = &pspec.cond {
                if !RecordSelector::from_condition(cond.clone()).pass(db, rec) {
                    continue;
                }
            }
            let Some(value) = eval(db, rec, &pspec.op) else {
                continue;
            };
            let created = db.tree().create_attribute(
                &pspec.target,
                value.attr_type(),
                Properties::DEFAULT.with(Properties::AS_VALUE | Properties::SKIP_EVENTS),
                &[],
            );
            match created {
                Ok(attr) => rec.push(Entry::immediate(attr.id(), value)),
                Err(e) => log::warn!("let {}: {e}", pspec.target),
            }
        }
    }
}
