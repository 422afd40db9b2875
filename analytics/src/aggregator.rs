//! Group records by key and run aggregation kernels
//!
//! A group is identified by the canonical tree path of the key
//! attributes (built in the output database) plus the tuple of
//! store-as-value key entries. Kernels are restricted to commutative,
//! associative updates so record order never changes the result and
//! locally aggregated streams can be merged; `percent_total` is the
//! one two-phase exception, normalised against the total at flush.

use std::collections::{HashMap, HashSet};

use xxhash_rust::xxh64::Xxh64Builder;

use crate::metadata::MetadataDb;
use crate::query_spec::{AggregationOp, FunctionSignature, QuerySpec};
use vernier_context::{Attribute, Entry, EntryList, NodeId, Properties};
use vernier_transit::{AttrType, Value};

const SUM_ARGS: [&str; 1] = ["attribute"];
const RATIO_ARGS: [&str; 3] = ["numerator", "denominator", "scale"];

const AGGREGATION_DEFS: [FunctionSignature; 10] = [
    FunctionSignature {
        name: "count",
        min_args: 0,
        max_args: 0,
        args: &[],
    },
    FunctionSignature {
        name: "sum",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "min",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "max",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "avg",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "any",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "inclusive_sum",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "percent_total",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
    FunctionSignature {
        name: "ratio",
        min_args: 2,
        max_args: 3,
        args: &RATIO_ARGS,
    },
    FunctionSignature {
        name: "statistics",
        min_args: 1,
        max_args: 1,
        args: &SUM_ARGS,
    },
];

/// Signatures advertised to the query parser.
pub fn aggregation_defs() -> &'static [FunctionSignature] {
    &AGGREGATION_DEFS
}

/// Deterministic output attribute name for an aggregation op.
pub fn output_attribute_name(op: &AggregationOp) -> String {
    match op.op.as_str() {
        "count" => "count".to_string(),
        "ratio" => format!("ratio#{}/{}", op.args[0], op.args[1]),
        "inclusive_sum" => format!("inclusive#{}", op.args[0]),
        _ => format!("{}#{}", op.op, op.args[0]),
    }
}

/// All output attribute names an op produces (`statistics` expands to
/// four columns).
pub fn output_attribute_names(op: &AggregationOp) -> Vec<String> {
    if op.op == "statistics" {
        let a = &op.args[0];
        vec![
            format!("sum#{a}"),
            format!("min#{a}"),
            format!("max#{a}"),
            format!("avg#{a}"),
        ]
    } else {
        vec![output_attribute_name(op)]
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct GroupKey {
    path: NodeId,
    immediates: Vec<(NodeId, Value)>,
}

#[derive(Clone, Debug)]
enum KernelState {
    Count(u64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: u64 },
    Any(Option<Value>),
    Statistics { sum: f64, min: f64, max: f64, count: u64 },
    Inclusive(Option<Value>),
    PercentTotal(f64),
    Ratio { num: f64, den: f64 },
}

fn initial_state(op: &AggregationOp) -> KernelState {
    match op.op.as_str() {
        "count" => KernelState::Count(0),
        "sum" => KernelState::Sum(None),
        "min" => KernelState::Min(None),
        "max" => KernelState::Max(None),
        "avg" => KernelState::Avg { sum: 0.0, count: 0 },
        "any" => KernelState::Any(None),
        "statistics" => KernelState::Statistics {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        },
        "inclusive_sum" => KernelState::Inclusive(None),
        "percent_total" => KernelState::PercentTotal(0.0),
        "ratio" => KernelState::Ratio { num: 0.0, den: 0.0 },
        other => unreachable!("unknown aggregation op {other}"),
    }
}

/// Add `v` into `acc`, keeping the accumulator's type. Returns `None`
/// when the value cannot convert; such rows are dropped.
fn add_values(acc: &Value, v: &Value) -> Option<Value> {
    match acc {
        Value::Int(a) => v.to_int().ok().map(|b| Value::Int(a + b)),
        Value::Uint(a) => v.to_uint().ok().map(|b| Value::Uint(a + b)),
        Value::Double(a) => v.to_double().ok().map(|b| Value::Double(a + b)),
        _ => None,
    }
}

fn accumulate(acc: &mut Option<Value>, v: &Value) {
    match acc {
        None => *acc = Some(v.clone()),
        Some(current) => {
            if let Some(next) = add_values(current, v) {
                *acc = Some(next);
            }
        }
    }
}

fn record_value(db: &MetadataDb, rec: &EntryList, attr_name: &str) -> Option<Value> {
    let attr = db.get_attribute(attr_name)?;
    rec.iter().find_map(|e| e.value_of(db.tree(), attr.id()))
}

pub struct Aggregator {
    key_names: Option<Vec<String>>,
    ops: Vec<AggregationOp>,
    ratio_scales: Vec<f64>,
    groups: HashMap<GroupKey, Vec<KernelState>, Xxh64Builder>,
}

impl Aggregator {
    pub fn from_spec(spec: &QuerySpec) -> Self {
        Self::new(spec.aggregation_ops.clone(), spec.aggregation_key.clone())
    }

    pub fn new(ops: Vec<AggregationOp>, key_names: Option<Vec<String>>) -> Self {
        let ratio_scales = ops
            .iter()
            .map(|op| {
                op.args
                    .get(2)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1.0)
            })
            .collect();
        Self {
            key_names,
            ops,
            ratio_scales,
            groups: HashMap::with_hasher(Xxh64Builder::new(0)),
        }
    }

    fn make_key(&self, db: &MetadataDb, rec: &EntryList) -> GroupKey {
        let tree = db.tree();
        let mut pairs: Vec<(NodeId, Value)> = vec![];
        let mut immediates: Vec<(NodeId, Value)> = vec![];

        match &self.key_names {
            None => {
                // no GROUP BY: the full reference path is the key
                let mut seen = HashSet::new();
                for entry in rec {
                    if entry.is_reference() {
                        for pair in entry.path(tree) {
                            // skip attribute metadata on no-merge chains
                            if pair.0.as_u64() >= NodeId::FIRST_USER_ID
                                && seen.insert(pair.clone())
                            {
                                pairs.push(pair);
                            }
                        }
                    }
                }
            }
            Some(names) => {
                let attrs: Vec<Attribute> =
                    names.iter().filter_map(|n| db.get_attribute(n)).collect();
                let path_attrs: HashSet<NodeId> = attrs
                    .iter()
                    .filter(|a| a.is_autocombineable())
                    .map(|a| a.id())
                    .collect();
                let mut seen = HashSet::new();
                for entry in rec {
                    if entry.is_reference() {
                        for pair in entry.path(tree) {
                            if path_attrs.contains(&pair.0) && seen.insert(pair.clone()) {
                                pairs.push(pair);
                            }
                        }
                    }
                }
                for attr in attrs.iter().filter(|a| !a.is_autocombineable()) {
                    if let Some(value) = rec.iter().find_map(|e| match e {
                        Entry::Immediate(a, v) if *a == attr.id() => Some(v.clone()),
                        _ => None,
                    }) {
                        immediates.push((attr.id(), value));
                    }
                }
                immediates.sort_by_key(|(attr, _)| *attr);
            }
        }

        let path = tree.make_path(NodeId::ROOT, &pairs).unwrap_or(NodeId::ROOT);
        GroupKey { path, immediates }
    }

    /// Fold one record into its group.
    pub fn add(&mut self, db: &MetadataDb, rec: &EntryList) {
        let key = self.make_key(db, rec);
        let inputs: Vec<Option<Value>> = self
            .ops
            .iter()
            .map(|op| match op.op.as_str() {
                "count" => None,
                "ratio" => None,
                _ => record_value(db, rec, &op.args[0]),
            })
            .collect();
        let ratio_inputs: Vec<Option<(Option<Value>, Option<Value>)>> = self
            .ops
            .iter()
            .map(|op| {
                (op.op == "ratio").then(|| {
                    (
                        record_value(db, rec, &op.args[0]),
                        record_value(db, rec, &op.args[1]),
                    )
                })
            })
            .collect();

        let ops = &self.ops;
        let kernels = self
            .groups
            .entry(key)
            .or_insert_with(|| ops.iter().map(initial_state).collect());

        for (i, state) in kernels.iter_mut().enumerate() {
            match state {
                KernelState::Count(n) => *n += 1,
                KernelState::Sum(acc) | KernelState::Inclusive(acc) => {
                    if let Some(v) = &inputs[i] {
                        accumulate(acc, v);
                    }
                }
                KernelState::Min(acc) => {
                    if let Some(v) = &inputs[i] {
                        if acc.as_ref().map(|m| v < m).unwrap_or(true) {
                            *acc = Some(v.clone());
                        }
                    }
                }
                KernelState::Max(acc) => {
                    if let Some(v) = &inputs[i] {
                        if acc.as_ref().map(|m| v > m).unwrap_or(true) {
                            *acc = Some(v.clone());
                        }
                    }
                }
                KernelState::Avg { sum, count } => {
                    if let Some(v) = inputs[i].as_ref().and_then(|v| v.to_double().ok()) {
                        *sum += v;
                        *count += 1;
                    }
                }
                KernelState::Any(slot) => {
                    if slot.is_none() {
                        *slot = inputs[i].clone();
                    }
                }
                KernelState::Statistics {
                    sum,
                    min,
                    max,
                    count,
                } => {
                    if let Some(v) = inputs[i].as_ref().and_then(|v| v.to_double().ok()) {
                        *sum += v;
                        *min = min.min(v);
                        *max = max.max(v);
                        *count += 1;
                    }
                }
                KernelState::PercentTotal(sum) => {
                    if let Some(v) = inputs[i].as_ref().and_then(|v| v.to_double().ok()) {
                        *sum += v;
                    }
                }
                KernelState::Ratio { num, den } => {
                    if let Some((n, d)) = &ratio_inputs[i] {
                        if let Some(v) = n.as_ref().and_then(|v| v.to_double().ok()) {
                            *num += v;
                        }
                        if let Some(v) = d.as_ref().and_then(|v| v.to_double().ok()) {
                            *den += v;
                        }
                    }
                }
            }
        }
    }

    /// Merge another aggregator over the same query into this one.
    /// `agg(X ∪ Y) == merge(agg(X), agg(Y))` for every kernel.
    pub fn append(&mut self, other: Aggregator) {
        for (key, states) in other.groups {
            match self.groups.entry(key) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(states);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    for (mine, theirs) in slot.get_mut().iter_mut().zip(states) {
                        merge_states(mine, theirs);
                    }
                }
            }
        }
    }

    /// Finalise all groups and push one output record per group.
    pub fn flush(mut self, db: &MetadataDb, mut push: impl FnMut(&MetadataDb, EntryList)) {
        self.propagate_inclusive(db);

        // percent_total denominators, one per op slot
        let mut totals = vec![0.0f64; self.ops.len()];
        for states in self.groups.values() {
            for (i, state) in states.iter().enumerate() {
                if let KernelState::PercentTotal(sum) = state {
                    totals[i] += sum;
                }
            }
        }

        let make_output_attr = |name: &str, t: AttrType| {
            db.tree()
                .create_attribute(
                    name,
                    t,
                    Properties::DEFAULT.with(
                        Properties::AS_VALUE
                            | Properties::SKIP_EVENTS
                            | Properties::AGGREGATABLE,
                    ),
                    &[],
                )
                .ok()
        };

        for (key, states) in &self.groups {
            let mut entries = EntryList::new();
            if key.path != NodeId::ROOT {
                entries.push(Entry::reference(key.path));
            }
            for (attr, value) in &key.immediates {
                entries.push(Entry::immediate(*attr, value.clone()));
            }

            for (i, state) in states.iter().enumerate() {
                let op = &self.ops[i];
                match state {
                    KernelState::Count(n) => {
                        if let Some(attr) = make_output_attr("count", AttrType::Uint) {
                            entries.push(Entry::immediate(attr.id(), Value::Uint(*n)));
                        }
                    }
                    KernelState::Sum(acc) | KernelState::Inclusive(acc) => {
                        if let Some(v) = acc {
                            if let Some(attr) =
                                make_output_attr(&output_attribute_name(op), v.attr_type())
                            {
                                entries.push(Entry::immediate(attr.id(), v.clone()));
                            }
                        }
                    }
                    KernelState::Min(acc) | KernelState::Max(acc) | KernelState::Any(acc) => {
                        if let Some(v) = acc {
                            if let Some(attr) =
                                make_output_attr(&output_attribute_name(op), v.attr_type())
                            {
                                entries.push(Entry::immediate(attr.id(), v.clone()));
                            }
                        }
                    }
                    KernelState::Avg { sum, count } => {
                        if *count > 0 {
                            if let Some(attr) =
                                make_output_attr(&output_attribute_name(op), AttrType::Double)
                            {
                                entries.push(Entry::immediate(
                                    attr.id(),
                                    Value::Double(sum / *count as f64),
                                ));
                            }
                        }
                    }
                    KernelState::Statistics {
                        sum,
                        min,
                        max,
                        count,
                    } => {
                        if *count > 0 {
                            let a = &op.args[0];
                            let columns = [
                                (format!("sum#{a}"), *sum),
                                (format!("min#{a}"), *min),
                                (format!("max#{a}"), *max),
                                (format!("avg#{a}"), sum / *count as f64),
                            ];
                            for (name, value) in columns {
                                if let Some(attr) = make_output_attr(&name, AttrType::Double) {
                                    entries.push(Entry::immediate(
                                        attr.id(),
                                        Value::Double(value),
                                    ));
                                }
                            }
                        }
                    }
                    KernelState::PercentTotal(sum) => {
                        if totals[i] > 0.0 {
                            if let Some(attr) =
                                make_output_attr(&output_attribute_name(op), AttrType::Double)
                            {
                                entries.push(Entry::immediate(
                                    attr.id(),
                                    Value::Double(100.0 * sum / totals[i]),
                                ));
                            }
                        }
                    }
                    KernelState::Ratio { num, den } => {
                        if den.abs() > 0.0 {
                            if let Some(attr) =
                                make_output_attr(&output_attribute_name(op), AttrType::Double)
                            {
                                entries.push(Entry::immediate(
                                    attr.id(),
                                    Value::Double(self.ratio_scales[i] * num / den),
                                ));
                            }
                        }
                    }
                }
            }
            push(db, entries);
        }
    }

    /// Add each group's inclusive sums into every ancestor group on
    /// its key path, creating rows for ancestors without exclusive
    /// hits.
    fn propagate_inclusive(&mut self, db: &MetadataDb) {
        if !self.ops.iter().any(|op| op.op == "inclusive_sum") {
            return;
        }
        let tree = db.tree();
        let snapshot: Vec<(GroupKey, Vec<Option<Value>>)> = self
            .groups
            .iter()
            .map(|(key, states)| {
                let sums = states
                    .iter()
                    .map(|s| match s {
                        KernelState::Inclusive(acc) => acc.clone(),
                        _ => None,
                    })
                    .collect();
                (key.clone(), sums)
            })
            .collect();

        let valid_parent = |id: NodeId| {
            tree.node(id).and_then(|n| {
                let p = n.parent();
                p.is_valid().then_some(p)
            })
        };
        let ops = &self.ops;
        for (key, sums) in snapshot {
            let mut ancestor = valid_parent(key.path);
            while let Some(parent) = ancestor {
                let ancestor_key = GroupKey {
                    path: parent,
                    immediates: key.immediates.clone(),
                };
                let states = self
                    .groups
                    .entry(ancestor_key)
                    .or_insert_with(|| ops.iter().map(initial_state).collect());
                for (i, sum) in sums.iter().enumerate() {
                    if let (KernelState::Inclusive(acc), Some(v)) = (&mut states[i], sum) {
                        accumulate(acc, v);
                    }
                }
                ancestor = valid_parent(parent);
            }
        }
    }
}

fn merge_states(mine: &mut KernelState, theirs: KernelState) {
    match (mine, theirs) {
        (KernelState::Count(a), KernelState::Count(b)) => *a += b,
        (KernelState::Sum(a), KernelState::Sum(b))
        | (KernelState::Inclusive(a), KernelState::Inclusive(b)) => {
            if let Some(v) = b {
                accumulate(a, &v);
            }
        }
        (KernelState::Min(a), KernelState::Min(b)) => {
            if let Some(v) = b {
                if a.as_ref().map(|m| v < *m).unwrap_or(true) {
                    *a = Some(v);
                }
            }
        }
        (KernelState::Max(a), KernelState::Max(b)) => {
            if let Some(v) = b {
                if a.as_ref().map(|m| v > *m).unwrap_or(true) {
                    *a = Some(v);
                }
            }
        }
        (
            KernelState::Avg { sum, count },
            KernelState::Avg {
                sum: s2,
                count: c2,
            },
        ) => {
            *sum += s2;
            *count += c2;
        }
        (KernelState::Any(a), KernelState::Any(b)) => {
            if a.is_none() {
                *a = b;
            }
        }
        (
            KernelState::Statistics {
                sum,
                min,
                max,
                count,
            },
            KernelState::Statistics {
                sum: s2,
                min: m2,
                max: x2,
                count: c2,
            },
        ) => {
            *sum += s2;
            *min = min.min(m2);
            *max = max.max(x2);
            *count += c2;
        }
        (KernelState::PercentTotal(a), KernelState::PercentTotal(b)) => *a += b,
        (
            KernelState::Ratio { num, den },
            KernelState::Ratio {
                num: n2,
                den: d2,
            },
        ) => {
            *num += n2;
            *den += d2;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::Properties;

    fn setup() -> (MetadataDb, Attribute, Attribute) {
        let db = MetadataDb::new();
        let phase = db
            .tree()
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let time = db
            .tree()
            .create_attribute(
                "time",
                AttrType::Double,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        (db, phase, time)
    }

    fn record(db: &MetadataDb, phase: &Attribute, time: &Attribute, p: &str, t: f64) -> EntryList {
        let node = db
            .tree()
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str(p.into()))
            .unwrap();
        vec![
            Entry::reference(node),
            Entry::immediate(time.id(), Value::Double(t)),
        ]
    }

    fn op(name: &str, args: &[&str]) -> AggregationOp {
        AggregationOp {
            op: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn flush_rows(agg: Aggregator, db: &MetadataDb) -> Vec<EntryList> {
        let mut rows = vec![];
        agg.flush(db, |_, rec| rows.push(rec));
        rows
    }

    fn row_value(db: &MetadataDb, row: &EntryList, attr_name: &str) -> Option<Value> {
        let attr = db.get_attribute(attr_name)?;
        row.iter().find_map(|e| e.value_of(db.tree(), attr.id()))
    }

    #[test]
    fn count_and_sum_per_group() {
        let (db, phase, time) = setup();
        let mut agg = Aggregator::new(
            vec![op("count", &[]), op("sum", &["time"])],
            Some(vec!["phase".into()]),
        );
        agg.add(&db, &record(&db, &phase, &time, "a", 10.0));
        agg.add(&db, &record(&db, &phase, &time, "b", 30.0));
        agg.add(&db, &record(&db, &phase, &time, "a", 10.0));

        let rows = flush_rows(agg, &db);
        assert_eq!(rows.len(), 2);
        let row_a = rows
            .iter()
            .find(|r| row_value(&db, r, "phase") == Some(Value::Str("a".into())))
            .unwrap();
        assert_eq!(row_value(&db, row_a, "count"), Some(Value::Uint(2)));
        assert_eq!(row_value(&db, row_a, "sum#time"), Some(Value::Double(20.0)));
    }

    #[test]
    fn percent_total_normalises_against_all_groups() {
        let (db, phase, time) = setup();
        let mut agg = Aggregator::new(
            vec![op("percent_total", &["time"])],
            Some(vec!["phase".into()]),
        );
        agg.add(&db, &record(&db, &phase, &time, "a", 10.0));
        agg.add(&db, &record(&db, &phase, &time, "b", 30.0));
        agg.add(&db, &record(&db, &phase, &time, "a", 10.0));

        let rows = flush_rows(agg, &db);
        let pct = |name: &str| {
            let row = rows
                .iter()
                .find(|r| row_value(&db, r, "phase") == Some(Value::Str(name.into())))
                .unwrap();
            row_value(&db, row, "percent_total#time").unwrap()
        };
        assert_eq!(pct("a"), Value::Double(40.0));
        assert_eq!(pct("b"), Value::Double(60.0));
    }

    #[test]
    fn record_order_does_not_matter() {
        let (db, phase, time) = setup();
        let records = [
            record(&db, &phase, &time, "a", 1.0),
            record(&db, &phase, &time, "b", 2.0),
            record(&db, &phase, &time, "a", 3.0),
            record(&db, &phase, &time, "c", 4.0),
        ];
        let ops = vec![
            op("count", &[]),
            op("sum", &["time"]),
            op("min", &["time"]),
            op("max", &["time"]),
            op("avg", &["time"]),
        ];

        let run = |order: &[usize]| {
            let mut agg = Aggregator::new(ops.clone(), Some(vec!["phase".into()]));
            for &i in order {
                agg.add(&db, &records[i]);
            }
            let mut rows: Vec<String> = flush_rows(agg, &db)
                .iter()
                .map(|r| {
                    format!(
                        "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
                        row_value(&db, r, "phase"),
                        row_value(&db, r, "count"),
                        row_value(&db, r, "sum#time"),
                        row_value(&db, r, "min#time"),
                        row_value(&db, r, "max#time"),
                        row_value(&db, r, "avg#time"),
                    )
                })
                .collect();
            rows.sort();
            rows
        };

        assert_eq!(run(&[0, 1, 2, 3]), run(&[3, 2, 1, 0]));
        assert_eq!(run(&[0, 1, 2, 3]), run(&[2, 0, 3, 1]));
    }

    #[test]
    fn append_matches_single_pass() {
        let (db, phase, time) = setup();
        let records: Vec<EntryList> = [("a", 1.0), ("b", 2.0), ("a", 3.0), ("b", 4.0)]
            .iter()
            .map(|(p, t)| record(&db, &phase, &time, p, *t))
            .collect();
        let ops = vec![op("count", &[]), op("sum", &["time"]), op("min", &["time"])];

        let mut whole = Aggregator::new(ops.clone(), Some(vec!["phase".into()]));
        for r in &records {
            whole.add(&db, r);
        }

        let mut left = Aggregator::new(ops.clone(), Some(vec!["phase".into()]));
        let mut right = Aggregator::new(ops.clone(), Some(vec!["phase".into()]));
        left.add(&db, &records[0]);
        left.add(&db, &records[1]);
        right.add(&db, &records[2]);
        right.add(&db, &records[3]);
        left.append(right);

        let describe = |rows: Vec<EntryList>| {
            let mut out: Vec<String> = rows
                .iter()
                .map(|r| {
                    format!(
                        "{:?}|{:?}|{:?}|{:?}",
                        row_value(&db, r, "phase"),
                        row_value(&db, r, "count"),
                        row_value(&db, r, "sum#time"),
                        row_value(&db, r, "min#time"),
                    )
                })
                .collect();
            out.sort();
            out
        };
        assert_eq!(
            describe(flush_rows(whole, &db)),
            describe(flush_rows(left, &db))
        );
    }

    #[test]
    fn inclusive_sum_rolls_up_to_ancestors() {
        let (db, phase, time) = setup();
        let outer = db
            .tree()
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str("outer".into()))
            .unwrap();
        let inner = db
            .tree()
            .get_or_create_child(outer, phase.id(), &Value::Str("inner".into()))
            .unwrap();
        let rec_outer = vec![
            Entry::reference(outer),
            Entry::immediate(time.id(), Value::Double(5.0)),
        ];
        let rec_inner = vec![
            Entry::reference(inner),
            Entry::immediate(time.id(), Value::Double(7.0)),
        ];

        let mut agg = Aggregator::new(
            vec![op("inclusive_sum", &["time"])],
            Some(vec!["phase".into()]),
        );
        agg.add(&db, &rec_outer);
        agg.add(&db, &rec_inner);

        let rows = flush_rows(agg, &db);
        let value_at = |count: usize| {
            rows.iter()
                .find(|r| r[0].count(db.tree(), phase.id()) == count)
                .map(|r| row_value(&db, r, "inclusive#time").unwrap())
        };
        // inner keeps its own time, outer includes the inner's
        assert_eq!(value_at(2), Some(Value::Double(7.0)));
        assert_eq!(value_at(1), Some(Value::Double(12.0)));
    }

    #[test]
    fn value_stacking_groups_by_full_path() {
        let db = MetadataDb::new();
        let x = db
            .tree()
            .create_attribute("x", AttrType::Int, Properties::DEFAULT, &[])
            .unwrap();
        let n1 = db
            .tree()
            .get_or_create_child(NodeId::ROOT, x.id(), &Value::Int(1))
            .unwrap();
        let n2 = db
            .tree()
            .get_or_create_child(n1, x.id(), &Value::Int(2))
            .unwrap();

        let mut agg = Aggregator::new(vec![op("count", &[])], Some(vec!["x".into()]));
        agg.add(&db, &vec![Entry::reference(n2)]);
        agg.add(&db, &vec![Entry::reference(n1)]);

        let rows = flush_rows(agg, &db);
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row_value(&db, row, "count"), Some(Value::Uint(1)));
        }
        let deepest: Vec<Value> = rows
            .iter()
            .map(|r| row_value(&db, r, "x").unwrap())
            .collect();
        assert!(deepest.contains(&Value::Int(1)));
        assert!(deepest.contains(&Value::Int(2)));
    }
}
