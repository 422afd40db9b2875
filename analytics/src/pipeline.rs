//! The composed query pipeline
//!
//! preprocess → filter → aggregate → sort → format, assembled once
//! from a parsed query spec and driven record-by-record from the
//! reader.

use std::io::Write;

use crate::aggregator::Aggregator;
use crate::filter::RecordSelector;
use crate::format::Formatter;
use crate::metadata::MetadataDb;
use crate::preprocessor::Preprocessor;
use crate::query_spec::{QuerySpec, SortSpec};
use crate::sorter::Sorter;
use vernier_context::{EntryList, Result};

pub struct QueryProcessor {
    preprocessor: Preprocessor,
    selector: RecordSelector,
    aggregator: Option<Aggregator>,
    sorter: Sorter,
    formatter: Formatter,
    /// Records held back for sorting when no aggregation runs.
    buffered: Vec<EntryList>,
}

impl QueryProcessor {
    pub fn new(spec: &QuerySpec) -> Result<Self> {
        let aggregator = (!spec.aggregation_ops.is_empty() || spec.aggregation_key.is_some())
            .then(|| Aggregator::from_spec(spec));
        // ORDER BY may name a SELECT alias; sort on the underlying
        // attribute
        let sort_keys: Vec<SortSpec> = spec
            .sort
            .iter()
            .map(|k| SortSpec {
                attribute: spec.resolve_alias(&k.attribute).to_string(),
                order: k.order,
            })
            .collect();
        Ok(Self {
            preprocessor: Preprocessor::from_spec(spec),
            selector: RecordSelector::from_spec(spec),
            aggregator,
            sorter: Sorter::new(sort_keys),
            formatter: Formatter::from_spec(spec)?,
            buffered: vec![],
        })
    }

    pub fn process_record(
        &mut self,
        db: &MetadataDb,
        mut rec: EntryList,
        out: &mut dyn Write,
    ) -> Result<()> {
        self.preprocessor.process(db, &mut rec);
        if !self.selector.pass(db, &rec) {
            return Ok(());
        }
        match &mut self.aggregator {
            Some(aggregator) => {
                aggregator.add(db, &rec);
                Ok(())
            }
            None if !self.sorter.is_empty() => {
                self.buffered.push(rec);
                Ok(())
            }
            None => self.formatter.process_record(db, rec, out),
        }
    }

    pub fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        let mut records = std::mem::take(&mut self.buffered);
        if let Some(aggregator) = self.aggregator.take() {
            aggregator.flush(db, |_, rec| records.push(rec));
        }
        self.sorter.sort(db, &mut records);
        for rec in records {
            self.formatter.process_record(db, rec, out)?;
        }
        self.formatter.flush(db, out)
    }
}
