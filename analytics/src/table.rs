//! Table formatter: fixed-width columns, buffered until flush

use std::io::Write;

use crate::format::{output_columns, record_value_string};
use crate::metadata::MetadataDb;
use crate::query_spec::QuerySpec;
use vernier_context::{EntryList, Result};

const MIN_COLUMN_WIDTH: usize = 4;

/// Clamp a cell to `max` characters with a middle ellipsis.
pub fn clamp_string(s: &str, max: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(2);
    let head = keep / 2;
    let tail = keep - head;
    let mut out: String = chars[..head].iter().collect();
    out.push_str("..");
    out.extend(&chars[chars.len() - tail..]);
    out
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok()
}

pub struct TableFormatter {
    spec: QuerySpec,
    max_column_width: Option<usize>,
    records: Vec<EntryList>,
}

impl TableFormatter {
    pub fn new(spec: &QuerySpec, args: &[String]) -> Self {
        Self {
            spec: spec.clone(),
            max_column_width: args.first().and_then(|a| a.parse().ok()),
            records: vec![],
        }
    }

    pub fn process_record(&mut self, rec: EntryList) {
        self.records.push(rec);
    }

    pub fn flush(&mut self, db: &MetadataDb, out: &mut dyn Write) -> Result<()> {
        let columns = output_columns(db, &self.spec, &self.records);
        if columns.is_empty() {
            return Ok(());
        }

        let mut cells: Vec<Vec<String>> = vec![];
        for rec in &self.records {
            cells.push(
                columns
                    .iter()
                    .map(|c| {
                        let s = record_value_string(db, rec, &c.name);
                        match self.max_column_width {
                            Some(max) => clamp_string(&s, max.max(MIN_COLUMN_WIDTH)),
                            None => s,
                        }
                    })
                    .collect(),
            );
        }

        let mut widths: Vec<usize> = columns.iter().map(|c| c.title.chars().count()).collect();
        let mut numeric: Vec<bool> = vec![true; columns.len()];
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
                if !cell.is_empty() && !is_numeric(cell) {
                    numeric[i] = false;
                }
            }
        }
        for w in &mut widths {
            *w = (*w).max(MIN_COLUMN_WIDTH);
        }

        let write_row = |out: &mut dyn Write, row: &[String]| -> Result<()> {
            let mut line = String::new();
            for (i, cell) in row.iter().enumerate() {
                let pad = widths[i].saturating_sub(cell.chars().count());
                if numeric[i] {
                    line.extend(std::iter::repeat_n(' ', pad));
                    line.push_str(cell);
                } else {
                    line.push_str(cell);
                    line.extend(std::iter::repeat_n(' ', pad));
                }
                if i + 1 < row.len() {
                    line.push(' ');
                }
            }
            writeln!(out, "{}", line.trim_end())?;
            Ok(())
        };

        let header: Vec<String> = columns.iter().map(|c| c.title.clone()).collect();
        write_row(out, &header)?;
        for row in &cells {
            write_row(out, row)?;
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
    fn clamping_inserts_middle_ellipsis() {
        assert_eq!(clamp_string("short", 8), "short");
        assert_eq!(clamp_string("abcdefghij", 8), "abc..hij");
    }

    #[test]
    fn columns_align_and_pad() {
        let db = MetadataDb::new();
        let phase = db
            .tree()
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let time = db
            .tree()
            .create_attribute(
                "time",
                AttrType::Int,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let spec = crate::calql::parse_query("SELECT phase, time").unwrap();
        let mut table = TableFormatter::new(&spec, &[]);

        for (p, t) in [("initialization", 10i64), ("io", 2000)] {
            let node = db
                .tree()
                .get_or_create_child(
                    vernier_context::NodeId::ROOT,
                    phase.id(),
                    &Value::Str(p.into()),
                )
                .unwrap();
            table.process_record(vec![
                Entry::reference(node),
                Entry::immediate(time.id(), Value::Int(t)),
            ]);
        }

        let mut buf = vec![];
        table.flush(&db, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "phase          time");
        assert_eq!(lines[1], "initialization   10");
        assert_eq!(lines[2], "io             2000");
    }
}
