//! Reader for the native stream format
//!
//! Each line is one record: comma-separated `key=value` pairs with
//! backslash escapes, the first pair always `__rec=<kind>`. Records
//! must arrive in dependency order; a reference to an id that has not
//! been seen yet means the stream is truncated or reordered.

use std::io::BufRead;

use crate::metadata::{IdMap, MetadataDb};
use vernier_context::{EntryList, Error, Result};

#[derive(Debug, Default)]
pub struct ReadStats {
    pub records: usize,
    pub snapshots: usize,
}

/// One parsed record line: keys with their (possibly repeated)
/// values. Both `ref=1,ref=2` and the legacy `ref=1=2` spelling
/// produce the same shape.
fn parse_line(line: &str) -> Vec<(String, Vec<String>)> {
    let mut pairs: Vec<(String, Vec<String>)> = vec![];
    let mut parts: Vec<String> = vec![];
    let mut current = String::new();
    let mut chars = line.chars();

    let finish_part = |parts: &mut Vec<String>, current: &mut String| {
        parts.push(std::mem::take(current));
    };
    let finish_segment = |pairs: &mut Vec<(String, Vec<String>)>, parts: &mut Vec<String>| {
        if parts.is_empty() {
            return;
        }
        let key = parts.remove(0);
        if !key.is_empty() {
            if let Some(existing) = pairs.iter_mut().find(|(k, _)| *k == key) {
                existing.1.append(parts);
            } else {
                pairs.push((key, std::mem::take(parts)));
            }
        }
        parts.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '=' => finish_part(&mut parts, &mut current),
            ',' => {
                finish_part(&mut parts, &mut current);
                finish_segment(&mut pairs, &mut parts);
            }
            _ => current.push(c),
        }
    }
    finish_part(&mut parts, &mut current);
    finish_segment(&mut pairs, &mut parts);
    pairs
}

fn get_single<'a>(pairs: &'a [(String, Vec<String>)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.first())
        .map(String::as_str)
}

fn get_values<'a>(pairs: &'a [(String, Vec<String>)], key: &str) -> &'a [String] {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_slice())
        .unwrap_or(&[])
}

fn parse_id(line: &str, text: &str) -> Result<u64> {
    text.parse()
        .map_err(|_| Error::MalformedRecord(format!("bad id \"{text}\" in: {line}")))
}

/// Read one stream into the database, handing each snapshot record to
/// `process`. Returns on the first malformed or dangling record;
/// records read before the error stay in the database.
pub fn read_stream<R: BufRead>(
    db: &mut MetadataDb,
    input: R,
    mut process: impl FnMut(&MetadataDb, EntryList),
) -> Result<ReadStats> {
    let mut idmap = IdMap::new();
    let mut stats = ReadStats::default();

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let pairs = parse_line(&line);
        let kind = match pairs.first() {
            Some((key, values)) if key == "__rec" => values.first().cloned().unwrap_or_default(),
            _ => {
                return Err(Error::MalformedRecord(format!("missing __rec in: {line}")));
            }
        };
        stats.records += 1;

        match kind.as_str() {
            "node" => {
                let id = parse_id(
                    &line,
                    get_single(&pairs, "id").ok_or_else(|| {
                        Error::MalformedRecord(format!("node without id: {line}"))
                    })?,
                )?;
                let attr = parse_id(
                    &line,
                    get_single(&pairs, "attr").ok_or_else(|| {
                        Error::MalformedRecord(format!("node without attr: {line}"))
                    })?,
                )?;
                let data = get_single(&pairs, "data")
                    .ok_or_else(|| Error::MalformedRecord(format!("node without data: {line}")))?;
                let parent = match get_single(&pairs, "parent") {
                    Some(p) => Some(parse_id(&line, p)?),
                    None => None,
                };
                db.merge_node(&mut idmap, id, attr, data, parent)?;
            }
            "ctx" | "globals" => {
                let mut refs = vec![];
                for r in get_values(&pairs, "ref") {
                    refs.push(parse_id(&line, r)?);
                }
                let attrs = get_values(&pairs, "attr");
                let datas = get_values(&pairs, "data");
                if attrs.len() != datas.len() {
                    return Err(Error::MalformedRecord(format!(
                        "attr/data count mismatch: {line}"
                    )));
                }
                let mut immediates = Vec::with_capacity(attrs.len());
                for (attr, data) in attrs.iter().zip(datas) {
                    immediates.push((parse_id(&line, attr)?, data.clone()));
                }
                let entries = db.merge_snapshot(&idmap, &refs, &immediates)?;
                if kind == "ctx" {
                    stats.snapshots += 1;
                    process(db, entries);
                } else {
                    db.add_globals(entries);
                }
            }
            other => {
                return Err(Error::MalformedRecord(format!(
                    "unknown record kind \"{other}\": {line}"
                )));
            }
        }
    }
    Ok(stats)
}
