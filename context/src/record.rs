//! Snapshot records and their compact binary form
//!
//! The binary form is used for in-memory inter-process snapshot
//! buffers (the signal-safe pull path): a length-prefixed list of
//! reference node ids followed by a length-prefixed list of immediate
//! `(attribute, value)` pairs, all VLQ encoded.

use crate::entry::Entry;
use crate::errors::{Error, Result};
use crate::tree::{ContextTree, NodeId};
use vernier_transit::{read_vlq, write_vlq_into, Value};

/// In-memory form of a snapshot record.
pub type EntryList = Vec<Entry>;

/// Pack entries into a caller-owned buffer without allocating.
///
/// Returns the number of bytes written, or `None` if the buffer is
/// too small. Empty entries are skipped.
pub fn pack_record(entries: &[Entry], buf: &mut [u8]) -> Option<usize> {
    let n_ref = entries.iter().filter(|e| e.is_reference()).count() as u64;
    let n_imm = entries.iter().filter(|e| e.is_immediate()).count() as u64;

    let mut pos = write_vlq_into(n_ref, buf)?;
    for entry in entries {
        if let Entry::Node(id) = entry {
            pos += write_vlq_into(id.as_u64(), &mut buf[pos..])?;
        }
    }
    pos += write_vlq_into(n_imm, &mut buf[pos..])?;
    for entry in entries {
        if let Entry::Immediate(attr, value) = entry {
            pos += write_vlq_into(attr.as_u64(), &mut buf[pos..])?;
            pos += value.pack_into(&mut buf[pos..])?;
        }
    }
    Some(pos)
}

/// Decode a packed record; returns the entries and the bytes read.
pub fn unpack_record(buf: &[u8]) -> Result<(EntryList, usize)> {
    let mut entries = EntryList::new();
    let (n_ref, mut pos) = read_vlq(buf)?;
    for _ in 0..n_ref {
        let (id, used) = read_vlq(&buf[pos..])?;
        pos += used;
        let node = NodeId::from_u64(id).ok_or(Error::DanglingReference(id))?;
        entries.push(Entry::reference(node));
    }
    let (n_imm, used) = read_vlq(&buf[pos..])?;
    pos += used;
    for _ in 0..n_imm {
        let (id, used) = read_vlq(&buf[pos..])?;
        pos += used;
        let attr = NodeId::from_u64(id).ok_or(Error::DanglingReference(id))?;
        let (value, used) = Value::unpack(&buf[pos..])?;
        pos += used;
        entries.push(Entry::immediate(attr, value));
    }
    Ok((entries, pos))
}

/// Canonicalise a record into a single tree path for reference-style
/// attributes, leaving store-as-value entries as immediates.
pub fn make_record(tree: &ContextTree, entries: &[Entry], parent: NodeId) -> Result<EntryList> {
    let mut pairs = vec![];
    let mut out = EntryList::new();
    for entry in entries {
        match entry {
            Entry::Empty => {}
            Entry::Node(_) => pairs.extend(entry.path(tree)),
            Entry::Immediate(attr, value) => {
                let combine = tree
                    .attribute_by_id(*attr)
                    .map(|a| a.is_autocombineable())
                    .unwrap_or(false);
                if combine {
                    pairs.push((*attr, value.clone()));
                } else {
                    out.push(entry.clone());
                }
            }
        }
    }
    if !pairs.is_empty() {
        out.insert(0, Entry::reference(tree.make_path(parent, &pairs)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Properties;
    use vernier_transit::AttrType;

    #[test]
    fn pack_unpack_roundtrip() {
        let tree = ContextTree::new();
        let phase = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let time = tree
            .create_attribute(
                "time",
                AttrType::Double,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let node = tree
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str("main".into()))
            .unwrap();
        let entries = vec![
            Entry::reference(node),
            Entry::immediate(time.id(), Value::Double(0.5)),
        ];
        let mut buf = [0u8; 256];
        let len = pack_record(&entries, &mut buf).unwrap();
        let (decoded, used) = unpack_record(&buf[..len]).unwrap();
        assert_eq!(used, len);
        assert_eq!(decoded, entries);
    }

    #[test]
    fn pack_refuses_small_buffer() {
        let entries = vec![Entry::immediate(
            NodeId::from_u64(11).unwrap(),
            Value::Str("a fairly long immediate value".into()),
        )];
        let mut buf = [0u8; 8];
        assert!(pack_record(&entries, &mut buf).is_none());
    }

    #[test]
    fn make_record_canonicalises_references() {
        let tree = ContextTree::new();
        let phase = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let iter = tree
            .create_attribute(
                "iteration",
                AttrType::Int,
                Properties::DEFAULT.with(Properties::AS_VALUE),
                &[],
            )
            .unwrap();
        let node = tree
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str("solve".into()))
            .unwrap();
        let entries = vec![
            Entry::reference(node),
            Entry::immediate(iter.id(), Value::Int(3)),
        ];
        let rec = make_record(&tree, &entries, NodeId::ROOT).unwrap();
        assert_eq!(rec.len(), 2);
        // the reference collapses to the same canonical path node
        assert_eq!(rec[0].node(), Some(node));
        assert!(rec[1].is_immediate());
    }
}
