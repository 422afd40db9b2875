//! Writer for the native stream format
//!
//! Records are emitted in dependency order: every node a record cites
//! is written before the record itself, attribute chains before the
//! nodes that use them. Bootstrap nodes are never written.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;

use vernier_context::{ContextTree, Entry, NodeId, Result};

/// Characters escaped with a backslash in keys and values.
const ESC_CHARS: [char; 4] = ['\\', ',', '=', '\n'];

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if ESC_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Write a node record preceded by its dependencies (attribute chain
/// and parents), deduplicated through `written`.
pub fn write_node_with_deps(
    out: &mut dyn Write,
    tree: &ContextTree,
    id: NodeId,
    written: &mut HashSet<NodeId>,
) -> Result<()> {
    if !id.is_valid() || id.as_u64() < NodeId::FIRST_USER_ID {
        return Ok(());
    }
    if written.contains(&id) {
        return Ok(());
    }
    let Some(node) = tree.node(id) else {
        return Ok(());
    };

    write_node_with_deps(out, tree, node.attribute(), written)?;
    if node.parent().is_valid() {
        write_node_with_deps(out, tree, node.parent(), written)?;
    }

    write!(
        out,
        "__rec=node,id={},attr={},data={}",
        id.as_u64(),
        node.attribute().as_u64(),
        escape(&node.value().to_string())
    )?;
    if node.parent().is_valid() {
        write!(out, ",parent={}", node.parent().as_u64())?;
    }
    writeln!(out)?;
    written.insert(id);
    Ok(())
}

/// Write one `ctx` or `globals` record, emitting every cited node
/// first.
pub fn write_entrylist(
    out: &mut dyn Write,
    tree: &ContextTree,
    kind: &str,
    entries: &[Entry],
    written: &mut HashSet<NodeId>,
) -> Result<()> {
    for entry in entries {
        match entry {
            Entry::Node(id) => write_node_with_deps(out, tree, *id, written)?,
            Entry::Immediate(attr, _) => write_node_with_deps(out, tree, *attr, written)?,
            Entry::Empty => {}
        }
    }

    write!(out, "__rec={kind}")?;
    for entry in entries {
        if let Entry::Node(id) = entry {
            write!(out, ",ref={}", id.as_u64())?;
        }
    }
    for entry in entries {
        if let Entry::Immediate(attr, _) = entry {
            write!(out, ",attr={}", attr.as_u64())?;
        }
    }
    for entry in entries {
        if let Entry::Immediate(_, value) = entry {
            write!(out, ",data={}", escape(&value.to_string()))?;
        }
    }
    writeln!(out)?;
    Ok(())
}

struct WriterState<W: Write> {
    out: W,
    written_nodes: HashSet<NodeId>,
    num_written: usize,
}

pub struct CaliWriter<W: Write> {
    state: Mutex<WriterState<W>>,
}

impl<W: Write> CaliWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(WriterState {
                out,
                written_nodes: HashSet::new(),
                num_written: 0,
            }),
        }
    }

    pub fn num_written(&self) -> usize {
        self.state.lock().unwrap().num_written
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().unwrap().out
    }

    pub fn write_snapshot(&self, tree: &ContextTree, entries: &[Entry]) -> Result<()> {
        self.write_record(tree, "ctx", entries)
    }

    pub fn write_globals(&self, tree: &ContextTree, entries: &[Entry]) -> Result<()> {
        self.write_record(tree, "globals", entries)
    }

    /// Write a single node record, with its dependencies.
    pub fn write_node(&self, tree: &ContextTree, id: NodeId) -> Result<()> {
        let state = &mut *self.state.lock().unwrap();
        let before = state.written_nodes.len();
        write_node_with_deps(&mut state.out, tree, id, &mut state.written_nodes)?;
        state.num_written += state.written_nodes.len() - before;
        Ok(())
    }

    fn write_record(&self, tree: &ContextTree, kind: &str, entries: &[Entry]) -> Result<()> {
        let state = &mut *self.state.lock().unwrap();
        let before = state.written_nodes.len();
        write_entrylist(&mut state.out, tree, kind, entries, &mut state.written_nodes)?;
        state.num_written += state.written_nodes.len() - before + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vernier_context::Properties;
    use vernier_transit::{AttrType, Value};

    #[test]
    fn escape_special_characters() {
        assert_eq!(escape("a,b=c\\d"), "a\\,b\\=c\\\\d");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn nodes_are_written_before_records_that_cite_them() {
        let tree = ContextTree::new();
        let phase = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let node = tree
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str("main".into()))
            .unwrap();

        let writer = CaliWriter::new(Vec::new());
        writer
            .write_snapshot(&tree, &[Entry::reference(node)])
            .unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        let ctx_line = lines
            .iter()
            .position(|l| l.starts_with("__rec=ctx"))
            .unwrap();
        let node_line = lines
            .iter()
            .position(|l| l.contains(&format!("id={}", node.as_u64())))
            .unwrap();
        let attr_line = lines
            .iter()
            .position(|l| l.contains("data=phase"))
            .unwrap();
        assert!(attr_line < node_line);
        assert!(node_line < ctx_line);
        assert!(lines[ctx_line].contains(&format!("ref={}", node.as_u64())));
    }

    #[test]
    fn nodes_are_deduplicated() {
        let tree = ContextTree::new();
        let phase = tree
            .create_attribute("phase", AttrType::String, Properties::DEFAULT, &[])
            .unwrap();
        let node = tree
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str("main".into()))
            .unwrap();

        let writer = CaliWriter::new(Vec::new());
        writer
            .write_snapshot(&tree, &[Entry::reference(node)])
            .unwrap();
        let count = writer.num_written();
        writer
            .write_snapshot(&tree, &[Entry::reference(node)])
            .unwrap();
        // only the ctx record is new
        assert_eq!(writer.num_written(), count + 1);
    }
}
