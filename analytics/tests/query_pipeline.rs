use vernier_analytics::cali_writer::CaliWriter;
use vernier_analytics::calql::parse_query;
use vernier_analytics::{read_stream, MetadataDb, QueryProcessor};
use vernier_context::{Entry, EntryList, NodeId, Properties};
use vernier_transit::{AttrType, Value};

fn run_query(db: &MetadataDb, query: &str, records: &[EntryList]) -> String {
    let spec = parse_query(query).unwrap();
    let mut pipeline = QueryProcessor::new(&spec).unwrap();
    let mut out = vec![];
    for rec in records {
        pipeline.process_record(db, rec.clone(), &mut out).unwrap();
    }
    pipeline.flush(db, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn nested_regions_to_table() {
    // two nested by-name regions, one snapshot
    let stream = "\
__rec=node,id=30,attr=8,data=phase,parent=3
__rec=node,id=31,attr=30,data=init
__rec=node,id=32,attr=8,data=function,parent=3
__rec=node,id=33,attr=32,data=setup,parent=31
__rec=ctx,ref=33
";
    let mut db = MetadataDb::new();
    let mut records = vec![];
    read_stream(&mut db, stream.as_bytes(), |_, rec| records.push(rec)).unwrap();

    let out = run_query(
        &db,
        "SELECT phase, function, count() GROUP BY phase, function FORMAT table",
        &records,
    );
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0].split_whitespace().collect::<Vec<_>>(),
        vec!["phase", "function", "count"]
    );
    assert_eq!(
        lines[1].split_whitespace().collect::<Vec<_>>(),
        vec!["init", "setup", "1"]
    );
}

#[test]
fn value_stacking_groups() {
    // begin x=1, begin x=2, snapshot, end, snapshot, end
    let stream = "\
__rec=node,id=30,attr=8,data=x,parent=1
__rec=node,id=31,attr=30,data=1
__rec=node,id=32,attr=30,data=2,parent=31
__rec=ctx,ref=32
__rec=ctx,ref=31
";
    let mut db = MetadataDb::new();
    let mut records = vec![];
    read_stream(&mut db, stream.as_bytes(), |_, rec| records.push(rec)).unwrap();

    let out = run_query(
        &db,
        "SELECT x, count() GROUP BY x ORDER BY x DESC FORMAT expand",
        &records,
    );
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec!["x=2,count=1", "x=1,count=1"]
    );
}

#[test]
fn stream_round_trip_preserves_records() {
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

    let writer = CaliWriter::new(Vec::new());
    let mut originals = vec![];
    for (p, t) in [("a", 1.5), ("b", 2.5), ("a", 3.5)] {
        let node = db
            .tree()
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str(p.into()))
            .unwrap();
        let rec = vec![
            Entry::reference(node),
            Entry::immediate(time.id(), Value::Double(t)),
        ];
        writer.write_snapshot(db.tree(), &rec).unwrap();
        originals.push((p.to_string(), t));
    }
    let text = String::from_utf8(writer.into_inner()).unwrap();

    let mut db2 = MetadataDb::new();
    let mut decoded = vec![];
    read_stream(&mut db2, text.as_bytes(), |db, rec| {
        let phase = db.get_attribute("phase").unwrap();
        let time = db.get_attribute("time").unwrap();
        let p = rec
            .iter()
            .find_map(|e| e.value_of(db.tree(), phase.id()))
            .unwrap()
            .to_string();
        let t = rec
            .iter()
            .find_map(|e| e.value_of(db.tree(), time.id()))
            .unwrap()
            .to_double()
            .unwrap();
        decoded.push((p, t));
    })
    .unwrap();

    let mut expected = originals.clone();
    let mut actual = decoded.clone();
    expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
    actual.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(expected, actual);
}

#[test]
fn merging_the_same_stream_twice_adds_no_nodes() {
    let stream = "\
__rec=node,id=30,attr=8,data=foo,parent=3
__rec=node,id=31,attr=30,data=bar
__rec=ctx,ref=31
";
    let mut db = MetadataDb::new();
    read_stream(&mut db, stream.as_bytes(), |_, _| {}).unwrap();
    let nodes_after_first = db.tree().num_nodes();
    read_stream(&mut db, stream.as_bytes(), |_, _| {}).unwrap();
    assert_eq!(db.tree().num_nodes(), nodes_after_first);
}

#[test]
fn two_streams_merge_into_one_definition() {
    // the same attribute under different foreign ids in two streams
    let stream_a = "\
__rec=node,id=40,attr=8,data=foo,parent=3
__rec=node,id=41,attr=40,data=hello
__rec=ctx,ref=41
";
    let stream_b = "\
__rec=node,id=70,attr=8,data=foo,parent=3
__rec=node,id=71,attr=70,data=hello
__rec=ctx,ref=71
";
    let mut db = MetadataDb::new();
    let mut nodes = vec![];
    read_stream(&mut db, stream_a.as_bytes(), |_, rec| {
        nodes.push(rec[0].node().unwrap());
    })
    .unwrap();
    let after_first = db.tree().num_nodes();
    read_stream(&mut db, stream_b.as_bytes(), |_, rec| {
        nodes.push(rec[0].node().unwrap());
    })
    .unwrap();

    // both streams' snapshots resolve to the same local node
    assert_eq!(db.tree().num_nodes(), after_first);
    assert_eq!(nodes[0], nodes[1]);
}

#[test]
fn permuted_input_gives_identical_output() {
    let mut db = MetadataDb::new();
    let base = "\
__rec=node,id=30,attr=8,data=phase,parent=3
__rec=node,id=31,attr=30,data=a
__rec=node,id=32,attr=30,data=b
";
    read_stream(&mut db, base.as_bytes(), |_, _| {}).unwrap();
    let time = db
        .tree()
        .create_attribute(
            "time",
            AttrType::Double,
            Properties::DEFAULT.with(Properties::AS_VALUE),
            &[],
        )
        .unwrap();
    let phase = db.get_attribute("phase").unwrap();
    let rec = |p: &str, t: f64| {
        let node = db
            .tree()
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str(p.into()))
            .unwrap();
        vec![
            Entry::reference(node),
            Entry::immediate(time.id(), Value::Double(t)),
        ]
    };
    let records = vec![rec("a", 1.0), rec("b", 2.0), rec("a", 3.0), rec("b", 4.0)];
    let query = "SELECT phase, sum(time), count() GROUP BY phase ORDER BY phase FORMAT table";

    let forward = run_query(&db, query, &records);
    let mut reversed = records.clone();
    reversed.reverse();
    let backward = run_query(&db, query, &reversed);
    assert_eq!(forward, backward);
}

#[test]
fn percent_total_scenario() {
    let mut db = MetadataDb::new();
    let base = "\
__rec=node,id=30,attr=8,data=phase,parent=3
__rec=node,id=31,attr=30,data=a
__rec=node,id=32,attr=30,data=b
";
    read_stream(&mut db, base.as_bytes(), |_, _| {}).unwrap();
    let phase = db.get_attribute("phase").unwrap();
    let time = db
        .tree()
        .create_attribute(
            "time",
            AttrType::Double,
            Properties::DEFAULT.with(Properties::AS_VALUE),
            &[],
        )
        .unwrap();
    let rec = |p: &str, t: f64| {
        let node = db
            .tree()
            .get_or_create_child(NodeId::ROOT, phase.id(), &Value::Str(p.into()))
            .unwrap();
        vec![
            Entry::reference(node),
            Entry::immediate(time.id(), Value::Double(t)),
        ]
    };

    let out = run_query(
        &db,
        "SELECT phase, sum(time) AS t, percent_total(time) AS p \
         GROUP BY phase ORDER BY t DESC FORMAT expand",
        &[rec("a", 10.0), rec("b", 30.0), rec("a", 10.0)],
    );
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec!["phase=b,t=30,p=60", "phase=a,t=20,p=40"]
    );
}

#[test]
fn cali_output_can_be_read_back() {
    let mut db = MetadataDb::new();
    let base = "\
__rec=node,id=30,attr=8,data=phase,parent=3
__rec=node,id=31,attr=30,data=main
__rec=ctx,ref=31
";
    let mut records = vec![];
    read_stream(&mut db, base.as_bytes(), |_, rec| records.push(rec)).unwrap();

    // default format: re-emit the stream
    let out = run_query(&db, "", &records);
    let mut db2 = MetadataDb::new();
    let mut count = 0;
    read_stream(&mut db2, out.as_bytes(), |db, rec| {
        let phase = db.get_attribute("phase").unwrap();
        assert_eq!(
            rec[0].value_of(db.tree(), phase.id()),
            Some(Value::Str("main".into()))
        );
        count += 1;
    })
    .unwrap();
    assert_eq!(count, 1);
}
