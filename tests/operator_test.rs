use std::sync::Arc;

use slotdb::config::Config;
use slotdb::engine::Engine;
use slotdb::field::{Field, Type};
use slotdb::heap::file::HeapFile;
use slotdb::operator::{AggOp, Aggregate, Delete, Filter, Insert, Join, JoinPredicate, SeqScan};
use slotdb::predicate::{Op, Predicate};
use slotdb::tuple::{Tuple, TupleDesc};

fn people_desc() -> TupleDesc {
    TupleDesc::new(vec![(Type::Int, "id"), (Type::Int, "dept_id"), (Type::String(16), "name")])
}

fn person(id: i32, dept_id: i32, name: &str) -> Tuple {
    Tuple::new(people_desc(), vec![Field::Int(id), Field::Int(dept_id), Field::Str(name.to_string())])
}

fn depts_desc() -> TupleDesc {
    TupleDesc::new(vec![(Type::Int, "id"), (Type::String(16), "dept_name")])
}

fn dept(id: i32, name: &str) -> Tuple {
    Tuple::new(depts_desc(), vec![Field::Int(id), Field::Str(name.to_string())])
}

fn open_table(dir: &tempfile::TempDir, name: &str, desc: TupleDesc, engine: &Engine) -> u64 {
    let path = dir.path().join(name);
    let file = HeapFile::new(&path, desc, Config::default()).unwrap();
    let table_id = file.table_id();
    engine.add_table(Arc::new(file), name);
    table_id
}

#[test]
fn filter_over_a_seq_scan_keeps_only_matching_rows() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Config::default());
    let people = open_table(&dir, "people", people_desc(), &engine);

    let tid = engine.begin_transaction();
    Insert::execute(
        &engine,
        tid,
        people,
        vec![person(1, 10, "alice"), person(2, 20, "bob"), person(3, 10, "carol")],
    )
    .unwrap();
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let scan = SeqScan::new(&engine, tid, people).unwrap();
    let filtered = Filter::new(scan, Predicate::new(1, Op::Equals, Field::Int(10)));
    let names: Vec<String> = filtered.map(|t| t.unwrap().get_field(2).as_str().unwrap().to_string()).collect();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(names, vec!["alice".to_string(), "carol".to_string()]);
}

#[test]
fn insert_then_delete_changes_what_a_later_scan_sees() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Config::default());
    let people = open_table(&dir, "people", people_desc(), &engine);

    let tid = engine.begin_transaction();
    let inserted = Insert::execute(&engine, tid, people, vec![person(1, 10, "alice"), person(2, 20, "bob")]).unwrap();
    engine.transaction_complete(tid, true).unwrap();
    assert_eq!(inserted, 2);

    let tid = engine.begin_transaction();
    let scan = SeqScan::new(&engine, tid, people).unwrap();
    let to_delete = Filter::new(scan, Predicate::new(2, Op::Equals, Field::Str("bob".to_string())));
    let deleted = Delete::execute(&engine, tid, to_delete).unwrap();
    engine.transaction_complete(tid, true).unwrap();
    assert_eq!(deleted, 1);

    let tid = engine.begin_transaction();
    let names: Vec<String> = SeqScan::new(&engine, tid, people)
        .unwrap()
        .map(|t| t.unwrap().get_field(2).as_str().unwrap().to_string())
        .collect();
    engine.transaction_complete(tid, true).unwrap();
    assert_eq!(names, vec!["alice".to_string()]);
}

#[test]
fn nested_loop_join_matches_rows_on_a_shared_key() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Config::default());
    let people = open_table(&dir, "people", people_desc(), &engine);
    let depts = open_table(&dir, "depts", depts_desc(), &engine);

    let tid = engine.begin_transaction();
    Insert::execute(&engine, tid, people, vec![person(1, 10, "alice"), person(2, 20, "bob"), person(3, 30, "carol")]).unwrap();
    Insert::execute(&engine, tid, depts, vec![dept(10, "eng"), dept(20, "sales")]).unwrap();
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let left = SeqScan::new(&engine, tid, people).unwrap();
    let right: Vec<Tuple> = SeqScan::new(&engine, tid, depts).unwrap().map(|t| t.unwrap()).collect();
    let join = Join::new(
        left,
        right.into_iter().map(Ok),
        people_desc(),
        depts_desc(),
        JoinPredicate::new(1, Op::Equals, 0),
    )
    .unwrap();

    let mut rows: Vec<(String, String)> = join
        .map(|t| {
            let t = t.unwrap();
            (t.get_field(2).as_str().unwrap().to_string(), t.get_field(4).as_str().unwrap().to_string())
        })
        .collect();
    rows.sort();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(
        rows,
        vec![("alice".to_string(), "eng".to_string()), ("bob".to_string(), "sales".to_string())]
    );
}

#[test]
fn aggregate_computes_count_sum_and_group_by() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Config::default());
    let people = open_table(&dir, "people", people_desc(), &engine);

    let tid = engine.begin_transaction();
    Insert::execute(
        &engine,
        tid,
        people,
        vec![person(1, 10, "alice"), person(2, 10, "bob"), person(3, 20, "carol")],
    )
    .unwrap();
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let scan = SeqScan::new(&engine, tid, people).unwrap();
    let total = Aggregate::new(AggOp::Count, 0, None).execute(scan).unwrap();
    engine.transaction_complete(tid, true).unwrap();
    assert_eq!(total, vec![(None, Field::Int(3))]);

    let tid = engine.begin_transaction();
    let scan = SeqScan::new(&engine, tid, people).unwrap();
    let mut by_dept = Aggregate::new(AggOp::Count, 0, Some(1)).execute(scan).unwrap();
    by_dept.sort_by_key(|(k, _)| k.as_ref().and_then(|f| f.as_int()).unwrap());
    engine.transaction_complete(tid, true).unwrap();
    assert_eq!(by_dept, vec![(Some(Field::Int(10)), Field::Int(2)), (Some(Field::Int(20)), Field::Int(1))]);
}
