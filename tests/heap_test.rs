use std::sync::Arc;

use slotdb::config::Config;
use slotdb::engine::Engine;
use slotdb::field::{Field, Type};
use slotdb::heap::file::HeapFile;
use slotdb::tuple::{Tuple, TupleDesc};

fn row_desc() -> TupleDesc {
    TupleDesc::new(vec![(Type::Int, "id"), (Type::String(16), "name")])
}

fn row(id: i32, name: &str) -> Tuple {
    Tuple::new(row_desc(), vec![Field::Int(id), Field::Str(name.to_string())])
}

#[test]
fn inserts_and_iterates_in_commit_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.tbl");
    let engine = Engine::new(Config::default());
    let file = HeapFile::new(&path, row_desc(), Config::default()).unwrap();
    let table_id = file.table_id();
    engine.add_table(Arc::new(file), "people");

    let tid = engine.begin_transaction();
    for i in 0..10 {
        engine.insert_tuple(tid, table_id, row(i, &format!("name{}", i))).unwrap();
    }
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let seen: Vec<i32> = engine
        .scan(tid, table_id)
        .unwrap()
        .map(|t| t.unwrap().get_field(0).as_int().unwrap())
        .collect();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn a_page_survives_a_reopen_of_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.tbl");

    {
        let engine = Engine::new(Config::default());
        let file = HeapFile::new(&path, row_desc(), Config::default()).unwrap();
        let table_id = file.table_id();
        engine.add_table(Arc::new(file), "people");

        let tid = engine.begin_transaction();
        engine.insert_tuple(tid, table_id, row(1, "alice")).unwrap();
        engine.insert_tuple(tid, table_id, row(2, "bob")).unwrap();
        engine.transaction_complete(tid, true).unwrap();
    }

    // a fresh engine + file handle over the same path should read back what
    // was flushed at commit, with nothing held in memory from the first run.
    let engine = Engine::new(Config::default());
    let file = HeapFile::new(&path, row_desc(), Config::default()).unwrap();
    let table_id = file.table_id();
    engine.add_table(Arc::new(file), "people");

    let tid = engine.begin_transaction();
    let names: Vec<String> = engine
        .scan(tid, table_id)
        .unwrap()
        .map(|t| t.unwrap().get_field(1).as_str().unwrap().to_string())
        .collect();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
}

#[test]
fn an_aborted_insert_is_not_visible_afterward() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.tbl");
    let engine = Engine::new(Config::default());
    let file = HeapFile::new(&path, row_desc(), Config::default()).unwrap();
    let table_id = file.table_id();
    engine.add_table(Arc::new(file), "people");

    let tid = engine.begin_transaction();
    engine.insert_tuple(tid, table_id, row(1, "alice")).unwrap();
    engine.transaction_complete(tid, false).unwrap();

    let tid = engine.begin_transaction();
    let count = engine.scan(tid, table_id).unwrap().count();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(count, 0);
}

#[test]
fn delete_removes_a_tuple_by_record_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.tbl");
    let engine = Engine::new(Config::default());
    let file = HeapFile::new(&path, row_desc(), Config::default()).unwrap();
    let table_id = file.table_id();
    engine.add_table(Arc::new(file), "people");

    let tid = engine.begin_transaction();
    engine.insert_tuple(tid, table_id, row(1, "alice")).unwrap();
    engine.insert_tuple(tid, table_id, row(2, "bob")).unwrap();
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let bob = engine
        .scan(tid, table_id)
        .unwrap()
        .map(|t| t.unwrap())
        .find(|t| t.get_field(1).as_str() == Some("bob"))
        .unwrap();
    engine.delete_tuple(tid, &bob).unwrap();
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let remaining: Vec<String> = engine
        .scan(tid, table_id)
        .unwrap()
        .map(|t| t.unwrap().get_field(1).as_str().unwrap().to_string())
        .collect();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(remaining, vec!["alice".to_string()]);
}
