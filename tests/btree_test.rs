use std::sync::Arc;

use slotdb::btree::file::BTreeFile;
use slotdb::config::Config;
use slotdb::engine::Engine;
use slotdb::field::{Field, Type};
use slotdb::predicate::Op;
use slotdb::tuple::{Tuple, TupleDesc};

fn row_desc() -> TupleDesc {
    TupleDesc::new(vec![(Type::Int, "key"), (Type::Int, "value")])
}

fn row(key: i32) -> Tuple {
    Tuple::new(row_desc(), vec![Field::Int(key), Field::Int(key * 10)])
}

fn small_page_config() -> Config {
    // small enough that a few hundred inserts force several leaf splits
    Config {
        page_size: 256,
        ..Config::default()
    }
}

fn open(dir: &tempfile::TempDir, config: Config) -> (Engine, u64, Arc<BTreeFile>) {
    let path = dir.path().join("index.btr");
    let engine = Engine::new(config);
    let file = Arc::new(BTreeFile::new(&path, row_desc(), 0, config).unwrap());
    let table_id = file.table_id();
    engine.add_table(file.clone(), "idx");
    (engine, table_id, file)
}

#[test]
fn keeps_keys_sorted_across_many_leaf_splits() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, table_id, _file) = open(&dir, small_page_config());

    let tid = engine.begin_transaction();
    // insert out of order so splitting has to place keys correctly rather
    // than just appending
    for key in (0..300).rev() {
        engine.insert_tuple(tid, table_id, row(key)).unwrap();
    }
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let keys: Vec<i32> = engine
        .scan(tid, table_id)
        .unwrap()
        .map(|t| t.unwrap().get_field(0).as_int().unwrap())
        .collect();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(keys, (0..300).collect::<Vec<_>>());
}

#[test]
fn range_scan_seeks_and_stops_early() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, table_id, file) = open(&dir, small_page_config());

    let tid = engine.begin_transaction();
    for key in 0..200 {
        engine.insert_tuple(tid, table_id, row(key)).unwrap();
    }
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let ge: Vec<i32> = file
        .clone()
        .scan_predicate(engine.catalog(), engine.buffer_pool(), tid, Op::GreaterThanOrEq, Field::Int(190))
        .unwrap()
        .map(|t| t.unwrap().get_field(0).as_int().unwrap())
        .collect();
    let lt: Vec<i32> = file
        .clone()
        .scan_predicate(engine.catalog(), engine.buffer_pool(), tid, Op::LessThan, Field::Int(5))
        .unwrap()
        .map(|t| t.unwrap().get_field(0).as_int().unwrap())
        .collect();
    engine.transaction_complete(tid, true).unwrap();

    assert_eq!(ge, (190..200).collect::<Vec<_>>());
    assert_eq!(lt, (0..5).collect::<Vec<_>>());
}

#[test]
fn delete_keeps_the_tree_readable_after_many_removals() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, table_id, _file) = open(&dir, small_page_config());

    let tid = engine.begin_transaction();
    for key in 0..300 {
        engine.insert_tuple(tid, table_id, row(key)).unwrap();
    }
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let rows: Vec<Tuple> = engine.scan(tid, table_id).unwrap().map(|t| t.unwrap()).collect();
    for t in rows.iter().filter(|t| t.get_field(0).as_int().unwrap() % 3 == 0) {
        engine.delete_tuple(tid, t).unwrap();
    }
    engine.transaction_complete(tid, true).unwrap();

    let tid = engine.begin_transaction();
    let remaining: Vec<i32> = engine
        .scan(tid, table_id)
        .unwrap()
        .map(|t| t.unwrap().get_field(0).as_int().unwrap())
        .collect();
    engine.transaction_complete(tid, true).unwrap();

    let expected: Vec<i32> = (0..300).filter(|k| k % 3 != 0).collect();
    assert_eq!(remaining, expected);
}
