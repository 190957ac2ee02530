use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dbfile::DbFile;
use crate::error::{DbError, DbResult};
use crate::tuple::TupleDesc;

struct Entry {
    file: Arc<dyn DbFile>,
    name: String,
}

/// Table-id → file mapping, rebuilt in memory on every process start (no
/// persisted metadata, per the engine's scope). Table ids are derived from
/// a file's canonical path (`page_id::table_id_of`), so re-adding the same
/// path always resolves to the same id.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<u64, Entry>>,
    by_name: RwLock<HashMap<String, u64>>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn add_table(&self, file: Arc<dyn DbFile>, name: impl Into<String>) {
        let name = name.into();
        let table_id = file.table_id();
        self.by_name.write().unwrap().insert(name.clone(), table_id);
        self.tables.write().unwrap().insert(table_id, Entry { file, name });
    }

    pub fn get_file(&self, table_id: u64) -> DbResult<Arc<dyn DbFile>> {
        self.tables
            .read()
            .unwrap()
            .get(&table_id)
            .map(|e| e.file.clone())
            .ok_or_else(|| DbError::NotFound(format!("table {:x}", table_id)))
    }

    pub fn get_tuple_desc(&self, table_id: u64) -> DbResult<TupleDesc> {
        Ok(self.get_file(table_id)?.tuple_desc().clone())
    }

    pub fn table_id_by_name(&self, name: &str) -> DbResult<u64> {
        self.by_name
            .read()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("table named {}", name)))
    }

    pub fn table_name(&self, table_id: u64) -> Option<String> {
        self.tables.read().unwrap().get(&table_id).map(|e| e.name.clone())
    }
}
