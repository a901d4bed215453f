//! Registry of open tables, keyed by table id and by name.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DbError, DbResult};
use crate::heap_table::HeapTable;
use crate::tuple::{FieldType, Schema};

struct TableEntry {
    name: String,
    primary_key: Option<String>,
    table: Arc<HeapTable>,
}

#[derive(Default)]
struct CatalogState {
    tables: HashMap<u32, TableEntry>,
    names: HashMap<String, u32>,
}

pub struct Catalog {
    page_size: usize,
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            state: RwLock::new(CatalogState::default()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Registers an open table under `name`. A table already registered under
    /// the same name is replaced.
    pub fn add_table(
        &self,
        table: HeapTable,
        name: &str,
        primary_key: Option<&str>,
    ) -> DbResult<Arc<HeapTable>> {
        if table.page_size() != self.page_size {
            return Err(DbError::Catalog(format!(
                "table {name:?} uses {}-byte pages, catalog expects {}",
                table.page_size(),
                self.page_size
            )));
        }
        let mut state = self.state.write();
        let id = table.id();
        if let Some(existing) = state.tables.get(&id) {
            if existing.table.path().canonicalize().ok() != table.path().canonicalize().ok() {
                return Err(DbError::Catalog(format!(
                    "table id {id} of {:?} collides with {:?}",
                    table.path(),
                    existing.table.path()
                )));
            }
        }
        if let Some(old_id) = state.names.remove(name) {
            state.tables.remove(&old_id);
        }
        if let Some(old) = state.tables.remove(&id) {
            state.names.remove(&old.name);
        }

        let table = Arc::new(table);
        state.names.insert(name.to_string(), id);
        state.tables.insert(
            id,
            TableEntry {
                name: name.to_string(),
                primary_key: primary_key.map(str::to_string),
                table: Arc::clone(&table),
            },
        );
        log::info!("added table {name} ({id}) with schema {}", table.schema());
        Ok(table)
    }

    /// Opens (or creates) the file at `path` and registers it.
    pub fn open_table<P: AsRef<Path>>(
        &self,
        path: P,
        name: &str,
        schema: Schema,
        primary_key: Option<&str>,
    ) -> DbResult<Arc<HeapTable>> {
        let table = HeapTable::open(path, Arc::new(schema), self.page_size)?;
        self.add_table(table, name, primary_key)
    }

    pub fn table(&self, table_id: u32) -> DbResult<Arc<HeapTable>> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .map(|e| Arc::clone(&e.table))
            .ok_or(DbError::UnknownTable(table_id))
    }

    pub fn table_id(&self, name: &str) -> DbResult<u32> {
        self.state
            .read()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::UnknownTableName(name.to_string()))
    }

    pub fn schema(&self, table_id: u32) -> DbResult<Arc<Schema>> {
        Ok(Arc::clone(self.table(table_id)?.schema()))
    }

    pub fn table_name(&self, table_id: u32) -> DbResult<String> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .map(|e| e.name.clone())
            .ok_or(DbError::UnknownTable(table_id))
    }

    pub fn primary_key(&self, table_id: u32) -> DbResult<Option<String>> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .map(|e| e.primary_key.clone())
            .ok_or(DbError::UnknownTable(table_id))
    }

    /// Ids of every registered table, sorted by table name.
    pub fn table_ids(&self) -> Vec<u32> {
        let state = self.state.read();
        let mut named: Vec<(&String, u32)> = state.names.iter().map(|(n, id)| (n, *id)).collect();
        named.sort();
        named.into_iter().map(|(_, id)| id).collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.tables.clear();
        state.names.clear();
    }

    /// Loads table definitions from a catalog file, one per line:
    ///
    /// ```text
    /// name (field type[ pk], field type, ...)
    /// ```
    ///
    /// where `type` is `int` or `string`. Each table's data lives next to the
    /// catalog file in `<name>.dat`. Returns the ids of the loaded tables.
    pub fn load_schema<P: AsRef<Path>>(&self, catalog_file: P) -> DbResult<Vec<u32>> {
        let catalog_file = catalog_file.as_ref();
        let text = fs::read_to_string(catalog_file)?;
        let base = catalog_file
            .canonicalize()?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut ids = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let def = parse_table_line(line)?;
            let path = base.join(format!("{}.dat", def.name));
            let table = self.open_table(path, &def.name, def.schema, def.primary_key.as_deref())?;
            ids.push(table.id());
        }
        Ok(ids)
    }
}

struct TableDef {
    name: String,
    schema: Schema,
    primary_key: Option<String>,
}

fn parse_table_line(line: &str) -> DbResult<TableDef> {
    let invalid = || DbError::Catalog(format!("invalid catalog entry: {line:?}"));
    let open = line.find('(').ok_or_else(invalid)?;
    let close = line.rfind(')').filter(|&c| c > open).ok_or_else(invalid)?;
    let name = line[..open].trim();
    if name.is_empty() {
        return Err(invalid());
    }

    let mut fields = Vec::new();
    let mut primary_key = None;
    for column in line[open + 1..close].split(',') {
        let parts: Vec<&str> = column.split_whitespace().collect();
        let (field, ty, annotation) = match parts.as_slice() {
            [field, ty] => (*field, *ty, None),
            [field, ty, annotation] => (*field, *ty, Some(*annotation)),
            _ => return Err(invalid()),
        };
        let ty = match ty.to_lowercase().as_str() {
            "int" => FieldType::Int,
            "string" => FieldType::Str,
            other => return Err(DbError::Catalog(format!("unknown type {other:?} in {line:?}"))),
        };
        match annotation {
            None => {}
            Some("pk") => primary_key = Some(field.to_string()),
            Some(other) => {
                return Err(DbError::Catalog(format!("unknown annotation {other:?} in {line:?}")))
            }
        }
        fields.push((ty, field.to_string()));
    }

    Ok(TableDef {
        name: name.to_string(),
        schema: Schema::new(fields),
        primary_key,
    })
}
