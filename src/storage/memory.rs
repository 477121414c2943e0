use super::{StorageEngine, Table};
use crate::core::{ObjectError, Result, Row, RowId, Value};
use std::collections::HashMap;

/// Heap-backed [`StorageEngine`]. Synchronization is left to the owning
/// session, which serializes writers.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: HashMap<String, Table>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| ObjectError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| ObjectError::TableNotFound(name.to_string()))
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names = self.tables.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl StorageEngine for InMemoryStorage {
    fn create_table(&mut self, table: &str, column_count: usize) -> Result<()> {
        if let Some(existing) = self.tables.get(table) {
            if existing.column_count() != column_count {
                return Err(ObjectError::InvalidState(format!(
                    "Table '{}' already exists with {} columns, requested {}",
                    table,
                    existing.column_count(),
                    column_count
                )));
            }
            return Ok(());
        }

        self.tables
            .insert(table.to_string(), Table::new(table, column_count));
        Ok(())
    }

    fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn insert_row(&mut self, table: &str, row: Row) -> Result<RowId> {
        self.table_mut(table)?.insert(row)
    }

    fn delete_row(&mut self, table: &str, row: RowId) -> Result<Option<Row>> {
        Ok(self.table_mut(table)?.delete(row))
    }

    fn restore_row(&mut self, table: &str, id: RowId, row: Row) -> Result<()> {
        self.table_mut(table)?.restore(id, row)
    }

    fn resolve_row(&self, table: &str, row: RowId) -> bool {
        self.tables
            .get(table)
            .map(|t| t.contains(row))
            .unwrap_or(false)
    }

    fn read_field(&self, table: &str, row: RowId, column: usize) -> Result<Value> {
        self.table(table)?.read(row, column)
    }

    fn write_field(
        &mut self,
        table: &str,
        row: RowId,
        column: usize,
        value: Value,
    ) -> Result<Value> {
        self.table_mut(table)?.write(row, column, value)
    }

    fn scan_rows(&self, table: &str) -> Result<Vec<(RowId, Row)>> {
        Ok(self.table(table)?.scan())
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.row_count())
    }

    fn create_index(&mut self, table: &str, column: usize) -> Result<()> {
        self.table_mut(table)?.create_index(column)
    }

    fn find_rows(&self, table: &str, column: usize, value: &Value) -> Result<Vec<RowId>> {
        self.table(table)?.find(column, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_is_idempotent() {
        let mut storage = InMemoryStorage::new();
        storage.create_table("class_Dog", 2).unwrap();
        storage.create_table("class_Dog", 2).unwrap();
        assert!(storage.create_table("class_Dog", 3).is_err());
        assert_eq!(storage.list_tables(), vec!["class_Dog".to_string()]);
    }

    #[test]
    fn test_missing_table() {
        let storage = InMemoryStorage::new();
        assert!(matches!(
            storage.read_field("class_Cat", 0, 0),
            Err(ObjectError::TableNotFound(_))
        ));
        assert!(!storage.resolve_row("class_Cat", 0));
    }

    #[test]
    fn test_delete_and_restore() {
        let mut storage = InMemoryStorage::new();
        storage.create_table("class_Dog", 1).unwrap();
        let id = storage.insert_row("class_Dog", vec![Value::from("Rex")]).unwrap();

        let removed = storage.delete_row("class_Dog", id).unwrap().unwrap();
        assert!(!storage.resolve_row("class_Dog", id));

        storage.restore_row("class_Dog", id, removed).unwrap();
        assert_eq!(
            storage.read_field("class_Dog", id, 0).unwrap(),
            Value::from("Rex")
        );
    }
}
