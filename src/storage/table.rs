use crate::core::{ObjectError, Result, Row, RowId, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Row storage for one object type.
///
/// Rows are addressed by a monotonically assigned [`RowId`] that is never
/// reused, so a deleted row's id stays stale forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    name: String,
    column_count: usize,
    rows: BTreeMap<RowId, Row>,
    next_row_id: RowId,
    indexes: HashMap<usize, HashMap<Value, BTreeSet<RowId>>>,
}

impl Table {
    pub fn new(name: impl Into<String>, column_count: usize) -> Self {
        Self {
            name: name.into(),
            column_count,
            rows: BTreeMap::new(),
            next_row_id: 0,
            indexes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn insert(&mut self, row: Row) -> Result<RowId> {
        self.validate_row(&row)?;

        let id = self.next_row_id;
        self.next_row_id += 1;

        self.update_indexes(id, &row);
        self.rows.insert(id, row);
        Ok(id)
    }

    /// Put a previously deleted row back under its original id.
    pub fn restore(&mut self, id: RowId, row: Row) -> Result<()> {
        self.validate_row(&row)?;
        if self.rows.contains_key(&id) {
            return Err(ObjectError::InvalidState(format!(
                "Row {} already exists in table '{}'",
                id, self.name
            )));
        }
        self.update_indexes(id, &row);
        self.rows.insert(id, row);
        self.next_row_id = self.next_row_id.max(id + 1);
        Ok(())
    }

    pub fn delete(&mut self, id: RowId) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        self.remove_from_indexes(id, &row);
        Some(row)
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn read(&self, id: RowId, column: usize) -> Result<Value> {
        let row = self.row(id)?;
        row.get(column).cloned().ok_or_else(|| self.column_error(column))
    }

    /// Overwrite a single field, returning the previous value.
    pub fn write(&mut self, id: RowId, column: usize, value: Value) -> Result<Value> {
        if column >= self.column_count {
            return Err(self.column_error(column));
        }
        let old = self.read(id, column)?;
        if let Some(index) = self.indexes.get_mut(&column) {
            remove_index_entry(index, &old, id);
            index.entry(value.clone()).or_default().insert(id);
        }
        if let Some(row) = self.rows.get_mut(&id) {
            row[column] = value;
        }
        Ok(old)
    }

    pub fn scan(&self) -> Vec<(RowId, Row)> {
        self.rows
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn create_index(&mut self, column: usize) -> Result<()> {
        if column >= self.column_count {
            return Err(self.column_error(column));
        }
        if self.indexes.contains_key(&column) {
            return Ok(());
        }

        let mut index: HashMap<Value, BTreeSet<RowId>> = HashMap::new();
        for (id, row) in &self.rows {
            index.entry(row[column].clone()).or_default().insert(*id);
        }
        self.indexes.insert(column, index);
        Ok(())
    }

    pub fn has_index(&self, column: usize) -> bool {
        self.indexes.contains_key(&column)
    }

    /// Rows whose `column` equals `value`, using the index when one exists.
    pub fn find(&self, column: usize, value: &Value) -> Result<Vec<RowId>> {
        if column >= self.column_count {
            return Err(self.column_error(column));
        }
        if let Some(index) = self.indexes.get(&column) {
            return Ok(index
                .get(value)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default());
        }
        Ok(self
            .rows
            .iter()
            .filter(|(_, row)| &row[column] == value)
            .map(|(id, _)| *id)
            .collect())
    }

    fn row(&self, id: RowId) -> Result<&Row> {
        self.rows.get(&id).ok_or_else(|| ObjectError::StaleRow {
            table: self.name.clone(),
            row: id,
        })
    }

    fn column_error(&self, column: usize) -> ObjectError {
        ObjectError::InvalidState(format!(
            "Column {} out of range for table '{}' ({} columns)",
            column, self.name, self.column_count
        ))
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.column_count {
            return Err(ObjectError::InvalidState(format!(
                "Expected {} columns, got {}",
                self.column_count,
                row.len()
            )));
        }
        Ok(())
    }

    fn update_indexes(&mut self, id: RowId, row: &Row) {
        for (column, index) in self.indexes.iter_mut() {
            index.entry(row[*column].clone()).or_default().insert(id);
        }
    }

    fn remove_from_indexes(&mut self, id: RowId, row: &Row) {
        for (column, index) in self.indexes.iter_mut() {
            remove_index_entry(index, &row[*column], id);
        }
    }
}

fn remove_index_entry(index: &mut HashMap<Value, BTreeSet<RowId>>, value: &Value, id: RowId) {
    if let Some(ids) = index.get_mut(value) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(value);
        }
    }
}
