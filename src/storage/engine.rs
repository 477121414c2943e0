use crate::core::{Result, Row, RowId, Value};

/// Storage engine trait - the row-level contract object accessors are built on.
///
/// Implementations own the persisted layout; accessors only ever address a
/// row by `(table, row id)` and a field by its column position.
pub trait StorageEngine: Send + Sync {
    /// Create a table with the given number of columns. Creating an existing
    /// table with the same arity is a no-op.
    fn create_table(&mut self, table: &str, column_count: usize) -> Result<()>;

    /// Check if a table exists
    fn table_exists(&self, table: &str) -> bool;

    /// Insert a row, returning its newly assigned id
    fn insert_row(&mut self, table: &str, row: Row) -> Result<RowId>;

    /// Delete a row, returning its last contents
    fn delete_row(&mut self, table: &str, row: RowId) -> Result<Option<Row>>;

    /// Re-insert a deleted row under its original id
    fn restore_row(&mut self, table: &str, id: RowId, row: Row) -> Result<()>;

    /// Whether `row` still resolves in `table`
    fn resolve_row(&self, table: &str, row: RowId) -> bool;

    /// Read one field of a row
    fn read_field(&self, table: &str, row: RowId, column: usize) -> Result<Value>;

    /// Overwrite one field of a row, returning the previous value
    fn write_field(&mut self, table: &str, row: RowId, column: usize, value: Value)
    -> Result<Value>;

    /// All live rows of a table, in row id order
    fn scan_rows(&self, table: &str) -> Result<Vec<(RowId, Row)>>;

    /// Get table row count
    fn row_count(&self, table: &str) -> Result<usize>;

    /// Create an equality index on a column
    fn create_index(&mut self, table: &str, column: usize) -> Result<()>;

    /// Row ids whose `column` equals `value`
    fn find_rows(&self, table: &str, column: usize, value: &Value) -> Result<Vec<RowId>>;
}
