// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Command Pattern for reversible row operations. Changes are applied to the
// storage engine immediately and journaled; cancelling a write transaction
// replays the journal backwards through `undo`.
//
// ============================================================================

use crate::core::{Result, Row, RowId, Value};
use crate::storage::StorageEngine;

/// A single reversible change recorded in a write transaction
#[derive(Debug, Clone)]
pub enum Change {
    /// A row was inserted
    InsertRow { table: String, row: RowId },

    /// One field of a row was overwritten
    UpdateField {
        table: String,
        row: RowId,
        column: usize,
        old_value: Value,
    },

    /// A row was deleted
    DeleteRow {
        table: String,
        row: RowId,
        old_row: Row,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateField { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn row(&self) -> RowId {
        match self {
            Change::InsertRow { row, .. }
            | Change::UpdateField { row, .. }
            | Change::DeleteRow { row, .. } => *row,
        }
    }

    /// Revert this change against `engine`
    pub fn undo(self, engine: &mut dyn StorageEngine) -> Result<()> {
        match self {
            Change::InsertRow { table, row } => {
                engine.delete_row(&table, row)?;
            }
            Change::UpdateField {
                table,
                row,
                column,
                old_value,
            } => {
                engine.write_field(&table, row, column, old_value)?;
            }
            Change::DeleteRow {
                table,
                row,
                old_row,
            } => {
                engine.restore_row(&table, row, old_row)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    #[test]
    fn test_change_table_name() {
        let change = Change::InsertRow {
            table: "class_Dog".to_string(),
            row: 1,
        };
        assert_eq!(change.table_name(), "class_Dog");
        assert_eq!(change.row(), 1);
    }

    #[test]
    fn test_undo_in_reverse_restores_state() {
        let mut storage = InMemoryStorage::new();
        storage.create_table("class_Dog", 1).unwrap();
        let id = storage
            .insert_row("class_Dog", vec![Value::from("Rex")])
            .unwrap();

        let mut journal = Vec::new();
        let old_value = storage
            .write_field("class_Dog", id, 0, Value::from("Fido"))
            .unwrap();
        journal.push(Change::UpdateField {
            table: "class_Dog".into(),
            row: id,
            column: 0,
            old_value,
        });
        let old_row = storage.delete_row("class_Dog", id).unwrap().unwrap();
        journal.push(Change::DeleteRow {
            table: "class_Dog".into(),
            row: id,
            old_row,
        });

        for change in journal.into_iter().rev() {
            change.undo(&mut storage).unwrap();
        }

        assert_eq!(
            storage.read_field("class_Dog", id, 0).unwrap(),
            Value::from("Rex")
        );
    }
}
