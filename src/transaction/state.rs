// ============================================================================
// Write Transaction State Management
// ============================================================================
//
// A session has at most one write transaction at a time. It moves through
// Active -> Committed/Aborted and carries the undo journal for its changes.
//
// ============================================================================

use super::Change;
use crate::core::{ObjectError, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a write transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──cancel──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// An open write transaction and its undo journal
#[derive(Debug)]
pub struct WriteTransaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
    start_time: std::time::Instant,
}

impl WriteTransaction {
    pub fn begin() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            changes: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> Result<()> {
        if !self.state.is_active() {
            return Err(ObjectError::InvalidState(format!(
                "Cannot record change: transaction {} is {}",
                self.id, self.state
            )));
        }

        self.changes.push(change);
        Ok(())
    }

    /// Mark committed, dropping the journal
    pub fn commit(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(ObjectError::InvalidState(format!(
                "Cannot commit: transaction {} is already {}",
                self.id, self.state
            )));
        }

        self.changes.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark aborted and hand back the journal, newest change first
    pub fn abort(&mut self) -> Result<Vec<Change>> {
        if !self.state.is_active() {
            return Err(ObjectError::InvalidState(format!(
                "Cannot cancel: transaction {} is already {}",
                self.id, self.state
            )));
        }

        self.state = TransactionState::Aborted;
        let mut changes = std::mem::take(&mut self.changes);
        changes.reverse();
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::new();
        let id2 = TransactionId::new();
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = WriteTransaction::begin();

        assert_eq!(txn.state(), TransactionState::Active);
        assert!(txn.state().is_active());
        assert!(!txn.state().is_terminal());

        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.state().is_terminal());
        assert!(txn.commit().is_err());
    }

    #[test]
    fn test_abort_returns_changes_newest_first() {
        let mut txn = WriteTransaction::begin();
        txn.record_change(Change::InsertRow {
            table: "class_Dog".into(),
            row: 1,
        })
        .unwrap();
        txn.record_change(Change::InsertRow {
            table: "class_Dog".into(),
            row: 2,
        })
        .unwrap();

        let journal = txn.abort().unwrap();
        assert_eq!(journal.iter().map(Change::row).collect::<Vec<_>>(), vec![2, 1]);
        assert!(txn
            .record_change(Change::InsertRow {
                table: "class_Dog".into(),
                row: 3,
            })
            .is_err());
    }
}
