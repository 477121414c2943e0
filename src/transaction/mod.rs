// ============================================================================
// Transaction Module
// ============================================================================
//
// Single-writer transactions with an undo journal:
// - State Pattern: Active -> Committed/Aborted
// - Command Pattern: every row change is reversible
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{TransactionId, TransactionState, WriteTransaction};
