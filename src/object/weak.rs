use crate::core::{ObjectError, Result, RowId};
use crate::schema::SchemaDescriptor;
use crate::session::{Session, SessionId, SessionInner};
use std::fmt;
use std::sync::{Arc, Weak};

use super::ObjectAccessor;

/// Coordinates of a managed object's row, without keeping the object or its
/// session alive.
///
/// A handle is a value: it may be cloned, sent to another thread and
/// resolved any number of times. Each [`resolve`](Self::resolve) re-validates
/// the row and builds an independent accessor.
#[derive(Clone)]
pub struct WeakObjectHandle {
    session: Weak<SessionInner>,
    session_id: SessionId,
    schema: Arc<SchemaDescriptor>,
    row: RowId,
}

impl WeakObjectHandle {
    /// Capture the row behind a managed object.
    pub fn capture(object: &ObjectAccessor) -> Result<Self> {
        let (session, row) = object.live_session()?;
        Ok(Self {
            session: Arc::downgrade(&session),
            session_id: session.id(),
            schema: object.schema().clone(),
            row,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn table(&self) -> &str {
        self.schema.table_name()
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn row(&self) -> RowId {
        self.row
    }

    /// Whether the session is still open; says nothing about the row.
    pub fn is_session_alive(&self) -> bool {
        self.session.upgrade().is_some_and(|s| s.is_open())
    }

    /// Bind a new accessor to the captured row.
    pub fn resolve(&self) -> Result<ObjectAccessor> {
        let session = self
            .session
            .upgrade()
            .filter(|s| s.is_open())
            .ok_or_else(|| {
                ObjectError::DetachedAccessor(format!(
                    "session {} of {}[{}] is no longer open",
                    self.session_id,
                    self.table(),
                    self.row
                ))
            })?;
        ObjectAccessor::bind_managed(&Session::from_inner(session), self.schema.clone(), self.row)
    }
}

impl PartialEq for WeakObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
            && self.row == other.row
            && self.table() == other.table()
    }
}

impl Eq for WeakObjectHandle {}

impl fmt::Debug for WeakObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObjectHandle")
            .field("session", &self.session_id)
            .field("table", &self.table())
            .field("row", &self.row)
            .finish()
    }
}
