// ============================================================================
// Session
// ============================================================================
//
// An open view of a storage engine: single-writer transactions with an
// undo journal, a commit generation and commit hooks.
//
// ============================================================================

pub mod dispatch;

pub use dispatch::{Generation, HookId};

use crate::config::SessionConfig;
use crate::core::{ObjectError, Result, Row, RowId, Value};
use crate::object::ObjectAccessor;
use crate::schema::{ObjectModel, SchemaDescriptor, SchemaRegistry};
use crate::storage::{InMemoryStorage, StorageEngine};
use crate::transaction::{Change, WriteTransaction};
use dispatch::CommitDispatcher;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Process-unique session identity.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct SessionInner {
    id: SessionId,
    config: SessionConfig,
    registry: Arc<SchemaRegistry>,
    storage: RwLock<Box<dyn StorageEngine>>,
    transaction: Mutex<Option<WriteTransaction>>,
    generation: AtomicU64,
    open: AtomicBool,
    dispatcher: CommitDispatcher,
}

impl SessionInner {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn in_write_transaction(&self) -> bool {
        self.transaction
            .lock()
            .map(|txn| txn.is_some())
            .unwrap_or(false)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ObjectError::InvalidState(format!(
                "Session '{}' is closed",
                self.config.name
            )))
        }
    }

    /// Run `f` against the storage under a shared lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&dyn StorageEngine) -> Result<R>) -> Result<R> {
        let storage = self.storage.read()?;
        f(&**storage)
    }

    /// Run `f` inside the active write transaction.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut dyn StorageEngine, &mut WriteTransaction) -> Result<R>,
    ) -> Result<R> {
        let mut transaction = self.transaction.lock()?;
        let Some(txn) = transaction.as_mut() else {
            return Err(ObjectError::ReadOnlySession(format!(
                "session '{}' has no active write transaction",
                self.config.name
            )));
        };
        let mut storage = self.storage.write()?;
        f(&mut **storage, txn)
    }

    pub(crate) fn add_hook(&self, hook: dispatch::CommitHook) -> Result<HookId> {
        self.dispatcher.add_hook(hook)
    }

    pub(crate) fn remove_hook(&self, id: HookId) -> Result<bool> {
        self.dispatcher.remove_hook(id)
    }

    /// Insert a fully populated row for `schema`, creating its table on first use.
    pub(crate) fn insert_object(&self, schema: &SchemaDescriptor, row: Row) -> Result<RowId> {
        self.write(|storage, txn| {
            ensure_table(storage, schema)?;
            for value in &row {
                check_link_targets(storage, schema.type_name(), value)?;
            }
            let id = storage.insert_row(schema.table_name(), row)?;
            txn.record_change(Change::InsertRow {
                table: schema.table_name().to_string(),
                row: id,
            })?;
            Ok(id)
        })
    }

    pub(crate) fn update_field(
        &self,
        schema: &SchemaDescriptor,
        row: RowId,
        column: usize,
        value: Value,
    ) -> Result<()> {
        self.write(|storage, txn| {
            if !storage.resolve_row(schema.table_name(), row) {
                return Err(ObjectError::StaleRow {
                    table: schema.table_name().to_string(),
                    row,
                });
            }
            check_link_targets(storage, schema.type_name(), &value)?;
            let old_value = storage.write_field(schema.table_name(), row, column, value)?;
            txn.record_change(Change::UpdateField {
                table: schema.table_name().to_string(),
                row,
                column,
                old_value,
            })
        })
    }

    pub(crate) fn delete_row(&self, table: &str, row: RowId) -> Result<()> {
        self.write(|storage, txn| {
            let old_row = storage
                .delete_row(table, row)?
                .ok_or_else(|| ObjectError::StaleRow {
                    table: table.to_string(),
                    row,
                })?;
            txn.record_change(Change::DeleteRow {
                table: table.to_string(),
                row,
                old_row,
            })
        })
    }
}

fn ensure_table(storage: &mut dyn StorageEngine, schema: &SchemaDescriptor) -> Result<()> {
    if storage.table_exists(schema.table_name()) {
        return Ok(());
    }
    storage.create_table(schema.table_name(), schema.column_count())?;
    for column in schema.indexed_properties().filter_map(|p| p.column) {
        storage.create_index(schema.table_name(), column)?;
    }
    debug!(table = schema.table_name(), "created table");
    Ok(())
}

/// Links written into a row must point at live rows.
fn check_link_targets(storage: &dyn StorageEngine, type_name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Link(link) if !storage.resolve_row(&link.table, link.row) => {
            Err(ObjectError::Validation(format!(
                "'{}' cannot link to {}: the row does not exist",
                type_name, link
            )))
        }
        Value::List(items) => items
            .iter()
            .try_for_each(|item| check_link_targets(storage, type_name, item)),
        _ => Ok(()),
    }
}

/// Handle to an open session.
///
/// Cheap to clone; all clones share one storage view. Object accessors hold
/// only a weak reference, so dropping every `Session` handle detaches them.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open an in-memory session with the default configuration and the
    /// global schema registry.
    pub fn in_memory() -> Result<Self> {
        Self::open(SessionConfig::default())
    }

    pub fn open(config: SessionConfig) -> Result<Self> {
        Self::with_registry(config, SchemaRegistry::global().clone())
    }

    pub fn with_registry(config: SessionConfig, registry: Arc<SchemaRegistry>) -> Result<Self> {
        Self::with_storage(config, registry, Box::new(InMemoryStorage::new()))
    }

    pub fn with_storage(
        config: SessionConfig,
        registry: Arc<SchemaRegistry>,
        storage: Box<dyn StorageEngine>,
    ) -> Result<Self> {
        config.validate().map_err(ObjectError::InvalidState)?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
        debug!(session = id, name = %config.name, read_only = config.read_only, "opened session");

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                config,
                registry,
                storage: RwLock::new(storage),
                transaction: Mutex::new(None),
                generation: AtomicU64::new(0),
                open: AtomicBool::new(true),
                dispatcher: CommitDispatcher::new(),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    /// Current commit generation; advances by one per commit.
    pub fn generation(&self) -> Generation {
        self.inner.generation()
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.is_open()
    }

    pub fn is_in_write_transaction(&self) -> bool {
        self.inner.in_write_transaction()
    }

    // ------------------------------------------------------------------------
    // Write transactions
    // ------------------------------------------------------------------------

    pub fn begin_write(&self) -> Result<()> {
        self.inner.check_open()?;
        if self.inner.config.read_only {
            return Err(ObjectError::ReadOnlySession(format!(
                "session '{}' is read-only",
                self.inner.config.name
            )));
        }

        let mut transaction = self.inner.transaction.lock()?;
        if transaction.is_some() {
            return Err(ObjectError::TransactionInProgress);
        }
        let txn = WriteTransaction::begin();
        debug!(session = self.inner.id, txn = %txn.id(), "begin write");
        *transaction = Some(txn);
        Ok(())
    }

    /// Commit the active write transaction and notify commit hooks.
    ///
    /// Hooks run after every session lock is released, so they may read
    /// freely and may even start a new write transaction.
    pub fn commit_write(&self) -> Result<Generation> {
        let generation = {
            let mut transaction = self.inner.transaction.lock()?;
            let mut txn = transaction.take().ok_or_else(|| {
                ObjectError::InvalidState("no write transaction to commit".to_string())
            })?;
            let changes = txn.change_count();
            txn.commit()?;
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                session = self.inner.id,
                txn = %txn.id(),
                changes,
                generation,
                elapsed_us = txn.duration().as_micros() as u64,
                "commit write"
            );
            generation
        };

        self.inner.dispatcher.dispatch(generation)?;
        Ok(generation)
    }

    /// Roll back every change of the active write transaction.
    pub fn cancel_write(&self) -> Result<()> {
        let mut transaction = self.inner.transaction.lock()?;
        let mut txn = transaction.take().ok_or_else(|| {
            ObjectError::InvalidState("no write transaction to cancel".to_string())
        })?;
        let changes = txn.abort()?;
        debug!(session = self.inner.id, txn = %txn.id(), changes = changes.len(), "cancel write");

        let mut storage = self.inner.storage.write()?;
        for change in changes {
            change.undo(&mut **storage)?;
        }
        Ok(())
    }

    /// Run `f` in a write transaction, committing on success and cancelling
    /// on error.
    pub fn write<R>(&self, f: impl FnOnce(&Session) -> Result<R>) -> Result<R> {
        self.begin_write()?;
        match f(self) {
            Ok(result) => {
                self.commit_write()?;
                Ok(result)
            }
            Err(err) => {
                if let Err(cancel_err) = self.cancel_write() {
                    warn!(error = %cancel_err, "failed to cancel write transaction");
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    /// Resolve the schema of `T` through this session's registry.
    pub fn schema<T: ObjectModel>(&self) -> Result<Arc<SchemaDescriptor>> {
        self.inner.registry.resolve_model::<T>()
    }

    /// Schema of a registered type, by name.
    pub fn schema_for(&self, type_name: &str) -> Result<Arc<SchemaDescriptor>> {
        self.inner.registry.resolve(type_name)
    }

    /// Create a managed object from `values`. Requires a write transaction.
    pub fn create<I, K, V>(&self, schema: &Arc<SchemaDescriptor>, values: I) -> Result<ObjectAccessor>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut object = ObjectAccessor::bind_unmanaged(values, schema.clone())?;
        self.add(&mut object)?;
        Ok(object)
    }

    pub fn create_model<T: ObjectModel>(&self, model: T) -> Result<ObjectAccessor> {
        let schema = self.schema::<T>()?;
        self.create(&schema, model.into_values())
    }

    /// Persist an unmanaged object, turning it into a managed one in place.
    ///
    /// Adding an object already managed by this session is a no-op.
    pub fn add(&self, object: &mut ObjectAccessor) -> Result<()> {
        self.inner.check_open()?;
        object.manage(self)
    }

    /// Delete the row behind a managed object. Requires a write transaction.
    pub fn delete(&self, object: &ObjectAccessor) -> Result<()> {
        self.inner.check_open()?;
        let row = object.row_id().ok_or_else(|| {
            ObjectError::InvalidState("only managed objects can be deleted".to_string())
        })?;
        if object.session_id() != Some(self.inner.id) {
            return Err(ObjectError::InvalidState(
                "object is managed by a different session".to_string(),
            ));
        }
        self.inner.delete_row(object.schema().table_name(), row)
    }

    pub fn object(&self, schema: &Arc<SchemaDescriptor>, row: RowId) -> Result<ObjectAccessor> {
        ObjectAccessor::bind_managed(self, schema.clone(), row)
    }

    /// Every live object of `schema`, in row id order.
    pub fn objects(&self, schema: &Arc<SchemaDescriptor>) -> Result<Vec<ObjectAccessor>> {
        self.inner.check_open()?;
        let rows = self.inner.read(|storage| {
            if !storage.table_exists(schema.table_name()) {
                return Ok(Vec::new());
            }
            Ok(storage
                .scan_rows(schema.table_name())?
                .into_iter()
                .map(|(id, _)| id)
                .collect())
        })?;
        rows.into_iter()
            .map(|row| ObjectAccessor::bind_managed(self, schema.clone(), row))
            .collect()
    }

    /// Objects of `schema` whose `property` equals `value`.
    pub fn find(
        &self,
        schema: &Arc<SchemaDescriptor>,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<ObjectAccessor>> {
        self.inner.check_open()?;
        let descriptor = schema
            .property(property)
            .ok_or_else(|| ObjectError::UnknownProperty {
                type_name: schema.type_name().to_string(),
                property: property.to_string(),
            })?;
        let column = descriptor.column.ok_or_else(|| {
            ObjectError::InvalidState(format!(
                "'{}.{}' is computed and cannot be searched",
                schema.type_name(),
                property
            ))
        })?;
        let value = descriptor.validate(schema.type_name(), value.into())?;

        let rows = self.inner.read(|storage| {
            if !storage.table_exists(schema.table_name()) {
                return Ok(Vec::new());
            }
            storage.find_rows(schema.table_name(), column, &value)
        })?;
        rows.into_iter()
            .map(|row| ObjectAccessor::bind_managed(self, schema.clone(), row))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Commit hooks
    // ------------------------------------------------------------------------

    /// Register `hook` to run once per committed generation.
    pub fn add_commit_hook<F>(&self, hook: F) -> Result<HookId>
    where
        F: Fn(Generation) + Send + Sync + 'static,
    {
        self.inner.check_open()?;
        self.inner.add_hook(Arc::new(hook))
    }

    pub fn remove_commit_hook(&self, id: HookId) -> Result<bool> {
        self.inner.remove_hook(id)
    }

    /// Close the session. Any active write transaction is cancelled and every
    /// commit hook dropped; accessors bound to it become detached.
    pub fn close(&self) -> Result<()> {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.in_write_transaction() {
            self.cancel_write()?;
        }
        self.inner.dispatcher.clear()?;
        debug!(session = self.inner.id, name = %self.inner.config.name, "closed session");
        Ok(())
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("generation", &self.generation())
            .field("open", &self.inner.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PropertyType;
    use crate::schema::{DeclaredProperty, TypeDeclaration};

    fn session() -> (Session, Arc<SchemaDescriptor>) {
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .register(
                TypeDeclaration::new("Dog")
                    .property(DeclaredProperty::scalar("name", PropertyType::Text))
                    .property(DeclaredProperty::scalar("age", PropertyType::Integer)),
                None,
            )
            .unwrap();
        let schema = registry.resolve("Dog").unwrap();
        let session = Session::with_registry(SessionConfig::new("test"), registry).unwrap();
        (session, schema)
    }

    #[test]
    fn test_commit_advances_generation() {
        let (session, schema) = session();
        assert_eq!(session.generation(), 0);

        session.begin_write().unwrap();
        session
            .create(&schema, [("name", Value::from("Rex")), ("age", Value::from(3))])
            .unwrap();
        assert_eq!(session.commit_write().unwrap(), 1);
        assert_eq!(session.objects(&schema).unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_rolls_back() {
        let (session, schema) = session();
        session
            .write(|s| s.create(&schema, [("name", Value::from("Rex")), ("age", Value::from(3))]))
            .unwrap();

        session.begin_write().unwrap();
        let rex = session.objects(&schema).unwrap().remove(0);
        let mut rex_mut = rex.clone();
        rex_mut.write_property("age", 4).unwrap();
        session
            .create(&schema, [("name", Value::from("Fido")), ("age", Value::from(1))])
            .unwrap();
        session.delete(&rex).unwrap();
        session.cancel_write().unwrap();

        assert_eq!(session.generation(), 1);
        let objects = session.objects(&schema).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].read_property("age").unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_single_writer() {
        let (session, _) = session();
        session.begin_write().unwrap();
        assert_eq!(session.begin_write(), Err(ObjectError::TransactionInProgress));
        session.cancel_write().unwrap();
        assert!(session.cancel_write().is_err());
    }

    #[test]
    fn test_read_only_session_refuses_writes() {
        let registry = Arc::new(SchemaRegistry::new());
        let session =
            Session::with_registry(SessionConfig::new("ro").read_only(true), registry).unwrap();
        assert!(matches!(
            session.begin_write(),
            Err(ObjectError::ReadOnlySession(_))
        ));
    }

    #[test]
    fn test_write_closure_cancels_on_error() {
        let (session, schema) = session();
        let result: Result<()> = session.write(|s| {
            s.create(&schema, [("name", Value::from("Rex")), ("age", Value::from(3))])?;
            Err(ObjectError::Validation("abort".into()))
        });
        assert!(result.is_err());
        assert!(!session.is_in_write_transaction());
        assert!(session.objects(&schema).unwrap().is_empty());
    }

    #[test]
    fn test_find_by_indexed_value() {
        let (session, schema) = session();
        session
            .write(|s| {
                s.create(&schema, [("name", Value::from("Rex")), ("age", Value::from(3))])?;
                s.create(&schema, [("name", Value::from("Fido")), ("age", Value::from(3))])?;
                s.create(&schema, [("name", Value::from("Ace")), ("age", Value::from(5))])
            })
            .unwrap();
        assert_eq!(session.find(&schema, "age", 3).unwrap().len(), 2);
        assert!(session.find(&schema, "weight", 3).is_err());
    }

    #[test]
    fn test_close_detaches() {
        let (session, schema) = session();
        let rex = session
            .write(|s| s.create(&schema, [("name", Value::from("Rex")), ("age", Value::from(3))]))
            .unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        assert!(session.begin_write().is_err());
        assert!(matches!(
            rex.read_property("name"),
            Err(ObjectError::DetachedAccessor(_))
        ));
    }
}
