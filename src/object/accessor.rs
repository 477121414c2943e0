use crate::core::{ObjectError, ObjectLink, Result, Row, RowId, Value};
use crate::notify::token::SubscriptionState;
use crate::notify::{self, NotificationToken, ObjectChange, ObjectChangeStream};
use crate::schema::{ObjectModel, PropertyDescriptor, SchemaDescriptor, SchemaRegistry};
use crate::session::{Session, SessionId, SessionInner};
use crate::storage::StorageEngine;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

use super::backlinks::Backlinks;
use super::weak::WeakObjectHandle;

#[derive(Clone)]
enum AccessorState {
    Unmanaged {
        values: BTreeMap<String, Value>,
    },
    Managed {
        session: Weak<SessionInner>,
        session_id: SessionId,
        row: RowId,
    },
}

/// An object of a declared type, either free-standing or bound to a row.
///
/// Unmanaged accessors own their values. Managed accessors read and write
/// through to their row on every access and never cache; they hold only a
/// weak reference to the session, so they become detached once the session
/// is closed or dropped, or once the row is deleted.
///
/// Ignored properties are kept per accessor and never persisted.
///
/// Subscriptions belong to the accessor that created them. Dropping that
/// accessor invalidates its tokens; a clone starts with no subscriptions, so
/// dropping a clone leaves the original's tokens valid.
pub struct ObjectAccessor {
    schema: Arc<SchemaDescriptor>,
    state: AccessorState,
    transient: BTreeMap<String, Value>,
    subscriptions: Vec<Weak<SubscriptionState>>,
}

impl ObjectAccessor {
    /// Build an unmanaged object from `values`.
    ///
    /// Missing optional, defaulted and collection properties take their
    /// declared defaults. A missing required property or a value that does
    /// not convert to its storage type is a validation error.
    pub fn bind_unmanaged<I, K, V>(values: I, schema: Arc<SchemaDescriptor>) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut stored = BTreeMap::new();
        let mut transient = BTreeMap::new();

        for (name, value) in values {
            let name = name.into();
            let value = value.into();
            if schema.is_ignored(&name) {
                transient.insert(name, value);
                continue;
            }
            let property = lookup(&schema, &name)?;
            let value = property.validate(schema.type_name(), value)?;
            stored.insert(name, value);
        }

        if let Some(missing) = schema
            .required_properties()
            .iter()
            .find(|name| !stored.contains_key(*name))
        {
            return Err(ObjectError::Validation(format!(
                "Missing value for required property '{}.{}'",
                schema.type_name(),
                missing
            )));
        }

        for property in schema.persisted_properties() {
            stored
                .entry(property.name.clone())
                .or_insert_with(|| property.default_value());
        }

        Ok(Self {
            schema,
            state: AccessorState::Unmanaged { values: stored },
            transient,
            subscriptions: Vec::new(),
        })
    }

    /// Unmanaged object from a model instance, resolved through the global
    /// registry.
    pub fn from_model<T: ObjectModel>(model: T) -> Result<Self> {
        let schema = SchemaRegistry::global().resolve_model::<T>()?;
        Self::bind_unmanaged(model.into_values(), schema)
    }

    /// Bind to `row` of `schema`'s table in `session`.
    pub fn bind_managed(session: &Session, schema: Arc<SchemaDescriptor>, row: RowId) -> Result<Self> {
        let inner = session.inner();
        if !inner.is_open() {
            return Err(ObjectError::DetachedAccessor(format!(
                "session '{}' is closed",
                inner.config().name
            )));
        }
        if !inner.read(|storage| Ok(storage.resolve_row(schema.table_name(), row)))? {
            return Err(ObjectError::StaleRow {
                table: schema.table_name().to_string(),
                row,
            });
        }

        Ok(Self {
            state: AccessorState::Managed {
                session: Arc::downgrade(inner),
                session_id: inner.id(),
                row,
            },
            schema,
            transient: BTreeMap::new(),
            subscriptions: Vec::new(),
        })
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.state, AccessorState::Managed { .. })
    }

    pub fn row_id(&self) -> Option<RowId> {
        match self.state {
            AccessorState::Managed { row, .. } => Some(row),
            AccessorState::Unmanaged { .. } => None,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match self.state {
            AccessorState::Managed { session_id, .. } => Some(session_id),
            AccessorState::Unmanaged { .. } => None,
        }
    }

    /// Owning session, if managed and the session is still alive.
    pub fn session(&self) -> Option<Session> {
        match &self.state {
            AccessorState::Managed { session, .. } => session.upgrade().map(Session::from_inner),
            AccessorState::Unmanaged { .. } => None,
        }
    }

    /// Link value addressing this object's row.
    pub fn as_link(&self) -> Option<ObjectLink> {
        self.row_id()
            .map(|row| ObjectLink::new(self.schema.table_name(), row))
    }

    /// Whether a managed object lost its session or row. Always false for
    /// unmanaged objects.
    pub fn is_invalidated(&self) -> bool {
        match self.live_session() {
            Ok((session, row)) => !session
                .read(|storage| Ok(storage.resolve_row(self.schema.table_name(), row)))
                .unwrap_or(false),
            Err(_) => self.is_managed(),
        }
    }

    /// Session and row of a managed object whose session is still open.
    pub(crate) fn live_session(&self) -> Result<(Arc<SessionInner>, RowId)> {
        match &self.state {
            AccessorState::Unmanaged { .. } => Err(ObjectError::InvalidState(format!(
                "'{}' object is not managed",
                self.type_name()
            ))),
            AccessorState::Managed { session, row, .. } => {
                let session = session.upgrade().ok_or_else(|| {
                    ObjectError::DetachedAccessor(format!(
                        "session of '{}' object has been dropped",
                        self.type_name()
                    ))
                })?;
                if !session.is_open() {
                    return Err(ObjectError::DetachedAccessor(format!(
                        "session '{}' is closed",
                        session.config().name
                    )));
                }
                Ok((session, *row))
            }
        }
    }

    /// Current value of `name`.
    ///
    /// Managed reads go to the session's current view every time.
    pub fn read_property(&self, name: &str) -> Result<Value> {
        if self.schema.is_ignored(name) {
            return Ok(self.transient.get(name).cloned().unwrap_or(Value::Null));
        }
        let property = lookup(&self.schema, name)?;

        match &self.state {
            AccessorState::Unmanaged { values } => Ok(values
                .get(name)
                .cloned()
                .unwrap_or_else(|| property.default_value())),
            AccessorState::Managed { .. } => {
                let (session, row) = self.live_session()?;
                session.read(|storage| {
                    if !storage.resolve_row(self.schema.table_name(), row) {
                        return Err(row_deleted(&self.schema, row));
                    }
                    read_stored(&session, storage, &self.schema, row, property)
                })
            }
        }
    }

    /// Set `name` to `value`.
    ///
    /// Managed objects may only be written inside a write transaction of
    /// their session.
    pub fn write_property(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if self.schema.is_ignored(name) {
            self.transient.insert(name.to_string(), value);
            return Ok(());
        }
        let schema = self.schema.clone();
        let property = lookup(&schema, name)?;

        if let AccessorState::Unmanaged { values } = &mut self.state {
            let value = property.validate(schema.type_name(), value)?;
            values.insert(name.to_string(), value);
            return Ok(());
        }

        let (session, row) = self.live_session()?;
        if !session.in_write_transaction() {
            return Err(ObjectError::ReadOnlySession(format!(
                "cannot modify '{}.{}' outside of a write transaction",
                schema.type_name(),
                name
            )));
        }
        let value = property.validate(schema.type_name(), value)?;
        let column = property.column.ok_or_else(|| {
            ObjectError::Validation(format!(
                "Property '{}.{}' is computed and cannot be written",
                schema.type_name(),
                name
            ))
        })?;

        trace!(type_name = schema.type_name(), property = name, row, "write property");
        session
            .update_field(&schema, row, column, value)
            .map_err(|err| match err {
                ObjectError::StaleRow { .. } => row_deleted(&schema, row),
                other => other,
            })
    }

    /// Follow a single forward link.
    pub fn link(&self, name: &str) -> Result<Option<ObjectAccessor>> {
        let property = lookup(&self.schema, name)?;
        if !property.is_link() {
            return Err(ObjectError::InvalidState(format!(
                "'{}.{}' is not a link property",
                self.type_name(),
                name
            )));
        }
        match self.read_property(name)? {
            Value::Link(link) => self.follow(property, &link).map(Some),
            _ => Ok(None),
        }
    }

    /// Objects of an object list or linking-objects property, in order.
    pub fn links(&self, name: &str) -> Result<Vec<ObjectAccessor>> {
        let property = lookup(&self.schema, name)?;
        if property.is_link() || property.object_type.is_none() {
            return Err(ObjectError::InvalidState(format!(
                "'{}.{}' is not an object collection",
                self.type_name(),
                name
            )));
        }
        match self.read_property(name)? {
            Value::List(items) => items
                .iter()
                .filter_map(Value::as_link)
                .map(|link| self.follow(property, link))
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    pub(crate) fn follow(
        &self,
        property: &PropertyDescriptor,
        link: &ObjectLink,
    ) -> Result<ObjectAccessor> {
        let (session, _) = self.live_session()?;
        let target = property.object_type.as_deref().unwrap_or_default();
        let schema = session.registry().resolve(target)?;
        ObjectAccessor::bind_managed(&Session::from_inner(session), schema, link.row)
    }

    /// Lazily evaluated view of a linking-objects property.
    pub fn backlinks(&self, name: &str) -> Result<Backlinks> {
        Backlinks::new(self, name)
    }

    /// Capture a weak handle to this object's row.
    pub fn weak_handle(&self) -> Result<WeakObjectHandle> {
        WeakObjectHandle::capture(self)
    }

    /// Values of every property, computed ones included.
    pub fn to_values(&self) -> Result<BTreeMap<String, Value>> {
        self.schema
            .properties()
            .iter()
            .map(|p| Ok((p.name.clone(), self.read_property(&p.name)?)))
            .collect()
    }

    /// Two managed objects are equal when they address the same row of the
    /// same session; two unmanaged ones when every persisted value matches.
    pub fn equals(&self, other: &ObjectAccessor) -> bool {
        match (&self.state, &other.state) {
            (
                AccessorState::Managed {
                    session_id: a,
                    row: row_a,
                    ..
                },
                AccessorState::Managed {
                    session_id: b,
                    row: row_b,
                    ..
                },
            ) => a == b && row_a == row_b && self.schema.table_name() == other.schema.table_name(),
            (AccessorState::Unmanaged { values: a }, AccessorState::Unmanaged { values: b }) => {
                self.schema.type_name() == other.schema.type_name() && a == b
            }
            _ => false,
        }
    }

    /// Observe committed changes to this object.
    ///
    /// The subscription lives until the token is invalidated or dropped, the
    /// object is deleted, or this accessor is dropped. Clones of this accessor
    /// do not share it: dropping a clone does not end it.
    pub fn subscribe<F>(&mut self, callback: F) -> Result<NotificationToken>
    where
        F: FnMut(ObjectChange) + Send + 'static,
    {
        notify::subscribe(self, callback)
    }

    /// Observe committed changes as an async stream.
    ///
    /// Tied to this accessor like [`ObjectAccessor::subscribe`].
    pub fn changes(&mut self) -> Result<ObjectChangeStream> {
        ObjectChangeStream::new(self)
    }

    pub(crate) fn track_subscription(&mut self, subscription: Weak<SubscriptionState>) {
        self.subscriptions.retain(|s| s.strong_count() > 0);
        self.subscriptions.push(subscription);
    }

    /// Persist an unmanaged object into `session`.
    pub(crate) fn manage(&mut self, session: &Session) -> Result<()> {
        let values = match &self.state {
            AccessorState::Managed { session_id, .. } if *session_id == session.id() => {
                return Ok(());
            }
            AccessorState::Managed { .. } => {
                return Err(ObjectError::InvalidState(format!(
                    "'{}' object is already managed by another session",
                    self.type_name()
                )));
            }
            AccessorState::Unmanaged { values } => values,
        };

        let row: Row = self
            .schema
            .persisted_properties()
            .map(|p| values.get(&p.name).cloned().unwrap_or_else(|| p.default_value()))
            .collect();
        let id = session.inner().insert_object(&self.schema, row)?;
        trace!(type_name = self.type_name(), row = id, "object added");

        self.state = AccessorState::Managed {
            session: Arc::downgrade(session.inner()),
            session_id: session.id(),
            row: id,
        };
        Ok(())
    }
}

impl Clone for ObjectAccessor {
    /// Subscriptions stay with the original.
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            state: self.state.clone(),
            transient: self.transient.clone(),
            subscriptions: Vec::new(),
        }
    }
}

impl PartialEq for ObjectAccessor {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Drop for ObjectAccessor {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            if let Some(subscription) = subscription.upgrade() {
                subscription.invalidate();
            }
        }
    }
}

impl fmt::Debug for ObjectAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ObjectAccessor");
        debug.field("type_name", &self.type_name());
        match &self.state {
            AccessorState::Unmanaged { values } => debug.field("values", values),
            AccessorState::Managed {
                session_id, row, ..
            } => debug.field("session", session_id).field("row", row),
        };
        debug.finish()
    }
}

pub(crate) fn lookup<'a>(schema: &'a SchemaDescriptor, name: &str) -> Result<&'a PropertyDescriptor> {
    schema
        .property(name)
        .ok_or_else(|| ObjectError::UnknownProperty {
            type_name: schema.type_name().to_string(),
            property: name.to_string(),
        })
}

fn row_deleted(schema: &SchemaDescriptor, row: RowId) -> ObjectError {
    ObjectError::DetachedAccessor(format!(
        "'{}' object at row {} has been deleted",
        schema.type_name(),
        row
    ))
}

/// Read one property of a live row. Links to deleted rows read as null and
/// drop out of lists.
pub(crate) fn read_stored(
    session: &SessionInner,
    storage: &dyn StorageEngine,
    schema: &SchemaDescriptor,
    row: RowId,
    property: &PropertyDescriptor,
) -> Result<Value> {
    match property.column {
        Some(column) => Ok(prune_dangling(
            storage,
            storage.read_field(schema.table_name(), row, column)?,
        )),
        None => linking_objects(session, storage, schema, row, property),
    }
}

/// Values of every property of `row`, or `None` once the row is gone.
pub(crate) fn snapshot(
    session: &SessionInner,
    schema: &SchemaDescriptor,
    row: RowId,
) -> Result<Option<Vec<Value>>> {
    session.read(|storage| {
        if !storage.resolve_row(schema.table_name(), row) {
            return Ok(None);
        }
        schema
            .properties()
            .iter()
            .map(|p| read_stored(session, storage, schema, row, p))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    })
}

fn prune_dangling(storage: &dyn StorageEngine, value: Value) -> Value {
    match value {
        Value::Link(link) if !storage.resolve_row(&link.table, link.row) => Value::Null,
        Value::List(items) => Value::List(
            items
                .into_iter()
                .filter(|item| {
                    item.as_link()
                        .is_none_or(|link| storage.resolve_row(&link.table, link.row))
                })
                .collect(),
        ),
        other => other,
    }
}

/// Rows of the source type whose linked property points at `row`, in row order.
fn linking_objects(
    session: &SessionInner,
    storage: &dyn StorageEngine,
    schema: &SchemaDescriptor,
    row: RowId,
    property: &PropertyDescriptor,
) -> Result<Value> {
    let (Some(source_type), Some(linked)) = (&property.object_type, &property.linked_property)
    else {
        return Ok(Value::List(Vec::new()));
    };
    let source = session.registry().resolve(source_type)?;
    let Some(column) = source.property(linked).and_then(|p| p.column) else {
        return Ok(Value::List(Vec::new()));
    };
    if !storage.table_exists(source.table_name()) {
        return Ok(Value::List(Vec::new()));
    }

    let target = ObjectLink::new(schema.table_name(), row);
    Ok(Value::List(
        storage
            .scan_rows(source.table_name())?
            .into_iter()
            .filter(|(_, values)| values.get(column).is_some_and(|v| v.references(&target)))
            .map(|(id, _)| Value::Link(ObjectLink::new(source.table_name(), id)))
            .collect(),
    ))
}
