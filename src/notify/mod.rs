// ============================================================================
// Notifications
// ============================================================================
//
// Per-object change observation: a commit hook per subscription diffs the
// row against the last snapshot the subscriber saw and delivers the result.
//
// ============================================================================

pub mod change;
pub mod stream;
pub mod token;

pub use change::{ObjectChange, PropertyChange};
pub use stream::ObjectChangeStream;
pub use token::NotificationToken;

use crate::core::{ObjectError, Result, Value};
use crate::object::ObjectAccessor;
use crate::object::accessor::snapshot;
use crate::session::Generation;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};
use token::SubscriptionState;

struct Observed {
    values: Vec<Value>,
    generation: Generation,
}

/// Call `callback` after every commit that changes `object`.
///
/// Deliveries run on the thread that dispatches the session's commits, one
/// at a time per subscription. Writes that leave every value as it was are
/// not reported. If the row is deleted the callback receives a single
/// [`ObjectChange::Deleted`] and the subscription ends.
///
/// Only managed objects can be observed, and not from inside a write
/// transaction.
pub fn subscribe<F>(object: &mut ObjectAccessor, callback: F) -> Result<NotificationToken>
where
    F: FnMut(ObjectChange) + Send + 'static,
{
    if !object.is_managed() {
        return Err(ObjectError::InvalidState(format!(
            "cannot observe an unmanaged '{}' object",
            object.type_name()
        )));
    }
    let (session, row) = object.live_session()?;
    if session.in_write_transaction() {
        return Err(ObjectError::InvalidState(
            "cannot subscribe to an object inside a write transaction".to_string(),
        ));
    }

    let schema = object.schema().clone();
    let values = snapshot(&session, &schema, row)?.ok_or_else(|| {
        ObjectError::DetachedAccessor(format!(
            "'{}' object at row {} has been deleted",
            schema.type_name(),
            row
        ))
    })?;
    let observed = Mutex::new(Observed {
        values,
        generation: session.generation(),
    });

    let state = SubscriptionState::new(Box::new(callback));
    let subscription = Arc::downgrade(&state);
    let weak_session = Arc::downgrade(&session);
    let hook_schema = schema.clone();

    let hook = Arc::new(move |generation: Generation| {
        let Some(subscription) = subscription.upgrade() else {
            return;
        };
        if !subscription.is_active() {
            return;
        }
        let Some(session) = weak_session.upgrade() else {
            return;
        };

        let change = {
            let Ok(mut observed) = observed.lock() else {
                return;
            };
            if generation <= observed.generation {
                return;
            }
            observed.generation = generation;

            match snapshot(&session, &hook_schema, row) {
                Ok(Some(current)) => {
                    let change = change::diff(&hook_schema, &observed.values, &current);
                    observed.values = current;
                    change
                }
                Ok(None) => Some(ObjectChange::Deleted(ObjectError::StaleRow {
                    table: hook_schema.table_name().to_string(),
                    row,
                })),
                Err(err) => {
                    warn!(error = %err, type_name = hook_schema.type_name(), row, "failed to read observed object");
                    None
                }
            }
        };

        let Some(change) = change else {
            return;
        };
        let deleted = change.is_deleted();
        trace!(type_name = hook_schema.type_name(), row, generation, deleted, "delivering change");
        subscription.deliver(change);
        if deleted {
            subscription.invalidate();
        }
    });

    let hook_id = session.add_hook(hook)?;
    state.attach(Arc::downgrade(&session), hook_id);
    object.track_subscription(Arc::downgrade(&state));
    debug!(type_name = schema.type_name(), row, hook = hook_id, "subscribed");

    Ok(NotificationToken::new(state))
}

/// Cancel a subscription. Idempotent.
pub fn unsubscribe(token: &NotificationToken) {
    token.invalidate();
}
