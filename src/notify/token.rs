use crate::session::{HookId, SessionInner};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use tracing::trace;

use super::ObjectChange;

pub(crate) type Callback = Box<dyn FnMut(ObjectChange) + Send>;

/// Shared between a token, its commit hook and the observed accessor.
pub(crate) struct SubscriptionState {
    active: AtomicBool,
    callback: Mutex<Option<Callback>>,
    delivering: Mutex<Option<ThreadId>>,
    registration: Mutex<Option<(Weak<SessionInner>, HookId)>>,
}

impl SubscriptionState {
    pub(crate) fn new(callback: Callback) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            callback: Mutex::new(Some(callback)),
            delivering: Mutex::new(None),
            registration: Mutex::new(None),
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, session: Weak<SessionInner>, hook: HookId) {
        if let Ok(mut registration) = self.registration.lock() {
            *registration = Some((session, hook));
        }
    }

    fn set_delivering(&self, thread: Option<ThreadId>) {
        if let Ok(mut delivering) = self.delivering.lock() {
            *delivering = thread;
        }
    }

    fn delivering_here(&self) -> bool {
        self.delivering
            .lock()
            .map(|delivering| *delivering == Some(thread::current().id()))
            .unwrap_or(false)
    }

    /// Hand `change` to the callback unless invalidated. Returns whether it
    /// was delivered.
    pub(crate) fn deliver(&self, change: ObjectChange) -> bool {
        let Ok(mut callback) = self.callback.lock() else {
            return false;
        };
        if !self.is_active() {
            return false;
        }
        let Some(f) = callback.as_mut() else {
            return false;
        };

        self.set_delivering(Some(thread::current().id()));
        f(change);
        self.set_delivering(None);

        // invalidated from inside the callback
        if !self.is_active() {
            *callback = None;
        }
        true
    }

    /// Stop deliveries. Once this returns no delivery is in flight or will
    /// start, except when called from inside the callback itself, in which
    /// case the callback is dropped as soon as it returns.
    pub(crate) fn invalidate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let registration = self
                .registration
                .lock()
                .ok()
                .and_then(|mut registration| registration.take());
            if let Some((session, hook)) = registration
                && let Some(session) = session.upgrade()
                && let Err(err) = session.remove_hook(hook)
            {
                trace!(error = %err, "failed to remove commit hook");
            }
            trace!("subscription invalidated");
        }

        if !self.delivering_here()
            && let Ok(mut callback) = self.callback.lock()
        {
            *callback = None;
        }
    }
}

/// Keeps a subscription alive; dropping it unsubscribes.
#[must_use = "dropping the token cancels the subscription"]
pub struct NotificationToken {
    state: Arc<SubscriptionState>,
}

impl NotificationToken {
    pub(crate) fn new(state: Arc<SubscriptionState>) -> Self {
        Self { state }
    }

    /// Cancel the subscription. Safe to call more than once and from any
    /// thread, including from inside the callback.
    pub fn invalidate(&self) {
        self.state.invalidate();
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_active()
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        self.state.invalidate();
    }
}

impl fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationToken")
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn change() -> ObjectChange {
        ObjectChange::Changed {
            property_names: vec!["age".into()],
            old_values: vec![Value::from(1)],
            new_values: vec![Value::from(2)],
        }
    }

    #[test]
    fn test_no_delivery_after_invalidate() {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let state = SubscriptionState::new(Box::new(move |_| *sink.lock().unwrap() += 1));

        assert!(state.deliver(change()));
        state.invalidate();
        state.invalidate();
        assert!(!state.deliver(change()));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_invalidate_from_callback() {
        let slot: Arc<Mutex<Option<Arc<SubscriptionState>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let state = SubscriptionState::new(Box::new(move |_| {
            if let Some(state) = inner.lock().unwrap().as_ref() {
                state.invalidate();
            }
        }));
        *slot.lock().unwrap() = Some(state.clone());

        assert!(state.deliver(change()));
        assert!(!state.is_active());
        assert!(state.callback.lock().unwrap().is_none());
        slot.lock().unwrap().take();
    }
}
