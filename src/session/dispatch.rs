use crate::core::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug_span, trace};

/// Monotonically advancing marker of a session's committed view.
pub type Generation = u64;

/// Identifies a registered commit hook.
pub type HookId = u64;

pub(crate) type CommitHook = Arc<dyn Fn(Generation) + Send + Sync>;

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<Generation>,
    dispatching: bool,
}

/// Runs commit hooks once per committed generation.
///
/// Whichever thread finds the queue idle becomes the dispatcher and drains it;
/// commits made meanwhile (including from inside a hook) only enqueue. Hooks
/// for one session therefore never run concurrently or nested.
pub(crate) struct CommitDispatcher {
    hooks: Mutex<Vec<(HookId, CommitHook)>>,
    next_hook: AtomicU64,
    queue: Mutex<DispatchQueue>,
}

/// Releases the dispatcher role if a hook unwinds.
struct DispatchGuard<'a> {
    queue: &'a Mutex<DispatchQueue>,
    armed: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Ok(mut queue) = self.queue.lock()
        {
            queue.dispatching = false;
        }
    }
}

impl CommitDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            next_hook: AtomicU64::new(1),
            queue: Mutex::new(DispatchQueue::default()),
        }
    }

    pub(crate) fn add_hook(&self, hook: CommitHook) -> Result<HookId> {
        let id = self.next_hook.fetch_add(1, Ordering::SeqCst);
        self.hooks.lock()?.push((id, hook));
        Ok(id)
    }

    pub(crate) fn remove_hook(&self, id: HookId) -> Result<bool> {
        let mut hooks = self.hooks.lock()?;
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        Ok(hooks.len() != before)
    }

    pub(crate) fn hook_count(&self) -> Result<usize> {
        Ok(self.hooks.lock()?.len())
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.hooks.lock()?.clear();
        self.queue.lock()?.pending.clear();
        Ok(())
    }

    /// Enqueue `generation`, draining the queue if no other thread is.
    pub(crate) fn dispatch(&self, generation: Generation) -> Result<()> {
        {
            let mut queue = self.queue.lock()?;
            queue.pending.push_back(generation);
            if queue.dispatching {
                trace!(generation, "dispatch deferred to active dispatcher");
                return Ok(());
            }
            queue.dispatching = true;
        }

        let mut guard = DispatchGuard {
            queue: &self.queue,
            armed: true,
        };

        loop {
            let next = {
                let mut queue = self.queue.lock()?;
                match queue.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        queue.dispatching = false;
                        guard.armed = false;
                        return Ok(());
                    }
                }
            };

            let hooks = self
                .hooks
                .lock()?
                .iter()
                .map(|(_, hook)| hook.clone())
                .collect::<Vec<_>>();

            let span = debug_span!("session.commit.dispatch", generation = next);
            let _enter = span.enter();
            trace!(hooks = hooks.len(), "running commit hooks");
            for hook in hooks {
                hook(next);
            }
        }
    }
}
