use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rc_core::{OperationId, Result};
use tracing::{debug, error, info, warn};

use crate::{BoxError, OperationState};

/// Number of finished operations whose outcome stays queryable.
pub const MAX_FINISHED: usize = 256;

/// Due-time offset used when `now + delay` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

type Action = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send + 'static>;

#[derive(Default)]
struct State {
    /// Keyed by due time, then id; ids grow with insertion so ties are FIFO.
    pending: BTreeMap<(Instant, OperationId), Action>,
    due: HashMap<OperationId, Instant>,
    running: Option<OperationId>,
    finished: VecDeque<(OperationId, OperationState)>,
    shutdown: bool,
    last_id: u64,
}

impl State {
    fn record(&mut self, id: OperationId, outcome: OperationState) {
        if self.finished.len() == MAX_FINISHED {
            self.finished.pop_front();
        }
        self.finished.push_back((id, outcome));
    }

    fn allocate_id(&mut self) -> OperationId {
        self.last_id += 1;
        OperationId::from_raw(self.last_id)
    }

    fn next_due(&self) -> Option<(Instant, OperationId)> {
        self.pending.keys().next().copied()
    }
}

struct Shared {
    name: String,
    state: Mutex<State>,
    wake: Condvar,
}

// ---------------------------------------------------------------------------
// QueueHandle
// ---------------------------------------------------------------------------

/// Cloneable producer side of a [`DelayedOperationQueue`].
///
/// Operations may hold a handle to reschedule themselves.
#[derive(Clone)]
pub struct QueueHandle {
    shared: Arc<Shared>,
}

impl QueueHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run `action` at or after `when`.
    ///
    /// After shutdown the operation is recorded as cancelled and never runs.
    pub fn schedule_at<F>(&self, when: Instant, action: F) -> OperationId
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        let id = state.allocate_id();

        if state.shutdown {
            state.record(id, OperationState::Cancelled);
            warn!(queue = %self.shared.name, op = %id, "Queue is shut down; operation dropped");
            return id;
        }

        let earliest = state.next_due().map_or(true, |(due, _)| when < due);
        state.pending.insert((when, id), Box::new(action));
        state.due.insert(id, when);
        drop(state);

        if earliest {
            self.shared.wake.notify_one();
        }
        debug!(queue = %self.shared.name, op = %id, "Operation scheduled");
        id
    }

    /// Run `action` once `delay` has elapsed. Delays too large to represent
    /// are clamped to a due time that is never reached in practice.
    pub fn schedule_after<F>(&self, delay: Duration, action: F) -> OperationId
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.schedule_at(due_after(Instant::now(), delay), action)
    }

    /// Schedule against wall-clock time. Times in the past are due
    /// immediately.
    pub fn schedule_at_utc<F>(&self, when: DateTime<Utc>, action: F) -> OperationId
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let delay = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.schedule_after(delay, action)
    }

    /// Cancel a pending operation. Returns `false` if it already started,
    /// finished, or was never scheduled here.
    pub fn cancel(&self, id: OperationId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(due) = state.due.remove(&id) else {
            return false;
        };
        state.pending.remove(&(due, id));
        state.record(id, OperationState::Cancelled);
        drop(state);

        self.shared.wake.notify_one();
        debug!(queue = %self.shared.name, op = %id, "Operation cancelled");
        true
    }

    /// Current state, or `None` if unknown (or aged out of the history).
    pub fn state(&self, id: OperationId) -> Option<OperationState> {
        let state = self.shared.state.lock();
        if state.running == Some(id) {
            return Some(OperationState::Running);
        }
        if state.due.contains_key(&id) {
            return Some(OperationState::Pending);
        }
        state
            .finished
            .iter()
            .rev()
            .find(|(finished, _)| *finished == id)
            .map(|(_, outcome)| outcome.clone())
    }

    /// Number of operations waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.shared.name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DelayedOperationQueue
// ---------------------------------------------------------------------------

/// Time-ordered operation queue with a single dispatcher thread.
///
/// Dropping the queue shuts it down: pending operations are cancelled and
/// a running one is allowed to finish.
pub struct DelayedOperationQueue {
    handle: QueueHandle,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl DelayedOperationQueue {
    /// Create the queue and start its dispatcher thread (`rc-sched-<name>`).
    pub fn start(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            name: name.to_string(),
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name(format!("rc-sched-{name}"))
            .spawn(move || dispatch(worker))?;

        info!(queue = name, "Delayed operation queue started");
        Ok(Self {
            handle: QueueHandle { shared },
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// A producer handle that can be moved into other threads or operations.
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn schedule_at<F>(&self, when: Instant, action: F) -> OperationId
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.handle.schedule_at(when, action)
    }

    pub fn schedule_after<F>(&self, delay: Duration, action: F) -> OperationId
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.handle.schedule_after(delay, action)
    }

    pub fn schedule_at_utc<F>(&self, when: DateTime<Utc>, action: F) -> OperationId
    where
        F: FnOnce() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.handle.schedule_at_utc(when, action)
    }

    pub fn cancel(&self, id: OperationId) -> bool {
        self.handle.cancel(id)
    }

    pub fn state(&self, id: OperationId) -> Option<OperationState> {
        self.handle.state(id)
    }

    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    /// Stop the dispatcher. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.handle.shared.state.lock();
            if !state.shutdown {
                state.shutdown = true;
                info!(queue = %self.handle.shared.name, "Delayed operation queue shutting down");
            }
        }
        self.handle.shared.wake.notify_all();

        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return;
        };
        // An operation shutting down its own queue cannot join itself.
        if dispatcher.thread().id() == thread::current().id() {
            return;
        }
        if dispatcher.join().is_err() {
            error!(queue = %self.handle.shared.name, "Dispatcher thread panicked");
        }
    }
}

impl Drop for DelayedOperationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DelayedOperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedOperationQueue")
            .field("name", &self.handle.shared.name)
            .field("pending", &self.pending())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

fn due_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn dispatch(shared: Arc<Shared>) {
    let mut state = shared.state.lock();

    while !state.shutdown {
        let Some((due, id)) = state.next_due() else {
            shared.wake.wait(&mut state);
            continue;
        };

        if due > Instant::now() {
            // Re-evaluated on wake-up: an earlier entry, a cancel, or shutdown
            // may have arrived meanwhile.
            shared.wake.wait_until(&mut state, due);
            continue;
        }

        let Some(action) = state.pending.remove(&(due, id)) else {
            continue;
        };
        state.due.remove(&id);
        state.running = Some(id);

        let outcome = MutexGuard::unlocked(&mut state, || run(&shared.name, id, action));

        state.running = None;
        state.record(id, outcome);
    }

    let dropped = std::mem::take(&mut state.pending);
    state.due.clear();
    for (_, id) in dropped.into_keys() {
        state.record(id, OperationState::Cancelled);
    }
    debug!(queue = %shared.name, "Dispatcher stopped");
}

fn run(queue: &str, id: OperationId, action: Action) -> OperationState {
    let started = Instant::now();
    debug!(queue, op = %id, "Operation started");

    match panic::catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(())) => {
            debug!(queue, op = %id, elapsed_ms = started.elapsed().as_millis() as u64, "Operation completed");
            OperationState::Completed
        }
        Ok(Err(e)) => {
            warn!(queue, op = %id, "Operation failed: {e}");
            OperationState::Failed(e.to_string())
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "operation panicked".to_string());
            error!(queue, op = %id, "Operation panicked: {reason}");
            OperationState::Failed(reason)
        }
    }
}
