use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::sync::WaitCondition;
use crate::types::{ErrorKind, OperationError, Result};

use super::entry::TraceEntry;
use super::metrics::OperationMetrics;
use super::snapshot::{EntrySnapshot, OperationSnapshot};
use super::stack::capture_stack;

/// Lifecycle status of an operation.
///
/// `Running` is never re-entered once left; a terminal status may only be
/// overwritten by `Failed`, which error creation stamps regardless of the
/// current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Failed,
    Cancelled,
    Ended,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
            Status::Ended => "ended",
        };
        f.write_str(status)
    }
}

#[derive(Debug)]
struct ContextState {
    status: Status,
    ended_at: Option<DateTime<Utc>>,
    total_duration: Option<Duration>,
    trace: Vec<TraceEntry>,
    errors: Vec<OperationError>,
    metrics: OperationMetrics,
    timeout_registered: bool,
    timeout_task: Option<JoinHandle<()>>,
    timeout_error: Option<OperationError>,
    active_processes: usize,
}

#[derive(Debug)]
pub(crate) struct ContextInner {
    id: String,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    state: Mutex<ContextState>,
    wait_condition: WaitCondition,
    background_settled: Notify,
}

/// Shared handle to one operation's lifecycle state, trace, and metrics.
///
/// One `OperationContext` represents one logical unit of work. Clones share
/// the same operation; the intended pattern is creating the context at the
/// top of a call tree and passing it down. Mutating calls fail once the
/// operation has left [`Status::Running`].
#[derive(Debug, Clone)]
pub struct OperationContext {
    inner: Arc<ContextInner>,
}

impl OperationContext {
    pub fn new() -> Self {
        let id = Uuid::new_v4().to_string();
        let wait_condition = WaitCondition::new();
        wait_condition.lock();

        let context = Self {
            inner: Arc::new(ContextInner {
                id: id.clone(),
                started_at: Utc::now(),
                started_instant: Instant::now(),
                state: Mutex::new(ContextState {
                    status: Status::Running,
                    ended_at: None,
                    total_duration: None,
                    trace: Vec::new(),
                    errors: Vec::new(),
                    metrics: OperationMetrics::new(),
                    timeout_registered: false,
                    timeout_task: None,
                    timeout_error: None,
                    active_processes: 0,
                }),
                wait_condition,
                background_settled: Notify::new(),
            }),
        };
        debug!(operation_id = %id, "operation started");
        context
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.inner.state.lock().unwrap()
    }

    /// The gate every mutating call passes through: surfaces the cached
    /// timeout error if the timeout has fired, a protocol error if the
    /// operation is otherwise not running, and succeeds silently otherwise.
    fn checkpoint(&self) -> Result<()> {
        let state = self.state();
        if let Some(timeout_error) = &state.timeout_error {
            return Err(timeout_error.clone());
        }
        if state.status != Status::Running {
            return Err(self.protocol_error(format!(
                "operation {} is not running (status: {})",
                self.inner.id, state.status
            )));
        }
        Ok(())
    }

    // Constructed but not recorded: only create_error appends to the error
    // list, so a failed checkpoint never flips a cleanly-ended operation
    // to Failed.
    fn protocol_error(&self, message: String) -> OperationError {
        OperationError::new(message, ErrorKind::Protocol, Arc::downgrade(&self.inner))
    }

    fn terminate(&self, status: Status) {
        {
            let mut state = self.state();
            state.status = status;
            if state.ended_at.is_none() {
                state.ended_at = Some(Utc::now());
            }
            let total = *state
                .total_duration
                .get_or_insert_with(|| self.inner.started_instant.elapsed());
            state.metrics.finalize(total);
        }
        self.inner.wait_condition.unlock();
    }

    fn record_error(&self, message: String, kind: ErrorKind) -> OperationError {
        let error = OperationError::new(message, kind, Arc::downgrade(&self.inner));
        self.state().errors.push(error.clone());
        self.terminate(Status::Failed);
        error
    }

    /// True iff the operation has not left [`Status::Running`]. Safe to call
    /// from anywhere, including after termination.
    pub fn is_running(&self) -> bool {
        self.state().status == Status::Running
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Unset while running; set exactly once when status leaves `Running`.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state().ended_at
    }

    /// Time since construction, frozen at termination.
    pub fn elapsed(&self) -> Duration {
        self.state()
            .total_duration
            .unwrap_or_else(|| self.inner.started_instant.elapsed())
    }

    /// Appends a trace entry with the given values, a freshly captured call
    /// stack, and the current time. Chainable.
    pub fn set_values(&self, values: HashMap<String, Value>) -> Result<&Self> {
        self.checkpoint()?;
        let entry = TraceEntry::new(values, capture_stack());
        self.state().trace.push(entry);
        Ok(self)
    }

    /// Sugar for [`set_values`](Self::set_values) with a single pair.
    pub fn set_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<&Self> {
        let mut values = HashMap::new();
        values.insert(key.into(), value.into());
        self.set_values(values)
    }

    /// Records a start time immediately and returns the handle that ends the
    /// measurement. Timers never check-point: they measure wall-clock spans
    /// that may outlive the operation itself.
    pub fn start_timer(&self, name: impl Into<String>) -> OperationTimer {
        OperationTimer {
            operation: self.clone(),
            name: name.into(),
            started_at: Utc::now(),
            started_instant: Instant::now(),
        }
    }

    /// Starts a timer, awaits the future, and ends the timer whatever the
    /// output. Failures of a `Result`-returning future propagate with the
    /// timer still recorded.
    pub async fn time_future<F>(&self, name: impl Into<String>, future: F) -> F::Output
    where
        F: Future,
    {
        let timer = self.start_timer(name);
        let output = future.await;
        timer.end();
        output
    }

    /// Transitions the operation to [`Status::Cancelled`]. Every later
    /// mutating call fails.
    pub fn cancel(&self) -> Result<&Self> {
        self.checkpoint()?;
        self.terminate(Status::Cancelled);
        debug!(operation_id = %self.inner.id, "operation cancelled");
        Ok(self)
    }

    /// Schedules a one-shot timeout. At most one per operation; a second
    /// registration fails regardless of status. When the timeout fires
    /// against a still-running operation it records a timed-out error and
    /// caches it, so every subsequent checkpoint surfaces that same error.
    pub fn set_timeout(&self, max_time: Duration) -> Result<&Self> {
        {
            let mut state = self.state();
            if state.timeout_registered {
                return Err(self.protocol_error(format!(
                    "operation {} already has a timeout registered",
                    self.inner.id
                )));
            }
            state.timeout_registered = true;
        }

        let operation = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(max_time).await;
            let Some(inner) = operation.upgrade() else {
                return;
            };
            let operation = OperationContext::from_inner(inner);
            if !operation.is_running() {
                return;
            }
            warn!(
                operation_id = %operation.inner.id,
                timeout_ms = max_time.as_millis() as u64,
                "operation timed out"
            );
            let error = operation.record_error(
                format!("operation timed out after {}ms", max_time.as_millis()),
                ErrorKind::Timeout,
            );
            operation.state().timeout_error = Some(error);
        });
        self.state().timeout_task = Some(task);
        Ok(self)
    }

    /// Ends the operation cleanly: clears any pending timeout, finalizes
    /// metrics, and releases waiters. Fails while background processes are
    /// still active; [`wait`](Self::wait) for them first.
    pub fn end(&self) -> Result<&Self> {
        self.checkpoint()?;
        {
            let mut state = self.state();
            if state.active_processes > 0 {
                let active = state.active_processes;
                drop(state);
                return Err(self.protocol_error(format!(
                    "operation {} still has {} active background process(es); wait() for them before ending",
                    self.inner.id, active
                )));
            }
            if let Some(task) = state.timeout_task.take() {
                task.abort();
            }
        }
        self.terminate(Status::Ended);
        debug!(operation_id = %self.inner.id, "operation ended");
        Ok(self)
    }

    /// Records a new error against the operation and returns it without
    /// raising it. Usable from any state: a later failure overrides an
    /// earlier clean termination for reporting, while the error history
    /// keeps every error ever created.
    pub fn create_error(&self, message: impl Into<String>) -> OperationError {
        let message = message.into();
        debug!(operation_id = %self.inner.id, error = %message, "operation error created");
        self.record_error(message, ErrorKind::Explicit)
    }

    /// Registers background work on the operation. The future's success is
    /// ignored; its failure is converted into an operation error carrying
    /// the original message. The wrapper is registered before the checkpoint
    /// runs, so even a non-running operation tracks the already-spawned work.
    pub fn add_background_process<F, T, E>(&self, future: F) -> Result<&Self>
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.state().active_processes += 1;
        let operation = self.clone();
        tokio::spawn(async move {
            if let Err(error) = future.await {
                let error: anyhow::Error = error.into();
                warn!(
                    operation_id = %operation.inner.id,
                    error = %error,
                    "background process failed"
                );
                operation.record_error(error.to_string(), ErrorKind::Background);
            }
            operation.state().active_processes -= 1;
            operation.inner.background_settled.notify_waiters();
        });
        self.checkpoint()?;
        Ok(self)
    }

    /// Suspends until the operation terminates or, while background
    /// processes are active, until all of them settle, whichever comes
    /// first. Rejects with the first recorded error if any.
    pub async fn wait(&self) -> Result<()> {
        let has_active = self.state().active_processes > 0;
        if has_active {
            tokio::select! {
                _ = self.background_settled() => {}
                _ = self.inner.wait_condition.wait() => {}
            }
        } else {
            self.inner.wait_condition.wait().await;
        }
        self.inner.wait_condition.unlock();

        let first_error = self.state().errors.first().cloned();
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn background_settled(&self) {
        loop {
            let notified = self.inner.background_settled.notified();
            if self.state().active_processes == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Every error ever recorded, in creation order.
    pub fn errors(&self) -> Vec<OperationError> {
        self.state().errors.clone()
    }

    /// Full serializable view: complete per-entry stacks and inter-entry
    /// timing. Callable in any state.
    pub fn snapshot(&self) -> OperationSnapshot {
        self.build_snapshot(false)
    }

    /// Condensed view: first stack line per entry, no inter-entry timing.
    pub fn short_snapshot(&self) -> OperationSnapshot {
        self.build_snapshot(true)
    }

    fn build_snapshot(&self, short: bool) -> OperationSnapshot {
        let state = self.state();

        let mut trace = Vec::with_capacity(state.trace.len());
        let mut previous: Option<DateTime<Utc>> = None;
        for entry in &state.trace {
            let since_last_entry = if short {
                None
            } else {
                Some(
                    previous
                        .map(|prev| (entry.created_at() - prev).num_milliseconds())
                        .unwrap_or(-1),
                )
            };
            let stacktrace = if short {
                entry.stack().iter().take(1).cloned().collect()
            } else {
                entry.stack().to_vec()
            };
            trace.push(EntrySnapshot {
                values: entry.values().clone(),
                stacktrace,
                created_at: entry.created_at().timestamp_millis(),
                since_last_entry,
            });
            previous = Some(entry.created_at());
        }

        OperationSnapshot {
            status: state.status,
            operation_id: self.inner.id.clone(),
            trace,
            metrics: state.metrics.snapshot(),
            started_at: self.inner.started_at.timestamp_millis(),
            ended_at: state.ended_at.map(|at| at.timestamp_millis()),
        }
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`OperationContext::start_timer`]; consuming it with
/// [`end`](Self::end) records the measurement.
#[derive(Debug)]
pub struct OperationTimer {
    operation: OperationContext,
    name: String,
    started_at: DateTime<Utc>,
    started_instant: Instant,
}

impl OperationTimer {
    /// Records duration = now - start as a discrete metric entry and folds
    /// it into the cumulative entry for this timer's name. Never fails, even
    /// after the operation has terminated.
    pub fn end(self) {
        let duration = self.started_instant.elapsed();
        self.operation
            .state()
            .metrics
            .record(self.name, self.started_at, duration);
    }
}
