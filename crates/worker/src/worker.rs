use std::error::Error;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::panic::panic_message;
use crate::{DEFAULT_PAUSE_POLL, EventSink, OperationKind, WorkerControl, WorkerEvent, WorkerId, WorkerRecord, WorkerRegistry, spawn_worker_thread};

/// Lifecycle state of a worker.
///
/// `Created -> Running -> {Finished, Cancelled}`. Terminal states are entered
/// once and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
	Created,
	Running,
	Finished { success: bool },
	Cancelled,
}

impl WorkerState {
	/// Returns true for `Finished` and `Cancelled`.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Finished { .. } | Self::Cancelled)
	}

	/// Stable identifier used in logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Created => "created",
			Self::Running => "running",
			Self::Finished { success: true } => "succeeded",
			Self::Finished { success: false } => "failed",
			Self::Cancelled => "cancelled",
		}
	}
}

#[derive(Debug)]
struct StateCell {
	state: Mutex<WorkerState>,
	changed: Condvar,
}

impl StateCell {
	fn new() -> Self {
		Self {
			state: Mutex::new(WorkerState::Created),
			changed: Condvar::new(),
		}
	}

	fn get(&self) -> WorkerState {
		*self.state.lock()
	}

	fn transition(&self, next: WorkerState) -> bool {
		let mut state = self.state.lock();
		let allowed = match (*state, next) {
			(WorkerState::Created, WorkerState::Running) => true,
			(WorkerState::Running, next) => next.is_terminal(),
			_ => false,
		};
		if allowed {
			*state = next;
			self.changed.notify_all();
		}
		allowed
	}

	fn wait_terminal(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut state = self.state.lock();
		while !state.is_terminal() {
			if self.changed.wait_until(&mut state, deadline).timed_out() {
				return state.is_terminal();
			}
		}
		true
	}
}

/// Failure raised from inside an operation body.
///
/// Any `std::error::Error` converts into [`OperationError::Failed`], so `?`
/// works on I/O and service errors alike.
pub enum OperationError {
	/// A checkpoint observed a cancellation request.
	Cancelled,
	Failed(Box<dyn Error + Send + Sync + 'static>),
}

impl OperationError {
	/// Failure carrying only a message.
	pub fn msg(message: impl Into<String>) -> Self {
		Self::Failed(message.into().into())
	}

	/// Returns true for a checkpoint-raised cancellation.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

impl<E> From<E> for OperationError
where
	E: Error + Send + Sync + 'static,
{
	fn from(err: E) -> Self {
		Self::Failed(Box::new(err))
	}
}

impl fmt::Display for OperationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cancelled => f.write_str("operation was cancelled"),
			Self::Failed(err) => fmt::Display::fmt(err, f),
		}
	}
}

impl fmt::Debug for OperationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cancelled => f.write_str("Cancelled"),
			Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
		}
	}
}

/// Errors from driving a worker thread, as opposed to errors of the
/// operation itself (those end up in [`WorkerEvent::Error`]).
#[derive(Debug, Error)]
pub enum WorkerError {
	#[error("failed to spawn worker thread: {0}")]
	Spawn(#[from] std::io::Error),
	#[error("{worker} did not finish within {timeout:?}")]
	JoinTimeout { worker: WorkerId, timeout: Duration },
	#[error("worker thread panicked: {0}")]
	Panicked(String),
}

/// One long-running unit of work executed by a [`Worker`].
pub trait Operation: Send + 'static {
	/// Name used in logs, thread names and worker records.
	fn name(&self) -> &str;

	fn kind(&self) -> OperationKind;

	/// Forwards the backing service's notifications into `ctx`.
	///
	/// Runs on the worker thread right before [`Self::perform`].
	fn connect_signals(&mut self, _ctx: &WorkerContext) {}

	/// Tears down whatever [`Self::connect_signals`] set up.
	///
	/// Runs after every exit of the body, including cancellation and panics.
	fn disconnect_signals(&mut self) {}

	/// The operation body. Returns the success message.
	fn perform(&mut self, ctx: &WorkerContext) -> Result<String, OperationError>;

	/// Releases resources the operation owns. Runs once, before the finished
	/// event is emitted.
	fn release(&mut self) {}
}

/// Handle given to an operation body for checkpoints and reporting.
#[derive(Debug, Clone)]
pub struct WorkerContext {
	id: WorkerId,
	name: Arc<str>,
	kind: OperationKind,
	control: WorkerControl,
	sink: EventSink,
	poll: Duration,
}

impl WorkerContext {
	/// Returns the worker id.
	pub fn id(&self) -> WorkerId {
		self.id
	}

	/// Returns the operation name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns the operation kind.
	pub fn kind(&self) -> OperationKind {
		self.kind
	}

	pub fn control(&self) -> &WorkerControl {
		&self.control
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.control.is_cancelled()
	}

	/// Cancellation and pause checkpoint.
	///
	/// Call before and after every blocking call. Blocks while paused.
	pub fn checkpoint(&self) -> Result<(), OperationError> {
		if self.control.is_cancelled() || self.control.wait_if_paused(self.poll) {
			return Err(OperationError::Cancelled);
		}
		Ok(())
	}

	/// Reports progress. `percent` is clamped into `0..=100`.
	pub fn emit_progress(&self, percent: i64, message: impl Into<String>) {
		let percent = percent.clamp(0, 100) as u8;
		let message = message.into();
		if !message.is_empty() {
			tracing::debug!(worker_id = %self.id, worker = %self.name, percent, message = %message, "worker.progress");
		}
		self.sink.send(WorkerEvent::Progress {
			worker: self.id,
			percent,
			message,
		});
	}

	/// Reports a non-fatal warning.
	pub fn emit_warning(&self, message: impl Into<String>) {
		let message = message.into();
		tracing::warn!(worker_id = %self.id, worker = %self.name, message = %message, "worker.warning");
		self.sink.send(WorkerEvent::Warning { worker: self.id, message });
	}
}

/// Result of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
	pub id: WorkerId,
	pub state: WorkerState,
	pub message: String,
}

impl WorkerOutcome {
	/// Returns true for a successful run.
	pub fn success(&self) -> bool {
		self.state == WorkerState::Finished { success: true }
	}

	/// Returns true for a cancelled run.
	pub fn cancelled(&self) -> bool {
		self.state == WorkerState::Cancelled
	}
}

type Job = Box<dyn FnOnce() -> WorkerOutcome + Send>;

/// Background execution wrapper around one [`Operation`].
///
/// Starting consumes the worker, so a worker runs at most once.
pub struct Worker<O: Operation> {
	id: WorkerId,
	op: O,
	control: WorkerControl,
	sink: EventSink,
	state: Arc<StateCell>,
	poll: Duration,
	registry: Option<WorkerRegistry>,
}

impl<O: Operation> Worker<O> {
	/// Creates a worker under a fresh id.
	pub fn new(op: O, sink: EventSink) -> Self {
		Self::with_id(WorkerId::next(), op, sink)
	}

	/// Creates a worker under an id allocated up front, so resources built
	/// for it can name their owner before the worker exists.
	pub fn with_id(id: WorkerId, op: O, sink: EventSink) -> Self {
		Self {
			id,
			op,
			control: WorkerControl::new(),
			sink,
			state: Arc::new(StateCell::new()),
			poll: DEFAULT_PAUSE_POLL,
			registry: None,
		}
	}

	/// Replaces the cancellation/pause control, e.g. with a child of a
	/// controller-wide control.
	#[must_use]
	pub fn with_control(mut self, control: WorkerControl) -> Self {
		self.control = control;
		self
	}

	#[must_use]
	/// Sets how often a paused worker re-checks cancellation.
	pub fn with_pause_poll(mut self, poll: Duration) -> Self {
		self.poll = poll;
		self
	}

	/// Tracks this worker's state in `registry`.
	#[must_use]
	pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
		registry.upsert(WorkerRecord {
			id: self.id,
			name: self.op.name().to_owned(),
			kind: self.op.kind(),
			state: self.state.get(),
		});
		self.registry = Some(registry);
		self
	}

	/// Returns the worker id.
	pub fn id(&self) -> WorkerId {
		self.id
	}

	/// Returns the current lifecycle state.
	pub fn state(&self) -> WorkerState {
		self.state.get()
	}

	pub fn control(&self) -> &WorkerControl {
		&self.control
	}

	/// Returns the wrapped operation.
	pub fn operation(&self) -> &O {
		&self.op
	}

	pub fn operation_mut(&mut self) -> &mut O {
		&mut self.op
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		tracing::debug!(worker_id = %self.id, worker = self.op.name(), "worker.cancel_requested");
		self.control.cancel();
	}

	/// Holds the worker at its next checkpoint.
	pub fn pause(&self) {
		tracing::debug!(worker_id = %self.id, worker = self.op.name(), "worker.pause_requested");
		self.control.pause();
	}

	/// Releases a paused worker.
	pub fn resume(&self) {
		tracing::debug!(worker_id = %self.id, worker = self.op.name(), "worker.resume_requested");
		self.control.resume();
	}

	/// Runs the operation on the calling thread.
	pub fn run_blocking(self) -> WorkerOutcome {
		self.execute()
	}

	/// Runs the operation on a dedicated thread.
	pub fn start(self) -> Result<WorkerHandle, WorkerError> {
		self.start_with(|kind, name, run| spawn_worker_thread(kind, name, run))
	}

	/// Start with a custom thread spawner. A failed spawn drops the worker's
	/// registry record.
	fn start_with<S>(self, spawn: S) -> Result<WorkerHandle, WorkerError>
	where
		S: FnOnce(OperationKind, &str, Job) -> std::io::Result<JoinHandle<WorkerOutcome>>,
	{
		let id = self.id;
		let name = self.op.name().to_owned();
		let kind = self.op.kind();
		let control = self.control.clone();
		let state = Arc::clone(&self.state);
		let registry = self.registry.clone();
		let thread = match spawn(kind, &name, Box::new(move || self.execute())) {
			Ok(thread) => thread,
			Err(err) => {
				if let Some(registry) = registry {
					registry.remove(id);
				}
				tracing::error!(worker_id = %id, worker = %name, error = %err, "worker.spawn_failed");
				return Err(err.into());
			}
		};
		Ok(WorkerHandle {
			id,
			name,
			kind,
			control,
			state,
			thread: Some(thread),
		})
	}

	fn set_state(&self, next: WorkerState) {
		if !self.state.transition(next) {
			tracing::warn!(worker_id = %self.id, from = self.state.get().as_str(), to = next.as_str(), "worker.invalid_transition");
			return;
		}
		if let Some(registry) = &self.registry {
			registry.set_state(self.id, next);
		}
	}

	fn execute(mut self) -> WorkerOutcome {
		let kind = self.op.kind();
		let ctx = WorkerContext {
			id: self.id,
			name: Arc::from(self.op.name()),
			kind,
			control: self.control.clone(),
			sink: self.sink.clone(),
			poll: self.poll,
		};

		self.set_state(WorkerState::Running);
		tracing::info!(worker_id = %self.id, worker = %ctx.name, kind = kind.as_str(), "worker.started");

		let op = &mut self.op;
		let result = catch_unwind(AssertUnwindSafe(|| {
			op.connect_signals(&ctx);
			op.perform(&ctx)
		}));
		let disconnected = catch_unwind(AssertUnwindSafe(|| self.op.disconnect_signals()));

		let (mut state, mut message) = match result {
			Ok(Ok(message)) => {
				tracing::info!(worker_id = %self.id, worker = %ctx.name, "worker.succeeded");
				(WorkerState::Finished { success: true }, message)
			}
			Ok(Err(OperationError::Cancelled)) => {
				tracing::info!(worker_id = %self.id, worker = %ctx.name, "worker.cancelled");
				(WorkerState::Cancelled, "Operation cancelled".to_string())
			}
			Ok(Err(OperationError::Failed(err))) => {
				let message = failure_message(kind, err.as_ref());
				tracing::error!(worker_id = %self.id, worker = %ctx.name, error = %err, "{message}");
				self.sink.send(WorkerEvent::Error {
					worker: self.id,
					message: message.clone(),
					cause: Some(Arc::from(err)),
				});
				(WorkerState::Finished { success: false }, message)
			}
			Err(payload) => {
				let message = format!("{} failed: {}", kind.label(), panic_message(payload.as_ref()));
				tracing::error!(worker_id = %self.id, worker = %ctx.name, "{message}");
				self.sink.send(WorkerEvent::Error {
					worker: self.id,
					message: message.clone(),
					cause: None,
				});
				(WorkerState::Finished { success: false }, message)
			}
		};

		let released = catch_unwind(AssertUnwindSafe(|| self.op.release()));
		for (stage, teardown) in [("disconnect_signals", disconnected), ("release", released)] {
			let Err(payload) = teardown else { continue };
			let failure = format!("{} failed: {}", kind.label(), panic_message(payload.as_ref()));
			tracing::error!(worker_id = %self.id, worker = %ctx.name, stage, "{failure}");
			if state == (WorkerState::Finished { success: true }) {
				self.sink.send(WorkerEvent::Error {
					worker: self.id,
					message: failure.clone(),
					cause: None,
				});
				state = WorkerState::Finished { success: false };
				message = failure;
			}
		}

		self.set_state(state);
		self.sink.send(WorkerEvent::Finished {
			worker: self.id,
			success: state == WorkerState::Finished { success: true },
			message: message.clone(),
		});

		WorkerOutcome { id: self.id, state, message }
	}
}

fn failure_message(kind: OperationKind, err: &(dyn Error + Send + Sync + 'static)) -> String {
	let mut cause: Option<&(dyn Error + 'static)> = Some(err);
	while let Some(current) = cause {
		if let Some(io) = current.downcast_ref::<std::io::Error>() {
			return format!("File I/O error during {}: {io}", kind.label());
		}
		cause = current.source();
	}
	format!("{} failed: {err}", kind.label())
}

/// Control handle for a worker running on its own thread.
///
/// Dropping the handle of a worker that is still running requests
/// cancellation; the thread finishes on its next checkpoint.
#[derive(Debug)]
pub struct WorkerHandle {
	id: WorkerId,
	name: String,
	kind: OperationKind,
	control: WorkerControl,
	state: Arc<StateCell>,
	thread: Option<JoinHandle<WorkerOutcome>>,
}

impl WorkerHandle {
	/// Returns the worker id.
	pub fn id(&self) -> WorkerId {
		self.id
	}

	/// Returns the operation name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns the operation kind.
	pub fn kind(&self) -> OperationKind {
		self.kind
	}

	pub fn control(&self) -> &WorkerControl {
		&self.control
	}

	/// Returns the current lifecycle state.
	pub fn state(&self) -> WorkerState {
		self.state.get()
	}

	/// Returns true once the worker reached a terminal state.
	pub fn is_finished(&self) -> bool {
		self.state.get().is_terminal()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		tracing::debug!(worker_id = %self.id, worker = %self.name, "worker.cancel_requested");
		self.control.cancel();
	}

	/// Holds the worker at its next checkpoint.
	pub fn pause(&self) {
		self.control.pause();
	}

	/// Releases a paused worker.
	pub fn resume(&self) {
		self.control.resume();
	}

	/// Waits until the worker reaches a terminal state. Returns `false` on
	/// timeout.
	pub fn wait(&self, timeout: Duration) -> bool {
		self.state.wait_terminal(timeout)
	}

	/// Waits for the worker thread and returns its outcome.
	pub fn join(mut self) -> Result<WorkerOutcome, WorkerError> {
		let Some(thread) = self.thread.take() else {
			return Err(WorkerError::Panicked("worker thread already joined".to_string()));
		};
		thread.join().map_err(|payload| WorkerError::Panicked(panic_message(payload.as_ref())))
	}

	/// Like [`Self::join`] but gives up after `timeout`, cancelling the
	/// worker on the way out.
	pub fn join_timeout(self, timeout: Duration) -> Result<WorkerOutcome, WorkerError> {
		if !self.wait(timeout) {
			return Err(WorkerError::JoinTimeout { worker: self.id, timeout });
		}
		self.join()
	}
}

impl Drop for WorkerHandle {
	fn drop(&mut self) {
		if self.thread.is_some() && !self.state.get().is_terminal() {
			tracing::debug!(worker_id = %self.id, worker = %self.name, "worker.handle_dropped_while_running");
			self.control.cancel();
		}
	}
}
