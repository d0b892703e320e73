use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::WorkerId;

/// Shared error cause carried by [`WorkerEvent::Error`].
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// One message from a worker to its observer.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
	/// Progress in percent, always within `0..=100`.
	Progress { worker: WorkerId, percent: u8, message: String },
	Warning { worker: WorkerId, message: String },
	/// Failure report with the underlying cause when one exists.
	Error {
		worker: WorkerId,
		message: String,
		cause: Option<ErrorCause>,
	},
	/// Terminal event. Emitted exactly once per run.
	Finished { worker: WorkerId, success: bool, message: String },
}

impl WorkerEvent {
	/// Returns the emitting worker.
	pub fn worker(&self) -> WorkerId {
		match self {
			Self::Progress { worker, .. } | Self::Warning { worker, .. } | Self::Error { worker, .. } | Self::Finished { worker, .. } => *worker,
		}
	}

	/// Returns true for the terminal event.
	pub fn is_finished(&self) -> bool {
		matches!(self, Self::Finished { .. })
	}
}

/// Sending half of a worker event queue.
///
/// Several workers may share one sink; per-sender order is preserved.
#[derive(Debug, Clone)]
pub struct EventSink {
	tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
	/// Queues one event. Returns `false` once the receiving side is gone.
	pub fn send(&self, event: WorkerEvent) -> bool {
		match self.tx.send(event) {
			Ok(()) => true,
			Err(err) => {
				tracing::trace!(worker = %err.0.worker(), "worker.event.dropped");
				false
			}
		}
	}

	/// Returns true once the stream is dropped.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Receiving half of a worker event queue, drained by the UI event loop.
#[derive(Debug)]
pub struct EventStream {
	rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl EventStream {
	/// Returns the next queued event without waiting.
	pub fn try_next(&mut self) -> Option<WorkerEvent> {
		self.rx.try_recv().ok()
	}

	/// Waits for the next event. `None` once every sink is dropped.
	pub async fn next(&mut self) -> Option<WorkerEvent> {
		self.rx.recv().await
	}

	/// Blocking variant of [`Self::next`] for plain threads.
	///
	/// # Panics
	///
	/// Panics when called from inside an async runtime.
	pub fn blocking_next(&mut self) -> Option<WorkerEvent> {
		self.rx.blocking_recv()
	}

	/// Takes every event queued right now.
	pub fn drain(&mut self) -> Vec<WorkerEvent> {
		let mut out = Vec::new();
		while let Ok(event) = self.rx.try_recv() {
			out.push(event);
		}
		out
	}
}

/// Creates a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
	let (tx, rx) = mpsc::unbounded_channel();
	(EventSink { tx }, EventStream { rx })
}
