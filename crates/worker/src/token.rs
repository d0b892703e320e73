use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// Upper bound on how long a paused worker sleeps before re-checking
/// cancellation that did not come through [`WorkerControl::cancel`].
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(50);

/// Process-unique worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
	/// Allocates the next identifier. Identifiers start at 1 and never repeat.
	pub fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(0);
		Self(NEXT.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
	}

	/// Returns the raw identifier.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl std::fmt::Display for WorkerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "worker-{}", self.0)
	}
}

#[derive(Debug, Default)]
struct PauseGate {
	paused: Mutex<bool>,
	changed: Condvar,
}

impl PauseGate {
	fn wake(&self) {
		let _guard = self.paused.lock();
		self.changed.notify_all();
	}
}

/// Cooperative cancellation and pause control for one worker.
///
/// Cloned between the worker thread and whoever holds its handle. Cancellation
/// is sticky and always wins over pause.
#[derive(Debug, Clone)]
pub struct WorkerControl {
	cancel: CancellationToken,
	pause: Arc<PauseGate>,
}

impl Default for WorkerControl {
	fn default() -> Self {
		Self::new()
	}
}

impl WorkerControl {
	/// Creates an uncancelled, unpaused control.
	pub fn new() -> Self {
		Self {
			cancel: CancellationToken::new(),
			pause: Arc::new(PauseGate::default()),
		}
	}

	/// Creates a control whose cancellation follows `self`.
	///
	/// Cancelling the child leaves the parent untouched. Pause state is
	/// independent.
	pub fn child(&self) -> Self {
		Self {
			cancel: self.cancel.child_token(),
			pause: Arc::new(PauseGate::default()),
		}
	}

	/// Requests cancellation and wakes a paused worker.
	pub fn cancel(&self) {
		self.cancel.cancel();
		self.pause.wake();
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Holds the worker at its next checkpoint.
	pub fn pause(&self) {
		*self.pause.paused.lock() = true;
	}

	/// Releases a paused worker.
	pub fn resume(&self) {
		let mut paused = self.pause.paused.lock();
		*paused = false;
		self.pause.changed.notify_all();
	}

	/// Returns true while paused.
	pub fn is_paused(&self) -> bool {
		*self.pause.paused.lock()
	}

	/// Blocks while paused. Returns `true` if cancellation was requested.
	///
	/// `poll` bounds each wait so cancellation propagated from a parent token
	/// is still observed without an explicit wake.
	pub fn wait_if_paused(&self, poll: Duration) -> bool {
		let mut paused = self.pause.paused.lock();
		while *paused && !self.cancel.is_cancelled() {
			self.pause.changed.wait_for(&mut paused, poll);
		}
		self.cancel.is_cancelled()
	}
}

#[cfg(test)]
mod tests {
	use std::thread;
	use std::time::Instant;

	use super::*;

	#[test]
	fn worker_ids_are_unique_and_increasing() {
		let a = WorkerId::next();
		let b = WorkerId::next();
		assert!(b > a);
		assert_ne!(a, b);
	}

	#[test]
	fn resume_releases_paused_waiter() {
		let control = WorkerControl::new();
		control.pause();
		let waiter = control.clone();
		let join = thread::spawn(move || waiter.wait_if_paused(Duration::from_secs(5)));

		thread::sleep(Duration::from_millis(20));
		control.resume();
		assert!(!join.join().unwrap(), "resume is not cancellation");
	}

	#[test]
	fn cancel_wins_over_pause() {
		let control = WorkerControl::new();
		control.pause();
		let waiter = control.clone();
		let start = Instant::now();
		let join = thread::spawn(move || waiter.wait_if_paused(Duration::from_secs(5)));

		thread::sleep(Duration::from_millis(20));
		control.cancel();
		assert!(join.join().unwrap());
		assert!(start.elapsed() < Duration::from_secs(5), "cancel must wake the waiter");
		assert!(control.is_paused(), "cancel leaves the pause flag alone");
	}

	#[test]
	fn parent_cancellation_reaches_paused_child_through_poll() {
		let parent = WorkerControl::new();
		let child = parent.child();
		child.pause();
		let waiter = child.clone();
		let join = thread::spawn(move || waiter.wait_if_paused(Duration::from_millis(10)));

		parent.cancel();
		assert!(join.join().unwrap());
		assert!(child.is_cancelled());
	}

	#[test]
	fn child_cancel_does_not_touch_parent() {
		let parent = WorkerControl::new();
		let child = parent.child();
		child.cancel();
		assert!(!parent.is_cancelled());
	}
}
