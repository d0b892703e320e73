//! Listener fan-out for service notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
	next_id: AtomicU64,
	entries: Mutex<Vec<(u64, Listener<E>)>>,
}

/// Synchronous multi-listener notifier.
///
/// Listeners run on the emitting thread, in connection order. Emission
/// snapshots the listener list first, so a listener may connect or disconnect
/// others without deadlocking.
pub struct Notifier<E> {
	inner: Arc<Listeners<E>>,
}

impl<E: 'static> Notifier<E> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Listeners {
				next_id: AtomicU64::new(0),
				entries: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Registers `listener` until the returned [`Subscription`] is dropped.
	pub fn connect(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.entries.lock().push((id, Arc::new(listener)));

		let weak: Weak<Listeners<E>> = Arc::downgrade(&self.inner);
		Subscription {
			detach: Some(Box::new(move || {
				if let Some(inner) = weak.upgrade() {
					inner.entries.lock().retain(|(entry, _)| *entry != id);
				}
			})),
		}
	}

	pub fn emit(&self, event: &E) {
		let listeners: Vec<Listener<E>> = self.inner.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
		for listener in listeners {
			listener(event);
		}
	}

	pub fn listener_count(&self) -> usize {
		self.inner.entries.lock().len()
	}
}

impl<E: 'static> Default for Notifier<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E> std::fmt::Debug for Notifier<E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Notifier").field("listeners", &self.inner.entries.lock().len()).finish()
	}
}

/// Connection handle returned by [`Notifier::connect`]. Disconnects on drop.
#[must_use = "dropping a subscription disconnects the listener"]
pub struct Subscription {
	detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
	pub fn disconnect(mut self) {
		self.detach_now();
	}

	fn detach_now(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.detach_now();
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("connected", &self.detach.is_some()).finish()
	}
}
