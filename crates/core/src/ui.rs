//! Bridges worker and service notifications onto the main window.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use spritepal_worker::WorkerEvent;

use crate::error::{ManagerError, Result};
use crate::service::{Service, ServiceCore, ServiceOwner};

/// Surface the coordinator drives. Implemented by the GUI shell.
pub trait MainWindow: Send + Sync {
	fn show_status(&self, message: &str);
	fn show_progress(&self, percent: u8, message: &str);
	fn hide_progress(&self);
}

type ActionCallback = Arc<dyn Fn() + Send + Sync>;

struct Action {
	callback: ActionCallback,
	enabled: bool,
}

/// Owns the main window reference and the named UI actions.
pub struct UiCoordinator {
	core: ServiceCore,
	window: RwLock<Option<Arc<dyn MainWindow>>>,
	last_status: Mutex<Option<String>>,
	actions: Mutex<IndexMap<String, Action>>,
}

impl Default for UiCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

impl UiCoordinator {
	pub const NAME: &'static str = "UICoordinatorService";

	pub fn new() -> Self {
		let service = Self {
			core: ServiceCore::new(Self::NAME, ServiceOwner::Shared),
			window: RwLock::new(None),
			last_status: Mutex::new(None),
			actions: Mutex::new(IndexMap::new()),
		};
		service.core.mark_initialized();
		service
	}

	pub fn attach_window(&self, window: Arc<dyn MainWindow>) {
		*self.window.write() = Some(window);
	}

	pub fn detach_window(&self) {
		*self.window.write() = None;
	}

	pub fn has_window(&self) -> bool {
		self.window.read().is_some()
	}

	fn with_window(&self, f: impl FnOnce(&dyn MainWindow)) {
		let window = self.window.read().clone();
		match window {
			Some(window) => f(window.as_ref()),
			None => tracing::trace!("ui.no_window"),
		}
	}

	pub fn show_status(&self, message: &str) {
		*self.last_status.lock() = Some(message.to_owned());
		self.with_window(|w| w.show_status(message));
	}

	pub fn last_status(&self) -> Option<String> {
		self.last_status.lock().clone()
	}

	pub fn show_progress(&self, percent: u8, message: &str) {
		self.with_window(|w| w.show_progress(percent.min(100), message));
	}

	pub fn hide_progress(&self) {
		self.with_window(|w| w.hide_progress());
	}

	/// Registers `name`, replacing any previous callback. New actions start
	/// enabled.
	pub fn register_action(&self, name: &str, callback: impl Fn() + Send + Sync + 'static) {
		self.actions.lock().insert(name.to_owned(), Action {
			callback: Arc::new(callback),
			enabled: true,
		});
	}

	pub fn unregister_action(&self, name: &str) -> bool {
		self.actions.lock().shift_remove(name).is_some()
	}

	pub fn set_action_enabled(&self, name: &str, enabled: bool) -> Result<()> {
		let mut actions = self.actions.lock();
		let action = actions
			.get_mut(name)
			.ok_or_else(|| ManagerError::validation(format!("unknown action: {name}")))?;
		action.enabled = enabled;
		Ok(())
	}

	/// Runs the callback outside the action lock. Returns `false` when the
	/// action is disabled.
	pub fn trigger_action(&self, name: &str) -> Result<bool> {
		let callback = {
			let actions = self.actions.lock();
			let action = actions
				.get(name)
				.ok_or_else(|| ManagerError::validation(format!("unknown action: {name}")))?;
			if !action.enabled {
				return Ok(false);
			}
			Arc::clone(&action.callback)
		};
		callback();
		Ok(true)
	}

	/// Registered action names in registration order.
	pub fn action_names(&self) -> Vec<String> {
		self.actions.lock().keys().cloned().collect()
	}

	/// Applies one worker event to the window.
	pub fn route_worker_event(&self, event: &WorkerEvent) {
		match event {
			WorkerEvent::Progress { percent, message, .. } => self.show_progress(*percent, message),
			WorkerEvent::Warning { message, .. } => self.show_status(&format!("Warning: {message}")),
			WorkerEvent::Error { message, .. } => self.show_status(message),
			WorkerEvent::Finished { message, .. } => {
				self.hide_progress();
				self.show_status(message);
			}
		}
	}
}

impl Service for UiCoordinator {
	fn core(&self) -> &ServiceCore {
		&self.core
	}

	fn cleanup(&self) -> Result<()> {
		self.detach_window();
		self.actions.lock().clear();
		self.core.mark_uninitialized();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use pretty_assertions::assert_eq;
	use spritepal_worker::WorkerId;

	use super::*;

	#[derive(Default)]
	struct RecordingWindow {
		calls: Mutex<Vec<String>>,
	}

	impl MainWindow for RecordingWindow {
		fn show_status(&self, message: &str) {
			self.calls.lock().push(format!("status:{message}"));
		}

		fn show_progress(&self, percent: u8, message: &str) {
			self.calls.lock().push(format!("progress:{percent}:{message}"));
		}

		fn hide_progress(&self) {
			self.calls.lock().push("hide".into());
		}
	}

	#[test]
	fn worker_events_drive_the_window() {
		let ui = UiCoordinator::new();
		let window = Arc::new(RecordingWindow::default());
		ui.attach_window(window.clone());
		let worker = WorkerId::next();

		ui.route_worker_event(&WorkerEvent::Progress {
			worker,
			percent: 40,
			message: "Extracting".into(),
		});
		ui.route_worker_event(&WorkerEvent::Warning {
			worker,
			message: "odd palette".into(),
		});
		ui.route_worker_event(&WorkerEvent::Finished {
			worker,
			success: true,
			message: "Extraction complete".into(),
		});

		assert_eq!(*window.calls.lock(), vec![
			"progress:40:Extracting".to_string(),
			"status:Warning: odd palette".into(),
			"hide".into(),
			"status:Extraction complete".into(),
		]);
		assert_eq!(ui.last_status().as_deref(), Some("Extraction complete"));
	}

	#[test]
	fn status_is_kept_without_a_window() {
		let ui = UiCoordinator::new();
		ui.show_status("headless");
		ui.hide_progress();
		assert!(!ui.has_window());
		assert_eq!(ui.last_status().as_deref(), Some("headless"));
	}

	#[test]
	fn actions_respect_enabled_flag() {
		let ui = UiCoordinator::new();
		let hits = Arc::new(AtomicUsize::new(0));
		{
			let hits = Arc::clone(&hits);
			ui.register_action("extract", move || {
				hits.fetch_add(1, Ordering::SeqCst);
			});
		}
		ui.register_action("inject", || {});

		assert!(ui.trigger_action("extract").unwrap());
		ui.set_action_enabled("extract", false).unwrap();
		assert!(!ui.trigger_action("extract").unwrap());
		assert_eq!(hits.load(Ordering::SeqCst), 1);

		assert_eq!(ui.action_names(), vec!["extract".to_string(), "inject".into()]);
		assert!(ui.unregister_action("extract"));
		assert!(matches!(ui.trigger_action("extract"), Err(ManagerError::Validation(_))));
	}

	#[test]
	fn cleanup_detaches_window() {
		let ui = UiCoordinator::new();
		ui.attach_window(Arc::new(RecordingWindow::default()));
		ui.register_action("a", || {});
		ui.cleanup().unwrap();
		assert!(!ui.has_window());
		assert!(ui.action_names().is_empty());
		assert!(!ui.is_initialized());
	}
}
