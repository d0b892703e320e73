//! Common lifecycle and operation tracking for service objects.

use std::any::Any;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use spritepal_worker::WorkerId;

use crate::error::{ManagerError, Result};
use crate::notify::{Notifier, Subscription};

/// Who owns a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOwner {
	/// Held by a registry or context and shared between workers.
	Shared,
	/// Built for, and dropped with, one worker.
	Worker(WorkerId),
}

impl ServiceOwner {
	pub fn worker(self) -> Option<WorkerId> {
		match self {
			Self::Shared => None,
			Self::Worker(id) => Some(id),
		}
	}
}

/// Notification emitted by a service to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
	OperationStarted { operation: String },
	OperationFinished { operation: String },
	Progress { percent: u8, message: String },
	Status { message: String },
	Warning { message: String },
	/// Side-channel copy of an error also returned to the caller.
	Error { kind: &'static str, message: String },
	FilesCreated { files: Vec<PathBuf> },
	SessionChanged,
	SettingsSaved,
	StateChanged { namespace: String, key: String },
	HistoryUpdated { offsets: Vec<u64> },
}

/// State shared by every service: identity, lifecycle flag, the
/// active-operation set and the notification channel.
#[derive(Debug)]
pub struct ServiceCore {
	name: &'static str,
	owner: ServiceOwner,
	initialized: AtomicBool,
	active: Mutex<HashSet<String>>,
	notifier: Notifier<ServiceEvent>,
}

impl ServiceCore {
	pub fn new(name: &'static str, owner: ServiceOwner) -> Self {
		Self {
			name,
			owner,
			initialized: AtomicBool::new(false),
			active: Mutex::new(HashSet::new()),
			notifier: Notifier::new(),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn owner(&self) -> ServiceOwner {
		self.owner
	}

	pub fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	/// Flags the service as ready. Call as the last step of construction.
	pub fn mark_initialized(&self) {
		self.initialized.store(true, Ordering::Release);
		tracing::debug!(service = self.name, owner = ?self.owner, "service.initialized");
	}

	pub fn mark_uninitialized(&self) {
		self.initialized.store(false, Ordering::Release);
	}

	/// Marks `operation` active. Returns `false`, leaving state untouched, if
	/// it already is.
	pub fn start_operation(&self, operation: &str) -> bool {
		let inserted = self.active.lock().insert(operation.to_owned());
		if inserted {
			tracing::trace!(service = self.name, operation, "service.operation_started");
			self.emit(ServiceEvent::OperationStarted {
				operation: operation.to_owned(),
			});
		} else {
			tracing::debug!(service = self.name, operation, "service.operation_already_active");
		}
		inserted
	}

	/// Removes `operation` from the active set. No-op when not active.
	pub fn finish_operation(&self, operation: &str) {
		if self.active.lock().remove(operation) {
			tracing::trace!(service = self.name, operation, "service.operation_finished");
			self.emit(ServiceEvent::OperationFinished {
				operation: operation.to_owned(),
			});
		}
	}

	/// Starts `operation` and finishes it when the guard drops.
	pub fn begin_operation(&self, operation: &str) -> Result<OperationGuard<'_>> {
		if !self.start_operation(operation) {
			return Err(ManagerError::OperationInProgress {
				service: self.name,
				operation: operation.to_owned(),
			});
		}
		Ok(OperationGuard {
			core: self,
			operation: operation.to_owned(),
		})
	}

	pub fn is_operation_active(&self, operation: &str) -> bool {
		self.active.lock().contains(operation)
	}

	pub fn has_active_operations(&self) -> bool {
		!self.active.lock().is_empty()
	}

	/// Active operation names, sorted.
	pub fn active_operations(&self) -> Vec<String> {
		let mut ops: Vec<_> = self.active.lock().iter().cloned().collect();
		ops.sort();
		ops
	}

	pub fn connect(&self, listener: impl Fn(&ServiceEvent) + Send + Sync + 'static) -> Subscription {
		self.notifier.connect(listener)
	}

	pub fn listener_count(&self) -> usize {
		self.notifier.listener_count()
	}

	pub fn emit(&self, event: ServiceEvent) {
		self.notifier.emit(&event);
	}

	/// Emits progress for the current operation, clamped into `0..=100`.
	pub fn emit_progress(&self, percent: i64, message: impl Into<String>) {
		self.emit(ServiceEvent::Progress {
			percent: percent.clamp(0, 100) as u8,
			message: message.into(),
		});
	}

	pub fn emit_status(&self, message: impl Into<String>) {
		self.emit(ServiceEvent::Status { message: message.into() });
	}

	pub fn emit_warning(&self, message: impl Into<String>) {
		let message = message.into();
		tracing::warn!(service = self.name, message = %message, "service.warning");
		self.emit(ServiceEvent::Warning { message });
	}

	/// Logs `err`, publishes it on the notification channel and hands it back
	/// for the caller's `Result`.
	pub fn report(&self, err: ManagerError) -> ManagerError {
		tracing::error!(service = self.name, kind = err.kind(), error = %err, "service.error");
		self.emit(ServiceEvent::Error {
			kind: err.kind(),
			message: err.to_string(),
		});
		err
	}
}

/// Finishes its operation on drop.
#[derive(Debug)]
#[must_use = "the operation finishes as soon as the guard is dropped"]
pub struct OperationGuard<'a> {
	core: &'a ServiceCore,
	operation: String,
}

impl OperationGuard<'_> {
	pub fn operation(&self) -> &str {
		&self.operation
	}
}

impl Drop for OperationGuard<'_> {
	fn drop(&mut self) {
		self.core.finish_operation(&self.operation);
	}
}

/// Upcast helpers for runtime type checks on `Arc<dyn Service>`.
pub trait ServiceAny: Any + Send + Sync {
	fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
	fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> ServiceAny for T {
	fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
		self
	}

	fn type_name(&self) -> &'static str {
		std::any::type_name::<T>()
	}
}

/// A named, stateful unit of business logic.
pub trait Service: ServiceAny {
	fn core(&self) -> &ServiceCore;

	/// Releases owned resources. Idempotent and safe after a failed
	/// construction.
	fn cleanup(&self) -> Result<()>;

	fn name(&self) -> &'static str {
		self.core().name()
	}

	fn is_initialized(&self) -> bool {
		self.core().is_initialized()
	}
}

impl std::fmt::Debug for dyn Service {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Service").field("name", &self.name()).field("type", &self.type_name()).finish()
	}
}

/// Downcasts a type-erased service, reporting the binding `name` on failure.
pub fn downcast_service<T: Service>(name: &str, service: Arc<dyn Service>) -> Result<Arc<T>> {
	let actual = service.as_ref().type_name();
	service.into_any().downcast::<T>().map_err(|_| ManagerError::TypeMismatch {
		name: name.to_owned(),
		expected: std::any::type_name::<T>(),
		actual,
	})
}

/// Whether `service` is a `T`.
pub fn is_service<T: Service>(service: &dyn Service) -> bool {
	service.type_name() == std::any::type_name::<T>()
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	struct Dummy {
		core: ServiceCore,
	}

	impl Service for Dummy {
		fn core(&self) -> &ServiceCore {
			&self.core
		}

		fn cleanup(&self) -> Result<()> {
			self.core.mark_uninitialized();
			Ok(())
		}
	}

	struct Other {
		core: ServiceCore,
	}

	impl Service for Other {
		fn core(&self) -> &ServiceCore {
			&self.core
		}

		fn cleanup(&self) -> Result<()> {
			Ok(())
		}
	}

	#[test]
	fn start_operation_is_not_reentrant() {
		let core = ServiceCore::new("dummy", ServiceOwner::Shared);
		assert!(core.start_operation("extract"));
		assert!(!core.start_operation("extract"));
		core.finish_operation("extract");
		assert!(core.start_operation("extract"));
	}

	#[test]
	fn finish_unknown_operation_is_noop() {
		let core = ServiceCore::new("dummy", ServiceOwner::Shared);
		let events = Arc::new(Mutex::new(Vec::new()));
		let _sub = {
			let events = Arc::clone(&events);
			core.connect(move |e| events.lock().push(e.clone()))
		};
		core.finish_operation("never-started");
		assert!(events.lock().is_empty());
	}

	#[test]
	fn guard_finishes_on_drop_and_blocks_duplicates() {
		let core = ServiceCore::new("dummy", ServiceOwner::Shared);
		{
			let _guard = core.begin_operation("save").unwrap();
			assert!(core.is_operation_active("save"));
			let err = core.begin_operation("save").unwrap_err();
			assert!(matches!(err, ManagerError::OperationInProgress { service: "dummy", .. }));
		}
		assert!(!core.has_active_operations());
	}

	#[test]
	fn lifecycle_notifications_and_error_fanout() {
		let core = ServiceCore::new("dummy", ServiceOwner::Shared);
		let events = Arc::new(Mutex::new(Vec::new()));
		let _sub = {
			let events = Arc::clone(&events);
			core.connect(move |e| events.lock().push(e.clone()))
		};

		core.start_operation("op");
		core.emit_progress(250, "way over");
		let returned = core.report(ManagerError::validation("bad input"));
		core.finish_operation("op");

		assert_eq!(returned.to_string(), "bad input");
		assert_eq!(
			*events.lock(),
			vec![
				ServiceEvent::OperationStarted { operation: "op".into() },
				ServiceEvent::Progress {
					percent: 100,
					message: "way over".into()
				},
				ServiceEvent::Error {
					kind: "validation",
					message: "bad input".into()
				},
				ServiceEvent::OperationFinished { operation: "op".into() },
			]
		);
	}

	#[test]
	fn downcast_checks_runtime_type() {
		let service: Arc<dyn Service> = Arc::new(Dummy {
			core: ServiceCore::new("dummy", ServiceOwner::Shared),
		});
		assert!(is_service::<Dummy>(service.as_ref()));
		assert!(!is_service::<Other>(service.as_ref()));
		assert!(downcast_service::<Dummy>("dummy", Arc::clone(&service)).is_ok());

		let err = downcast_service::<Other>("dummy", service).err().unwrap();
		assert!(matches!(err, ManagerError::TypeMismatch { ref name, .. } if name == "dummy"));
	}

	#[test]
	fn cleanup_is_idempotent() {
		let dummy = Dummy {
			core: ServiceCore::new("dummy", ServiceOwner::Shared),
		};
		dummy.core.mark_initialized();
		dummy.cleanup().unwrap();
		dummy.cleanup().unwrap();
		assert!(!dummy.is_initialized());
	}
}
