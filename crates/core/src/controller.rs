//! UI-side entry points: start workers for user requests and pump their
//! events back onto the UI thread.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use spritepal_worker::{EventSink, EventStream, Operation, Worker, WorkerControl, WorkerHandle, WorkerId, WorkerOutcome, WorkerRecord, WorkerRegistry};

use crate::config::SpritePalConfig;
use crate::error::Result;
use crate::extraction::{RomExtractionParams, VramExtractionParams};
use crate::factory::{ManagerFactory, OwnedServiceFactory};
use crate::injection::InjectionParams;
use crate::registry::ServiceRegistry;
use crate::ui::UiCoordinator;
use crate::workers::{CommandLauncher, EditorLauncher, InjectionOp, OpenInEditorOp, RomExtractionOp, VramExtractionOp};

/// Starts one worker per request and keeps their handles until joined.
pub struct Controller {
	config: SpritePalConfig,
	factory: Arc<dyn ManagerFactory>,
	launcher: Arc<dyn EditorLauncher>,
	sink: EventSink,
	control: WorkerControl,
	workers: WorkerRegistry,
	handles: Mutex<Vec<WorkerHandle>>,
}

impl Controller {
	pub fn new(config: SpritePalConfig, factory: Arc<dyn ManagerFactory>, launcher: Arc<dyn EditorLauncher>, sink: EventSink) -> Self {
		Self {
			config,
			factory,
			launcher,
			sink,
			control: WorkerControl::new(),
			workers: WorkerRegistry::new(),
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Controller giving every worker its own services, recording into the
	/// registry's session.
	pub fn owned(config: SpritePalConfig, registry: &ServiceRegistry, sink: EventSink) -> Result<Self> {
		let factory = OwnedServiceFactory::new(config.clone(), registry.backends().clone()).with_session(registry.session()?);
		let launcher = CommandLauncher::new(config.editor.clone());
		Ok(Self::new(config, Arc::new(factory), Arc::new(launcher), sink))
	}

	pub fn start_vram_extraction(&self, params: VramExtractionParams) -> Result<WorkerId> {
		let id = WorkerId::next();
		let service = self.factory.create_extraction_manager(id)?;
		self.launch(id, VramExtractionOp::new(service, params))
	}

	pub fn start_rom_extraction(&self, params: RomExtractionParams) -> Result<WorkerId> {
		let id = WorkerId::next();
		let service = self.factory.create_extraction_manager(id)?;
		self.launch(id, RomExtractionOp::new(service, params))
	}

	pub fn start_injection(&self, params: InjectionParams) -> Result<WorkerId> {
		let id = WorkerId::next();
		let service = self.factory.create_injection_manager(id)?;
		self.launch(id, InjectionOp::new(service, params))
	}

	pub fn open_in_editor(&self, path: impl Into<PathBuf>) -> Result<WorkerId> {
		self.launch(WorkerId::next(), OpenInEditorOp::new(Arc::clone(&self.launcher), path))
	}

	fn launch<O: Operation>(&self, id: WorkerId, op: O) -> Result<WorkerId> {
		self.reap_finished();
		let worker = Worker::with_id(id, op, self.sink.clone())
			.with_control(self.control.child())
			.with_pause_poll(self.config.workers.pause_poll())
			.with_registry(self.workers.clone());
		let handle = worker.start()?;
		tracing::info!(worker_id = %id, worker = handle.name(), kind = handle.kind().as_str(), "controller.worker_started");
		self.handles.lock().push(handle);
		Ok(id)
	}

	/// Joins every worker that already finished and forgets it, along with
	/// all terminal status records. Runs on every launch.
	pub fn reap_finished(&self) -> Vec<WorkerOutcome> {
		let finished: Vec<WorkerHandle> = {
			let mut handles = self.handles.lock();
			let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut *handles).into_iter().partition(WorkerHandle::is_finished);
			*handles = running;
			finished
		};
		let timeout = self.config.workers.join_timeout();
		let mut outcomes = Vec::with_capacity(finished.len());
		for handle in finished {
			let id = handle.id();
			match handle.join_timeout(timeout) {
				Ok(outcome) => outcomes.push(outcome),
				Err(err) => tracing::error!(worker_id = %id, error = %err, "controller.join_failed"),
			}
		}
		let pruned = self.workers.prune_finished();
		if !outcomes.is_empty() || pruned > 0 {
			tracing::debug!(reaped = outcomes.len(), pruned, "controller.reaped");
		}
		outcomes
	}

	/// Handles still held: running workers plus finished ones not yet joined
	/// or reaped.
	pub fn tracked_workers(&self) -> usize {
		self.handles.lock().len()
	}

	/// Status snapshot of every worker started and not yet pruned.
	pub fn worker_status(&self) -> Vec<WorkerRecord> {
		self.workers.snapshots()
	}

	pub fn worker(&self, id: WorkerId) -> Option<WorkerRecord> {
		self.workers.get(id)
	}

	pub fn active_workers(&self) -> usize {
		self.workers.active_count()
	}

	fn with_handle(&self, id: WorkerId, f: impl FnOnce(&WorkerHandle)) -> bool {
		let handles = self.handles.lock();
		match handles.iter().find(|h| h.id() == id) {
			Some(handle) => {
				f(handle);
				true
			}
			None => false,
		}
	}

	pub fn cancel(&self, id: WorkerId) -> bool {
		self.with_handle(id, WorkerHandle::cancel)
	}

	pub fn pause(&self, id: WorkerId) -> bool {
		self.with_handle(id, WorkerHandle::pause)
	}

	pub fn resume(&self, id: WorkerId) -> bool {
		self.with_handle(id, WorkerHandle::resume)
	}

	/// Cancels every tracked worker. New workers may still be started.
	pub fn cancel_all(&self) {
		let handles = self.handles.lock();
		for handle in handles.iter() {
			handle.cancel();
		}
		tracing::info!(workers = handles.len(), "controller.cancel_all");
	}

	/// Joins one worker, cancelling it if it overruns the configured join
	/// timeout. `None` for unknown or already reaped ids.
	pub fn join(&self, id: WorkerId) -> Option<Result<WorkerOutcome>> {
		let handle = {
			let mut handles = self.handles.lock();
			let pos = handles.iter().position(|h| h.id() == id)?;
			handles.swap_remove(pos)
		};
		Some(handle.join_timeout(self.config.workers.join_timeout()).map_err(Into::into))
	}

	/// Cancels everything, joins every worker, then forgets their records.
	/// Workers that fail to join are logged and skipped. Workers started
	/// afterwards are cancelled at their first checkpoint.
	pub fn shutdown(&self) -> Vec<WorkerOutcome> {
		self.control.cancel();
		let handles = std::mem::take(&mut *self.handles.lock());
		let timeout = self.config.workers.join_timeout();
		let mut outcomes = Vec::with_capacity(handles.len());
		for handle in handles {
			let id = handle.id();
			match handle.join_timeout(timeout) {
				Ok(outcome) => outcomes.push(outcome),
				Err(err) => tracing::error!(worker_id = %id, error = %err, "controller.join_failed"),
			}
		}
		let pruned = self.workers.prune_finished();
		tracing::info!(joined = outcomes.len(), pruned, "controller.shutdown");
		outcomes
	}
}

/// Drains worker events on the UI thread and routes them through the
/// [`UiCoordinator`].
pub struct UiEventLoop {
	stream: EventStream,
	ui: Arc<UiCoordinator>,
}

impl UiEventLoop {
	pub fn new(stream: EventStream, ui: Arc<UiCoordinator>) -> Self {
		Self { stream, ui }
	}

	/// Routes every event queued right now. Returns how many were handled.
	pub fn pump(&mut self) -> usize {
		let events = self.stream.drain();
		for event in &events {
			self.ui.route_worker_event(event);
		}
		events.len()
	}

	/// Routes events until every sink is dropped.
	pub async fn run(mut self) {
		while let Some(event) = self.stream.next().await {
			self.ui.route_worker_event(&event);
		}
		tracing::debug!("ui_loop.closed");
	}

	/// Blocking form of [`Self::run`] for a plain UI thread.
	pub fn run_blocking(mut self) {
		while let Some(event) = self.stream.blocking_next() {
			self.ui.route_worker_event(&event);
		}
		tracing::debug!("ui_loop.closed");
	}
}
