//! Operations run by background workers.
//!
//! Each operation holds exactly one service. While the body runs, the
//! service's progress, status and warning notifications are forwarded onto
//! the worker's event channel. Worker-owned services are cleaned up in
//! [`Operation::release`].

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use spritepal_worker::{Operation, OperationError, OperationKind, WorkerContext};

use crate::config::EditorSettings;
use crate::extraction::{ExtractionService, RomExtractionParams, VramExtractionParams};
use crate::injection::{InjectionParams, InjectionService};
use crate::notify::Subscription;
use crate::service::{Service, ServiceCore, ServiceEvent};

/// Forwards a service's notifications into `ctx`. Status text reuses the
/// last forwarded percentage.
fn forward_events(core: &ServiceCore, ctx: &WorkerContext) -> Subscription {
	let ctx = ctx.clone();
	let last_percent = AtomicU8::new(0);
	core.connect(move |event| match event {
		ServiceEvent::Progress { percent, message } => {
			last_percent.store(*percent, Ordering::Relaxed);
			ctx.emit_progress(i64::from(*percent), message.clone());
		}
		ServiceEvent::Status { message } => ctx.emit_progress(i64::from(last_percent.load(Ordering::Relaxed)), message.clone()),
		ServiceEvent::Warning { message } => ctx.emit_warning(message.clone()),
		_ => {}
	})
}

/// Cleans up `service` if the current worker owns it. Shared services are
/// left to their registry.
fn release_owned(service: &dyn Service) {
	let Some(owner) = service.core().owner().worker() else {
		return;
	};
	match service.cleanup() {
		Ok(()) => tracing::debug!(worker_id = %owner, service = service.name(), "worker.owned_service_released"),
		Err(err) => tracing::warn!(worker_id = %owner, service = service.name(), error = %err, "worker.owned_service_cleanup_failed"),
	}
}

fn disconnect(forward: &mut Option<Subscription>) {
	if let Some(subscription) = forward.take() {
		subscription.disconnect();
	}
}

pub struct VramExtractionOp {
	service: Arc<ExtractionService>,
	params: VramExtractionParams,
	forward: Option<Subscription>,
}

impl VramExtractionOp {
	pub fn new(service: Arc<ExtractionService>, params: VramExtractionParams) -> Self {
		Self {
			service,
			params,
			forward: None,
		}
	}

	pub fn service(&self) -> &Arc<ExtractionService> {
		&self.service
	}
}

impl Operation for VramExtractionOp {
	fn name(&self) -> &str {
		"vram-extraction"
	}

	fn kind(&self) -> OperationKind {
		OperationKind::VramExtraction
	}

	fn connect_signals(&mut self, ctx: &WorkerContext) {
		self.forward = Some(forward_events(self.service.core(), ctx));
	}

	fn disconnect_signals(&mut self) {
		disconnect(&mut self.forward);
	}

	fn perform(&mut self, ctx: &WorkerContext) -> Result<String, OperationError> {
		ctx.checkpoint()?;
		let files = self.service.extract_from_vram(&self.params)?;
		ctx.checkpoint()?;
		Ok(format!("Extraction complete: {} files created", files.len()))
	}

	fn release(&mut self) {
		release_owned(self.service.as_ref());
	}
}

pub struct RomExtractionOp {
	service: Arc<ExtractionService>,
	params: RomExtractionParams,
	forward: Option<Subscription>,
}

impl RomExtractionOp {
	pub fn new(service: Arc<ExtractionService>, params: RomExtractionParams) -> Self {
		Self {
			service,
			params,
			forward: None,
		}
	}

	pub fn service(&self) -> &Arc<ExtractionService> {
		&self.service
	}
}

impl Operation for RomExtractionOp {
	fn name(&self) -> &str {
		"rom-extraction"
	}

	fn kind(&self) -> OperationKind {
		OperationKind::RomExtraction
	}

	fn connect_signals(&mut self, ctx: &WorkerContext) {
		self.forward = Some(forward_events(self.service.core(), ctx));
	}

	fn disconnect_signals(&mut self) {
		disconnect(&mut self.forward);
	}

	fn perform(&mut self, ctx: &WorkerContext) -> Result<String, OperationError> {
		ctx.checkpoint()?;
		let files = self.service.extract_from_rom(&self.params)?;
		ctx.checkpoint()?;
		let name = self.params.sprite_name.as_deref().unwrap_or("sprite");
		Ok(format!("Extracted {name}: {} files created", files.len()))
	}

	fn release(&mut self) {
		release_owned(self.service.as_ref());
	}
}

pub struct InjectionOp {
	service: Arc<InjectionService>,
	params: InjectionParams,
	forward: Option<Subscription>,
}

impl InjectionOp {
	pub fn new(service: Arc<InjectionService>, params: InjectionParams) -> Self {
		Self {
			service,
			params,
			forward: None,
		}
	}
}

impl InjectionOp {
	pub fn service(&self) -> &Arc<InjectionService> {
		&self.service
	}
}

impl Operation for InjectionOp {
	fn name(&self) -> &str {
		"injection"
	}

	fn kind(&self) -> OperationKind {
		self.params.target.kind()
	}

	fn connect_signals(&mut self, ctx: &WorkerContext) {
		self.forward = Some(forward_events(self.service.core(), ctx));
	}

	fn disconnect_signals(&mut self) {
		disconnect(&mut self.forward);
	}

	fn perform(&mut self, ctx: &WorkerContext) -> Result<String, OperationError> {
		ctx.checkpoint()?;
		let accepted = self.service.start_injection(&self.params)?;
		ctx.checkpoint()?;
		if !accepted {
			return Err(OperationError::msg("the sprite was rejected by the injector"));
		}
		Ok(format!("Injection complete: {}", self.params.target.output().display()))
	}

	fn release(&mut self) {
		release_owned(self.service.as_ref());
	}
}

/// Hands a file to an external program.
pub trait EditorLauncher: Send + Sync {
	fn launch(&self, path: &Path) -> io::Result<()>;
}

/// Spawns the configured editor command with the file as last argument.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
	settings: EditorSettings,
}

impl CommandLauncher {
	pub fn new(settings: EditorSettings) -> Self {
		Self { settings }
	}
}

impl EditorLauncher for CommandLauncher {
	fn launch(&self, path: &Path) -> io::Result<()> {
		let child = Command::new(&self.settings.command).args(&self.settings.args).arg(path).spawn()?;
		tracing::info!(command = %self.settings.command, pid = child.id(), path = %path.display(), "editor.launched");
		Ok(())
	}
}

pub struct OpenInEditorOp {
	launcher: Arc<dyn EditorLauncher>,
	path: PathBuf,
}

impl OpenInEditorOp {
	pub fn new(launcher: Arc<dyn EditorLauncher>, path: impl Into<PathBuf>) -> Self {
		Self {
			launcher,
			path: path.into(),
		}
	}
}

impl Operation for OpenInEditorOp {
	fn name(&self) -> &str {
		"open-in-editor"
	}

	fn kind(&self) -> OperationKind {
		OperationKind::External
	}

	fn perform(&mut self, ctx: &WorkerContext) -> Result<String, OperationError> {
		ctx.checkpoint()?;
		if !self.path.is_file() {
			return Err(OperationError::msg(format!("file not found: {}", self.path.display())));
		}
		self.launcher.launch(&self.path)?;
		Ok(format!("Opened {} in editor", self.path.display()))
	}
}
