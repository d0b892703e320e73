//! Service registry: builds the shared services in dependency order and hands
//! them out by name.
//!
//! Lookups read an immutable map published through [`ArcSwapOption`], so
//! [`ServiceRegistry::get`] never blocks. Initialization and cleanup are
//! serialized by a separate mutex.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use indexmap::IndexMap;
use parking_lot::Mutex;
use spritepal_worker::panic_message;

use crate::app_state::ApplicationStateService;
use crate::config::SpritePalConfig;
use crate::dump::Backends;
use crate::error::{ManagerError, Result};
use crate::extraction::ExtractionService;
use crate::injection::InjectionService;
use crate::service::{Service, ServiceOwner, downcast_service};
use crate::session::SessionService;
use crate::settings::SettingsStore;
use crate::ui::UiCoordinator;

/// Registration names, in construction order.
pub mod names {
	pub const SESSION: &str = "session";
	pub const APPLICATION_STATE: &str = "application_state";
	pub const EXTRACTION: &str = "extraction";
	pub const INJECTION: &str = "injection";
	pub const UI_COORDINATOR: &str = "ui_coordinator";

	pub const ALL: [&str; 5] = [SESSION, APPLICATION_STATE, EXTRACTION, INJECTION, UI_COORDINATOR];
}

type ServiceMap = IndexMap<&'static str, Arc<dyn Service>>;

pub struct ServiceRegistry {
	services: ArcSwapOption<ServiceMap>,
	lifecycle: Mutex<()>,
	backends: Backends,
}

impl Default for ServiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ServiceRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceRegistry").field("services", &self.service_names()).finish_non_exhaustive()
	}
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self::with_backends(Backends::default())
	}

	pub fn with_backends(backends: Backends) -> Self {
		Self {
			services: ArcSwapOption::empty(),
			lifecycle: Mutex::new(()),
			backends,
		}
	}

	/// Process-wide registry for code that cannot be handed one explicitly.
	pub fn global() -> &'static ServiceRegistry {
		static GLOBAL: OnceLock<ServiceRegistry> = OnceLock::new();
		GLOBAL.get_or_init(ServiceRegistry::new)
	}

	pub fn backends(&self) -> &Backends {
		&self.backends
	}

	/// Builds every service. No-op when already initialized. On failure the
	/// services built so far are cleaned up in reverse order and the registry
	/// stays uninitialized.
	pub fn initialize(&self, config: &SpritePalConfig) -> Result<()> {
		let _lifecycle = self.lifecycle.lock();
		if self.services.load().is_some() {
			tracing::debug!("registry.already_initialized");
			return Ok(());
		}

		let mut built = ServiceMap::new();
		if let Err(err) = self.build(config, &mut built) {
			tracing::error!(error = %err, built = built.len(), "registry.initialize_failed");
			cleanup_all(&built);
			return Err(err);
		}

		tracing::info!(services = built.len(), "registry.initialized");
		self.services.store(Some(Arc::new(built)));
		Ok(())
	}

	fn build(&self, config: &SpritePalConfig, built: &mut ServiceMap) -> Result<()> {
		let session = Arc::new(SessionService::new(config, ServiceOwner::Shared).map_err(|e| init_error(SessionService::NAME, e))?);
		built.insert(names::SESSION, session.clone());

		let store: Arc<dyn SettingsStore> = session.clone();
		built.insert(names::APPLICATION_STATE, Arc::new(ApplicationStateService::new(Some(store), ServiceOwner::Shared)));

		let extraction = ExtractionService::new(config, self.backends.extractor.clone(), Some(session.clone()), ServiceOwner::Shared)
			.map_err(|e| init_error(ExtractionService::NAME, e))?;
		built.insert(names::EXTRACTION, Arc::new(extraction));

		let injection = InjectionService::new(self.backends.injector.clone(), Some(session), ServiceOwner::Shared);
		built.insert(names::INJECTION, Arc::new(injection));

		built.insert(names::UI_COORDINATOR, Arc::new(UiCoordinator::new()));
		Ok(())
	}

	/// Every required service is registered and initialized.
	pub fn is_initialized(&self) -> bool {
		let Some(services) = self.services.load_full() else {
			return false;
		};
		names::ALL.iter().all(|name| services.get(*name).is_some_and(|s| s.is_initialized()))
	}

	/// Registered names in construction order. Empty before initialization.
	pub fn service_names(&self) -> Vec<&'static str> {
		self.services.load_full().map(|s| s.keys().copied().collect()).unwrap_or_default()
	}

	pub fn get(&self, name: &str) -> Result<Arc<dyn Service>> {
		let services = self
			.services
			.load_full()
			.ok_or_else(|| ManagerError::not_initialized("service registry is not initialized"))?;
		services
			.get(name)
			.cloned()
			.ok_or_else(|| ManagerError::not_initialized(format!("service {name} is not registered")))
	}

	/// [`Self::get`] plus a runtime type check.
	pub fn get_typed<T: Service>(&self, name: &str) -> Result<Arc<T>> {
		downcast_service(name, self.get(name)?)
	}

	pub fn session(&self) -> Result<Arc<SessionService>> {
		self.get_typed(names::SESSION)
	}

	pub fn application_state(&self) -> Result<Arc<ApplicationStateService>> {
		self.get_typed(names::APPLICATION_STATE)
	}

	pub fn extraction(&self) -> Result<Arc<ExtractionService>> {
		self.get_typed(names::EXTRACTION)
	}

	pub fn injection(&self) -> Result<Arc<InjectionService>> {
		self.get_typed(names::INJECTION)
	}

	pub fn ui_coordinator(&self) -> Result<Arc<UiCoordinator>> {
		self.get_typed(names::UI_COORDINATOR)
	}

	/// Tears every service down in reverse construction order. Individual
	/// failures are logged and skipped.
	pub fn cleanup(&self) {
		let _lifecycle = self.lifecycle.lock();
		let Some(services) = self.services.swap(None) else {
			return;
		};
		cleanup_all(&services);
		tracing::info!(services = services.len(), "registry.cleaned_up");
	}
}

fn init_error(service: &'static str, source: ManagerError) -> ManagerError {
	ManagerError::Initialization {
		service,
		source: Box::new(source),
	}
}

fn cleanup_all(services: &ServiceMap) {
	for (name, service) in services.iter().rev() {
		match catch_unwind(AssertUnwindSafe(|| service.cleanup())) {
			Ok(Ok(())) => tracing::debug!(service = name, "registry.service_cleaned_up"),
			Ok(Err(err)) => tracing::warn!(service = name, error = %err, "registry.cleanup_failed"),
			Err(payload) => tracing::error!(service = name, panic = %panic_message(payload.as_ref()), "registry.cleanup_panicked"),
		}
	}
}

#[cfg(test)]
mod tests;
