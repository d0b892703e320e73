//! Where workers get their services from.
//!
//! [`OwnedServiceFactory`] builds a fresh service per worker, so two workers
//! never touch the same operation set. [`SingletonFactory`] hands out the
//! shared registry instances for code that still expects them.

use std::sync::Arc;

use spritepal_worker::WorkerId;

use crate::config::SpritePalConfig;
use crate::context;
use crate::dump::Backends;
use crate::error::Result;
use crate::extraction::ExtractionService;
use crate::injection::InjectionService;
use crate::registry::{ServiceRegistry, names};
use crate::service::ServiceOwner;
use crate::session::SessionService;

pub trait ManagerFactory: Send + Sync {
	fn create_extraction_manager(&self, owner: WorkerId) -> Result<Arc<ExtractionService>>;

	fn create_injection_manager(&self, owner: WorkerId) -> Result<Arc<InjectionService>>;

	/// Whether created services belong to the requesting worker.
	fn is_owned(&self) -> bool;
}

/// One new service per call, owned by the requesting worker.
pub struct OwnedServiceFactory {
	config: SpritePalConfig,
	backends: Backends,
	session: Option<Arc<SessionService>>,
}

impl OwnedServiceFactory {
	pub fn new(config: SpritePalConfig, backends: Backends) -> Self {
		Self {
			config,
			backends,
			session: None,
		}
	}

	/// Session the created services record recent files and defaults in.
	#[must_use]
	pub fn with_session(mut self, session: Arc<SessionService>) -> Self {
		self.session = Some(session);
		self
	}
}

impl ManagerFactory for OwnedServiceFactory {
	fn create_extraction_manager(&self, owner: WorkerId) -> Result<Arc<ExtractionService>> {
		let service = ExtractionService::new(&self.config, self.backends.extractor.clone(), self.session.clone(), ServiceOwner::Worker(owner))?;
		tracing::debug!(worker_id = %owner, service = ExtractionService::NAME, "factory.created_owned");
		Ok(Arc::new(service))
	}

	fn create_injection_manager(&self, owner: WorkerId) -> Result<Arc<InjectionService>> {
		let service = InjectionService::new(self.backends.injector.clone(), self.session.clone(), ServiceOwner::Worker(owner));
		tracing::debug!(worker_id = %owner, service = InjectionService::NAME, "factory.created_owned");
		Ok(Arc::new(service))
	}

	fn is_owned(&self) -> bool {
		true
	}
}

/// Returns the shared instance: the current context's binding when one is
/// pushed on the calling thread, otherwise the registry's. A context with
/// no registry of its own falls back to this factory's registry.
#[derive(Debug, Default)]
pub struct SingletonFactory {
	registry: Option<Arc<ServiceRegistry>>,
}

impl SingletonFactory {
	/// Falls back to [`ServiceRegistry::global`].
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_registry(registry: Arc<ServiceRegistry>) -> Self {
		Self { registry: Some(registry) }
	}

	fn registry(&self) -> &ServiceRegistry {
		match &self.registry {
			Some(registry) => registry,
			None => ServiceRegistry::global(),
		}
	}
}

impl ManagerFactory for SingletonFactory {
	fn create_extraction_manager(&self, owner: WorkerId) -> Result<Arc<ExtractionService>> {
		tracing::trace!(worker_id = %owner, "factory.shared_extraction");
		match context::current() {
			Some(ctx) => ctx.resolve_or(names::EXTRACTION, self.registry()),
			None => self.registry().extraction(),
		}
	}

	fn create_injection_manager(&self, owner: WorkerId) -> Result<Arc<InjectionService>> {
		tracing::trace!(worker_id = %owner, "factory.shared_injection");
		match context::current() {
			Some(ctx) => ctx.resolve_or(names::INJECTION, self.registry()),
			None => self.registry().injection(),
		}
	}

	fn is_owned(&self) -> bool {
		false
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::context::ContextBuilder;
	use crate::service::Service;

	fn config(dir: &tempfile::TempDir) -> SpritePalConfig {
		let mut config = SpritePalConfig::in_dir(dir.path());
		config.session.default_dumps_dir = Some(dir.path().join("dumps"));
		config
	}

	#[test]
	fn owned_services_are_distinct_and_carry_their_owner() {
		let dir = tempfile::tempdir().unwrap();
		let factory = OwnedServiceFactory::new(config(&dir), Backends::default());
		let (w1, w2) = (WorkerId::next(), WorkerId::next());

		let a = factory.create_extraction_manager(w1).unwrap();
		let b = factory.create_extraction_manager(w2).unwrap();
		assert!(!Arc::ptr_eq(&a, &b));
		assert_eq!(a.core().owner(), ServiceOwner::Worker(w1));
		assert_eq!(b.core().owner(), ServiceOwner::Worker(w2));

		let inj = factory.create_injection_manager(w1).unwrap();
		assert_eq!(inj.core().owner().worker(), Some(w1));
		assert!(factory.is_owned());
	}

	#[test]
	fn owned_operation_sets_do_not_interfere() {
		let dir = tempfile::tempdir().unwrap();
		let factory = OwnedServiceFactory::new(config(&dir), Backends::default());
		let a = factory.create_extraction_manager(WorkerId::next()).unwrap();
		let b = factory.create_extraction_manager(WorkerId::next()).unwrap();

		assert!(a.core().start_operation(crate::extraction::VRAM_EXTRACTION));
		assert!(b.core().start_operation(crate::extraction::VRAM_EXTRACTION));
	}

	#[test]
	fn singleton_returns_registry_instance() {
		let dir = tempfile::tempdir().unwrap();
		let registry = Arc::new(ServiceRegistry::new());
		registry.initialize(&config(&dir)).unwrap();
		let factory = SingletonFactory::with_registry(Arc::clone(&registry));

		let a = factory.create_extraction_manager(WorkerId::next()).unwrap();
		let b = factory.create_extraction_manager(WorkerId::next()).unwrap();
		assert!(Arc::ptr_eq(&a, &b));
		assert!(Arc::ptr_eq(&a, &registry.extraction().unwrap()));
		assert_eq!(a.core().owner(), ServiceOwner::Shared);
		assert!(!factory.is_owned());
	}

	#[test]
	fn singleton_honours_context_override() {
		let dir = tempfile::tempdir().unwrap();
		let registry = Arc::new(ServiceRegistry::new());
		registry.initialize(&config(&dir)).unwrap();
		let mock = Arc::new(InjectionService::new(Backends::default().injector, None, ServiceOwner::Shared));
		let factory = SingletonFactory::with_registry(Arc::clone(&registry));

		{
			let _ctx = ContextBuilder::new("test").registry(Arc::clone(&registry)).bind(names::INJECTION, mock.clone()).enter();
			assert!(Arc::ptr_eq(&factory.create_injection_manager(WorkerId::next()).unwrap(), &mock));
		}
		assert!(Arc::ptr_eq(&factory.create_injection_manager(WorkerId::next()).unwrap(), &registry.injection().unwrap()));
	}

	#[test]
	fn singleton_uses_own_registry_under_unrelated_context() {
		let dir = tempfile::tempdir().unwrap();
		let registry = Arc::new(ServiceRegistry::new());
		registry.initialize(&config(&dir)).unwrap();
		let factory = SingletonFactory::with_registry(Arc::clone(&registry));

		let _ctx = ContextBuilder::new("unrelated").enter();
		let extraction = factory.create_extraction_manager(WorkerId::next()).unwrap();
		assert!(Arc::ptr_eq(&extraction, &registry.extraction().unwrap()));
		let injection = factory.create_injection_manager(WorkerId::next()).unwrap();
		assert!(Arc::ptr_eq(&injection, &registry.injection().unwrap()));
	}
}
