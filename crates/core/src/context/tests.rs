use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::TempDir;

use super::*;
use crate::config::SpritePalConfig;
use crate::dump::DumpInjector;
use crate::extraction::ExtractionService;
use crate::injection::InjectionService;
use crate::registry::names;
use crate::service::ServiceOwner;
use crate::session::SessionService;
use crate::ui::UiCoordinator;

fn registry() -> (TempDir, Arc<ServiceRegistry>) {
	let dir = tempfile::tempdir().unwrap();
	let mut config = SpritePalConfig::in_dir(dir.path());
	config.app_name = "Test".into();
	config.session.default_dumps_dir = Some(dir.path().join("dumps"));
	let registry = Arc::new(ServiceRegistry::new());
	registry.initialize(&config).unwrap();
	(dir, registry)
}

fn ui() -> Arc<dyn Service> {
	Arc::new(UiCoordinator::new())
}

fn mock_injection() -> Arc<InjectionService> {
	Arc::new(InjectionService::new(Arc::new(DumpInjector), None, ServiceOwner::Shared))
}

#[test]
fn local_binding_then_parent_chain() {
	let (a, b, x) = (ui(), ui(), ui());
	let c2 = ContextBuilder::new("c2").bind("extraction", b).bind("session", Arc::clone(&x)).test_mode(true).build();
	let c1 = c2.child("c1", Bindings::from([("extraction".to_string(), Arc::clone(&a))]));

	assert!(Arc::ptr_eq(&c1.resolve_service::<UiCoordinator>("extraction").unwrap(), &a));
	assert!(Arc::ptr_eq(&c1.resolve_service::<UiCoordinator>("session").unwrap(), &x));
	assert_eq!(c1.parent().map(Context::name), Some("c2"));
}

#[test]
fn push_pop_is_lifo() {
	assert_eq!(depth(), 0);
	let outer = push(Bindings::new(), "outer");
	let inner = push(Bindings::new(), "inner");
	assert!(inner.parent().is_some_and(|p| p.ptr_eq(&outer)));
	assert_eq!(depth(), 2);

	assert!(pop().is_some_and(|c| c.ptr_eq(&inner)));
	assert!(current().is_some_and(|c| c.ptr_eq(&outer)));
	assert!(pop().is_some_and(|c| c.ptr_eq(&outer)));
	assert!(pop().is_none());
}

#[test]
fn override_falls_back_to_registry_after_scope() {
	let (_dir, registry) = registry();
	let base = ContextBuilder::new("app").registry(Arc::clone(&registry)).enter();
	let real = registry.injection().unwrap();
	let mock = mock_injection();
	{
		let _scope = ContextBuilder::new("test").bind(names::INJECTION, mock.clone()).enter();
		let resolved = current().unwrap().resolve::<InjectionService>(names::INJECTION).unwrap();
		assert!(Arc::ptr_eq(&resolved, &mock));
	}
	let resolved = base.resolve::<InjectionService>(names::INJECTION).unwrap();
	assert!(Arc::ptr_eq(&resolved, &real));
	assert!(current().is_some_and(|c| c.ptr_eq(base.context())));
}

#[test]
fn strict_context_checks_type() {
	let (_dir, registry) = registry();
	let strict = ContextBuilder::new("strict").registry(Arc::clone(&registry)).bind(names::EXTRACTION, ui()).build();
	let err = strict.resolve_service::<ExtractionService>(names::EXTRACTION).unwrap_err();
	assert!(matches!(err, ManagerError::TypeMismatch { ref name, .. } if name == names::EXTRACTION));

	let lenient = ContextBuilder::new("lenient").registry(registry).bind(names::EXTRACTION, ui()).test_mode(true).build();
	assert!(lenient.resolve_service::<ExtractionService>(names::EXTRACTION).is_ok());
	assert!(matches!(lenient.resolve::<ExtractionService>(names::EXTRACTION), Err(ManagerError::TypeMismatch { .. })));
}

#[test]
fn children_inherit_test_mode_and_registry() {
	let (_dir, registry) = registry();
	let parent = ContextBuilder::new("parent").registry(Arc::clone(&registry)).test_mode(true).build();
	let child = parent.child("child", Bindings::new());
	assert!(child.is_test_mode());
	let session = child.resolve::<SessionService>(names::SESSION).unwrap();
	assert!(Arc::ptr_eq(&session, &registry.session().unwrap()));
}

#[test]
fn resolve_or_prefers_bindings_then_bound_registry() {
	let (_dir, explicit) = registry();
	let (_other_dir, bound) = registry();
	let mock = mock_injection();

	let bare = ContextBuilder::new("bare").bind(names::INJECTION, mock.clone()).build();
	assert!(Arc::ptr_eq(&bare.resolve_or::<InjectionService>(names::INJECTION, &explicit).unwrap(), &mock));
	let extraction = bare.resolve_or::<ExtractionService>(names::EXTRACTION, &explicit).unwrap();
	assert!(Arc::ptr_eq(&extraction, &explicit.extraction().unwrap()));

	let with_registry = ContextBuilder::new("bound").registry(Arc::clone(&bound)).build();
	let extraction = with_registry.resolve_or::<ExtractionService>(names::EXTRACTION, &explicit).unwrap();
	assert!(Arc::ptr_eq(&extraction, &bound.extraction().unwrap()));
}

#[test]
fn introspection() {
	let (_dir, registry) = registry();
	let parent = ContextBuilder::new("parent").registry(registry).bind("palette", ui()).build();
	let child = parent.child("child", Bindings::from([("extraction".to_string(), ui())]));

	assert!(child.has_service("palette"));
	assert!(child.has_service(names::SESSION));
	assert!(!child.has_service("missing"));

	let available = child.available_services();
	assert_eq!(&available[..2], ["extraction".to_string(), "palette".to_string()].as_slice());
	assert_eq!(available.len(), 2 + names::ALL.len() - 1, "registry extraction is shadowed");
	assert_eq!(child.debug_info(), "child [extraction]\n  parent [palette]\n");
}

#[test]
fn guard_unwinds_out_of_order_pops() {
	let outer = ContextBuilder::new("outer").enter();
	let inner = ContextBuilder::new("inner").enter();
	assert_eq!(depth(), 2);
	drop(outer);
	assert_eq!(depth(), 0, "popping outer removes everything above it");
	drop(inner);
	assert_eq!(depth(), 0);
}

#[test]
fn stacks_are_per_thread() {
	let _guard = ContextBuilder::new("main").bind("x", ui()).enter();
	let seen = std::thread::spawn(depth).join().unwrap();
	assert_eq!(seen, 0);
	assert_eq!(depth(), 1);
}

#[test]
#[serial(global_registry)]
fn empty_stack_uses_global_registry() {
	let dir = tempfile::tempdir().unwrap();
	let mut config = SpritePalConfig::in_dir(dir.path().join("global"));
	config.session.default_dumps_dir = Some(dir.path().join("dumps"));
	ServiceRegistry::global().initialize(&config).unwrap();

	let session = resolve::<SessionService>(names::SESSION).unwrap();
	assert!(Arc::ptr_eq(&session, &ServiceRegistry::global().session().unwrap()));
	assert!(resolve_service::<SessionService>(names::SESSION).is_ok());
	assert!(matches!(resolve_service::<UiCoordinator>(names::SESSION), Err(ManagerError::TypeMismatch { .. })));

	let mock = mock_injection();
	let scope = ContextBuilder::new("test").bind(names::INJECTION, mock.clone()).enter();
	assert!(Arc::ptr_eq(&resolve::<InjectionService>(names::INJECTION).unwrap(), &mock));
	drop(scope);
	assert!(!Arc::ptr_eq(&resolve::<InjectionService>(names::INJECTION).unwrap(), &mock));

	ServiceRegistry::global().cleanup();
}
