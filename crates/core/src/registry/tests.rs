use pretty_assertions::assert_eq;
use serial_test::serial;
use tempfile::TempDir;

use super::*;

fn config() -> (TempDir, SpritePalConfig) {
	let dir = tempfile::tempdir().unwrap();
	let mut config = SpritePalConfig::in_dir(dir.path());
	config.session.default_dumps_dir = Some(dir.path().join("dumps"));
	(dir, config)
}

#[test]
fn lookups_fail_before_initialize() {
	let registry = ServiceRegistry::new();
	assert!(!registry.is_initialized());
	assert!(registry.service_names().is_empty());
	assert!(matches!(registry.get(names::SESSION), Err(ManagerError::NotInitialized(_))));
	assert!(matches!(registry.extraction(), Err(ManagerError::NotInitialized(_))));
}

#[test]
fn initialize_builds_services_in_dependency_order() {
	let (_dir, config) = config();
	let registry = ServiceRegistry::new();
	registry.initialize(&config).unwrap();

	assert!(registry.is_initialized());
	assert_eq!(registry.service_names(), names::ALL.to_vec());
	assert_eq!(registry.session().unwrap().name(), SessionService::NAME);
	assert_eq!(registry.application_state().unwrap().name(), ApplicationStateService::NAME);
	assert_eq!(registry.extraction().unwrap().core().owner(), ServiceOwner::Shared);
	assert_eq!(registry.injection().unwrap().name(), InjectionService::NAME);
	assert_eq!(registry.ui_coordinator().unwrap().name(), UiCoordinator::NAME);
}

#[test]
fn initialize_is_idempotent() {
	let (_dir, config) = config();
	let registry = ServiceRegistry::new();
	registry.initialize(&config).unwrap();
	let first = registry.session().unwrap();
	registry.initialize(&config).unwrap();
	assert!(Arc::ptr_eq(&first, &registry.session().unwrap()));
}

#[test]
fn unknown_name_and_wrong_type() {
	let (_dir, config) = config();
	let registry = ServiceRegistry::new();
	registry.initialize(&config).unwrap();

	assert!(matches!(registry.get("palette"), Err(ManagerError::NotInitialized(_))));
	let err = registry.get_typed::<InjectionService>(names::EXTRACTION).err().unwrap();
	assert!(matches!(err, ManagerError::TypeMismatch { ref name, .. } if name == names::EXTRACTION));
}

#[test]
fn application_state_reads_session_settings() {
	let (_dir, config) = config();
	let registry = ServiceRegistry::new();
	registry.initialize(&config).unwrap();

	let state = registry.application_state().unwrap();
	state.set_setting("ui", "theme", serde_json::json!("dark")).unwrap();
	assert_eq!(registry.session().unwrap().get("ui", "theme"), Some(serde_json::json!("dark")));
}

#[test]
fn failed_initialize_rolls_back() {
	let (dir, mut config) = config();
	let blocker = dir.path().join("blocker");
	std::fs::write(&blocker, b"not a directory").unwrap();
	config.extraction.output_dir = blocker.join("output");

	let registry = ServiceRegistry::new();
	let err = registry.initialize(&config).unwrap_err();
	assert!(matches!(err, ManagerError::Initialization { service: ExtractionService::NAME, .. }), "{err}");
	assert!(!registry.is_initialized());
	assert!(matches!(registry.get(names::SESSION), Err(ManagerError::NotInitialized(_))));

	config.extraction.output_dir = dir.path().join("output");
	registry.initialize(&config).unwrap();
	assert!(registry.is_initialized());
}

#[test]
fn cleanup_tears_down_and_allows_reinitialize() {
	let (_dir, config) = config();
	let registry = ServiceRegistry::new();
	registry.initialize(&config).unwrap();
	let session = registry.session().unwrap();
	let ui = registry.ui_coordinator().unwrap();

	registry.cleanup();
	assert!(!registry.is_initialized());
	assert!(!session.is_initialized());
	assert!(!ui.is_initialized());
	registry.cleanup();

	registry.initialize(&config).unwrap();
	assert!(!Arc::ptr_eq(&session, &registry.session().unwrap()));
}

#[test]
#[serial(global_registry)]
fn global_registry_is_shared() {
	let (_dir, config) = config();
	let global = ServiceRegistry::global();
	assert!(std::ptr::eq(global, ServiceRegistry::global()));

	global.initialize(&config).unwrap();
	assert!(ServiceRegistry::global().is_initialized());
	global.cleanup();
	assert!(!ServiceRegistry::global().is_initialized());
}
