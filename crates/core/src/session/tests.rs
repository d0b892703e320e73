use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use super::*;

fn fixture() -> (TempDir, SpritePalConfig) {
	let dir = tempfile::tempdir().unwrap();
	let mut config = SpritePalConfig::in_dir(dir.path());
	config.session.default_dumps_dir = Some(dir.path().join("dumps"));
	config.session.max_recent = 3;
	(dir, config)
}

fn touch(dir: &TempDir, name: &str) -> PathBuf {
	let path = dir.path().join(name);
	std::fs::write(&path, b"x").unwrap();
	path
}

#[test]
fn missing_file_yields_defaults() {
	let (_dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	assert!(session.is_initialized());
	assert_eq!(session.get(SESSION, "create_grayscale"), Some(json!(true)));
	assert_eq!(session.window_geometry(), WindowGeometry {
		width: 900,
		height: 600,
		x: -1,
		y: -1
	});
	assert!(!session.is_dirty());
}

#[test]
fn invalid_json_falls_back_to_defaults() {
	let (_dir, config) = fixture();
	std::fs::write(&config.settings_path, "{ not json").unwrap();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	assert_eq!(session.get(UI, "window_width"), Some(json!(900)));
}

#[test]
fn unreadable_settings_path_is_session_error() {
	let (dir, mut config) = fixture();
	config.settings_path = dir.path().to_path_buf();
	assert!(matches!(SessionService::new(&config, ServiceOwner::Shared), Err(ManagerError::Session { .. })));
}

#[test]
fn legacy_file_is_migrated_on_load() {
	let (_dir, config) = fixture();
	std::fs::write(&config.settings_path, r#"{"vram_path": "/old/vram.dmp", "theme": "dark"}"#).unwrap();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	assert_eq!(session.get(SESSION, "vram_path"), Some(json!("/old/vram.dmp")));
	assert_eq!(session.get(UI, "theme"), Some(json!("dark")));
}

#[test]
fn set_marks_dirty_only_on_change_and_notifies() {
	let (_dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	let events = Arc::new(Mutex::new(Vec::new()));
	let _sub = {
		let events = Arc::clone(&events);
		session.core().connect(move |e| events.lock().push(e.clone()))
	};

	session.set(UI, "window_width", json!(900));
	assert!(!session.is_dirty());
	session.set(UI, "window_width", json!(1024));
	assert!(session.is_dirty());
	assert_eq!(*events.lock(), vec![ServiceEvent::SessionChanged]);
}

#[test]
fn save_then_restore_round_trips_session() {
	let (_dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	session.set(SESSION, "output_name", json!("kirby"));
	session.save_session().unwrap();
	assert!(!session.is_dirty());

	session.set(SESSION, "output_name", json!("scratch"));
	let restored = session.restore_session().unwrap();
	assert_eq!(restored.get("output_name"), Some(&json!("kirby")));
	assert_eq!(session.get(SESSION, "output_name"), Some(json!("kirby")));
}

#[test]
fn recent_files_are_deduplicated_bounded_and_filtered() {
	let (dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	let a = touch(&dir, "a.dmp");
	let b = touch(&dir, "b.dmp");
	let c = touch(&dir, "c.dmp");
	let d = touch(&dir, "d.dmp");

	for path in [&a, &b, &a, &c, &d] {
		session.add_recent_file("vram", path);
	}
	assert_eq!(session.get_recent_files("vram"), vec![d.clone(), c.clone(), a.clone()]);

	std::fs::remove_file(&c).unwrap();
	assert_eq!(session.get_recent_files("vram"), vec![d, a]);
	assert_eq!(session.get(RECENT_FILES, "vram").and_then(|v| v.as_array().map(Vec::len)), Some(2));
}

#[test]
fn update_file_paths_records_session_and_recents() {
	let (dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	let vram = touch(&dir, "vram.dmp");
	let cgram = touch(&dir, "cgram.dmp");

	session.update_file_paths(Some(&vram), Some(&cgram), None);
	let data = session.get_session_data();
	assert_eq!(data.get("vram_path"), Some(&json!(vram.display().to_string())));
	assert_eq!(data.get("oam_path"), Some(&json!("")));
	assert_eq!(session.get_recent_files("cgram"), vec![cgram]);
}

#[test]
fn clear_session_and_recent_files() {
	let (dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	let vram = touch(&dir, "vram.dmp");
	session.update_file_paths(Some(&vram), None, None);
	session.add_recent_file("rom", &vram);

	session.clear_recent_files(Some("vram"));
	assert!(session.get_recent_files("vram").is_empty());
	assert_eq!(session.get_recent_files("rom").len(), 1);

	session.clear_recent_files(None);
	assert!(session.get_recent_files("rom").is_empty());
	assert_eq!(session.get(RECENT_FILES, "max_recent"), Some(json!(3)));

	session.clear_session();
	assert_eq!(session.get(SESSION, "vram_path"), Some(json!("")));
}

#[test]
fn export_and_import_settings() {
	let (dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	session.update_window_geometry(WindowGeometry {
		width: 1280,
		height: 720,
		x: 10,
		y: 20,
	});
	let exported = dir.path().join("export/settings.json");
	session.export_settings(&exported).unwrap();

	let (_other_dir, other_config) = fixture();
	let other = SessionService::new(&other_config, ServiceOwner::Shared).unwrap();
	other.import_settings(&exported).unwrap();
	assert_eq!(other.window_geometry().width, 1280);
	assert!(other.is_dirty());
}

#[test]
fn import_rejects_documents_without_sections() {
	let (dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	let bogus = dir.path().join("bogus.json");
	std::fs::write(&bogus, r#"{"something": 1}"#).unwrap();
	assert!(matches!(session.import_settings(&bogus), Err(ManagerError::Validation(_))));

	std::fs::write(&bogus, "[1, 2]").unwrap();
	assert!(matches!(session.import_settings(&bogus), Err(ManagerError::Validation(_))));

	assert!(matches!(session.import_settings(&dir.path().join("missing.json")), Err(ManagerError::Validation(_))));
}

#[test]
fn cleanup_saves_dirty_session() {
	let (_dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	session.set(SESSION, "output_name", json!("saved-on-exit"));
	session.cleanup().unwrap();
	assert!(!session.is_initialized());

	let text = std::fs::read_to_string(&config.settings_path).unwrap();
	assert!(text.contains("saved-on-exit"));
}

#[test]
fn change_during_save_keeps_session_dirty() {
	let (_dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	session.set(SESSION, "output_name", json!("first"));

	let (snapshot, generation) = session.snapshot();
	session.set(SESSION, "vram_path", json!("/dumps/late.dmp"));
	session.save_snapshot(&snapshot, generation).unwrap();

	assert!(session.is_dirty(), "the late change is not on disk yet");
	let text = std::fs::read_to_string(&config.settings_path).unwrap();
	assert!(text.contains("first"));
	assert!(!text.contains("late.dmp"));

	session.cleanup().unwrap();
	let text = std::fs::read_to_string(&config.settings_path).unwrap();
	assert!(text.contains("late.dmp"));
}

#[test]
fn settings_store_view_reads_and_writes() {
	let (_dir, config) = fixture();
	let session = SessionService::new(&config, ServiceOwner::Shared).unwrap();
	let store: &dyn SettingsStore = &session;
	store.set(PATHS, "last_used_dir", json!("/work"));
	assert_eq!(store.get_str(PATHS, "last_used_dir").as_deref(), Some("/work"));
	assert_eq!(store.get_or(PATHS, "nope", json!(0)), json!(0));
	store.save().unwrap();
	assert!(config.settings_path.is_file());
}
