//! Persistent session and settings management.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SpritePalConfig;
use crate::error::{ManagerError, Result};
use crate::service::{Service, ServiceCore, ServiceEvent, ServiceOwner};
use crate::settings::{self, PATHS, RECENT_FILES, SESSION, SettingsStore, UI};
use crate::validate;

pub const SAVE_SESSION: &str = "save_session";
pub const RESTORE_SESSION: &str = "restore_session";

const FILE_KEYS: [(&str, &str); 3] = [("vram_path", "vram"), ("cgram_path", "cgram"), ("oam_path", "oam")];

/// Main window placement. `-1` coordinates mean "let the window manager
/// decide".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
	pub width: i64,
	pub height: i64,
	pub x: i64,
	pub y: i64,
}

struct SessionState {
	settings: Map<String, Value>,
	/// Bumped by every mutation.
	generation: u64,
	/// Generation last written to disk.
	saved: u64,
}

impl SessionState {
	fn new(settings: Map<String, Value>) -> Self {
		Self {
			settings,
			generation: 0,
			saved: 0,
		}
	}

	fn mark_dirty(&mut self) {
		self.generation += 1;
	}

	fn mark_clean(&mut self) {
		self.saved = self.generation;
	}

	fn is_dirty(&self) -> bool {
		self.generation != self.saved
	}
}

/// JSON-backed settings store with session helpers.
///
/// Every mutation marks the session dirty; [`Service::cleanup`] saves a dirty
/// session.
pub struct SessionService {
	core: ServiceCore,
	path: PathBuf,
	dumps_dir: PathBuf,
	max_recent: usize,
	state: Mutex<SessionState>,
}

impl SessionService {
	pub const NAME: &'static str = "SessionService";

	/// Loads the settings file named by `config`.
	///
	/// A missing or unparsable file yields defaults; any other read failure is
	/// an error.
	pub fn new(config: &SpritePalConfig, owner: ServiceOwner) -> Result<Self> {
		let dumps_dir = config.session.dumps_dir();
		let max_recent = config.session.max_recent;
		let settings = load_settings(&config.settings_path, &dumps_dir, max_recent)?;

		let service = Self {
			core: ServiceCore::new(Self::NAME, owner),
			path: config.settings_path.clone(),
			dumps_dir,
			max_recent,
			state: Mutex::new(SessionState::new(settings)),
		};
		service.core.mark_initialized();
		tracing::info!(service = Self::NAME, path = %service.path.display(), "session.loaded");
		Ok(service)
	}

	pub fn settings_path(&self) -> &Path {
		&self.path
	}

	pub fn is_dirty(&self) -> bool {
		self.state.lock().is_dirty()
	}

	fn defaults(&self) -> Map<String, Value> {
		settings::default_settings(&self.dumps_dir, self.max_recent)
	}

	pub fn get(&self, category: &str, key: &str) -> Option<Value> {
		self.state.lock().settings.get(category)?.get(key).cloned()
	}

	/// Stores `value`. Unchanged values leave the session clean.
	pub fn set(&self, category: &str, key: &str, value: Value) {
		let changed = {
			let mut guard = self.state.lock();
			let state = &mut *guard;
			let section = state.settings.entry(category.to_owned()).or_insert_with(|| Value::Object(Map::new()));
			if !section.is_object() {
				*section = Value::Object(Map::new());
			}
			match section.as_object_mut() {
				Some(section) if section.get(key) != Some(&value) => {
					section.insert(key.to_owned(), value);
					state.mark_dirty();
					true
				}
				_ => false,
			}
		};
		if changed {
			self.core.emit(ServiceEvent::SessionChanged);
		}
	}

	/// Writes the settings file. A save already in flight makes this a no-op.
	pub fn save_session(&self) -> Result<()> {
		let Ok(_op) = self.core.begin_operation(SAVE_SESSION) else {
			return Ok(());
		};

		let (snapshot, generation) = self.snapshot();
		self.save_snapshot(&snapshot, generation)
	}

	fn snapshot(&self) -> (Value, u64) {
		let state = self.state.lock();
		(Value::Object(state.settings.clone()), state.generation)
	}

	/// Writes `snapshot` and marks `generation` as saved. Mutations made
	/// after the snapshot keep the session dirty.
	fn save_snapshot(&self, snapshot: &Value, generation: u64) -> Result<()> {
		write_json(&self.path, snapshot).map_err(|e| self.core.report(ManagerError::session_caused(format!("Could not save settings: {e}"), e)))?;

		{
			let mut state = self.state.lock();
			state.saved = state.saved.max(generation);
		}
		self.core.emit(ServiceEvent::SettingsSaved);
		tracing::info!(service = Self::NAME, path = %self.path.display(), "session.saved");
		Ok(())
	}

	/// Reloads the settings file and returns the session section.
	pub fn restore_session(&self) -> Result<Map<String, Value>> {
		let _op = self.core.begin_operation(RESTORE_SESSION).map_err(|e| self.core.report(e))?;
		let settings = load_settings(&self.path, &self.dumps_dir, self.max_recent)
			.map_err(|e| self.core.report(ManagerError::session_caused(format!("Could not restore session: {e}"), e)))?;
		{
			let mut state = self.state.lock();
			state.settings = settings;
			state.mark_clean();
		}
		self.core.emit(ServiceEvent::SessionChanged);
		Ok(self.get_session_data())
	}

	pub fn get_session_data(&self) -> Map<String, Value> {
		match self.state.lock().settings.get(SESSION) {
			Some(Value::Object(session)) => session.clone(),
			_ => Map::new(),
		}
	}

	/// Applies every entry of `data` to the session section.
	pub fn update_session_data(&self, data: Map<String, Value>) {
		for (key, value) in data {
			self.set(SESSION, &key, value);
		}
	}

	/// Records the dump paths of the current session and pushes them onto the
	/// recent-file lists.
	pub fn update_file_paths(&self, vram: Option<&Path>, cgram: Option<&Path>, oam: Option<&Path>) {
		for ((key, file_type), path) in FILE_KEYS.into_iter().zip([vram, cgram, oam]) {
			if let Some(path) = path {
				self.set(SESSION, key, Value::from(path.display().to_string()));
				self.add_recent_file(file_type, path);
			}
		}
	}

	/// Moves `path` to the front of the `file_type` recent list, trimming it
	/// to the configured maximum.
	pub fn add_recent_file(&self, file_type: &str, path: &Path) {
		let path = path.display().to_string();
		{
			let mut guard = self.state.lock();
			let state = &mut *guard;
			let Some(recent) = recent_section(&mut state.settings) else { return };
			let max_recent = recent.get("max_recent").and_then(Value::as_u64).map_or(self.max_recent, |n| n as usize);
			let list = recent.entry(file_type.to_owned()).or_insert_with(|| Value::Array(Vec::new()));
			let mut files: Vec<Value> = list.as_array().cloned().unwrap_or_default();
			files.retain(|v| v.as_str() != Some(path.as_str()));
			files.insert(0, Value::from(path));
			files.truncate(max_recent);
			*list = Value::Array(files);
			state.mark_dirty();
		}
		self.core.emit(ServiceEvent::SessionChanged);
	}

	/// Recent files of `file_type` that still exist. Missing entries are
	/// dropped from the stored list.
	pub fn get_recent_files(&self, file_type: &str) -> Vec<PathBuf> {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		let Some(recent) = recent_section(&mut state.settings) else {
			return Vec::new();
		};
		let Some(Value::Array(stored)) = recent.get(file_type) else {
			return Vec::new();
		};

		let existing: Vec<Value> = stored.iter().filter(|v| v.as_str().is_some_and(|p| Path::new(p).exists())).cloned().collect();
		let pruned = existing.len() != stored.len();
		let files = existing.iter().filter_map(Value::as_str).map(PathBuf::from).collect();
		if pruned {
			recent.insert(file_type.to_owned(), Value::Array(existing));
			state.mark_dirty();
		}
		files
	}

	/// Resets the session section to defaults.
	pub fn clear_session(&self) {
		let defaults = self.defaults();
		{
			let mut state = self.state.lock();
			if let Some(session) = defaults.get(SESSION) {
				state.settings.insert(SESSION.to_owned(), session.clone());
			}
			state.mark_dirty();
		}
		self.core.emit(ServiceEvent::SessionChanged);
	}

	/// Clears one recent list, or all of them when `file_type` is `None`.
	pub fn clear_recent_files(&self, file_type: Option<&str>) {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		let Some(recent) = recent_section(&mut state.settings) else { return };
		match file_type {
			Some(file_type) => {
				if recent.contains_key(file_type) {
					recent.insert(file_type.to_owned(), Value::Array(Vec::new()));
				}
			}
			None => {
				let max_recent = recent.get("max_recent").cloned().unwrap_or_else(|| Value::from(self.max_recent));
				recent.clear();
				recent.insert("max_recent".to_owned(), max_recent);
			}
		}
		state.mark_dirty();
	}

	pub fn window_geometry(&self) -> WindowGeometry {
		let read = |key: &str, default: i64| self.get(UI, key).and_then(|v| v.as_i64()).unwrap_or(default);
		WindowGeometry {
			width: read("window_width", 900),
			height: read("window_height", 600),
			x: read("window_x", -1),
			y: read("window_y", -1),
		}
	}

	pub fn update_window_geometry(&self, geometry: WindowGeometry) {
		self.set(UI, "window_width", Value::from(geometry.width));
		self.set(UI, "window_height", Value::from(geometry.height));
		self.set(UI, "window_x", Value::from(geometry.x));
		self.set(UI, "window_y", Value::from(geometry.y));
	}

	/// Writes the full settings document to `path`.
	pub fn export_settings(&self, path: &Path) -> Result<()> {
		let snapshot = Value::Object(self.state.lock().settings.clone());
		write_json(path, &snapshot).map_err(|e| ManagerError::session_caused(format!("Could not export settings: {e}"), e))?;
		tracing::info!(service = Self::NAME, path = %path.display(), "session.exported");
		Ok(())
	}

	/// Replaces the settings with the document at `path`, filling missing
	/// keys from defaults.
	pub fn import_settings(&self, path: &Path) -> Result<()> {
		validate::file_exists(path, "Settings file")?;
		let text = std::fs::read_to_string(path).map_err(|e| ManagerError::session_caused(format!("Could not import settings: {e}"), e))?;
		let data: Value = serde_json::from_str(&text).map_err(|e| ManagerError::session_caused(format!("Could not import settings: {e}"), e))?;
		let Value::Object(data) = data else {
			return Err(ManagerError::validation("Invalid settings file format"));
		};
		if ![SESSION, UI, PATHS].iter().any(|key| data.contains_key(*key)) {
			return Err(ManagerError::validation("Settings file missing required sections"));
		}

		let merged = settings::merge_defaults(data, self.defaults());
		{
			let mut state = self.state.lock();
			state.settings = merged;
			state.mark_dirty();
		}
		self.core.emit(ServiceEvent::SessionChanged);
		tracing::info!(service = Self::NAME, path = %path.display(), "session.imported");
		Ok(())
	}
}

impl SettingsStore for SessionService {
	fn get(&self, category: &str, key: &str) -> Option<Value> {
		SessionService::get(self, category, key)
	}

	fn set(&self, category: &str, key: &str, value: Value) {
		SessionService::set(self, category, key, value);
	}

	fn save(&self) -> Result<()> {
		self.save_session()
	}
}

impl Service for SessionService {
	fn core(&self) -> &ServiceCore {
		&self.core
	}

	fn cleanup(&self) -> Result<()> {
		let result = if self.is_dirty() { self.save_session() } else { Ok(()) };
		self.core.mark_uninitialized();
		result
	}
}

fn recent_section(settings: &mut Map<String, Value>) -> Option<&mut Map<String, Value>> {
	let entry = settings.entry(RECENT_FILES.to_owned()).or_insert_with(|| Value::Object(Map::new()));
	if !entry.is_object() {
		*entry = Value::Object(Map::new());
	}
	entry.as_object_mut()
}

fn load_settings(path: &Path, dumps_dir: &Path, max_recent: usize) -> Result<Map<String, Value>> {
	let defaults = settings::default_settings(dumps_dir, max_recent);
	let text = match std::fs::read_to_string(path) {
		Ok(text) => text,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(defaults),
		Err(e) => {
			return Err(ManagerError::session_caused(format!("Could not read settings {}: {e}", path.display()), e));
		}
	};

	match serde_json::from_str::<Value>(&text) {
		Ok(Value::Object(data)) if settings::is_legacy_layout(&data) => {
			tracing::info!(path = %path.display(), "session.migrating_legacy_settings");
			Ok(settings::migrate_legacy(&data, defaults))
		}
		Ok(Value::Object(data)) => Ok(settings::merge_defaults(data, defaults)),
		Ok(_) => {
			tracing::warn!(path = %path.display(), "session.invalid_settings_format");
			Ok(defaults)
		}
		Err(e) => {
			tracing::warn!(path = %path.display(), error = %e, "session.unreadable_settings");
			Ok(defaults)
		}
	}
}

fn write_json(path: &Path, value: &Value) -> io::Result<()> {
	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
	{
		std::fs::create_dir_all(parent)?;
	}
	let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
	std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests;
