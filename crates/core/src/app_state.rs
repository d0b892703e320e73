//! Runtime application state: namespaced values with optional TTL,
//! snapshots and sprite history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ManagerError, Result};
use crate::service::{Service, ServiceCore, ServiceEvent, ServiceOwner};
use crate::settings::SettingsStore;

pub const NAMESPACES: [&str; 4] = ["ui", "dialog", "widget", "temp"];
pub const MAX_SNAPSHOTS: usize = 10;
pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone)]
struct StateEntry {
	value: Value,
	expires_at: Option<Instant>,
}

impl StateEntry {
	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| now >= at)
	}
}

type Namespaces = HashMap<String, HashMap<String, StateEntry>>;

#[derive(Debug, Clone)]
struct Snapshot {
	id: Uuid,
	namespace: Option<String>,
	states: Namespaces,
}

/// One sprite the user visited, keyed by ROM offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpriteHistoryEntry {
	pub offset: u64,
	pub quality: f64,
	pub timestamp: DateTime<Utc>,
	pub metadata: Value,
}

#[derive(Default)]
struct AppState {
	runtime: Namespaces,
	snapshots: VecDeque<Snapshot>,
	history: VecDeque<SpriteHistoryEntry>,
}

pub struct ApplicationStateService {
	core: ServiceCore,
	settings: Option<Arc<dyn SettingsStore>>,
	state: Mutex<AppState>,
}

impl ApplicationStateService {
	pub const NAME: &'static str = "ApplicationStateService";

	/// `settings` backs [`Self::get_setting`] and friends; the session
	/// service in a full registry.
	pub fn new(settings: Option<Arc<dyn SettingsStore>>, owner: ServiceOwner) -> Self {
		let mut state = AppState::default();
		for ns in NAMESPACES {
			state.runtime.insert(ns.to_owned(), HashMap::new());
		}
		let service = Self {
			core: ServiceCore::new(Self::NAME, owner),
			settings,
			state: Mutex::new(state),
		};
		service.core.mark_initialized();
		service
	}

	fn settings(&self) -> Result<&Arc<dyn SettingsStore>> {
		self.settings.as_ref().ok_or_else(|| ManagerError::not_initialized("no settings store attached"))
	}

	pub fn get_setting(&self, category: &str, key: &str) -> Option<Value> {
		self.settings.as_ref()?.get(category, key)
	}

	pub fn set_setting(&self, category: &str, key: &str, value: Value) -> Result<()> {
		self.settings()?.set(category, key, value);
		Ok(())
	}

	pub fn save_settings(&self) -> Result<()> {
		self.settings()?.save().map_err(|e| self.core.report(e))?;
		self.core.emit(ServiceEvent::SettingsSaved);
		Ok(())
	}

	/// Current value of `key`, dropping it first if its TTL ran out.
	pub fn get_state(&self, namespace: &str, key: &str) -> Option<Value> {
		let mut state = self.state.lock();
		let entries = state.runtime.get_mut(namespace)?;
		if entries.get(key)?.is_expired(Instant::now()) {
			entries.remove(key);
			tracing::trace!(namespace, key, "app_state.expired");
			return None;
		}
		entries.get(key).map(|e| e.value.clone())
	}

	pub fn set_state(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>) {
		let entry = StateEntry {
			value,
			expires_at: ttl.map(|ttl| Instant::now() + ttl),
		};
		self.state
			.lock()
			.runtime
			.entry(namespace.to_owned())
			.or_default()
			.insert(key.to_owned(), entry);
		self.core.emit(ServiceEvent::StateChanged {
			namespace: namespace.to_owned(),
			key: key.to_owned(),
		});
	}

	/// Clears one namespace, or every namespace when `None`.
	pub fn clear_state(&self, namespace: Option<&str>) {
		let mut state = self.state.lock();
		match namespace {
			Some(ns) => {
				if let Some(entries) = state.runtime.get_mut(ns) {
					entries.clear();
				}
			}
			None => state.runtime.values_mut().for_each(HashMap::clear),
		}
	}

	/// Captures one namespace (or all) and returns the snapshot id. The
	/// oldest snapshot is evicted past [`MAX_SNAPSHOTS`].
	pub fn create_snapshot(&self, namespace: Option<&str>) -> Uuid {
		let mut state = self.state.lock();
		let states = match namespace {
			Some(ns) => Namespaces::from([(ns.to_owned(), state.runtime.get(ns).cloned().unwrap_or_default())]),
			None => state.runtime.clone(),
		};
		if state.snapshots.len() >= MAX_SNAPSHOTS {
			state.snapshots.pop_front();
		}
		let id = Uuid::new_v4();
		state.snapshots.push_back(Snapshot {
			id,
			namespace: namespace.map(str::to_owned),
			states,
		});
		tracing::debug!(%id, namespace, "app_state.snapshot_created");
		id
	}

	/// Restores a snapshot. Returns `false` for unknown ids.
	pub fn restore_snapshot(&self, id: Uuid) -> bool {
		let mut state = self.state.lock();
		let Some(snapshot) = state.snapshots.iter().find(|s| s.id == id).cloned() else {
			return false;
		};
		match snapshot.namespace {
			Some(ns) => {
				let entries = snapshot.states.get(&ns).cloned().unwrap_or_default();
				state.runtime.insert(ns, entries);
			}
			None => state.runtime = snapshot.states,
		}
		true
	}

	pub fn snapshot_ids(&self) -> Vec<Uuid> {
		self.state.lock().snapshots.iter().map(|s| s.id).collect()
	}

	/// Appends a sprite to the history. Returns `false` for an offset already
	/// present.
	pub fn add_sprite_to_history(&self, offset: u64, quality: f64, metadata: Option<Value>) -> bool {
		let offsets = {
			let mut state = self.state.lock();
			if state.history.iter().any(|s| s.offset == offset) {
				return false;
			}
			state.history.push_back(SpriteHistoryEntry {
				offset,
				quality,
				timestamp: Utc::now(),
				metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
			});
			while state.history.len() > MAX_HISTORY {
				state.history.pop_front();
			}
			state.history.iter().map(|s| s.offset).collect()
		};
		self.core.emit(ServiceEvent::HistoryUpdated { offsets });
		true
	}

	pub fn sprite_history(&self) -> Vec<SpriteHistoryEntry> {
		self.state.lock().history.iter().cloned().collect()
	}

	pub fn has_sprite(&self, offset: u64) -> bool {
		self.state.lock().history.iter().any(|s| s.offset == offset)
	}

	pub fn clear_sprite_history(&self) {
		self.state.lock().history.clear();
		self.core.emit(ServiceEvent::HistoryUpdated { offsets: Vec::new() });
	}
}

impl Service for ApplicationStateService {
	fn core(&self) -> &ServiceCore {
		&self.core
	}

	fn cleanup(&self) -> Result<()> {
		{
			let mut state = self.state.lock();
			state.runtime.values_mut().for_each(HashMap::clear);
			state.snapshots.clear();
		}
		self.core.mark_uninitialized();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	fn service() -> ApplicationStateService {
		ApplicationStateService::new(None, ServiceOwner::Shared)
	}

	#[test]
	fn state_round_trips_and_expires() {
		let svc = service();
		svc.set_state("dialog", "last_tab", json!(2), None);
		svc.set_state("temp", "flash", json!("hi"), Some(Duration::ZERO));

		assert_eq!(svc.get_state("dialog", "last_tab"), Some(json!(2)));
		assert_eq!(svc.get_state("temp", "flash"), None);
		assert_eq!(svc.get_state("nowhere", "x"), None);
	}

	#[test]
	fn clear_state_by_namespace() {
		let svc = service();
		svc.set_state("ui", "a", json!(1), None);
		svc.set_state("widget", "b", json!(2), None);
		svc.clear_state(Some("ui"));
		assert_eq!(svc.get_state("ui", "a"), None);
		assert_eq!(svc.get_state("widget", "b"), Some(json!(2)));
		svc.clear_state(None);
		assert_eq!(svc.get_state("widget", "b"), None);
	}

	#[test]
	fn snapshot_restores_namespace_or_everything() {
		let svc = service();
		svc.set_state("ui", "zoom", json!(2), None);
		svc.set_state("dialog", "open", json!(true), None);
		let ui_only = svc.create_snapshot(Some("ui"));
		let all = svc.create_snapshot(None);

		svc.set_state("ui", "zoom", json!(8), None);
		svc.set_state("dialog", "open", json!(false), None);

		assert!(svc.restore_snapshot(ui_only));
		assert_eq!(svc.get_state("ui", "zoom"), Some(json!(2)));
		assert_eq!(svc.get_state("dialog", "open"), Some(json!(false)));

		assert!(svc.restore_snapshot(all));
		assert_eq!(svc.get_state("dialog", "open"), Some(json!(true)));
		assert!(!svc.restore_snapshot(Uuid::new_v4()));
	}

	#[test]
	fn snapshots_are_bounded_oldest_first() {
		let svc = service();
		let first = svc.create_snapshot(None);
		for _ in 0..MAX_SNAPSHOTS {
			svc.create_snapshot(None);
		}
		let ids = svc.snapshot_ids();
		assert_eq!(ids.len(), MAX_SNAPSHOTS);
		assert!(!ids.contains(&first));
	}

	#[test]
	fn history_deduplicates_and_is_bounded() {
		let svc = service();
		assert!(svc.add_sprite_to_history(0x1000, 0.9, None));
		assert!(!svc.add_sprite_to_history(0x1000, 0.1, None));
		for offset in 0..MAX_HISTORY as u64 {
			svc.add_sprite_to_history(0x2000 + offset, 1.0, Some(json!({ "name": "kirby" })));
		}

		let history = svc.sprite_history();
		assert_eq!(history.len(), MAX_HISTORY);
		assert!(!svc.has_sprite(0x1000), "oldest entry evicted");
		assert_eq!(history.last().map(|s| s.offset), Some(0x2000 + MAX_HISTORY as u64 - 1));

		svc.clear_sprite_history();
		assert!(svc.sprite_history().is_empty());
	}

	#[test]
	fn settings_require_a_store() {
		let svc = service();
		assert_eq!(svc.get_setting("ui", "theme"), None);
		assert!(matches!(svc.set_setting("ui", "theme", json!("dark")), Err(ManagerError::NotInitialized(_))));
	}
}
