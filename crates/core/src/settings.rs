//! Persistent key/value settings.
//!
//! Settings are a two-level JSON document: category -> key -> value. The
//! helpers here build the default document, fill gaps in a loaded one and
//! migrate the old flat layout.

use std::path::Path;

use serde_json::{Map, Value, json};

use crate::error::Result;

pub const SESSION: &str = "session";
pub const ROM_INJECTION: &str = "rom_injection";
pub const UI: &str = "ui";
pub const PATHS: &str = "paths";
pub const RECENT_FILES: &str = "recent_files";

/// Key/value store consumed by the session and application-state services.
pub trait SettingsStore: Send + Sync {
	fn get(&self, category: &str, key: &str) -> Option<Value>;

	fn set(&self, category: &str, key: &str, value: Value);

	fn save(&self) -> Result<()>;

	fn get_or(&self, category: &str, key: &str, default: Value) -> Value {
		self.get(category, key).unwrap_or(default)
	}

	fn get_str(&self, category: &str, key: &str) -> Option<String> {
		match self.get(category, key)? {
			Value::String(s) if !s.is_empty() => Some(s),
			_ => None,
		}
	}
}

pub(crate) fn default_settings(dumps_dir: &Path, max_recent: usize) -> Map<String, Value> {
	let value = json!({
		SESSION: {
			"vram_path": "",
			"cgram_path": "",
			"oam_path": "",
			"output_name": "",
			"create_grayscale": true,
			"create_metadata": true,
		},
		ROM_INJECTION: {
			"last_input_rom": "",
			"last_output_rom": "",
			"last_input_vram": "",
			"last_sprite_location": "",
			"last_custom_offset": "",
			"fast_compression": false,
		},
		UI: {
			"window_width": 900,
			"window_height": 600,
			"window_x": -1,
			"window_y": -1,
		},
		PATHS: {
			"default_dumps_dir": dumps_dir.display().to_string(),
			"last_used_dir": "",
		},
		RECENT_FILES: {
			"vram": [],
			"cgram": [],
			"oam": [],
			"rom": [],
			"max_recent": max_recent,
		},
	});
	match value {
		Value::Object(map) => map,
		_ => Map::new(),
	}
}

/// Whether `data` uses the pre-category flat layout.
pub(crate) fn is_legacy_layout(data: &Map<String, Value>) -> bool {
	![SESSION, UI, "cache", PATHS].iter().any(|key| data.contains_key(*key))
}

/// Fills every category and key missing from `data` with its default.
pub(crate) fn merge_defaults(mut data: Map<String, Value>, defaults: Map<String, Value>) -> Map<String, Value> {
	for (category, default_values) in defaults {
		match (data.get_mut(&category), default_values) {
			(Some(Value::Object(existing)), Value::Object(default_values)) => {
				for (key, value) in default_values {
					existing.entry(key).or_insert(value);
				}
			}
			(Some(_), _) => {}
			(None, default_values) => {
				data.insert(category, default_values);
			}
		}
	}
	data
}

/// Moves keys of the flat layout into their categories.
pub(crate) fn migrate_legacy(old: &Map<String, Value>, mut defaults: Map<String, Value>) -> Map<String, Value> {
	const MOVES: &[(&str, &str, &str)] = &[
		("vram_path", SESSION, "vram_path"),
		("cgram_path", SESSION, "cgram_path"),
		("oam_path", SESSION, "oam_path"),
		("output_name", SESSION, "output_name"),
		("window_width", UI, "window_width"),
		("window_height", UI, "window_height"),
		("window_x", UI, "window_x"),
		("window_y", UI, "window_y"),
		("theme", UI, "theme"),
		("last_export_dir", PATHS, "last_used_dir"),
	];
	for (old_key, category, key) in MOVES {
		if let Some(value) = old.get(*old_key)
			&& let Some(Value::Object(section)) = defaults.get_mut(*category)
		{
			section.insert((*key).to_string(), value.clone());
		}
	}
	defaults
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn defaults() -> Map<String, Value> {
		default_settings(Path::new("/dumps"), 10)
	}

	#[test]
	fn defaults_carry_every_category() {
		let defaults = defaults();
		for category in [SESSION, ROM_INJECTION, UI, PATHS, RECENT_FILES] {
			assert!(defaults.get(category).is_some_and(Value::is_object), "missing {category}");
		}
		assert_eq!(defaults[PATHS]["default_dumps_dir"], json!("/dumps"));
	}

	#[test]
	fn merge_keeps_loaded_values_and_fills_gaps() {
		let loaded = json!({ SESSION: { "vram_path": "/a.dmp" }, UI: "not-an-object" });
		let Value::Object(loaded) = loaded else { unreachable!() };
		let merged = merge_defaults(loaded, defaults());

		assert_eq!(merged[SESSION]["vram_path"], json!("/a.dmp"));
		assert_eq!(merged[SESSION]["create_grayscale"], json!(true));
		assert_eq!(merged[UI], json!("not-an-object"));
		assert_eq!(merged[RECENT_FILES]["max_recent"], json!(10));
	}

	#[test]
	fn legacy_flat_layout_is_migrated() {
		let old = json!({ "vram_path": "/v.dmp", "window_width": 1200, "last_export_dir": "/exports" });
		let Value::Object(old) = old else { unreachable!() };
		assert!(is_legacy_layout(&old));

		let migrated = migrate_legacy(&old, defaults());
		assert_eq!(migrated[SESSION]["vram_path"], json!("/v.dmp"));
		assert_eq!(migrated[UI]["window_width"], json!(1200));
		assert_eq!(migrated[UI]["window_height"], json!(600));
		assert_eq!(migrated[PATHS]["last_used_dir"], json!("/exports"));
		assert!(!is_legacy_layout(&migrated));
	}
}
