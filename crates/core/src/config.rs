//! Application configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial (or empty)
//! file is valid.
//!
//! ```toml
//! app_name = "SpritePal"
//! settings_path = ".spritepal_settings.json"
//!
//! [workers]
//! pause_poll_ms = 50
//! join_timeout_ms = 5000
//!
//! [extraction]
//! output_dir = "extracted"
//! default_vram_offset = 0xC000
//!
//! [session]
//! max_recent = 10
//!
//! [editor]
//! command = "aseprite"
//! args = ["--batch"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// VRAM offset of the sprite area.
pub const DEFAULT_VRAM_OFFSET: usize = 0xC000;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("invalid value for {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpritePalConfig {
	pub app_name: String,
	/// JSON settings file used by the session service.
	pub settings_path: PathBuf,
	pub workers: WorkerSettings,
	pub extraction: ExtractionSettings,
	pub session: SessionSettings,
	pub editor: EditorSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
	/// Upper bound on one sleep of a paused worker.
	pub pause_poll_ms: u64,
	/// How long shutdown waits for each worker to reach a terminal state.
	pub join_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
	/// Base directory for relative output names.
	pub output_dir: PathBuf,
	pub default_vram_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
	pub max_recent: usize,
	/// Where emulator dumps usually live. Falls back to the user's documents
	/// directory.
	pub default_dumps_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
	pub command: String,
	pub args: Vec<String>,
}

impl Default for SpritePalConfig {
	fn default() -> Self {
		Self {
			app_name: "SpritePal".to_string(),
			settings_path: PathBuf::from(".spritepal_settings.json"),
			workers: WorkerSettings::default(),
			extraction: ExtractionSettings::default(),
			session: SessionSettings::default(),
			editor: EditorSettings::default(),
		}
	}
}

impl Default for WorkerSettings {
	fn default() -> Self {
		Self {
			pause_poll_ms: 50,
			join_timeout_ms: 5_000,
		}
	}
}

impl Default for ExtractionSettings {
	fn default() -> Self {
		Self {
			output_dir: PathBuf::from("."),
			default_vram_offset: DEFAULT_VRAM_OFFSET,
		}
	}
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self {
			max_recent: 10,
			default_dumps_dir: None,
		}
	}
}

impl Default for EditorSettings {
	fn default() -> Self {
		let command = if cfg!(target_os = "macos") {
			"open"
		} else if cfg!(windows) {
			"explorer"
		} else {
			"xdg-open"
		};
		Self {
			command: command.to_string(),
			args: Vec::new(),
		}
	}
}

impl WorkerSettings {
	pub fn pause_poll(&self) -> Duration {
		Duration::from_millis(self.pause_poll_ms)
	}

	pub fn join_timeout(&self) -> Duration {
		Duration::from_millis(self.join_timeout_ms)
	}
}

impl SessionSettings {
	pub fn dumps_dir(&self) -> PathBuf {
		self.default_dumps_dir.clone().unwrap_or_else(|| {
			dirs::document_dir()
				.or_else(dirs::home_dir)
				.unwrap_or_default()
				.join("Mesen2")
				.join("Debugger")
		})
	}
}

impl SpritePalConfig {
	/// Reads and validates a TOML config file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml_str(&text)?;
		tracing::debug!(path = %path.display(), "config.loaded");
		Ok(config)
	}

	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Config rooted in `dir`: settings file and output directory both live
	/// under it.
	pub fn in_dir(dir: impl AsRef<Path>) -> Self {
		let dir = dir.as_ref();
		Self {
			settings_path: dir.join(".spritepal_settings.json"),
			extraction: ExtractionSettings {
				output_dir: dir.join("output"),
				..ExtractionSettings::default()
			},
			..Self::default()
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.app_name.trim().is_empty() {
			return Err(ConfigError::Invalid {
				field: "app_name",
				reason: "must not be empty".to_string(),
			});
		}
		if self.workers.pause_poll_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "workers.pause_poll_ms",
				reason: "must be at least 1".to_string(),
			});
		}
		if self.session.max_recent == 0 {
			return Err(ConfigError::Invalid {
				field: "session.max_recent",
				reason: "must be at least 1".to_string(),
			});
		}
		if self.editor.command.trim().is_empty() {
			return Err(ConfigError::Invalid {
				field: "editor.command",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(())
	}
}
