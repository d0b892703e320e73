//! Sprite injection into VRAM dumps and ROM images.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use spritepal_worker::OperationKind;

use crate::error::{ManagerError, Result};
use crate::service::{Service, ServiceCore, ServiceEvent, ServiceOwner};
use crate::session::SessionService;
use crate::settings::{ROM_INJECTION, SESSION, SettingsStore};
use crate::validate;

pub const INJECTION: &str = "injection";

/// Highest numbered suffix tried before falling back to a timestamp.
const MAX_NUMBERED_SUGGESTION: u32 = 10;

/// ROM location of the sprite data that VRAM `0xC000` is loaded from.
const SPRITE_AREA_VRAM: usize = 0xC000;
const SPRITE_AREA_ROM: usize = 0x0C_8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionTarget {
	Vram { input: PathBuf, output: PathBuf },
	Rom { input: PathBuf, output: PathBuf, fast_compression: bool },
}

impl InjectionTarget {
	pub fn input(&self) -> &Path {
		match self {
			Self::Vram { input, .. } | Self::Rom { input, .. } => input,
		}
	}

	pub fn output(&self) -> &Path {
		match self {
			Self::Vram { output, .. } | Self::Rom { output, .. } => output,
		}
	}

	pub fn kind(&self) -> OperationKind {
		match self {
			Self::Vram { .. } => OperationKind::VramInjection,
			Self::Rom { .. } => OperationKind::RomInjection,
		}
	}

	fn mode(&self) -> &'static str {
		match self {
			Self::Vram { .. } => "VRAM",
			Self::Rom { .. } => "ROM",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionParams {
	pub sprite_path: PathBuf,
	pub offset: usize,
	pub target: InjectionTarget,
	pub metadata_path: Option<PathBuf>,
}

impl InjectionParams {
	pub fn vram(sprite_path: impl Into<PathBuf>, input: impl Into<PathBuf>, output: impl Into<PathBuf>, offset: usize) -> Self {
		Self {
			sprite_path: sprite_path.into(),
			offset,
			target: InjectionTarget::Vram {
				input: input.into(),
				output: output.into(),
			},
			metadata_path: None,
		}
	}

	pub fn rom(sprite_path: impl Into<PathBuf>, input: impl Into<PathBuf>, output: impl Into<PathBuf>, offset: usize, fast_compression: bool) -> Self {
		Self {
			sprite_path: sprite_path.into(),
			offset,
			target: InjectionTarget::Rom {
				input: input.into(),
				output: output.into(),
				fast_compression,
			},
			metadata_path: None,
		}
	}
}

/// Byte-format injection routines. `Ok(false)` means the routine ran but
/// rejected the sprite.
pub trait SpriteInjector: Send + Sync {
	fn inject_vram(&self, sprite: &Path, input: &Path, output: &Path, offset: usize) -> io::Result<bool>;

	fn inject_rom(&self, sprite: &Path, input: &Path, output: &Path, offset: usize, fast_compression: bool) -> io::Result<bool>;
}

pub struct InjectionService {
	core: ServiceCore,
	injector: Arc<dyn SpriteInjector>,
	session: Option<Arc<SessionService>>,
}

impl InjectionService {
	pub const NAME: &'static str = "InjectionService";

	pub fn new(injector: Arc<dyn SpriteInjector>, session: Option<Arc<SessionService>>, owner: ServiceOwner) -> Self {
		let service = Self {
			core: ServiceCore::new(Self::NAME, owner),
			injector,
			session,
		};
		service.core.mark_initialized();
		service
	}

	pub fn validate_injection_params(&self, params: &InjectionParams) -> Result<()> {
		validate::file_exists(&params.sprite_path, "Sprite file")?;
		if validate::file_len(&params.sprite_path)? == 0 {
			return Err(ManagerError::validation("Sprite file validation failed: file is empty"));
		}

		let label = match params.target {
			InjectionTarget::Vram { .. } => "Input VRAM file",
			InjectionTarget::Rom { .. } => "Input ROM file",
		};
		validate::file_exists(params.target.input(), label)?;
		if params.target.output().as_os_str().is_empty() {
			return Err(ManagerError::validation(format!("Output {} path is required", params.target.mode())));
		}

		let input_len = validate::file_len(params.target.input())?;
		validate::in_range(params.offset as u64, "offset", Some(0), Some(input_len.saturating_sub(1)))?;

		if let Some(metadata) = &params.metadata_path {
			validate::file_exists(metadata, "Metadata file")?;
			read_json(metadata).map_err(|e| ManagerError::validation(format!("Metadata file validation failed: {e}")))?;
		}
		Ok(())
	}

	/// Runs one injection. Returns whether the injector accepted the sprite.
	pub fn start_injection(&self, params: &InjectionParams) -> Result<bool> {
		let _op = self.core.begin_operation(INJECTION).map_err(|e| self.core.report(e))?;
		self.validate_injection_params(params).map_err(|e| self.core.report(e))?;

		let mode = params.target.mode();
		tracing::info!(service = self.core.name(), mode, sprite = %params.sprite_path.display(), "injection.started");
		self.core.emit_status(format!("Starting {mode} injection..."));
		self.core.emit_progress(0, format!("Injecting sprite into {mode}..."));

		let result = match &params.target {
			InjectionTarget::Vram { input, output } => self.injector.inject_vram(&params.sprite_path, input, output, params.offset),
			InjectionTarget::Rom {
				input,
				output,
				fast_compression,
			} => self.injector.inject_rom(&params.sprite_path, input, output, params.offset, *fast_compression),
		};
		let accepted = result.map_err(|e| self.core.report(ManagerError::injection_caused(format!("{mode} injection failed: {e}"), e)))?;

		if !accepted {
			self.core.emit_warning(format!("{mode} injection was rejected by the injector"));
			return Ok(false);
		}

		self.core.emit_progress(100, format!("{mode} injection complete"));
		self.core.emit(ServiceEvent::FilesCreated {
			files: vec![params.target.output().to_path_buf()],
		});
		self.remember_target(&params.target);
		Ok(true)
	}

	pub fn is_injection_active(&self) -> bool {
		self.core.is_operation_active(INJECTION)
	}

	fn remember_target(&self, target: &InjectionTarget) {
		let Some(session) = &self.session else { return };
		match target {
			InjectionTarget::Vram { input, .. } => {
				session.set(ROM_INJECTION, "last_input_vram", path_value(input));
			}
			InjectionTarget::Rom { input, output, .. } => {
				session.set(ROM_INJECTION, "last_input_rom", path_value(input));
				session.set(ROM_INJECTION, "last_output_rom", path_value(output));
			}
		}
	}

	/// Free output path next to `input`: `<stem>_injected.dmp`, then
	/// `_injected2` .. `_injected10`, then a timestamped name.
	pub fn suggest_output_vram_path(&self, input: &Path) -> PathBuf {
		suggest_output(input, "_injected", Some("dmp"))
	}

	/// Like [`Self::suggest_output_vram_path`] with a `_modified` suffix,
	/// keeping the ROM's extension.
	pub fn suggest_output_rom_path(&self, input: &Path) -> PathBuf {
		suggest_output(input, "_modified", None)
	}

	/// Best guess for the VRAM dump a sprite was extracted from.
	pub fn smart_vram_suggestion(&self, sprite_path: &Path, metadata_path: Option<&Path>) -> Option<PathBuf> {
		let session = self.session.as_deref();
		let suggestion = session
			.and_then(|s| s.get_str(SESSION, "vram_path"))
			.map(PathBuf::from)
			.filter(|p| p.is_file())
			.or_else(|| metadata_path.and_then(metadata_vram))
			.or_else(|| sibling_vram(sprite_path))
			.or_else(|| session.and_then(|s| s.get_recent_files("vram").into_iter().next()))
			.or_else(|| {
				session
					.and_then(|s| s.get_str(ROM_INJECTION, "last_input_vram"))
					.map(PathBuf::from)
					.filter(|p| p.is_file())
			});
		match &suggestion {
			Some(path) => tracing::debug!(path = %path.display(), "injection.vram_suggestion"),
			None => tracing::debug!("injection.no_vram_suggestion"),
		}
		suggestion
	}

	/// Maps a VRAM offset (hex text such as `"0xC000"`) to the ROM offset its
	/// sprite data is known to come from.
	pub fn convert_vram_to_rom_offset(vram_offset: &str) -> Option<usize> {
		(parse_offset(vram_offset)? == SPRITE_AREA_VRAM).then_some(SPRITE_AREA_ROM)
	}

	/// Persists the ROM injection form so it can be restored next time. Save
	/// failures are logged, not returned.
	pub fn save_rom_injection_settings(&self, input_rom: &str, sprite_location: &str, custom_offset: &str, fast_compression: bool) -> Result<()> {
		let session = self
			.session
			.as_ref()
			.ok_or_else(|| ManagerError::not_initialized("session service is not available"))?;

		if !input_rom.is_empty() {
			session.set(ROM_INJECTION, "last_input_rom", Value::from(input_rom));
		}
		if !sprite_location.is_empty() && sprite_location != "Select sprite location..." {
			session.set(ROM_INJECTION, "last_sprite_location", Value::from(sprite_location));
		}
		if !custom_offset.is_empty() {
			session.set(ROM_INJECTION, "last_custom_offset", Value::from(custom_offset));
		}
		session.set(ROM_INJECTION, "fast_compression", Value::from(fast_compression));

		if let Err(err) = session.save_session() {
			tracing::error!(error = %err, "injection.save_settings_failed");
		}
		Ok(())
	}
}

impl Service for InjectionService {
	fn core(&self) -> &ServiceCore {
		&self.core
	}

	fn cleanup(&self) -> Result<()> {
		if self.is_injection_active() {
			tracing::warn!(service = self.core.name(), "service.cleanup_with_active_injection");
		}
		self.core.mark_uninitialized();
		Ok(())
	}
}

/// Parses `0x`-prefixed or bare hexadecimal offsets.
pub fn parse_offset(text: &str) -> Option<usize> {
	let text = text.trim();
	let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
	usize::from_str_radix(digits, 16).ok()
}

fn suggest_output(input: &Path, suffix: &str, extension: Option<&str>) -> PathBuf {
	let dir = input.parent().unwrap_or_else(|| Path::new(""));
	let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
	let base = stem.strip_suffix(suffix).unwrap_or(&stem);
	let ext = match extension.map(str::to_owned).or_else(|| input.extension().map(|e| e.to_string_lossy().into_owned())) {
		Some(ext) => format!(".{ext}"),
		None => String::new(),
	};

	let first = dir.join(format!("{base}{suffix}{ext}"));
	if !first.exists() {
		return first;
	}
	for counter in 2..=MAX_NUMBERED_SUGGESTION {
		let candidate = dir.join(format!("{base}{suffix}{counter}{ext}"));
		if !candidate.exists() {
			return candidate;
		}
	}
	dir.join(format!("{base}{suffix}_{}{ext}", chrono::Utc::now().timestamp()))
}

fn metadata_vram(metadata_path: &Path) -> Option<PathBuf> {
	let metadata = read_json(metadata_path).ok()?;
	let path = PathBuf::from(metadata.get("source_vram")?.as_str()?);
	path.is_file().then_some(path)
}

fn sibling_vram(sprite_path: &Path) -> Option<PathBuf> {
	let dir = sprite_path.parent()?;
	let stem = sprite_path.file_stem()?.to_string_lossy();
	[format!("{stem}.dmp"), format!("{stem}_VRAM.dmp"), format!("{stem}.vram"), "VRAM.dmp".to_string(), "vram.dmp".to_string()]
		.into_iter()
		.map(|name| dir.join(name))
		.find(|path| path.is_file())
}

fn read_json(path: &Path) -> std::result::Result<Value, String> {
	let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
	serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn path_value(path: &Path) -> Value {
	Value::from(path.display().to_string())
}
