//! Sprite extraction from VRAM dumps and ROM images.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SpritePalConfig;
use crate::error::{ManagerError, Result};
use crate::service::{Service, ServiceCore, ServiceEvent, ServiceOwner};
use crate::session::SessionService;
use crate::validate;

/// 8x8 tile at 4 bits per pixel.
pub const BYTES_PER_TILE: usize = 32;
pub const PREVIEW_WIDTH: usize = 128;
pub const PREVIEW_HEIGHT: usize = 128;

pub const VRAM_EXTRACTION: &str = "vram_extraction";
pub const ROM_EXTRACTION: &str = "rom_extraction";
pub const SPRITE_PREVIEW: &str = "sprite_preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VramExtractionParams {
	pub vram_path: PathBuf,
	/// Output name without extension. Relative names land in the configured
	/// output directory.
	pub output_base: String,
	pub cgram_path: Option<PathBuf>,
	pub oam_path: Option<PathBuf>,
	pub vram_offset: Option<usize>,
	pub create_grayscale: bool,
	pub create_metadata: bool,
	/// Skip palette extraction entirely.
	pub grayscale_mode: bool,
}

impl VramExtractionParams {
	pub fn new(vram_path: impl Into<PathBuf>, output_base: impl Into<String>) -> Self {
		Self {
			vram_path: vram_path.into(),
			output_base: output_base.into(),
			cgram_path: None,
			oam_path: None,
			vram_offset: None,
			create_grayscale: true,
			create_metadata: true,
			grayscale_mode: false,
		}
	}

	#[must_use]
	pub fn with_cgram(mut self, cgram_path: impl Into<PathBuf>) -> Self {
		self.cgram_path = Some(cgram_path.into());
		self
	}

	#[must_use]
	pub fn grayscale(mut self) -> Self {
		self.grayscale_mode = true;
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomExtractionParams {
	pub rom_path: PathBuf,
	pub offset: usize,
	pub output_base: String,
	pub sprite_name: Option<String>,
	pub cgram_path: Option<PathBuf>,
}

impl RomExtractionParams {
	pub fn new(rom_path: impl Into<PathBuf>, offset: usize, output_base: impl Into<String>) -> Self {
		Self {
			rom_path: rom_path.into(),
			offset,
			output_base: output_base.into(),
			sprite_name: None,
			cgram_path: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionParams {
	Vram(VramExtractionParams),
	Rom(RomExtractionParams),
}

/// Sprite sheet written by a [`SpriteExtractor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSheet {
	pub path: PathBuf,
	pub tile_count: usize,
}

/// What [`SpriteExtractor::extract_palettes`] should produce next to a sheet.
#[derive(Debug, Clone, Copy)]
pub struct PaletteRequest<'a> {
	pub cgram_path: &'a Path,
	pub source_path: &'a Path,
	pub from_rom: bool,
	pub source_offset: usize,
	pub create_grayscale: bool,
	pub create_metadata: bool,
}

/// Raw preview tiles read straight from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpritePreview {
	pub tiles: Vec<u8>,
	pub width: usize,
	pub height: usize,
}

/// Byte-format extraction routines.
pub trait SpriteExtractor: Send + Sync {
	/// Writes the sprite sheet found at `offset` of a VRAM dump.
	fn extract_vram(&self, vram_path: &Path, offset: usize, output_base: &Path) -> io::Result<ExtractedSheet>;

	/// Writes the sprite sheet found at `offset` of a ROM image.
	fn extract_rom(&self, rom_path: &Path, offset: usize, output_base: &Path) -> io::Result<ExtractedSheet>;

	/// Writes palette (and optional metadata) files for an extracted sheet.
	fn extract_palettes(&self, request: PaletteRequest<'_>, sheet: &ExtractedSheet, output_base: &Path) -> io::Result<Vec<PathBuf>>;

	/// Reads up to `len` bytes starting at `offset`.
	fn read_preview(&self, path: &Path, offset: usize, len: usize) -> io::Result<Vec<u8>>;
}

/// Extraction service. Owns no files; every call is a self-contained run.
pub struct ExtractionService {
	core: ServiceCore,
	extractor: Arc<dyn SpriteExtractor>,
	session: Option<Arc<SessionService>>,
	output_dir: PathBuf,
	default_vram_offset: usize,
}

impl ExtractionService {
	pub const NAME: &'static str = "ExtractionService";

	/// Builds the service, creating the output directory when missing.
	pub fn new(config: &SpritePalConfig, extractor: Arc<dyn SpriteExtractor>, session: Option<Arc<SessionService>>, owner: ServiceOwner) -> Result<Self> {
		let output_dir = config.extraction.output_dir.clone();
		std::fs::create_dir_all(&output_dir)
			.map_err(|e| ManagerError::extraction_caused(format!("could not create output directory {}: {e}", output_dir.display()), e))?;

		let service = Self {
			core: ServiceCore::new(Self::NAME, owner),
			extractor,
			session,
			output_dir,
			default_vram_offset: config.extraction.default_vram_offset,
		};
		service.core.mark_initialized();
		Ok(service)
	}

	pub fn output_dir(&self) -> &Path {
		&self.output_dir
	}

	/// Resolves an output name against the output directory.
	pub fn output_base_path(&self, output_base: &str) -> PathBuf {
		let base = Path::new(output_base.trim());
		if base.is_absolute() { base.to_path_buf() } else { self.output_dir.join(base) }
	}

	pub fn validate_extraction_params(&self, params: &ExtractionParams) -> Result<()> {
		match params {
			ExtractionParams::Vram(p) => {
				if p.vram_path.as_os_str().is_empty() {
					return Err(ManagerError::validation("VRAM file is required for extraction"));
				}
				if !p.grayscale_mode && p.cgram_path.is_none() {
					return Err(ManagerError::validation(
						"CGRAM file is required for Full Color mode.\nPlease provide a CGRAM file or switch to Grayscale Only mode.",
					));
				}
				if let Some(cgram) = &p.cgram_path {
					validate::file_exists(cgram, "CGRAM file")?;
				}
				validate::file_exists(&p.vram_path, "VRAM file")?;
				validate::non_empty(&p.output_base, "Output name is required for extraction")?;
				if let Some(oam) = &p.oam_path {
					validate::file_exists(oam, "OAM file")?;
				}
			}
			ExtractionParams::Rom(p) => {
				validate::file_exists(&p.rom_path, "ROM file")?;
				let len = validate::file_len(&p.rom_path)?;
				validate::in_range(p.offset as u64, "offset", Some(0), Some(len.saturating_sub(1)))?;
				validate::non_empty(&p.output_base, "Output name is required for extraction")?;
				if let Some(cgram) = &p.cgram_path {
					validate::file_exists(cgram, "CGRAM file")?;
				}
			}
		}
		Ok(())
	}

	/// Extracts sprites from a VRAM dump. Returns every file created.
	pub fn extract_from_vram(&self, params: &VramExtractionParams) -> Result<Vec<PathBuf>> {
		let validated = validate::file_exists(&params.vram_path, "VRAM file")
			.and_then(|()| validate::non_empty(&params.output_base, "Output name is required for extraction"))
			.and_then(|()| params.cgram_path.as_deref().map_or(Ok(()), |p| validate::file_exists(p, "CGRAM file")))
			.and_then(|()| params.oam_path.as_deref().map_or(Ok(()), |p| validate::file_exists(p, "OAM file")));
		validated.map_err(|e| self.core.report(e))?;

		let _op = self.core.begin_operation(VRAM_EXTRACTION).map_err(|e| self.core.report(e))?;
		let output_base = self.output_base_path(&params.output_base);
		let offset = params.vram_offset.unwrap_or(self.default_vram_offset);

		self.run_vram(params, &output_base, offset)
			.map_err(|e| self.core.report(ManagerError::extraction_caused(format!("VRAM extraction failed: {e}"), e)))
			.map(|files| {
				if let Some(session) = &self.session {
					session.update_file_paths(Some(&params.vram_path), params.cgram_path.as_deref(), params.oam_path.as_deref());
				}
				files
			})
	}

	fn run_vram(&self, params: &VramExtractionParams, output_base: &Path, offset: usize) -> io::Result<Vec<PathBuf>> {
		self.core.emit_progress(0, "Extracting sprites from VRAM...");
		let sheet = self.extractor.extract_vram(&params.vram_path, offset, output_base)?;
		let mut files = vec![sheet.path.clone()];

		self.core.emit_progress(25, format!("Creating preview ({} tiles)...", sheet.tile_count));

		if let (false, Some(cgram)) = (params.grayscale_mode, params.cgram_path.as_deref()) {
			self.core.emit_progress(50, "Extracting palettes...");
			let request = PaletteRequest {
				cgram_path: cgram,
				source_path: &params.vram_path,
				from_rom: false,
				source_offset: offset,
				create_grayscale: params.create_grayscale,
				create_metadata: params.create_metadata,
			};
			files.extend(self.extractor.extract_palettes(request, &sheet, output_base)?);
		}

		self.core.emit_progress(100, "Extraction complete!");
		self.core.emit(ServiceEvent::FilesCreated { files: files.clone() });
		tracing::info!(service = self.core.name(), files = files.len(), "extraction.vram_complete");
		Ok(files)
	}

	/// Extracts one sprite from a ROM image. Returns every file created.
	pub fn extract_from_rom(&self, params: &RomExtractionParams) -> Result<Vec<PathBuf>> {
		self.validate_extraction_params(&ExtractionParams::Rom(params.clone())).map_err(|e| self.core.report(e))?;

		let _op = self.core.begin_operation(ROM_EXTRACTION).map_err(|e| self.core.report(e))?;
		let output_base = self.output_base_path(&params.output_base);
		let name = params.sprite_name.clone().unwrap_or_else(|| format!("offset_0x{:X}", params.offset));

		let files = self
			.run_rom(params, &output_base, &name)
			.map_err(|e| self.core.report(ManagerError::extraction_caused(format!("ROM extraction failed: {e}"), e)))?;
		self.core.emit(ServiceEvent::FilesCreated { files: files.clone() });
		if let Some(session) = &self.session {
			session.add_recent_file("rom", &params.rom_path);
		}
		tracing::info!(service = self.core.name(), sprite = %name, files = files.len(), "extraction.rom_complete");
		Ok(files)
	}

	fn run_rom(&self, params: &RomExtractionParams, output_base: &Path, name: &str) -> io::Result<Vec<PathBuf>> {
		self.core.emit_progress(0, format!("Extracting {name} from ROM..."));
		let sheet = self.extractor.extract_rom(&params.rom_path, params.offset, output_base)?;
		let mut files = vec![sheet.path.clone()];
		if let Some(cgram) = params.cgram_path.as_deref() {
			self.core.emit_progress(50, "Extracting palettes...");
			let request = PaletteRequest {
				cgram_path: cgram,
				source_path: &params.rom_path,
				from_rom: true,
				source_offset: params.offset,
				create_grayscale: true,
				create_metadata: true,
			};
			files.extend(self.extractor.extract_palettes(request, &sheet, output_base)?);
		}
		self.core.emit_progress(100, "ROM extraction complete!");
		Ok(files)
	}

	/// Reads raw preview tiles without writing any file. Several previews may
	/// run at once.
	pub fn sprite_preview(&self, rom_path: &Path, offset: usize) -> Result<SpritePreview> {
		validate::file_exists(rom_path, "ROM file").map_err(|e| self.core.report(e))?;

		let started = self.core.start_operation(SPRITE_PREVIEW);
		let len = (PREVIEW_WIDTH * PREVIEW_HEIGHT) / 64 * BYTES_PER_TILE;
		let result = self.extractor.read_preview(rom_path, offset, len);
		if started {
			self.core.finish_operation(SPRITE_PREVIEW);
		}

		let tiles = result.map_err(|e| self.core.report(ManagerError::extraction_caused(format!("Preview generation failed: {e}"), e)))?;
		Ok(SpritePreview {
			tiles,
			width: PREVIEW_WIDTH,
			height: PREVIEW_HEIGHT,
		})
	}
}

impl Service for ExtractionService {
	fn core(&self) -> &ServiceCore {
		&self.core
	}

	fn cleanup(&self) -> Result<()> {
		if self.core.has_active_operations() {
			tracing::warn!(service = self.core.name(), active = ?self.core.active_operations(), "service.cleanup_with_active_operations");
		}
		self.core.mark_uninitialized();
		Ok(())
	}
}
