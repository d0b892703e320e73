//! Plain-file extraction and injection backends.
//!
//! These slice and splice raw 4bpp tile bytes. They make no attempt at
//! decompression or image encoding.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use crate::extraction::{BYTES_PER_TILE, ExtractedSheet, PaletteRequest, SpriteExtractor};
use crate::injection::SpriteInjector;

/// Largest sheet cut from a dump: the whole 16 KiB sprite area.
const MAX_SHEET_BYTES: usize = 0x4000;

/// Collaborators handed to every extraction and injection service.
#[derive(Clone)]
pub struct Backends {
	pub extractor: Arc<dyn SpriteExtractor>,
	pub injector: Arc<dyn SpriteInjector>,
}

impl Default for Backends {
	fn default() -> Self {
		Self {
			extractor: Arc::new(DumpExtractor),
			injector: Arc::new(DumpInjector),
		}
	}
}

impl std::fmt::Debug for Backends {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Backends").finish_non_exhaustive()
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpExtractor;

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpInjector;

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
	let mut name = OsString::from(base.as_os_str());
	name.push(suffix);
	PathBuf::from(name)
}

fn write_creating_dirs(path: &Path, bytes: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
	{
		fs::create_dir_all(parent)?;
	}
	fs::write(path, bytes)
}

fn out_of_bounds(what: &str, offset: usize, len: usize) -> io::Error {
	io::Error::new(io::ErrorKind::InvalidInput, format!("offset 0x{offset:X} is beyond the end of the {what} ({len} bytes)"))
}

impl DumpExtractor {
	fn cut_sheet(&self, source: &Path, what: &str, offset: usize, output_base: &Path) -> io::Result<ExtractedSheet> {
		let data = fs::read(source)?;
		if offset >= data.len() {
			return Err(out_of_bounds(what, offset, data.len()));
		}
		let end = data.len().min(offset + MAX_SHEET_BYTES);
		let usable = (end - offset) / BYTES_PER_TILE * BYTES_PER_TILE;
		if usable == 0 {
			return Err(io::Error::new(io::ErrorKind::InvalidData, format!("no complete tile at offset 0x{offset:X}")));
		}

		let path = with_suffix(output_base, ".bin");
		write_creating_dirs(&path, &data[offset..offset + usable])?;
		Ok(ExtractedSheet {
			path,
			tile_count: usable / BYTES_PER_TILE,
		})
	}
}

impl SpriteExtractor for DumpExtractor {
	fn extract_vram(&self, vram_path: &Path, offset: usize, output_base: &Path) -> io::Result<ExtractedSheet> {
		self.cut_sheet(vram_path, "VRAM dump", offset, output_base)
	}

	fn extract_rom(&self, rom_path: &Path, offset: usize, output_base: &Path) -> io::Result<ExtractedSheet> {
		self.cut_sheet(rom_path, "ROM", offset, output_base)
	}

	fn extract_palettes(&self, request: PaletteRequest<'_>, sheet: &ExtractedSheet, output_base: &Path) -> io::Result<Vec<PathBuf>> {
		let cgram = fs::read(request.cgram_path)?;
		let mut files = Vec::new();

		let palette = with_suffix(output_base, ".pal");
		write_creating_dirs(&palette, &cgram)?;
		files.push(palette);

		if request.create_grayscale {
			// 16 BGR555 entries ramping from black to white.
			let ramp: Vec<u8> = (0u16..16).flat_map(|i| {
				let level = i * 31 / 15;
				(level | (level << 5) | (level << 10)).to_le_bytes()
			}).collect();
			let gray = with_suffix(output_base, "_gray.pal");
			write_creating_dirs(&gray, &ramp)?;
			files.push(gray);
		}

		if request.create_metadata {
			let source_key = if request.from_rom { "source_rom" } else { "source_vram" };
			let metadata = json!({
				source_key: request.source_path.display().to_string(),
				"offset": format!("0x{:X}", request.source_offset),
				"tile_count": sheet.tile_count,
				"sheet": sheet.path.display().to_string(),
				"palettes": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
			});
			let path = with_suffix(output_base, ".metadata.json");
			let bytes = serde_json::to_vec_pretty(&metadata).map_err(io::Error::other)?;
			write_creating_dirs(&path, &bytes)?;
			files.push(path);
		}
		Ok(files)
	}

	fn read_preview(&self, path: &Path, offset: usize, len: usize) -> io::Result<Vec<u8>> {
		let data = fs::read(path)?;
		if offset >= data.len() {
			return Err(out_of_bounds("file", offset, data.len()));
		}
		let end = data.len().min(offset + len);
		Ok(data[offset..end].to_vec())
	}
}

impl DumpInjector {
	fn splice(&self, sprite: &Path, input: &Path, output: &Path, offset: usize) -> io::Result<bool> {
		let tiles = fs::read(sprite)?;
		let mut target = fs::read(input)?;
		if offset >= target.len() {
			return Err(out_of_bounds("input", offset, target.len()));
		}
		if offset + tiles.len() > target.len() {
			tracing::warn!(sprite = %sprite.display(), bytes = tiles.len(), offset, "dump.sprite_does_not_fit");
			return Ok(false);
		}
		target[offset..offset + tiles.len()].copy_from_slice(&tiles);
		write_creating_dirs(output, &target)?;
		Ok(true)
	}
}

impl SpriteInjector for DumpInjector {
	fn inject_vram(&self, sprite: &Path, input: &Path, output: &Path, offset: usize) -> io::Result<bool> {
		self.splice(sprite, input, output, offset)
	}

	fn inject_rom(&self, sprite: &Path, input: &Path, output: &Path, offset: usize, fast_compression: bool) -> io::Result<bool> {
		tracing::trace!(fast_compression, "dump.inject_rom");
		self.splice(sprite, input, output, offset)
	}
}
