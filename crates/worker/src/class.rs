/// Kinds of long-running operations a worker can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
	/// Sprite extraction from a VRAM dump.
	VramExtraction,
	/// Sprite extraction from a ROM image at a fixed offset.
	RomExtraction,
	/// Sprite injection into a VRAM dump.
	VramInjection,
	/// Sprite injection into a ROM image.
	RomInjection,
	/// Handing a file to an external program.
	External,
}

impl OperationKind {
	/// Stable identifier used in logs and thread names.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::VramExtraction => "vram_extraction",
			Self::RomExtraction => "rom_extraction",
			Self::VramInjection => "vram_injection",
			Self::RomInjection => "rom_injection",
			Self::External => "external",
		}
	}

	/// Human-readable label used as error context.
	pub const fn label(self) -> &'static str {
		match self {
			Self::VramExtraction => "VRAM extraction",
			Self::RomExtraction => "ROM extraction",
			Self::VramInjection => "VRAM injection",
			Self::RomInjection => "ROM injection",
			Self::External => "external launch",
		}
	}
}

impl std::fmt::Display for OperationKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
