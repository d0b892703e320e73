//! Input validation shared by the services. Every failure is a
//! [`ManagerError::Validation`].

use std::fmt::Display;
use std::path::Path;

use crate::error::{ManagerError, Result};

/// Fails unless `path` names an existing regular file.
pub fn file_exists(path: &Path, label: &str) -> Result<()> {
	if path.as_os_str().is_empty() {
		return Err(ManagerError::validation(format!("{label} is required")));
	}
	if !path.is_file() {
		return Err(ManagerError::validation(format!("{label} does not exist: {}", path.display())));
	}
	Ok(())
}

/// Size of the file at `path`.
pub fn file_len(path: &Path) -> Result<u64> {
	std::fs::metadata(path)
		.map(|m| m.len())
		.map_err(|e| ManagerError::validation(format!("cannot read {}: {e}", path.display())))
}

/// Fails when `value` is empty or whitespace.
pub fn non_empty(value: &str, message: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(ManagerError::validation(message));
	}
	Ok(())
}

/// Fails when `value` lies outside the inclusive bounds given.
pub fn in_range<T: PartialOrd + Display>(value: T, label: &str, min: Option<T>, max: Option<T>) -> Result<()> {
	if let Some(min) = min
		&& value < min
	{
		return Err(ManagerError::validation(format!("{label} must be >= {min}, got {value}")));
	}
	if let Some(max) = max
		&& value > max
	{
		return Err(ManagerError::validation(format!("{label} must be <= {max}, got {value}")));
	}
	Ok(())
}
