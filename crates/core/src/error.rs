//! Error taxonomy shared by every service.

use std::error::Error as StdError;

use spritepal_worker::WorkerError;
use thiserror::Error;

use crate::config::ConfigError;

/// Boxed underlying cause of a domain failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by services, the registry and the context stack.
#[derive(Debug, Error)]
pub enum ManagerError {
	/// Bad caller input. Raised synchronously and never retried.
	#[error("{0}")]
	Validation(String),

	/// Registry or service used before it was initialized.
	#[error("{0}")]
	NotInitialized(String),

	/// The operation is already active on this service instance.
	#[error("{operation} already in progress on {service}")]
	OperationInProgress { service: &'static str, operation: String },

	#[error("{message}")]
	Extraction {
		message: String,
		#[source]
		source: Option<BoxError>,
	},

	#[error("{message}")]
	Injection {
		message: String,
		#[source]
		source: Option<BoxError>,
	},

	#[error("{message}")]
	Session {
		message: String,
		#[source]
		source: Option<BoxError>,
	},

	/// A binding resolved to a service of another type.
	#[error("service '{name}' is {actual}, expected {expected}")]
	TypeMismatch {
		name: String,
		expected: &'static str,
		actual: &'static str,
	},

	/// A service constructor failed during registry initialization.
	#[error("failed to initialize {service}: {source}")]
	Initialization {
		service: &'static str,
		#[source]
		source: Box<ManagerError>,
	},

	#[error("failed to start worker: {0}")]
	Worker(#[from] WorkerError),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

impl ManagerError {
	pub fn validation(message: impl Into<String>) -> Self {
		Self::Validation(message.into())
	}

	pub fn not_initialized(message: impl Into<String>) -> Self {
		Self::NotInitialized(message.into())
	}

	pub fn extraction(message: impl Into<String>) -> Self {
		Self::Extraction {
			message: message.into(),
			source: None,
		}
	}

	pub fn extraction_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
		Self::Extraction {
			message: message.into(),
			source: Some(source.into()),
		}
	}

	pub fn injection(message: impl Into<String>) -> Self {
		Self::Injection {
			message: message.into(),
			source: None,
		}
	}

	pub fn injection_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
		Self::Injection {
			message: message.into(),
			source: Some(source.into()),
		}
	}

	pub fn session(message: impl Into<String>) -> Self {
		Self::Session {
			message: message.into(),
			source: None,
		}
	}

	pub fn session_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
		Self::Session {
			message: message.into(),
			source: Some(source.into()),
		}
	}

	/// Stable name of the error kind, carried by error notifications.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Validation(_) => "validation",
			Self::NotInitialized(_) => "not_initialized",
			Self::OperationInProgress { .. } => "operation_in_progress",
			Self::Extraction { .. } => "extraction",
			Self::Injection { .. } => "injection",
			Self::Session { .. } => "session",
			Self::TypeMismatch { .. } => "type_mismatch",
			Self::Initialization { .. } => "initialization",
			Self::Worker(_) => "worker",
			Self::Config(_) => "config",
		}
	}
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
	use std::io;

	use super::*;

	#[test]
	fn domain_errors_expose_their_cause() {
		let err = ManagerError::extraction_caused("VRAM extraction failed: gone", io::Error::new(io::ErrorKind::NotFound, "gone"));
		let source = err.source().and_then(|s| s.downcast_ref::<io::Error>());
		assert_eq!(source.map(io::Error::kind), Some(io::ErrorKind::NotFound));
		assert_eq!(err.to_string(), "VRAM extraction failed: gone");
		assert_eq!(err.kind(), "extraction");
	}

	#[test]
	fn initialization_wraps_constructor_error() {
		let err = ManagerError::Initialization {
			service: "session",
			source: Box::new(ManagerError::session("disk on fire")),
		};
		assert_eq!(err.to_string(), "failed to initialize session: disk on fire");
		assert!(err.source().is_some());
	}
}
