//! Process-wide tracing setup.

use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;

/// Installs a fmt subscriber capped at `level`. Fails if another subscriber
/// was already installed.
pub fn init(level: Level) -> Result<(), SetGlobalDefaultError> {
	let subscriber = tracing_subscriber::fmt().with_max_level(level).with_thread_names(true).finish();
	tracing::subscriber::set_global_default(subscriber)
}

/// `DEBUG` when `verbose`, `INFO` otherwise.
pub fn level(verbose: bool) -> Level {
	if verbose { Level::DEBUG } else { Level::INFO }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_init_is_an_error_not_a_panic() {
		let _ = init(Level::WARN);
		assert!(init(Level::WARN).is_err());
	}

	#[test]
	fn verbose_selects_debug() {
		assert_eq!(level(true), Level::DEBUG);
		assert_eq!(level(false), Level::INFO);
	}
}
