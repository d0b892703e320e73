use crate::OperationKind;

/// Spawns the dedicated OS thread for one worker run.
///
/// One thread per operation, no pool. Threads are named
/// `spritepal-<kind>-<name>`.
pub fn spawn_worker_thread<F, R>(kind: OperationKind, name: &str, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(worker_kind = kind.as_str(), worker = name, "worker.spawn_thread");
	std::thread::Builder::new().name(format!("spritepal-{}-{name}", kind.as_str())).spawn(f)
}
