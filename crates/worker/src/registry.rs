use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{OperationKind, WorkerId, WorkerState};

/// Snapshot for one tracked worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
	pub id: WorkerId,
	pub name: String,
	pub kind: OperationKind,
	pub state: WorkerState,
}

/// In-memory worker registry for status snapshots.
///
/// Workers attached to a registry upsert their record on every state change.
/// Terminal records stay until [`Self::prune_finished`] runs.
#[derive(Debug, Default, Clone)]
pub struct WorkerRegistry {
	inner: Arc<RwLock<HashMap<WorkerId, WorkerRecord>>>,
}

impl WorkerRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Upserts one record.
	pub fn upsert(&self, record: WorkerRecord) {
		self.inner.write().insert(record.id, record);
	}

	/// Updates the state of a known record. Unknown ids are ignored.
	pub fn set_state(&self, id: WorkerId, state: WorkerState) {
		if let Some(record) = self.inner.write().get_mut(&id) {
			record.state = state;
		}
	}

	/// Removes and returns one record.
	pub fn remove(&self, id: WorkerId) -> Option<WorkerRecord> {
		self.inner.write().remove(&id)
	}

	/// Returns one record by id.
	pub fn get(&self, id: WorkerId) -> Option<WorkerRecord> {
		self.inner.read().get(&id).cloned()
	}

	/// Number of workers not yet in a terminal state.
	pub fn active_count(&self) -> usize {
		self.inner.read().values().filter(|r| !r.state.is_terminal()).count()
	}

	/// Drops every terminal record and returns how many were removed.
	pub fn prune_finished(&self) -> usize {
		let mut guard = self.inner.write();
		let before = guard.len();
		guard.retain(|_, record| !record.state.is_terminal());
		before - guard.len()
	}

	/// Returns snapshots sorted by worker id.
	pub fn snapshots(&self) -> Vec<WorkerRecord> {
		let mut records: Vec<_> = self.inner.read().values().cloned().collect();
		records.sort_by_key(|r| r.id);
		records
	}
}
