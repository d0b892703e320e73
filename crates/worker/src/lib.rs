//! Background worker primitives for long-running sprite operations.
//!
//! A [`Worker`] wraps one [`Operation`] and runs it on a dedicated OS thread.
//! Cancellation and pause are cooperative: the operation polls its
//! [`WorkerContext`] at checkpoints. Everything the worker reports travels
//! over an [`EventSink`] and arrives at the consuming [`EventStream`] in the
//! order it was emitted.

mod class;
mod event;
mod panic;
mod registry;
mod spawn;
mod token;
mod worker;

pub use class::OperationKind;
pub use event::{ErrorCause, EventSink, EventStream, WorkerEvent, event_channel};
pub use panic::panic_message;
pub use registry::{WorkerRecord, WorkerRegistry};
pub use spawn::spawn_worker_thread;
pub use token::{DEFAULT_PAUSE_POLL, WorkerControl, WorkerId};
pub use worker::{Operation, OperationError, Worker, WorkerContext, WorkerError, WorkerHandle, WorkerOutcome, WorkerState};
