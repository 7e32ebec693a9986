//! Deterministic core of the governator execution engine.
//!
//! This crate owns everything that must behave identically across
//! processes and machines:
//! - the task index data model and its byte-deterministic persistence
//!   (`store`), guarded by an advisory write lock,
//! - the task lifecycle state machine (`state_machine`), the only code
//!   that mutates a task's state,
//! - the scheduler (`scheduler`): eligibility over the dependency DAG,
//!   priority ordering, overlap-conflict detection, and concurrency caps,
//! - sha256 digests of governance inputs and drift detection (`digest`),
//! - the append-only logfmt audit log (`audit`).
//!
//! Process dispatch, worktrees, and the supervisor loop live in the
//! `governator` runtime crate; they drive this one.

pub mod audit;
pub mod digest;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod task;

pub use audit::AuditLog;
pub use digest::{compute_digests, detect_drift, DriftReport};
pub use scheduler::{Caps, RoutingDecision, ScheduleError, Selection};
pub use state_machine::{
    increment_attempts, increment_failed_attempts, transition, validate_transition,
    IllegalTransition, TransitionError,
};
pub use store::{IndexError, IndexLock};
pub use task::{
    validate_task_id, Attempts, Digests, Index, Metrics, Retries, Task, TaskKind, TaskState,
    SCHEMA_VERSION,
};
