//! Controller library for the DMR TEST radio test device.
//!
//! The device is driven over a binary serial protocol ([`transport`]).
//! Measurements are [`task::Task`]s that run a short initialization followed
//! by repeated measurement cycles; an [`orchestrator::Orchestrator`] executes
//! them one at a time on a worker thread and reports result snapshots to the
//! controller. Tasks can be grouped into named [`scenario::Scenario`]s.

pub mod config;
pub mod diagnostics;
pub mod dsp;
pub mod error;
pub mod i18n;
pub mod numerics;
pub mod orchestrator;
pub mod scenario;
pub mod task;
pub mod transport;
pub mod units;

pub use error::{AppResult, DtError};
pub use orchestrator::{Directive, OrchestratorEvent, OrchestratorHandle};
pub use task::{ResultSnapshot, Task, TaskContext, TaskKind, TaskState};
