pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use models::{
    Capability, CapabilitySet, CompletionReport, DispatchMessage, FailureKind, HeartbeatReport,
    ReportedOutcome, TaskAssignment, TaskId, TaskRecord, TaskStatus, TaskSummary, TaskType,
    WorkerId, WorkerInfo, WorkerLoad, WorkerMessage, WorkerRegistration, WorkerStats,
    WorkerStatus, WorkerSummary,
};
pub use traits::WorkerChannel;
