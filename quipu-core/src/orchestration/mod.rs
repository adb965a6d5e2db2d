//! Job execution: slot budgeting, the per-job ledger, the task scheduler and
//! the runtime that feeds it.

pub mod budget;
pub mod config;
pub mod control;
pub mod event_bus;
pub mod events;
pub mod probe;
pub mod runtime;
pub mod scheduler;

pub use budget::SlotBudget;
pub use config::SchedulerConfig;
pub use control::{JobControl, JobSnapshot, TaskSpec};
pub use event_bus::InProcJobEventBus;
pub use events::{EventMeta, JobEvent, JobEventPayload, JobEventPublisher};
pub use probe::{ConnectionOutcome, ConnectionProbe, ProbeError};
pub use runtime::ScanJobRuntime;
pub use scheduler::{
    JobExecution, SchedulerFatalError, TaskOutcome, TaskReport, TaskScheduler,
};
