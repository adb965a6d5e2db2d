//! Scheduler and runtime settings.

use serde::{Deserialize, Serialize};

/// Knobs for the job runtime and scheduler.
///
/// All fields carry defaults so a partial configuration file is enough.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrency limit given to scans created without one.
    pub default_max_concurrency: u32,
    /// Upper bound operators are warned about when exceeded.
    pub max_concurrency_ceiling: u32,
    /// Capacity of the job intake queue between the management facade and
    /// the runtime.
    pub intake_capacity: usize,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_channel_capacity: usize,
    /// Capacity of the per-job task report stream.
    pub report_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: 50,
            max_concurrency_ceiling: 200,
            intake_capacity: 64,
            event_channel_capacity: 1024,
            report_buffer: 256,
        }
    }
}
