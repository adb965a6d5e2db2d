//! Connection-result storage and the system -> task -> job roll-up.

pub mod aggregator;
pub mod store;

pub use aggregator::{RecordOutcome, ResultAggregator};
pub use store::ResultStore;
