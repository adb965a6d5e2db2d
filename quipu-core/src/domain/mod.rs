//! Pure domain logic: scan editing, lifecycle rules and result roll-up.

pub mod results;
pub mod scan;
