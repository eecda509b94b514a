//! Background jobs: the task worker and the refresh scheduler.

pub mod clock;
pub mod worker;
