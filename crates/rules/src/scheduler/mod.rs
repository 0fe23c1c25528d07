//! Cron scheduling for the four batch jobs.
//!
//! Each job has a 5-field UTC cron expression. The [`JobScheduler`] tracks
//! when each job last ran and reports which are due, always in dependency
//! order (daily, rolling, detect, rules) so a tick that covers several jobs
//! runs upstream work first.
//!
//! Jobs are not mutually excluded; the default schedule staggers them ten
//! minutes apart.

mod core;
pub(crate) mod cron;
mod entry;

#[cfg(test)]
mod tests;

pub use self::core::JobScheduler;
pub use self::entry::{JobKind, JobScheduleEntry};
