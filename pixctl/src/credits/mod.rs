//! Credit accounting: reset policy, balance operations, the batch reset job and
//! the dashboard aggregation built on top of them.

pub mod clock;
pub mod dashboard;
pub mod policy;
pub mod scheduler;
pub mod service;

pub use clock::{Clock, SystemClock};
pub use scheduler::{BatchResetSummary, JobStatus, ResetScheduler};
pub use service::{CreditService, CreditStatus};
