pub mod assigner;
pub mod job;
pub mod ledger;

pub use assigner::{JobAssigner, Placement};
pub use job::{JobEntry, JobType};
pub use ledger::{Admission, JobLedger, SharedLedger};
