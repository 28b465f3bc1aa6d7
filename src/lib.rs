//! Decision engine for a small distributed job scheduler.
//!
//! The leader asks [`schedule`] when each job is next due and the
//! [`rule`] set, evaluated against the [`scheduler::JobLedger`], whether and
//! where it may run. Process supervision, leader election and transport are
//! collaborators reached through [`node::ClusterEvent`],
//! [`leadership::Leadership`] and [`scheduler::Placement`].

pub mod config;
pub mod definition;
pub mod error;
pub mod leadership;
pub mod node;
pub mod rule;
pub mod schedule;
pub mod scheduler;
pub mod shutdown;

pub use error::{Result, SchedulerError};
