//! TaskHub: named background tasks with tracked jobs
//!
//! Tasks are registered once at startup into a [`tasks::TaskRegistry`]; the
//! [`scheduler::Scheduler`] starts runs of them on demand, from the cron
//! driver or over HTTP, and keeps an in-memory record of each job's progress,
//! log and result for the admin views in [`web`].

pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod scheduler;
pub mod tasks;
pub mod utils;
pub mod web;
