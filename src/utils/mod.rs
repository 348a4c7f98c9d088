//! Utility functions shared across the task engine

pub mod signal;
pub mod time;

pub use signal::relay_shutdown;
pub use time::{format_duration, parse_duration};
