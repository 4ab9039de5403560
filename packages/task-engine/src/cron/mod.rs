//! Five-field cron expression parsing and next-run computation.

mod field;
mod spec;

pub use spec::CronSpec;
