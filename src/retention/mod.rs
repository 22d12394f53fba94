//! Time-driven retention of route sheets: hide after `hide_after_months`,
//! erase after `purge_after_months`.

pub mod engine;
pub mod lock;
pub mod schedule;

pub use engine::{RetentionEngine, RetentionError, RetentionReport, SheetStats};
pub use schedule::{retention_dates, RetentionDates};
