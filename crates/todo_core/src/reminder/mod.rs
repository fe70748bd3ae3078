//! Reminder business logic between the task store and the timer service.
//!
//! # Responsibility
//! - Decide whether a saved task gets a reminder and when it fires.
//! - Keep at most one armed timer per task.
//! - Turn fired payloads into user-visible alerts and navigation requests.

pub mod dispatcher;
pub mod scheduler;
