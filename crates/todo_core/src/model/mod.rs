//! Domain model for tasks and reminder payloads.
//!
//! # Responsibility
//! - Define canonical data structures used by store, scheduler and dispatcher.
//!
//! # Invariants
//! - A task's integer id is both its storage key and its reminder timer key.

pub mod task;
