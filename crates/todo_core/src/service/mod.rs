//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls and reminder scheduling into use-case APIs.
//! - Keep UI/host layers decoupled from storage and timer details.

pub mod task_service;
