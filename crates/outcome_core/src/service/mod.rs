//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into mapping use-cases.
//! - Keep UI and host-framework callers decoupled from storage details.

pub mod mapper_service;
pub mod unit_of_work;
