//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate validation, ownership checks and repository calls into
//!   use-case level APIs.
//! - Keep CLI layers decoupled from storage details.

pub mod resource_service;
