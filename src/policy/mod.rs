//! Unattended signing policy
//!
//! This module provides:
//! - Policy document parsing and validation
//! - Approval rules and the first-match rule engine
//! - Velocity windows shared by all rules
//! - `PolicyStore`, which owns a loaded policy and makes decisions

pub mod document;
pub mod engine;
pub mod paths;
pub mod rules;
pub mod store;
pub mod velocity;

pub use engine::TxSummary;
pub use store::{PolicyStatus, PolicyStore};
