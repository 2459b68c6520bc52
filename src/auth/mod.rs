//! Authorization evidence for unattended decisions
//!
//! Provides:
//! - Pending remote credentials, captured ahead of a decision
//! - The rotating local confirmation code
//! - `AuthQuorum`, which consumes both once per decision

pub mod local_code;
pub mod quorum;

pub use local_code::LocalConfirmation;
pub use quorum::{AuthQuorum, MAX_NUMBER_USERS, MAX_USERNAME_LEN};
