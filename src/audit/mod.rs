//! Audit logging for signing decisions
//!
//! Every decision runs inside an `AuditSession`: a guard that prefers a
//! durable log entry on the removable medium, falls back to the console
//! when the medium is unavailable, and always closes what it opened.

pub mod medium;
pub mod session;

use crate::errors::Result;
use serde::Serialize;
use std::io::Write;

pub use medium::{DirectoryMedium, NoMedium};
#[cfg(test)]
pub use medium::MemoryMedium;
pub use session::AuditSession;

/// Which kind of request a log entry belongs to; doubles as the directory name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditTopic {
    Transaction,
    Message,
}

impl AuditTopic {
    pub fn dirname(&self) -> &'static str {
        match self {
            AuditTopic::Transaction => "psbt",
            AuditTopic::Message => "messages",
        }
    }
}

/// Durable destination for audit entries
pub trait AuditMedium: Send + Sync {
    /// Open the named entry under `topic`, creating it or appending to it.
    ///
    /// Any error means the medium is unavailable and the caller degrades.
    fn open_entry(&self, topic: AuditTopic, name: &str) -> Result<Box<dyn Write + Send>>;
}

/// Outcome of one decision, as seen by the request layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "lowercase")]
pub enum Verdict {
    Approved(String),
    Refused(String),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved(_))
    }

    #[cfg(test)]
    pub fn reason(&self) -> &str {
        match self {
            Verdict::Approved(r) | Verdict::Refused(r) => r,
        }
    }
}

/// Running decision counters owned by the active policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionStats {
    pub approvals: u64,
    pub refusals: u64,
    pub last_refusal: Option<String>,
}

/// Log entry name derived from the tail of the request digest.
pub fn entry_name(digest: &[u8]) -> String {
    let tail = &digest[digest.len().saturating_sub(8)..];
    format!("{}.log", hex::encode(tail))
}
