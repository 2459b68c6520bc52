//! Remote credential capture and per-decision evidence

use crate::auth::LocalConfirmation;
use crate::device::UserRegistry;
use crate::errors::{HsmError, Result};
use crate::security::CredentialProof;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 16;

/// Most distinct users known to the device, and so most pending entries
pub const MAX_NUMBER_USERS: usize = 30;

/// A credential captured from an earlier request
pub struct PendingAuthEntry {
    pub proof: CredentialProof,
    pub counter: u64,
}

impl std::fmt::Debug for PendingAuthEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthEntry")
            .field("proof", &"[REDACTED]")
            .field("counter", &self.counter)
            .finish()
    }
}

/// What a decision may rely on after consuming the quorum state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    /// Users whose credentials verified against this decision's digest
    pub users: BTreeSet<String>,
    /// Local operator entered the expected code
    pub local_confirmed: bool,
}

/// Remote credentials plus the local code, both consumed once per decision
#[derive(Default)]
pub struct AuthQuorum {
    pending: BTreeMap<String, PendingAuthEntry>,
    local: LocalConfirmation,
}

impl AuthQuorum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a credential for the next decision. Nothing is verified here.
    pub fn submit(&mut self, username: &str, proof: CredentialProof, counter: u64) -> Result<()> {
        if username.len() <= 1 || username.len() > MAX_USERNAME_LEN {
            return Err(HsmError::BadRequest("badlen".to_string()));
        }
        if !self.pending.contains_key(username) && self.pending.len() >= MAX_NUMBER_USERS {
            return Err(HsmError::BadRequest("toomany".to_string()));
        }

        self.pending
            .insert(username.to_string(), PendingAuthEntry { proof, counter });
        debug!("Captured credential for {}", username);
        Ok(())
    }

    /// Number of captured credentials; the only thing ever reported about them
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Move every captured credential out, leaving none behind
    pub fn take_pending(&mut self) -> BTreeMap<String, PendingAuthEntry> {
        std::mem::take(&mut self.pending)
    }

    pub fn enter_local_code(&mut self, code: &str) {
        self.local.enter(code);
    }

    pub fn consume_local_code(&mut self) -> bool {
        self.local.consume()
    }

    pub fn next_local_code(&self) -> &str {
        self.local.expected()
    }

    /// Consume the local code and all pending credentials for one decision.
    ///
    /// The local code is rotated first so it is spent even when a credential
    /// fails. Any bad credential refuses the whole decision.
    pub fn collect(&mut self, registry: &dyn UserRegistry, digest: &[u8; 32]) -> Result<Evidence> {
        let local_confirmed = self.consume_local_code();
        let users = verify_all(self.take_pending(), registry, digest)?;
        Ok(Evidence {
            users,
            local_confirmed,
        })
    }
}

/// Verify each captured credential, failing on the first bad one.
pub fn verify_all(
    entries: BTreeMap<String, PendingAuthEntry>,
    registry: &dyn UserRegistry,
    digest: &[u8; 32],
) -> Result<BTreeSet<String>> {
    let mut users = BTreeSet::new();
    for (username, entry) in entries {
        if let Some(problem) = registry.verify(&username, &entry.proof, entry.counter, digest)? {
            warn!("Credential for {} rejected: {}", username, problem);
            return Err(HsmError::refused(format!(
                "User '{}' gave wrong auth value: {}",
                username, problem
            )));
        }
        users.insert(username);
    }
    Ok(users)
}
