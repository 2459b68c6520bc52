//! Owner of the staged and active policies

use crate::device::DeviceEnv;
use crate::errors::{HsmError, Result};
use crate::policy::{PolicyStatus, PolicyStore};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use tracing::{info, warn};

/// Device-level status for remote display
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_wait: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(flatten)]
    pub policy: Option<PolicyStatus>,
}

/// At most one active policy per boot, plus one staged candidate.
pub struct DeviceSession {
    env: DeviceEnv,
    staged: Option<PolicyStore>,
    active: Option<PolicyStore>,
}

impl DeviceSession {
    pub fn new(env: DeviceEnv) -> Self {
        Self {
            env,
            staged: None,
            active: None,
        }
    }

    /// Validate a document and hold it for activation, replacing any earlier one.
    pub fn stage(&mut self, doc: Value) -> Result<&PolicyStore> {
        if self.active.is_some() {
            return Err(HsmError::AlreadyActive);
        }
        let store = PolicyStore::load(doc, self.env.clone())?;
        Ok(&*self.staged.insert(store))
    }

    /// Stage the policy saved by an earlier activation.
    pub fn stage_saved(&mut self) -> Result<&PolicyStore> {
        let text = fs::read_to_string(&self.env.policy_path)?;
        let doc: Value = serde_json::from_str(&text)?;
        self.stage(doc)
    }

    #[cfg(test)]
    pub fn staged(&self) -> Option<&PolicyStore> {
        self.staged.as_ref()
    }

    /// Start enforcing the staged policy. A failed activation discards it.
    pub fn activate(&mut self, persist: bool) -> Result<()> {
        if self.active.is_some() {
            return Err(HsmError::AlreadyActive);
        }
        let mut store = self.staged.take().ok_or(HsmError::NothingStaged)?;
        store.activate(persist)?;
        self.active = Some(store);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_mut(&mut self) -> Result<&mut PolicyStore> {
        self.active.as_mut().ok_or(HsmError::NotActive)
    }

    /// Is there a saved policy from an earlier boot?
    pub fn policy_available(&self) -> bool {
        self.env.policy_path.is_file()
    }

    /// Saved policy text, for inclusion in a device backup
    pub fn capture_backup(&self) -> Option<String> {
        fs::read_to_string(&self.env.policy_path).ok()
    }

    /// Put a backed-up policy file back in place.
    ///
    /// Text that is not a JSON object is rejected. A backup that looks like
    /// one but cannot be parsed or written is skipped with a warning, so a
    /// damaged policy never blocks the rest of a restore.
    pub fn restore_backup(&self, text: &str) -> Result<()> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
            return Err(HsmError::BadRequest("backup is not a policy file".into()));
        }

        let doc: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping unreadable policy backup: {}", e);
                return Ok(());
            }
        };

        let pretty = serde_json::to_string_pretty(&doc).unwrap_or_else(|_| trimmed.to_string());
        if let Err(e) = fs::write(&self.env.policy_path, pretty) {
            warn!("Could not restore policy file: {}", e);
            return Ok(());
        }
        info!("Policy file restored to {:?}", self.env.policy_path);
        Ok(())
    }

    pub fn status(&self) -> DeviceStatus {
        match &self.active {
            Some(store) => DeviceStatus {
                active: true,
                policy_available: None,
                approval_wait: None,
                wallets: None,
                users: None,
                policy: Some(store.status_report()),
            },
            None => DeviceStatus {
                active: false,
                policy_available: Some(self.policy_available()),
                approval_wait: Some(self.staged.is_some()),
                wallets: Some(self.env.wallets.names()),
                users: Some(self.env.users.usernames()),
                policy: None,
            },
        }
    }
}
