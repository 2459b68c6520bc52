//! Config-backed user and wallet registries
//!
//! Used by the binary. A real device would answer these from its secure
//! element and multisig registry; here the config file is the source.

use crate::config::UserEntry;
use crate::device::{UserRegistry, WalletRegistry};
use crate::errors::Result;
use crate::security::{proof_matches, CredentialProof};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Users with pre-shared tokens and strictly increasing counters
pub struct ConfiguredUsers {
    tokens: HashMap<String, String>,
    /// Last accepted counter per user
    counters: Mutex<HashMap<String, u64>>,
}

impl ConfiguredUsers {
    pub fn new(entries: &[UserEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| (e.name.clone(), e.token.clone()))
            .collect();
        Self {
            tokens,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl UserRegistry for ConfiguredUsers {
    fn is_known(&self, username: &str) -> bool {
        self.tokens.contains_key(username)
    }

    fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tokens.keys().cloned().collect();
        names.sort();
        names
    }

    fn verify(
        &self,
        username: &str,
        proof: &CredentialProof,
        counter: u64,
        digest: &[u8; 32],
    ) -> Result<Option<String>> {
        let Some(expected) = self.tokens.get(username) else {
            return Ok(Some("unknown user".to_string()));
        };

        if !proof_matches(proof, expected) {
            return Ok(Some("mismatch".to_string()));
        }

        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let last = counters.get(username).copied();
        if matches!(last, Some(prev) if counter <= prev) {
            return Ok(Some("replay".to_string()));
        }
        counters.insert(username.to_string(), counter);

        debug!(
            "Verified {} for digest {}",
            username,
            hex::encode(&digest[..4])
        );
        Ok(None)
    }
}

/// Fixed list of multisig wallet names
#[derive(Debug, Clone, Default)]
pub struct StaticWallets {
    names: Vec<String>,
}

impl StaticWallets {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl WalletRegistry for StaticWallets {
    fn names(&self) -> Vec<String> {
        self.names.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::new_credential_proof;

    fn users() -> ConfiguredUsers {
        ConfiguredUsers::new(&[
            UserEntry {
                name: "alice".to_string(),
                token: "a-token".to_string(),
            },
            UserEntry {
                name: "bob".to_string(),
                token: "b-token".to_string(),
            },
        ])
    }

    #[test]
    fn test_known_users() {
        let users = users();
        assert!(users.is_known("alice"));
        assert!(!users.is_known("mallory"));
        assert_eq!(users.usernames(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_verify_token_and_counter() {
        let users = users();
        let digest = [7u8; 32];

        assert_eq!(
            users
                .verify("alice", &new_credential_proof("a-token"), 5, &digest)
                .unwrap(),
            None
        );
        // same counter again is a replay
        assert_eq!(
            users
                .verify("alice", &new_credential_proof("a-token"), 5, &digest)
                .unwrap()
                .as_deref(),
            Some("replay")
        );
        assert_eq!(
            users
                .verify("bob", &new_credential_proof("a-token"), 1, &digest)
                .unwrap()
                .as_deref(),
            Some("mismatch")
        );
        assert_eq!(
            users
                .verify("carol", &new_credential_proof("x"), 1, &digest)
                .unwrap()
                .as_deref(),
            Some("unknown user")
        );
    }
}
