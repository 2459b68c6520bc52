//! Test doubles for the device traits

use crate::audit::{AuditMedium, AuditTopic, MemoryMedium, NoMedium};
use crate::device::{Clock, DeviceEnv, UserRegistry, WalletRegistry};
use crate::errors::{HsmError, Result};
use crate::secrets::MemorySecretStore;
use crate::security::{new_credential_proof, proof_matches, CredentialProof};
use std::io::{self, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Users whose token is always `token-<name>`; counters are not checked
pub struct FixedUsers {
    names: Vec<String>,
}

impl FixedUsers {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn proof(&self, name: &str) -> CredentialProof {
        new_credential_proof(&format!("token-{}", name))
    }
}

impl UserRegistry for FixedUsers {
    fn is_known(&self, username: &str) -> bool {
        self.names.iter().any(|n| n == username)
    }

    fn usernames(&self) -> Vec<String> {
        self.names.clone()
    }

    fn verify(
        &self,
        username: &str,
        proof: &CredentialProof,
        _counter: u64,
        _digest: &[u8; 32],
    ) -> Result<Option<String>> {
        if !self.is_known(username) {
            return Ok(Some("unknown user".to_string()));
        }
        if !proof_matches(proof, &format!("token-{}", username)) {
            return Ok(Some("mismatch".to_string()));
        }
        Ok(None)
    }
}

/// How `FaultyUsers` misbehaves when asked to verify
#[derive(Debug, Clone, Copy)]
pub enum UserFault {
    Unreachable,
    Panic,
}

/// Registry that knows everyone but cannot check any credential
pub struct FaultyUsers(pub UserFault);

impl UserRegistry for FaultyUsers {
    fn is_known(&self, _username: &str) -> bool {
        true
    }

    fn usernames(&self) -> Vec<String> {
        Vec::new()
    }

    fn verify(
        &self,
        username: &str,
        _proof: &CredentialProof,
        _counter: u64,
        _digest: &[u8; 32],
    ) -> Result<Option<String>> {
        match self.0 {
            UserFault::Unreachable => Err(HsmError::Storage("user table unreadable".to_string())),
            UserFault::Panic => panic!("credential check for {} blew up", username),
        }
    }
}

/// Card that mounts but rejects every write, like one pulled mid-session
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokenMedium;

struct BrokenEntry;

impl Write for BrokenEntry {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Other, "card removed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "card removed"))
    }
}

impl AuditMedium for BrokenMedium {
    fn open_entry(&self, _topic: AuditTopic, _name: &str) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(BrokenEntry))
    }
}

pub struct FixedWallets {
    names: Vec<String>,
}

impl FixedWallets {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl WalletRegistry for FixedWallets {
    fn names(&self) -> Vec<String> {
        self.names.clone()
    }
}

/// Clock that only moves when told to
#[derive(Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// In-memory device with users alice, bob and carol and wallet "vault"
pub struct TestDevice {
    pub env: DeviceEnv,
    pub users: Arc<FixedUsers>,
    pub audit: MemoryMedium,
    pub secrets: Arc<MemorySecretStore>,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl TestDevice {
    pub fn new() -> Self {
        let memory = MemoryMedium::new();
        Self::build(memory.clone(), Arc::new(memory))
    }

    /// Same device, but every audit entry fails to open
    pub fn without_card() -> Self {
        Self::build(MemoryMedium::new(), Arc::new(NoMedium))
    }

    /// Same device, but entries open and then fail on write
    pub fn with_broken_card() -> Self {
        Self::build(MemoryMedium::new(), Arc::new(BrokenMedium))
    }

    /// Swap in a different user registry, keeping everything else
    pub fn with_users(mut self, users: Arc<dyn UserRegistry>) -> Self {
        self.env.users = users;
        self
    }

    fn build(memory: MemoryMedium, audit: Arc<dyn AuditMedium>) -> Self {
        let dir = TempDir::new().unwrap();
        let users = Arc::new(FixedUsers::new(&["alice", "bob", "carol"]));
        let secrets = Arc::new(MemorySecretStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000));

        let env = DeviceEnv {
            users: users.clone(),
            wallets: Arc::new(FixedWallets::new(&["vault"])),
            secrets: secrets.clone(),
            audit,
            clock: clock.clone(),
            policy_path: dir.path().join("hsm-policy.json"),
        };

        Self {
            env,
            users,
            audit: memory,
            secrets,
            clock,
            _dir: dir,
        }
    }
}
