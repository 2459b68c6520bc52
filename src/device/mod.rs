//! Device-side collaborators and the owning session
//!
//! The policy core never talks to hardware directly. Everything it needs
//! from the rest of the device is reached through the traits here:
//! - `UserRegistry`: known remote users and credential verification
//! - `WalletRegistry`: names of registered multisig wallets
//! - `Clock`: wall-clock seconds for velocity windows
//!
//! plus `SecretStore` and `AuditMedium` from their own modules.

pub mod directory;
pub mod session;

use crate::audit::AuditMedium;
use crate::errors::Result;
use crate::secrets::SecretStore;
use crate::security::CredentialProof;
use std::path::PathBuf;
use std::sync::Arc;

pub use directory::{ConfiguredUsers, StaticWallets};
pub use session::DeviceSession;

/// Known remote users and the credential check for each decision
pub trait UserRegistry: Send + Sync {
    /// Whether a policy may name this user
    fn is_known(&self, username: &str) -> bool;

    /// All known usernames, for status reports
    fn usernames(&self) -> Vec<String>;

    /// Check a captured credential against the decision digest.
    ///
    /// Returns a description of the problem, or `None` when the proof is good.
    /// An error means the check itself could not be carried out.
    fn verify(
        &self,
        username: &str,
        proof: &CredentialProof,
        counter: u64,
        digest: &[u8; 32],
    ) -> Result<Option<String>>;
}

/// Registered multisig wallets
pub trait WalletRegistry: Send + Sync {
    fn names(&self) -> Vec<String>;
}

/// Source of wall-clock time, in whole seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Everything a policy needs from the surrounding device
#[derive(Clone)]
pub struct DeviceEnv {
    pub users: Arc<dyn UserRegistry>,
    pub wallets: Arc<dyn WalletRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub audit: Arc<dyn AuditMedium>,
    pub clock: Arc<dyn Clock>,
    /// Where an activated policy is saved for the next boot
    pub policy_path: PathBuf,
}

impl DeviceEnv {
    pub fn now(&self) -> i64 {
        self.clock.now()
    }
}
