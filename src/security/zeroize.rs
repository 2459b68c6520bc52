//! Secure memory zeroization utilities
//!
//! The storage locker secret is staged in memory between policy load and
//! activation, and read back on request. Both copies live in `SecureBytes`
//! so the backing memory is wiped on drop and on every explicit retirement.
//! Credential proofs are wrapped in `secrecy` so they never reach a log line.

use secrecy::{ExposeSecret, Secret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A wrapper for sensitive byte arrays that automatically zeros memory on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureBytes {
    inner: Vec<u8>,
}

impl SecureBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self { inner: data }
    }

    pub fn zeros(size: usize) -> Self {
        Self {
            inner: vec![0u8; size],
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    pub fn expose_mut(&mut self) -> &mut [u8] {
        &mut self.inner
    }

    /// Overwrite the contents now; the buffer is empty afterwards.
    pub fn wipe(&mut self) {
        self.inner.zeroize();
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for SecureBytes {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl std::fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBytes([REDACTED; {}])", self.inner.len())
    }
}

/// A remote user's credential proof (token, TOTP value, password hash...)
pub type CredentialProof = Secret<String>;

pub fn new_credential_proof(token: &str) -> CredentialProof {
    Secret::new(token.to_string())
}

/// Constant-shape comparison of a proof against an expected value
pub fn proof_matches(proof: &CredentialProof, expected: &str) -> bool {
    let given = proof.expose_secret().as_bytes();
    let expected = expected.as_bytes();
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
