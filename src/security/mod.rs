//! Secret handling for values that pass through the policy core
//!
//! This module provides:
//! - Wiping byte buffers for the one-time storage locker secret
//! - Secret wrappers for remote credential proofs

pub mod zeroize;

pub use zeroize::{new_credential_proof, proof_matches, CredentialProof, SecureBytes};
