//! Storage locker for the one-time secret
//!
//! This module provides:
//! - The `SecretStore` seam to the secure element's long-secret slot
//! - The fixed-size locker layout (length half-word, payload, zero padding)
//! - File and in-memory stores

pub mod file;
#[cfg(test)]
pub mod memory;

use crate::errors::{HsmError, Result};
use crate::security::SecureBytes;

pub use file::FileSecretStore;
#[cfg(test)]
pub use memory::MemorySecretStore;

/// Size of the long-secret slot, in bytes
pub const LONG_SECRET_LEN: usize = 416;

/// Largest payload the locker can hold after its length prefix
pub const MAX_SECRET_PAYLOAD: usize = LONG_SECRET_LEN - 2;

/// Write-once, read-many slot for the storage locker secret
pub trait SecretStore: Send + Sync {
    /// Replace the whole slot. `data` is always `LONG_SECRET_LEN` bytes.
    fn write_locker(&self, data: &[u8]) -> Result<()>;

    /// Read the whole slot back
    fn read_locker(&self) -> Result<SecureBytes>;
}

/// Lay a payload out in the locker format.
pub fn pack_locker(payload: &[u8]) -> Result<SecureBytes> {
    if payload.len() > MAX_SECRET_PAYLOAD {
        return Err(HsmError::SecretStore(format!(
            "secret too long: {} > {}",
            payload.len(),
            MAX_SECRET_PAYLOAD
        )));
    }

    let mut slot = SecureBytes::zeros(LONG_SECRET_LEN);
    let buf = slot.expose_mut();
    buf[..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    buf[2..2 + payload.len()].copy_from_slice(payload);
    Ok(slot)
}

/// Extract the payload from a locker slot, validating the length prefix.
pub fn unpack_locker(slot: &SecureBytes) -> Result<SecureBytes> {
    let raw = slot.expose();
    if raw.len() < 2 {
        return Err(HsmError::SecretStore("locker slot truncated".to_string()));
    }

    let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
    if len > MAX_SECRET_PAYLOAD || 2 + len > raw.len() {
        return Err(HsmError::SecretStore(format!(
            "corrupt locker length: {}",
            len
        )));
    }

    Ok(SecureBytes::from(&raw[2..2 + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        let slot = pack_locker(b"sixteen byte key").unwrap();
        let raw = slot.expose();

        assert_eq!(raw.len(), LONG_SECRET_LEN);
        assert_eq!(&raw[..2], &[16, 0]);
        assert_eq!(&raw[2..18], b"sixteen byte key");
        assert!(raw[18..].iter().all(|b| *b == 0));

        assert_eq!(unpack_locker(&slot).unwrap().expose(), b"sixteen byte key");
    }

    #[test]
    fn test_pack_rejects_oversize() {
        let payload = vec![b'x'; MAX_SECRET_PAYLOAD + 1];
        assert!(pack_locker(&payload).is_err());
        assert!(pack_locker(&payload[1..]).is_ok());
    }

    #[test]
    fn test_unpack_rejects_corrupt_length() {
        let mut raw = vec![0u8; LONG_SECRET_LEN];
        raw[..2].copy_from_slice(&(LONG_SECRET_LEN as u16).to_le_bytes());
        assert!(unpack_locker(&SecureBytes::new(raw)).is_err());
        assert!(unpack_locker(&SecureBytes::new(vec![1])).is_err());
    }
}
