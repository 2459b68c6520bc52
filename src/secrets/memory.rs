//! In-memory storage locker

use crate::errors::{HsmError, Result};
use crate::secrets::{SecretStore, LONG_SECRET_LEN};
use crate::security::SecureBytes;
use std::sync::RwLock;

/// Storage locker held in memory; starts zeroed like a fresh slot
pub struct MemorySecretStore {
    slot: RwLock<SecureBytes>,
    writes: RwLock<usize>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(SecureBytes::zeros(LONG_SECRET_LEN)),
            writes: RwLock::new(0),
        }
    }

    /// How many times the slot was written
    pub fn write_count(&self) -> usize {
        *self.writes.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for MemorySecretStore {
    fn write_locker(&self, data: &[u8]) -> Result<()> {
        if data.len() != LONG_SECRET_LEN {
            return Err(HsmError::SecretStore(format!(
                "locker write must be {} bytes",
                LONG_SECRET_LEN
            )));
        }
        *self.slot.write().unwrap_or_else(|e| e.into_inner()) = SecureBytes::from(data);
        *self.writes.write().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn read_locker(&self) -> Result<SecureBytes> {
        Ok(self.slot.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{pack_locker, unpack_locker};

    #[test]
    fn test_fresh_slot_reads_empty_payload() {
        let store = MemorySecretStore::new();
        let payload = unpack_locker(&store.read_locker().unwrap()).unwrap();
        assert!(payload.is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_write_counts() {
        let store = MemorySecretStore::new();
        let slot = pack_locker(b"0123456789abcdef").unwrap();
        store.write_locker(slot.expose()).unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
