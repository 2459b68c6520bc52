//! File-backed storage locker

use crate::errors::{HsmError, Result};
use crate::secrets::{SecretStore, LONG_SECRET_LEN};
use crate::security::SecureBytes;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage locker kept in a single file of `LONG_SECRET_LEN` bytes
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SecretStore for FileSecretStore {
    fn write_locker(&self, data: &[u8]) -> Result<()> {
        if data.len() != LONG_SECRET_LEN {
            return Err(HsmError::SecretStore(format!(
                "locker write must be {} bytes",
                LONG_SECRET_LEN
            )));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| HsmError::SecretStore(e.to_string()))?;
            }
        }

        fs::write(&self.path, data).map_err(|e| HsmError::SecretStore(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }

        debug!("Storage locker written to {:?}", self.path);
        Ok(())
    }

    fn read_locker(&self) -> Result<SecureBytes> {
        let raw = fs::read(&self.path).map_err(|e| HsmError::SecretStore(e.to_string()))?;
        let raw = SecureBytes::new(raw);
        if raw.expose().len() != LONG_SECRET_LEN {
            return Err(HsmError::SecretStore(format!(
                "locker file has {} bytes, expected {}",
                raw.expose().len(),
                LONG_SECRET_LEN
            )));
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{pack_locker, unpack_locker};
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("se").join("locker.bin"));

        let slot = pack_locker(b"correct horse battery").unwrap();
        store.write_locker(slot.expose()).unwrap();

        let back = store.read_locker().unwrap();
        assert_eq!(unpack_locker(&back).unwrap().expose(), b"correct horse battery");
    }

    #[test]
    fn test_missing_file_is_secret_store_error() {
        let dir = tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("absent.bin"));
        assert!(matches!(store.read_locker(), Err(HsmError::SecretStore(_))));
    }

    #[test]
    fn test_rejects_wrong_size_write() {
        let dir = tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("locker.bin"));
        assert!(store.write_locker(&[0u8; 10]).is_err());
    }
}
