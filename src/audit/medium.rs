//! Audit media: a mounted directory, an in-memory recorder, and none at all

use crate::audit::{AuditMedium, AuditTopic};
use crate::errors::{HsmError, Result};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Log root on a removable card; absent root means the card is missing
pub struct DirectoryMedium {
    root: PathBuf,
}

impl DirectoryMedium {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[cfg(test)]
    pub fn entry_path(&self, topic: AuditTopic, name: &str) -> PathBuf {
        self.root.join(topic.dirname()).join(name)
    }
}

impl AuditMedium for DirectoryMedium {
    fn open_entry(&self, topic: AuditTopic, name: &str) -> Result<Box<dyn Write + Send>> {
        if !self.root.is_dir() {
            return Err(HsmError::Storage(format!(
                "log medium missing: {:?}",
                self.root
            )));
        }

        let dir = self.root.join(topic.dirname());
        if !dir.exists() {
            fs::create_dir(&dir)?;
        }

        // a digest seen before adds to its entry
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened audit entry {:?}", path);
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// No durable medium configured; every session runs unsaved
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMedium;

impl AuditMedium for NoMedium {
    fn open_entry(&self, _topic: AuditTopic, _name: &str) -> Result<Box<dyn Write + Send>> {
        Err(HsmError::Storage("no log medium configured".to_string()))
    }
}

#[cfg(test)]
type EntryMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Keeps entries in memory, keyed by `<topic>/<name>`
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryMedium {
    entries: EntryMap,
}

#[cfg(test)]
impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of one entry, if it was ever opened
    pub fn entry(&self, topic: AuditTopic, name: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&format!("{}/{}", topic.dirname(), name))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
impl AuditMedium for MemoryMedium {
    fn open_entry(&self, topic: AuditTopic, name: &str) -> Result<Box<dyn Write + Send>> {
        let key = format!("{}/{}", topic.dirname(), name);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default();
        Ok(Box::new(MemoryEntry {
            entries: self.entries.clone(),
            key,
        }))
    }
}

#[cfg(test)]
struct MemoryEntry {
    entries: EntryMap,
    key: String,
}

#[cfg(test)]
impl Write for MemoryEntry {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(self.key.clone()).or_default().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_medium_creates_topic_dir() {
        let dir = tempdir().unwrap();
        let medium = DirectoryMedium::new(dir.path());

        {
            let mut w = medium.open_entry(AuditTopic::Message, "abcd.log").unwrap();
            writeln!(w, "hello").unwrap();
        }

        let text = fs::read_to_string(medium.entry_path(AuditTopic::Message, "abcd.log")).unwrap();
        assert_eq!(text, "hello\n");
    }

    #[test]
    fn test_directory_medium_missing_root() {
        let dir = tempdir().unwrap();
        let medium = DirectoryMedium::new(dir.path().join("no-card"));
        assert!(medium.open_entry(AuditTopic::Transaction, "x.log").is_err());
    }

    #[test]
    fn test_directory_medium_appends_on_reopen() {
        let dir = tempdir().unwrap();
        let medium = DirectoryMedium::new(dir.path());

        for line in ["first", "second"] {
            let mut w = medium.open_entry(AuditTopic::Transaction, "abcd.log").unwrap();
            writeln!(w, "{}", line).unwrap();
        }

        let text = fs::read_to_string(medium.entry_path(AuditTopic::Transaction, "abcd.log")).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn test_memory_medium_appends_on_reopen() {
        let medium = MemoryMedium::new();
        {
            let mut w = medium.open_entry(AuditTopic::Transaction, "a.log").unwrap();
            write!(w, "first").unwrap();
        }
        {
            let mut w = medium.open_entry(AuditTopic::Transaction, "a.log").unwrap();
            write!(w, "second").unwrap();
        }
        assert_eq!(
            medium.entry(AuditTopic::Transaction, "a.log").as_deref(),
            Some("firstsecond")
        );
        assert_eq!(medium.entry_count(), 1);
    }
}
