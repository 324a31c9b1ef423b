//! Per-transfer resource ownership.

use std::collections::HashMap;

use anyhow::{bail, Result};

/// Owner of per-transfer resources, keyed by transfer id.
///
/// An entry is inserted when a connection is created for a transfer and
/// removed when that transfer reaches a terminal state. A duplicate insert
/// would mean two connections for one transfer and is rejected.
pub struct SessionDirectory<T> {
    entries: HashMap<String, T>,
}

impl<T> SessionDirectory<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, transfer_id: String, session: T) -> Result<()> {
        if self.entries.contains_key(&transfer_id) {
            bail!("transfer {transfer_id} already has a connection");
        }
        self.entries.insert(transfer_id, session);
        Ok(())
    }

    pub fn get(&self, transfer_id: &str) -> Option<&T> {
        self.entries.get(transfer_id)
    }

    pub fn contains(&self, transfer_id: &str) -> bool {
        self.entries.contains_key(transfer_id)
    }

    pub fn remove(&mut self, transfer_id: &str) -> Option<T> {
        self.entries.remove(transfer_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for SessionDirectory<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove() {
        let mut directory = SessionDirectory::new();
        directory.insert("t-1".to_string(), 7u32).unwrap();

        assert!(directory.contains("t-1"));
        assert_eq!(directory.get("t-1"), Some(&7));
        assert_eq!(directory.remove("t-1"), Some(7));
        assert!(directory.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut directory = SessionDirectory::new();
        directory.insert("t-1".to_string(), 1u32).unwrap();
        assert!(directory.insert("t-1".to_string(), 2u32).is_err());
        // the original binding survives
        assert_eq!(directory.get("t-1"), Some(&1));
    }
}
