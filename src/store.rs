use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError, PartialEq)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    AlreadyExists,
}

/// The key/value collaborator behind `GET` and `SET`.
///
/// It is owned by the server context and only touched from event handlers, so it needs no
/// locking.
#[derive(Debug, Default)]
pub struct Store {
    keys: HashMap<String, Bytes>,
}

impl Store {
    pub fn new() -> Store {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.keys.get(key).cloned().ok_or(StoreError::NotFound)
    }

    /// Inserts a new key. Existing keys are left untouched.
    pub fn set(&mut self, key: String, value: Bytes) -> Result<(), StoreError> {
        if self.keys.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }

        self.keys.insert(key, value);
        Ok(())
    }

    /// Inserts or overwrites a key, returning the previous value.
    pub fn replace(&mut self, key: String, value: Bytes) -> Option<Bytes> {
        self.keys.insert(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        self.keys.remove(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_missing_key() {
        let store = Store::new();

        assert_eq!(store.get("foo"), Err(StoreError::NotFound));
    }

    #[test]
    fn set_does_not_overwrite() {
        let mut store = Store::new();

        store.set("foo".to_string(), Bytes::from("1")).unwrap();

        assert_eq!(
            store.set("foo".to_string(), Bytes::from("2")),
            Err(StoreError::AlreadyExists)
        );
        assert_eq!(store.get("foo"), Ok(Bytes::from("1")));
    }

    #[test]
    fn replace_overwrites() {
        let mut store = Store::new();

        assert_eq!(store.replace("foo".to_string(), Bytes::from("1")), None);
        assert_eq!(
            store.replace("foo".to_string(), Bytes::from("2")),
            Some(Bytes::from("1"))
        );
        assert_eq!(store.get("foo"), Ok(Bytes::from("2")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_key() {
        let mut store = Store::new();
        store.replace("foo".to_string(), Bytes::from("1"));

        assert_eq!(store.remove("foo"), Some(Bytes::from("1")));
        assert!(!store.exists("foo"));
        assert!(store.is_empty());
    }
}
