//! Per-browser-session key/value boundary.
//!
//! The web layer owns session cookies and storage; the flow controller
//! only needs a small string map scoped to one browser session to stash
//! the pending authorization attempt. [`MemorySession`] is the in-process
//! implementation the demos and tests use.

use std::collections::HashMap;
use std::sync::Mutex;

/// Key/value storage scoped to a single browser session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str) -> Option<String>;
}

/// In-process session map.
#[derive(Debug, Default)]
pub struct MemorySession {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("session map lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values
            .lock()
            .expect("session map lock poisoned")
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("session map lock poisoned")
            .remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_is_single_shot() {
        let session = MemorySession::new();
        session.set("k", "v".into());
        assert_eq!(session.remove("k").as_deref(), Some("v"));
        assert_eq!(session.remove("k"), None);
    }
}
