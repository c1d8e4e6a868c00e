//! Session registry
//!
//! Tracks live websocket sessions for the health surface and enforces a
//! connection cap. Dialog state itself lives in each session's
//! controller; nothing here survives a disconnect.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

use crate::ServerError;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: Instant,
}

/// Registry of live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new session; fails when the cap is reached.
    pub fn register(&self) -> Result<String, ServerError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(ServerError::Session("max sessions reached".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        sessions.insert(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                created_at: Instant::now(),
            },
        );
        tracing::info!(session_id = %id, total = sessions.len(), "session registered");
        Ok(id)
    }

    pub fn remove(&self, id: &str) {
        if self.sessions.write().remove(id).is_some() {
            tracing::info!(session_id = %id, "session removed");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let registry = SessionRegistry::new(4);
        let id = registry.register().unwrap();
        assert_eq!(registry.count(), 1);
        assert!(registry.list().contains(&id));

        registry.remove(&id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn cap_is_enforced() {
        let registry = SessionRegistry::new(1);
        let _first = registry.register().unwrap();
        assert!(registry.register().is_err());
    }
}
