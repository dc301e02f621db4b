//! Process-wide map of live upload sessions.
//!
//! The registry lock only guards the map itself; a session's contents are
//! protected by the session's own lock, so uploads against different
//! sessions never contend here beyond an O(1) lookup.

use crate::models::session::UploadSession;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<UploadSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its id. Ids are random 128-bit tokens, so the
    /// caller does not check for collisions.
    pub async fn create(&self, session: Arc<UploadSession>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<UploadSession>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Handles to every live session, for sweeping.
    pub async fn all(&self) -> Vec<Arc<UploadSession>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Arc<UploadSession> {
        Arc::new(UploadSession::new(
            id.into(),
            "f.bin".into(),
            10,
            4,
            "application/octet-stream".into(),
        ))
    }

    #[tokio::test]
    async fn create_get_remove() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);

        registry.create(session("a")).await;
        registry.create(session("b")).await;
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.get("a").await.unwrap().id, "a");

        assert!(registry.remove("a").await.is_some());
        assert!(registry.get("a").await.is_none());
        assert!(registry.remove("a").await.is_none());
        assert_eq!(registry.all().await.len(), 1);
    }
}
