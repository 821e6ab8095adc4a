//! In-memory [`ResearchStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use featurelens_shared::{ContentResearch, Result};

use crate::{ResearchStore, mark_stale};

/// Process-local store. Documents are cloned in and out.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, ContentResearch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl ResearchStore for MemoryStore {
    async fn get(&self, feature_id: &str) -> Result<Option<ContentResearch>> {
        Ok(self.docs.read().await.get(feature_id).cloned())
    }

    async fn upsert(&self, feature_id: &str, research: &ContentResearch) -> Result<()> {
        self.docs
            .write()
            .await
            .insert(feature_id.to_string(), research.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContentResearch>> {
        let mut docs: Vec<ContentResearch> = self.docs.read().await.values().cloned().collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    async fn invalidate_stale(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut docs = self.docs.write().await;
        Ok(docs
            .values_mut()
            .map(|research| mark_stale(research, cutoff))
            .filter(|&invalidated| invalidated)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelens_shared::{ResearchDepth, ResearchStatus};

    #[tokio::test]
    async fn get_upsert_list() {
        let store = MemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        let research = ContentResearch::new("a", ResearchDepth::Standard);
        store.upsert("a", &research).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(research));
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn invalidate_stale_resets_old_completed() {
        let store = MemoryStore::new();
        let mut research = ContentResearch::new("a", ResearchDepth::Standard);
        research.transition(ResearchStatus::InProgress).unwrap();
        research.transition(ResearchStatus::Completed).unwrap();
        research.updated_at = Utc::now() - Duration::days(30);
        store.upsert("a", &research).await.unwrap();

        assert_eq!(store.invalidate_stale(Duration::days(7)).await.unwrap(), 1);
        assert_eq!(
            store.get("a").await.unwrap().unwrap().status,
            ResearchStatus::Pending
        );
        assert_eq!(store.invalidate_stale(Duration::days(7)).await.unwrap(), 0);
    }
}
