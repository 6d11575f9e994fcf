use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use extract::{ChatMessage, ChatModel};

use crate::embeddings::Embedder;

/// A bounded map from hashed request text to a response.
///
/// When full, a quarter of the entries are evicted before inserting.
pub struct ResponseCache<V> {
    entries: DashMap<String, V>,
    max_entries: usize,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    pub fn get(&self, text: &str) -> Option<V> {
        let key = hash_text(text);
        self.entries.get(&key).map(|r| r.value().clone())
    }

    pub fn insert(&self, text: &str, value: V) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.max_entries {
            let to_remove: Vec<_> = self
                .entries
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(hash_text(text), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Memoizes embeddings by input text.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: ResponseCache<Vec<f32>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_entries: usize) -> Self {
        Self {
            inner,
            cache: ResponseCache::new(max_entries),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(embedding) = self.cache.get(text) {
            return Ok(embedding);
        }
        let embedding = self.inner.embed(text).await?;
        self.cache.insert(text, embedding.clone());
        Ok(embedding)
    }
}

/// Memoizes model answers by the full rendered conversation.
///
/// Failed calls are not cached.
pub struct CachedChatModel {
    inner: Arc<dyn ChatModel>,
    cache: ResponseCache<String>,
}

impl CachedChatModel {
    pub fn new(inner: Arc<dyn ChatModel>, max_entries: usize) -> Self {
        Self {
            inner,
            cache: ResponseCache::new(max_entries),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn cache_key(messages: &[ChatMessage]) -> String {
        serde_json::to_string(messages).unwrap_or_else(|_| {
            messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\u{1e}")
        })
    }
}

#[async_trait]
impl ChatModel for CachedChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let key = Self::cache_key(messages);
        if let Some(answer) = self.cache.get(&key) {
            return Ok(answer);
        }
        let answer = self.inner.invoke(messages).await?;
        self.cache.insert(&key, answer.clone());
        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
    pub llm_responses_cached: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::mock::MockChatModel;

    #[test]
    fn evicts_a_quarter_when_full() {
        let cache = ResponseCache::new(4);
        for i in 0..4 {
            cache.insert(&format!("k{i}"), i);
        }
        assert_eq!(cache.len(), 4);

        cache.insert("k4", 4);

        assert_eq!(cache.len(), 4);
        assert_eq!(cache.get("k4"), Some(4));
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = ResponseCache::new(0);
        cache.insert("k", 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn chat_answers_are_reused() {
        let inner = Arc::new(MockChatModel::constant("answer"));
        let cached = CachedChatModel::new(inner.clone(), 16);
        let messages = [ChatMessage::user("same prompt")];

        assert_eq!(cached.invoke(&messages).await.unwrap(), "answer");
        assert_eq!(cached.invoke(&messages).await.unwrap(), "answer");
        cached.invoke(&[ChatMessage::user("other prompt")]).await.unwrap();

        assert_eq!(inner.calls(), 2);
        assert_eq!(cached.cached(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let inner = Arc::new(MockChatModel::replying(|_| anyhow::bail!("down")));
        let cached = CachedChatModel::new(inner.clone(), 16);
        let messages = [ChatMessage::user("p")];

        assert!(cached.invoke(&messages).await.is_err());
        assert!(cached.invoke(&messages).await.is_err());

        assert_eq!(inner.calls(), 2);
        assert_eq!(cached.cached(), 0);
    }
}
