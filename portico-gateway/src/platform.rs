use async_trait::async_trait;
use dashmap::DashMap;
use portico_core::error::GatewayError;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Key/value cache capability. The incident detector and historical metrics
/// collector write through this; plugin infrastructure may share it.
#[async_trait]
pub trait CacheCapability: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);
    async fn remove(&self, key: &str);
}

/// LLM capability backing the plugin Q&A endpoint. Optional; the endpoint
/// is only bound when a provider is wired in.
#[async_trait]
pub trait LlmCapability: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String, GatewayError>;
}

/// Process-wide capability bundle, passed explicitly at construction.
pub struct PlatformServices {
    pub cache: Arc<dyn CacheCapability>,
    pub llm: Option<Arc<dyn LlmCapability>>,
}

impl PlatformServices {
    pub fn with_defaults() -> Self {
        Self {
            cache: Arc::new(MemoryCache::new()),
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmCapability>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn shutdown(&self) {
        info!("Platform services shut down");
    }
}

/// In-memory cache with optional per-entry TTL.
pub struct MemoryCache {
    entries: DashMap<String, (Value, Option<Instant>)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheCapability for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => match entry.value().1 {
                Some(deadline) => Instant::now() >= deadline,
                None => return Some(entry.value().0.clone()),
            },
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value().0.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value, deadline));
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}
