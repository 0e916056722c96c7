use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use moka::future::Cache;
use tracing::debug;

use crate::error::{ProxyError, StoreError};
use crate::proxy::ProxyRequest;

/// メソッド + パス + クエリから作るキャッシュキー (例: `GET /products/1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    // ヘッダーはキーに含めない
    pub fn from_request(request: &ProxyRequest) -> Result<Self, ProxyError> {
        Self::derive(request.method(), request.uri().path(), request.uri().query())
    }

    pub fn from_parts(method: &str, target: &str) -> Result<Self, ProxyError> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ProxyError::KeyDerivation(format!("invalid method '{}'", method)))?;
        let uri: Uri = target
            .parse()
            .map_err(|_| ProxyError::KeyDerivation(format!("invalid target '{}'", target)))?;
        Self::derive(&method, uri.path(), uri.query())
    }

    fn derive(method: &Method, path: &str, query: Option<&str>) -> Result<Self, ProxyError> {
        // origin-form 以外 (`*` や authority-form) はキャッシュ対象にできない
        if !path.starts_with('/') {
            return Err(ProxyError::KeyDerivation(format!(
                "request target '{}' is not in origin-form",
                path
            )));
        }

        let key = match query {
            Some(q) if !q.is_empty() => format!("{} {}?{}", method, path, q),
            _ => format!("{} {}", method, path),
        };
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CachedEntity {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// キャッシュの保存先。インメモリ以外 (分散ストアなど) もこのトレイトで差し替える。
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CachedEntity>>, StoreError>;

    async fn put(&self, key: CacheKey, entity: Arc<CachedEntity>) -> Result<(), StoreError>;

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

// 容量上限・TTL なし
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<CacheKey, Arc<CachedEntity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let entries = Cache::builder().build();
        Self { entries }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<CachedEntity>>, StoreError> {
        Ok(self.entries.get(key).await)
    }

    async fn put(&self, key: CacheKey, entity: Arc<CachedEntity>) -> Result<(), StoreError> {
        debug!("Storing entry: {}", key);
        self.entries.insert(key, entity).await;
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError> {
        debug!("Evicting entry: {}", key);
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        // invalidate_all 以前に入ったエントリは以後 get で返らない
        self.entries.invalidate_all();
        Ok(())
    }
}
