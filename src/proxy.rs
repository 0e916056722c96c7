use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri, request::Parts};
use tracing::{debug, info, warn};

use crate::annotation::CacheStatus;
use crate::cache::{CacheKey, CacheStore, CachedEntity};
use crate::error::ProxyError;
use crate::origin::OriginFetcher;

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self { method, uri, headers }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn target(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }
}

/// HIT なら保存済みエンティティ、MISS ならオリジンから取得して保存する。
pub struct ProxyCoordinator {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn OriginFetcher>,
    store_error_responses: bool,
}

impl ProxyCoordinator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn OriginFetcher>,
        store_error_responses: bool,
    ) -> Self {
        Self {
            store,
            fetcher,
            store_error_responses,
        }
    }

    // 同じキーへの同時 MISS はそれぞれオリジンへ取りに行き、最後の put が残る
    pub async fn handle(
        &self,
        request: &ProxyRequest,
    ) -> Result<(Arc<CachedEntity>, CacheStatus), ProxyError> {
        let key = CacheKey::from_request(request)?;

        match self.store.get(&key).await {
            Ok(Some(entity)) => {
                info!("Cache HIT: {}", key);
                return Ok((entity, CacheStatus::Hit));
            }
            Ok(None) => {}
            // ストアが読めなくても MISS として続行する
            Err(e) => warn!("Cache lookup failed for {}, treating as miss: {}", key, e),
        }

        info!("Cache MISS: {}", key);
        let entity = Arc::new(self.fetcher.fetch(request).await?);

        if self.should_store(&entity) {
            if let Err(e) = self.store.put(key.clone(), Arc::clone(&entity)).await {
                // 保存に失敗しても取得したレスポンスはそのまま返す
                warn!("Failed to store {}: {}", key, e);
            }
        } else {
            debug!("Not storing {} (status {})", key, entity.status);
        }

        Ok((entity, CacheStatus::Miss))
    }

    fn should_store(&self, entity: &CachedEntity) -> bool {
        self.store_error_responses
            || !(entity.status.is_client_error() || entity.status.is_server_error())
    }
}
