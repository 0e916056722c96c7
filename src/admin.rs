use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::cache::CacheKey;
use crate::error::ProxyError;
use crate::networking::AppState;

#[derive(Debug, Deserialize)]
pub struct EvictParams {
    #[serde(default = "default_method")]
    pub method: String,
    pub target: String,
}

fn default_method() -> String {
    "GET".to_string()
}

// プレフィックス配下の未定義パス
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

// ヘルスチェック用ハンドラ
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// `DELETE {prefix}/entry?method=GET&target=/products/1`
///
/// 通常の配信と同じ規則でキーを作るので、ここで消したエントリは次回必ず MISS になる。
pub async fn evict(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EvictParams>,
) -> Result<StatusCode, ProxyError> {
    let key = CacheKey::from_parts(&params.method, &params.target)?;
    state.store.evict(&key).await?;
    info!("Evicted cache entry: {}", key);
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE {prefix}`
pub async fn clear(State(state): State<Arc<AppState>>) -> Result<StatusCode, ProxyError> {
    state.store.clear().await?;
    info!("Cache cleared");
    Ok(StatusCode::NO_CONTENT)
}
