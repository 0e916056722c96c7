use axum::{
    Router,
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::{any, delete, get},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin;
use crate::annotation::annotate;
use crate::cache::{CacheStore, MemoryStore};
use crate::config::AppConfig;
use crate::origin::HttpOriginFetcher;
use crate::proxy::{ProxyCoordinator, ProxyRequest};

/// プロセス全体で共有する状態。キャッシュストアは起動時に一つだけ作る。
pub struct AppState {
    pub coordinator: ProxyCoordinator,
    pub store: Arc<dyn CacheStore>,
}

impl AppState {
    pub fn new(coordinator: ProxyCoordinator, store: Arc<dyn CacheStore>) -> Self {
        Self { coordinator, store }
    }
}

pub fn build_router(state: Arc<AppState>, admin_prefix: &str) -> Router {
    Router::new()
        .route(&format!("{}/health", admin_prefix), get(admin::health))
        .route(admin_prefix, delete(admin::clear))
        .route(&format!("{}/entry", admin_prefix), delete(admin::evict))
        // プレフィックス配下はオリジンへ流さない
        .route(&format!("{}/*rest", admin_prefix), any(admin::not_found))
        // 管理用以外はすべてオリジンへ
        .fallback(any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    // 状態の初期化
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(HttpOriginFetcher::from_config(&config.origin)?);
    let coordinator = ProxyCoordinator::new(
        Arc::clone(&store),
        fetcher,
        config.cache.store_error_responses,
    );
    let state = Arc::new(AppState::new(coordinator, store));

    let app = build_router(state, &config.admin.prefix);

    // 設定値に基づいてアドレスを作成
    let addr_str = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = addr_str.parse()?;
    info!("listening on {} (origin: {})", addr, config.origin.url);

    // サーバーの起動
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// プロキシ用ハンドラ。リクエストボディは転送しない。
async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, _body) = req.into_parts();
    let request = ProxyRequest::from_parts(&parts);

    match state.coordinator.handle(&request).await {
        Ok((entity, status)) => annotate(&entity, status),
        Err(e) => e.into_response(),
    }
}
