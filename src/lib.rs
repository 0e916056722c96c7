pub mod admin;
pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod networking;
pub mod origin;
pub mod proxy;

pub use annotation::{CacheStatus, X_CACHE, annotate};
pub use cache::{CacheKey, CacheStore, CachedEntity, MemoryStore};
pub use error::{ProxyError, StoreError};
pub use networking::{AppState, build_router, run_server};
pub use origin::{HttpOriginFetcher, OriginFetcher};
pub use proxy::{ProxyCoordinator, ProxyRequest};
