use std::fmt;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue},
    response::Response,
};

use crate::cache::CachedEntity;

/// キャッシュ状態を伝えるレスポンスヘッダー
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 保存済みエンティティからクライアント向けレスポンスを組み立てる。
///
/// エンティティ自体には触れず、ヘッダーのコピーに `X-Cache` を一つだけ付ける。
/// ストア側に古い MISS が残らないよう、付与は必ず返却時に行う。
pub fn annotate(entity: &CachedEntity, status: CacheStatus) -> Response {
    let mut response = Response::new(Body::from(entity.body.clone()));
    *response.status_mut() = entity.status;

    let headers = response.headers_mut();
    *headers = entity.headers.clone();
    // insert は同名ヘッダーの既存値をすべて置き換える
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));

    response
}
