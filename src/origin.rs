use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Request, Uri, header, uri::PathAndQuery};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::cache::CachedEntity;
use crate::config::OriginConfig;
use crate::error::ProxyError;
use crate::proxy::ProxyRequest;

// プロキシ間で引き継がないヘッダー
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// オリジンへの取得処理。リダイレクトは内部で解決し、最終レスポンスだけを返す。
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    async fn fetch(&self, request: &ProxyRequest) -> Result<CachedEntity, ProxyError>;
}

type HttpsClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

pub struct HttpOriginFetcher {
    client: HttpsClient,
    base: Uri,
    max_redirects: usize,
    hop_timeout: Duration,
}

impl HttpOriginFetcher {
    pub fn new(base: Uri, max_redirects: usize, hop_timeout: Duration) -> Self {
        init_crypto_provider();

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            base,
            max_redirects,
            hop_timeout,
        }
    }

    pub fn from_config(config: &OriginConfig) -> Result<Self, config::ConfigError> {
        Ok(Self::new(
            config.base_uri()?,
            config.max_redirects,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    // ボディの読み取りまでタイムアウトの対象
    async fn send(
        &self,
        request: &ProxyRequest,
        uri: &Uri,
    ) -> Result<(axum::http::response::Parts, Bytes), ProxyError> {
        let unreachable = |reason: String| ProxyError::OriginUnreachable {
            uri: uri.to_string(),
            reason,
        };

        let mut outbound = Request::builder()
            .method(request.method().clone())
            .uri(uri.clone())
            .body(Empty::<Bytes>::new())
            .map_err(|e| unreachable(e.to_string()))?;
        *outbound.headers_mut() = forwarded_headers(request.headers());

        let exchange = async {
            let response = self
                .client
                .request(outbound)
                .await
                .map_err(|e| unreachable(e.to_string()))?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| unreachable(e.to_string()))?
                .to_bytes();
            Ok::<_, ProxyError>((parts, body))
        };

        match timeout(self.hop_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::OriginTimeout { uri: uri.to_string() }),
        }
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, request: &ProxyRequest) -> Result<CachedEntity, ProxyError> {
        let mut uri = join_origin(&self.base, request.target())?;
        let mut redirects = 0;

        loop {
            debug!("{} {}", request.method(), uri);
            let (parts, body) = self.send(request, &uri).await?;

            if parts.status.is_redirection() {
                // Location のない 3xx (304 など) は最終レスポンスとして扱う
                if let Some(location) = parts.headers.get(header::LOCATION) {
                    if redirects >= self.max_redirects {
                        return Err(ProxyError::RedirectLimitExceeded {
                            limit: self.max_redirects,
                            location: String::from_utf8_lossy(location.as_bytes()).into_owned(),
                        });
                    }
                    let next = resolve_location(&uri, location)?;
                    info!("Following {} redirect: {} -> {}", parts.status, uri, next);
                    uri = next;
                    redirects += 1;
                    continue;
                }
            }

            let mut headers = parts.headers;
            strip_hop_by_hop(&mut headers);
            return Ok(CachedEntity {
                status: parts.status,
                headers,
                body,
            });
        }
    }
}

fn init_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // 既に別のプロバイダが入っていればそれを使う
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Connection に列挙されたヘッダーも同じ扱い
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();
    for name in &listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

// Host はホップごとにクライアントが付け直す
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers
}

pub fn join_origin(base: &Uri, target: &str) -> Result<Uri, ProxyError> {
    let prefix = base.path().trim_end_matches('/');
    let path_and_query: PathAndQuery = format!("{}{}", prefix, target)
        .parse()
        .map_err(|_| ProxyError::KeyDerivation(format!("invalid target '{}'", target)))?;

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|e| ProxyError::KeyDerivation(e.to_string()))
}

/// Location ヘッダーを現在の URI を基準に解決する。フラグメントは捨てる。
pub fn resolve_location(current: &Uri, location: &HeaderValue) -> Result<Uri, ProxyError> {
    let invalid = || {
        ProxyError::InvalidRedirect(String::from_utf8_lossy(location.as_bytes()).into_owned())
    };

    let raw = location.to_str().map_err(|_| invalid())?.trim();
    let raw = raw.split('#').next().unwrap_or_default();
    if raw.is_empty() {
        return Err(invalid());
    }

    let scheme = current.scheme_str().unwrap_or("http");
    let authority = current.authority().map(|a| a.as_str()).ok_or_else(invalid)?;

    let resolved = if raw.starts_with("//") {
        format!("{}:{}", scheme, raw)
    } else if raw.starts_with('/') {
        let (path, query) = split_query(raw);
        format!("{}://{}{}{}", scheme, authority, remove_dot_segments(path), query)
    } else if has_scheme(raw) {
        raw.to_string()
    } else {
        let (path, query) = split_query(raw);
        let base_path = current.path();
        let dir = &base_path[..base_path.rfind('/').map_or(0, |i| i + 1)];
        let merged = if dir.is_empty() {
            format!("/{}", path)
        } else {
            format!("{}{}", dir, path)
        };
        format!("{}://{}{}{}", scheme, authority, remove_dot_segments(&merged), query)
    };

    let uri: Uri = resolved.parse().map_err(|_| invalid())?;
    match (uri.scheme_str(), uri.authority()) {
        (Some("http") | Some("https"), Some(_)) => Ok(uri),
        _ => Err(invalid()),
    }
}

fn has_scheme(raw: &str) -> bool {
    match raw.find(':') {
        Some(i) if i > 0 => {
            let scheme = &raw[..i];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn split_query(raw: &str) -> (&str, &str) {
    match raw.find('?') {
        Some(i) => (&raw[..i], &raw[i..]),
        None => (raw, ""),
    }
}

fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/').skip(1) {
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    // 末尾が . / .. のときはディレクトリとして残す
    let trailing = path.ends_with("/.") || path.ends_with("/..");
    let mut out = format!("/{}", segments.join("/"));
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(current: &str, location: &'static str) -> Result<Uri, ProxyError> {
        resolve_location(&current.parse().unwrap(), &HeaderValue::from_static(location))
    }

    #[test]
    fn join_keeps_base_prefix() {
        let base: Uri = "http://dummyjson.com".parse().unwrap();
        assert_eq!(
            join_origin(&base, "/products/1?select=title").unwrap(),
            "http://dummyjson.com/products/1?select=title"
        );

        let base: Uri = "http://localhost:8080/api/".parse().unwrap();
        assert_eq!(
            join_origin(&base, "/users").unwrap(),
            "http://localhost:8080/api/users"
        );
    }

    #[test]
    fn absolute_location() {
        let uri = resolve("http://dummyjson.com/products/1", "https://dummyjson.com/products/1").unwrap();
        assert_eq!(uri, "https://dummyjson.com/products/1");
    }

    #[test]
    fn scheme_relative_location() {
        let uri = resolve("https://a.example/x", "//b.example/y?z=1").unwrap();
        assert_eq!(uri, "https://b.example/y?z=1");
    }

    #[test]
    fn absolute_path_location() {
        let uri = resolve("http://127.0.0.1:9000/old/path?q=1", "/new/path?p=2#frag").unwrap();
        assert_eq!(uri, "http://127.0.0.1:9000/new/path?p=2");
    }

    #[test]
    fn relative_location() {
        let uri = resolve("http://host/a/b/c", "d?e=f").unwrap();
        assert_eq!(uri, "http://host/a/b/d?e=f");

        let uri = resolve("http://host/a/b/c", "../x").unwrap();
        assert_eq!(uri, "http://host/a/x");

        let uri = resolve("http://host/a/b/", "./").unwrap();
        assert_eq!(uri, "http://host/a/b/");
    }

    #[test]
    fn rejects_unusable_locations() {
        assert!(matches!(
            resolve("http://host/a", "ftp://host/file"),
            Err(ProxyError::InvalidRedirect(_))
        ));
        assert!(resolve("http://host/a", "").is_err());
        assert!(resolve("http://host/a", "#only-fragment").is_err());
    }

    #[test]
    fn forwarded_headers_drop_host_and_hop_by_hop() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:3000"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let headers = forwarded_headers(&inbound);
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn proxy_credentials_are_not_forwarded() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"));

        let headers = forwarded_headers(&inbound);
        assert!(headers.get(header::PROXY_AUTHORIZATION).is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer token");
    }

    #[test]
    fn headers_named_in_connection_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, X-Trace-Hop"));
        headers.append(header::CONNECTION, HeaderValue::from_static("x-session-hint"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert(header::PROXY_AUTHENTICATE, HeaderValue::from_static("Basic"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("x-trace-hop").is_none());
        assert!(headers.get("x-session-hint").is_none());
        assert!(headers.get(header::PROXY_AUTHENTICATE).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/plain");
    }
}
