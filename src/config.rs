use axum::http::Uri;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// コマンドライン引数。設定ファイル・環境変数より優先される。
#[derive(Debug, Parser, Default)]
#[command(name = "caching-proxy", version, about = "Transparent caching HTTP proxy")]
pub struct Cli {
    /// 待ち受けポート
    #[arg(long)]
    pub port: Option<u16>,

    /// オリジンのベース URL (例: http://dummyjson.com)
    #[arg(long)]
    pub origin: Option<String>,

    /// 設定ファイルのパス (省略時は ./config.toml があれば読む)
    #[arg(long, env = "CACHING_PROXY_CONFIG")]
    pub config: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub origin: OriginConfig,
    pub cache: CacheConfig,
    pub admin: AdminConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OriginConfig {
    pub url: String,
    pub max_redirects: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub store_error_responses: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl OriginConfig {
    /// http / https かつホストを含む URL だけを受け付ける
    pub fn base_uri(&self) -> Result<Uri, ConfigError> {
        let uri: Uri = self
            .url
            .parse()
            .map_err(|e| ConfigError::Message(format!("origin.url '{}': {}", self.url, e)))?;

        match (uri.scheme_str(), uri.host()) {
            (Some("http") | Some("https"), Some(_)) => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "origin.url '{}' must be an absolute http(s) URL",
                    self.url
                )));
            }
        }
        if uri.query().is_some() {
            return Err(ConfigError::Message(format!(
                "origin.url '{}' must not carry a query string",
                self.url
            )));
        }
        Ok(uri)
    }
}

impl AppConfig {
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        // .envファイルの読み込み（存在しなくても無視）
        dotenvy::dotenv().ok();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let file = match &cli.config {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("config").required(false),
        };

        let s = Config::builder()
            // デフォルト値の設定
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("origin.url", "http://dummyjson.com")?
            .set_default("origin.max_redirects", 10)?
            .set_default("origin.timeout_secs", 30)?
            .set_default("cache.store_error_responses", true)?
            .set_default("admin.prefix", "/__cache")?
            .set_default("log.level", "info")?
            .add_source(file)
            // 環境に応じた設定ファイル (config/development.toml など) の読み込み
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // 環境変数の読み込み (CACHING_PROXY_SERVER__PORT=4000 など)
            .add_source(
                Environment::with_prefix("CACHING_PROXY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            // コマンドライン引数が最優先
            .set_override_option("server.port", cli.port.map(i64::from))?
            .set_override_option("origin.url", cli.origin.clone())?
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.origin.base_uri()?;

        let prefix = &self.admin.prefix;
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            return Err(ConfigError::Message(format!(
                "admin.prefix '{}' must start with '/' and must not end with '/'",
                prefix
            )));
        }
        Ok(())
    }
}
