//! Configuration loaded from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Scratch space for downloads and merge output
    pub work_dir: PathBuf,
    /// Root of the on-disk host document
    pub document_dir: PathBuf,
    /// Where merged videos go when they cannot be inserted
    pub download_dir: PathBuf,
    /// Endpoint segments are submitted to
    pub generation_url: String,
    pub generation_api_key: Option<String>,
    /// Upper bound on one frame decode
    pub frame_timeout: Duration,
    /// Capacity of the task event channel
    pub event_capacity: usize,
}

impl ChainConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            addr: string("ADDR", "127.0.0.1"),
            port: string("PORT", "3000"),
            work_dir: lookup("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("reelchain")),
            document_dir: PathBuf::from(string("DOCUMENT_DIR", "./document")),
            download_dir: PathBuf::from(string("DOWNLOAD_DIR", "./downloads")),
            generation_url: string("GENERATION_URL", "http://127.0.0.1:8080/v1/videos"),
            generation_api_key: lookup("GENERATION_API_KEY").filter(|key| !key.is_empty()),
            frame_timeout: Duration::from_secs(parse_or(&lookup, "FRAME_TIMEOUT_SECS", 30)),
            event_capacity: parse_or(&lookup, "EVENT_CAPACITY", 256),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, %default, "invalid number, using default");
            default
        }),
    }
}
