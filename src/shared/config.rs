use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub compression: CompressionConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub auto_sync: bool,
    pub sync_interval: u64,
    pub submit_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub submit_path: String,
    pub health_path: String,
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl SyncConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: default_database_url(),
                max_connections: 5,
            },
            sync: SyncConfig {
                auto_sync: true,
                sync_interval: 300, // 5分
                submit_timeout_secs: 60,
            },
            compression: CompressionConfig {
                max_dimension: 1024,
                jpeg_quality: 80,
            },
            remote: RemoteConfig {
                base_url: "http://localhost:8000/api".to_string(),
                submit_path: "/inspections/offline-submit/".to_string(),
                health_path: "/health/".to_string(),
                request_timeout_secs: 45,
                api_token: None,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("INSPECTION_SYNC_DATABASE_URL")
            && !v.trim().is_empty()
        {
            cfg.database.url = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_AUTO_SYNC") {
            cfg.sync.auto_sync = parse_bool(&v, cfg.sync.auto_sync);
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.sync.sync_interval = value.max(1);
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_SUBMIT_TIMEOUT_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.sync.submit_timeout_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_MAX_DIMENSION")
            && let Some(value) = parse_u32(&v)
        {
            cfg.compression.max_dimension = value;
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_JPEG_QUALITY")
            && let Some(value) = parse_u8(&v)
        {
            cfg.compression.jpeg_quality = value.clamp(1, 100);
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_API_BASE_URL")
            && !v.trim().is_empty()
        {
            cfg.remote.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("INSPECTION_SYNC_API_TOKEN") {
            let token = v.trim();
            cfg.remote.api_token = if token.is_empty() {
                None
            } else {
                Some(token.to_string())
            };
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.trim().is_empty() {
            return Err("Database url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.sync.sync_interval == 0 {
            return Err("Sync interval must be greater than 0".to_string());
        }
        if self.sync.submit_timeout_secs == 0 {
            return Err("Sync submit_timeout_secs must be greater than 0".to_string());
        }
        if self.compression.max_dimension == 0 {
            return Err("Compression max_dimension must be greater than 0".to_string());
        }
        if !(1..=100).contains(&self.compression.jpeg_quality) {
            return Err("Compression jpeg_quality must be between 1 and 100".to_string());
        }
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            return Err("Remote base_url must be an http(s) URL".to_string());
        }
        Ok(())
    }
}

fn default_database_url() -> String {
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("inspection-sync");
    format!("sqlite://{}?mode=rwc", dir.join("offline.db").display())
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

fn parse_u8(value: &str) -> Option<u8> {
    value.trim().parse::<u8>().ok()
}
