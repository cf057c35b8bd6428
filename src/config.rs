//! Process configuration, read once at start-up from the environment and an
//! optional `.env` file.

use crate::error::{AppError, AppResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5000";
const DEFAULT_DATABASE_URL: &str = "sqlite:///invoices.db";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_POWER_BI_API: &str = "https://api.powerbi.com/v1.0/myorg";

/// Upload extensions accepted by the ingestion pipeline.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub database_path: PathBuf,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
    pub azure: AzureConfig,
    pub power_bi: Option<PowerBiConfig>,
}

/// Document-analysis service settings. Endpoint and key may be absent, in
/// which case every extraction fails with a "not configured" diagnostic.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub request_timeout: Duration,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: None,
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl AzureConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.endpoint, &self.key), (Some(e), Some(k)) if !e.trim().is_empty() && !k.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct PowerBiConfig {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub report_id: String,
    pub authority_host: String,
    pub api_base: String,
}

impl AppConfig {
    /// Build the configuration from `.env` plus process environment.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let azure = AzureConfig {
            endpoint: get("AZURE_ENDPOINT").or_else(|| get("AZURE_OCR_ENDPOINT")),
            key: get("AZURE_KEY").or_else(|| get("AZURE_OCR_KEY")),
            poll_interval: Duration::from_millis(parse_or(&get, "AZURE_POLL_INTERVAL_MS", 2000u64)?),
            max_polls: parse_or(&get, "AZURE_MAX_POLLS", 60u32)?,
            request_timeout: Duration::from_secs(parse_or(&get, "AZURE_TIMEOUT_SECS", 120u64)?),
        };

        let power_bi = match (
            get("POWER_BI_CLIENT_ID"),
            get("POWER_BI_CLIENT_SECRET"),
            get("POWER_BI_TENANT_ID"),
            get("POWER_BI_WORKSPACE_ID"),
            get("POWER_BI_REPORT_ID"),
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id), Some(workspace_id), Some(report_id)) => {
                Some(PowerBiConfig {
                    client_id,
                    client_secret,
                    tenant_id,
                    workspace_id,
                    report_id,
                    authority_host: get("POWER_BI_AUTHORITY_HOST")
                        .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
                    api_base: get("POWER_BI_API_BASE").unwrap_or_else(|| DEFAULT_POWER_BI_API.to_string()),
                })
            }
            _ => None,
        };

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            database_path: database_path_from_url(&database_url)?,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            azure,
            power_bi,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{} is not a valid number: {:?}", key, raw))),
        None => Ok(default),
    }
}

/// Accepts `sqlite:///relative.db`, `sqlite:////abs/path.db` or a bare path.
fn database_path_from_url(url: &str) -> AppResult<PathBuf> {
    let path = if let Some(rest) = url.strip_prefix("sqlite:///") {
        rest
    } else if url.contains("://") {
        return Err(AppError::Config(format!(
            "DATABASE_URL must be a sqlite URL or a file path, got {:?}",
            url
        )));
    } else {
        url
    };
    if path.is_empty() {
        return Err(AppError::Config("DATABASE_URL has an empty path".to_string()));
    }
    Ok(PathBuf::from(path))
}
