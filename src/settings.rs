use std::{env, path::PathBuf, time::Duration};

use crate::config::PageConfig;
use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_STORAGE_DIR: &str = "./widget-data";
const DEFAULT_SESSION_TTL_SECS: u64 = 1800;

/// Process-level settings for the widget host, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub api_base_url: String,
    pub storage_dir: PathBuf,
    pub page_config: Option<PageConfig>,
    pub session_ttl: Duration,
}

impl Settings {
    /// Reads `PORT`, `WIDGET_API_BASE_URL`, `WIDGET_STORAGE_DIR`,
    /// `WIDGET_PAGE_CONFIG` (path to a JSON page config) and
    /// `WIDGET_SESSION_TTL_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|err| ConfigError::Environment {
                key: "PORT",
                reason: err.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let api_base_url = get("WIDGET_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ConfigError::Environment {
                key: "WIDGET_API_BASE_URL",
                reason: format!("expected an http(s) URL, got {api_base_url:?}"),
            });
        }

        let storage_dir = PathBuf::from(
            get("WIDGET_STORAGE_DIR").unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string()),
        );

        let page_config = match get("WIDGET_PAGE_CONFIG") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Environment {
                        key: "WIDGET_PAGE_CONFIG",
                        reason: format!("{path}: {err}"),
                    }
                })?;
                Some(PageConfig::from_json(&raw)?)
            }
            None => None,
        };

        let session_ttl = match get("WIDGET_SESSION_TTL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|err| ConfigError::Environment {
                    key: "WIDGET_SESSION_TTL_SECS",
                    reason: err.to_string(),
                })?,
            None => Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        };

        Ok(Self {
            port,
            api_base_url,
            storage_dir,
            page_config,
            session_ttl,
        })
    }
}
