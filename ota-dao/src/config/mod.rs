use ota_core::config as core_config;
use ota_core::error::AppError;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct DaoConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub store: StoreConfig,
    /// Linked providers given to users created without any.
    pub default_linked_providers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Mongodb,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mongodb" | "mongo" => Ok(StoreBackend::Mongodb),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "unknown STORE_BACKEND {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub mongodb: Option<MongoConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                mongodb: None,
            },
            default_linked_providers: vec!["GitHub".to_string()],
        }
    }
}

impl DaoConfig {
    pub fn load() -> Result<Self, AppError> {
        let mut common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        if let Ok(level) = env::var("LOG_LEVEL") {
            common.log_level = level;
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common.otlp_endpoint = Some(endpoint);
        }

        let backend: StoreBackend = get_env("STORE_BACKEND", Some("memory"), is_prod)?.parse()?;
        let mongodb = match backend {
            StoreBackend::Memory => None,
            StoreBackend::Mongodb => Some(MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("ota_dao"), is_prod)?,
            }),
        };

        Ok(DaoConfig {
            common,
            store: StoreConfig { backend, mongodb },
            default_linked_providers: parse_list(&get_env(
                "DEFAULT_LINKED_PROVIDERS",
                Some("GitHub"),
                is_prod,
            )?),
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) if is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} is required in production but not set",
            key
        ))),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key))
        }),
    }
}
