use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::ExclusionPolicy;
use crate::error::EtlError;
use crate::variant::{VariantCatalog, VariantConfig};

pub const DEFAULT_CONFIG_FILE: &str = "ncbi-shard.json";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub commons_url: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub exclusion: Option<ExclusionPolicy>,
    #[serde(default)]
    pub variants: Vec<VariantEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum VariantEntry {
    Shorthand(String),
    Detailed(VariantConfig),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub commons_url: Option<String>,
    pub s3_endpoint: Option<String>,
    pub workers: usize,
    pub queue_capacity: usize,
    pub exclusion: ExclusionPolicy,
    pub catalog: VariantCatalog,
    pub selected: Vec<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EtlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }
        if !config_path.exists() {
            return Err(EtlError::MissingConfig(config_path));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EtlError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EtlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, EtlError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let mut catalog = VariantCatalog::builtin();
        let mut selected = Vec::new();

        for entry in config.variants {
            match entry {
                VariantEntry::Shorthand(name) => {
                    catalog.get(&name)?;
                    selected.push(name);
                }
                VariantEntry::Detailed(variant) => {
                    selected.push(variant.name.clone());
                    catalog.insert(variant);
                }
            }
        }

        Ok(ResolvedConfig {
            schema_version,
            commons_url: config.commons_url,
            s3_endpoint: config.s3_endpoint,
            workers: config.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            queue_capacity: config
                .queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY)
                .max(1),
            exclusion: config.exclusion.unwrap_or_default(),
            catalog,
            selected,
        })
    }
}
