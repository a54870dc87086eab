use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::sync::OnceLock;

/// Client-side settings for remote file access.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientConfig {
    /// Open files asynchronously; the first I/O call waits for completion.
    #[serde(default)]
    pub parallel_open: bool,
    /// Compression hint handed to new file handles.
    #[serde(default = "default_compression")]
    pub compression: i32,
    /// Name the stager answers to in `matches`.
    #[serde(default = "default_stager_name")]
    pub stager_name: String,
    /// Config query key carrying the server's vector read limit.
    #[serde(default = "default_readv_query_key")]
    pub readv_query_key: String,
}

impl ClientConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let cfg: ClientConfig = toml::from_str(&content)?;
        Ok(cfg)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            parallel_open: false,
            compression: default_compression(),
            stager_name: default_stager_name(),
            readv_query_key: default_readv_query_key(),
        }
    }
}

static RUNTIME_CONFIG: OnceLock<ClientConfig> = OnceLock::new();

pub fn set_runtime_config(cfg: ClientConfig) {
    let _ = RUNTIME_CONFIG.set(cfg);
}

pub fn runtime_config() -> &'static ClientConfig {
    RUNTIME_CONFIG.get_or_init(ClientConfig::default)
}

fn default_compression() -> i32 {
    1
}

fn default_stager_name() -> String {
    "xrd".to_string()
}

fn default_readv_query_key() -> String {
    "readv_ior_max".to_string()
}
