use serde::{Deserialize, Serialize};

use crate::types::HostRole;

/// Object storage backend behind an [`crate::object::ObjectStoreEndpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Amazon S3
    S3 {
        bucket: String,
        region: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        access_key_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Google Cloud Storage
    Gcs {
        bucket: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        service_account_path: Option<String>,
    },

    /// Azure Blob Storage
    Azure {
        container: String,
        account: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        access_key: Option<String>,
    },

    /// Local filesystem
    Local { root_path: String },

    /// In-memory storage (for testing)
    Memory,
}

impl StoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::S3 { .. } => "s3",
            StoreConfig::Gcs { .. } => "gcs",
            StoreConfig::Azure { .. } => "azure",
            StoreConfig::Local { .. } => "local",
            StoreConfig::Memory => "memory",
        }
    }
}

/// How an endpoint presents itself to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `host:port` reported by locate and dirlist.
    pub address: String,
    #[serde(default)]
    pub role: HostRole,
    /// Largest single chunk a vector read may ask for.
    #[serde(default = "default_readv_ior_max")]
    pub readv_ior_max: u32,
    pub store: StoreConfig,
}

impl EndpointConfig {
    pub fn memory(address: &str) -> Self {
        Self {
            address: address.to_string(),
            role: HostRole::DataServer,
            readv_ior_max: default_readv_ior_max(),
            store: StoreConfig::Memory,
        }
    }
}

fn default_readv_ior_max() -> u32 {
    2_097_136
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_endpoint() {
        let cfg: EndpointConfig = toml::from_str(
            r#"
            address = "dataserver01:1094"
            role = "manager"

            [store]
            type = "local"
            root_path = "/srv/data"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.address, "dataserver01:1094");
        assert_eq!(cfg.role, HostRole::Manager);
        assert_eq!(cfg.readv_ior_max, 2_097_136);
        assert!(matches!(cfg.store, StoreConfig::Local { ref root_path } if root_path == "/srv/data"));
    }

    #[test]
    fn test_parse_s3_endpoint() {
        let cfg: EndpointConfig = toml::from_str(
            r#"
            address = "s3gw:1094"
            readv_ior_max = 1024

            [store]
            type = "s3"
            bucket = "physics"
            region = "eu-central-1"
            endpoint = "http://minio:9000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.role, HostRole::DataServer);
        assert_eq!(cfg.readv_ior_max, 1024);
        match cfg.store {
            StoreConfig::S3 { bucket, endpoint, access_key_id, .. } => {
                assert_eq!(bucket, "physics");
                assert_eq!(endpoint.as_deref(), Some("http://minio:9000"));
                assert!(access_key_id.is_none());
            }
            other => panic!("unexpected store {:?}", other),
        }
    }
}
