use dynrpc_common::{env, Result};
use dynrpc_discovery::ResolverConfig;
use std::path::PathBuf;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::upload::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_SERVICE_NAME: &str = "lersosa-service-grpc";
pub const DEFAULT_GROUP: &str = "SERVICE_GROUP";
pub const DEFAULT_IDL_ROOT: &str = "proto/rpc";

/// RPC client configuration.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Registered name of the backend service
    pub service: String,
    /// Registry group the backend is registered in
    pub group: String,
    /// Directory scanned for IDL files
    pub idl_root: PathBuf,
    /// Upload chunk size in bytes
    pub chunk_size: usize,
    pub breaker: BreakerConfig,
    pub resolver: ResolverConfig,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE_NAME.to_string(),
            group: DEFAULT_GROUP.to_string(),
            idl_root: PathBuf::from(DEFAULT_IDL_ROOT),
            chunk_size: DEFAULT_CHUNK_SIZE,
            breaker: BreakerConfig::default()
                .with_failure_threshold(3)
                .with_recovery_timeout(Duration::from_secs(10)),
            resolver: ResolverConfig::default(),
        }
    }
}

impl RpcClientConfig {
    /// Reads `GRPC_SERVICE_NAME`, `NACOS_GROUP` and `GRPC_PROTO_DIR`,
    /// keeping defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(service) = env::var("GRPC_SERVICE_NAME") {
            config.service = service;
        }
        if let Some(group) = env::var("NACOS_GROUP") {
            config.group = group;
        }
        if let Some(root) = env::var("GRPC_PROTO_DIR") {
            config.idl_root = PathBuf::from(root);
        }
        Ok(config)
    }

    pub fn with_service(mut self, service: impl Into<String>, group: impl Into<String>) -> Self {
        self.service = service.into();
        self.group = group.into();
        self
    }

    pub fn with_idl_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.idl_root = root.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}
