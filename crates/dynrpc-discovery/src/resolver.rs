use dynrpc_common::{Endpoint, Result, RpcError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::instance::ServiceInstance;
use crate::naming::NamingRegistry;

/// Metadata key under which backends advertise their RPC port.
pub const DEFAULT_ENDPOINT_METADATA_KEY: &str = "gRPC_port";

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Exact, case-sensitive metadata key holding the RPC port.
    pub endpoint_metadata_key: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint_metadata_key: DEFAULT_ENDPOINT_METADATA_KEY.to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn with_endpoint_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.endpoint_metadata_key = key.into();
        self
    }
}

/// Picks one healthy instance per resolution, uniformly at random.
///
/// No selection state is shared between resolutions, so several processes
/// resolving the same service spread their load without coordinating.
pub struct ServiceResolver {
    registry: Arc<dyn NamingRegistry>,
    config: ResolverConfig,
    rng: Mutex<StdRng>,
}

impl ServiceResolver {
    pub fn new(registry: Arc<dyn NamingRegistry>, config: ResolverConfig) -> Self {
        Self::with_rng(registry, config, StdRng::from_entropy())
    }

    /// Uses a fixed seed so a sequence of picks is reproducible.
    pub fn with_seed(registry: Arc<dyn NamingRegistry>, config: ResolverConfig, seed: u64) -> Self {
        Self::with_rng(registry, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(registry: Arc<dyn NamingRegistry>, config: ResolverConfig, rng: StdRng) -> Self {
        Self {
            registry,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Fetches the healthy instances of `service` in `group` and picks one.
    ///
    /// Fails with `NoHealthyInstance` when the registry reports none and with
    /// an endpoint-metadata error when the picked instance does not advertise
    /// a usable RPC port.
    pub async fn resolve(&self, service: &str, group: &str) -> Result<ServiceInstance> {
        let mut instances = self.registry.list_healthy_instances(service, group).await?;
        if instances.is_empty() {
            return Err(RpcError::NoHealthyInstance {
                service: service.to_string(),
                group: group.to_string(),
            });
        }

        let index = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            rng.gen_range(0..instances.len())
        };
        let instance = instances.swap_remove(index);
        self.rpc_port(&instance)?;

        debug!(
            service = %service,
            group = %group,
            instance = %format!("{}:{}", instance.host, instance.port),
            "Selected instance"
        );
        Ok(instance)
    }

    /// Like [`ServiceResolver::resolve`], returning the instance's RPC
    /// endpoint rather than its registered address.
    pub async fn resolve_endpoint(&self, service: &str, group: &str) -> Result<Endpoint> {
        let instance = self.resolve(service, group).await?;
        let port = self.rpc_port(&instance)?;
        Ok(Endpoint::new(instance.host, port))
    }

    /// Reads the RPC port from `instance`'s metadata. The registered
    /// application port is never used in its place.
    pub fn rpc_port(&self, instance: &ServiceInstance) -> Result<u16> {
        let key = &self.config.endpoint_metadata_key;
        let raw = instance
            .metadata
            .get(key)
            .ok_or_else(|| RpcError::MissingEndpointMetadata {
                host: instance.host.clone(),
                port: instance.port,
                key: key.clone(),
            })?;

        raw.trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| RpcError::InvalidEndpointMetadata {
                host: instance.host.clone(),
                port: instance.port,
                key: key.clone(),
                value: raw.clone(),
            })
    }
}
