//! Naming registry contract and an in-memory implementation.

use async_trait::async_trait;
use dynrpc_common::{Result, RpcError};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::instance::{InstanceRegistration, ServiceInstance};

/// Client side of a service-discovery registry.
///
/// Only the query/register/heartbeat surface is modelled; the registry
/// server itself is external.
#[async_trait]
pub trait NamingRegistry: Send + Sync {
    /// Instances of `service` in `group` that the registry currently
    /// considers healthy.
    async fn list_healthy_instances(&self, service: &str, group: &str) -> Result<Vec<ServiceInstance>>;

    async fn register_instance(&self, registration: &InstanceRegistration) -> Result<()>;

    async fn send_heartbeat(&self, registration: &InstanceRegistration) -> Result<()>;

    async fn deregister_instance(&self, registration: &InstanceRegistration) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    instance: ServiceInstance,
    heartbeats: u64,
}

type GroupKey = (String, String);

/// Registry held entirely in memory.
///
/// Used for fixed deployments where the backend addresses are known up front
/// and in tests. Registrations made through the [`NamingRegistry`] methods
/// are visible to subsequent queries.
#[derive(Debug, Default)]
pub struct StaticNamingRegistry {
    groups: RwLock<HashMap<GroupKey, Vec<Entry>>>,
}

impl StaticNamingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every instance of `service` in `group`.
    pub async fn set_instances(&self, service: &str, group: &str, instances: Vec<ServiceInstance>) {
        let entries = instances
            .into_iter()
            .map(|instance| Entry {
                instance,
                heartbeats: 0,
            })
            .collect();
        self.groups
            .write()
            .await
            .insert((service.to_string(), group.to_string()), entries);
    }

    /// Marks the instance at `host:port` healthy or unhealthy.
    pub async fn set_healthy(&self, service: &str, group: &str, host: &str, port: u16, healthy: bool) -> bool {
        let mut groups = self.groups.write().await;
        let Some(entries) = groups.get_mut(&(service.to_string(), group.to_string())) else {
            return false;
        };
        match entries
            .iter_mut()
            .find(|e| e.instance.host == host && e.instance.port == port)
        {
            Some(entry) => {
                entry.instance.healthy = healthy;
                true
            }
            None => false,
        }
    }

    /// Heartbeats received for a registered instance.
    pub async fn heartbeat_count(&self, registration: &InstanceRegistration) -> Option<u64> {
        let groups = self.groups.read().await;
        groups
            .get(&key(registration))?
            .iter()
            .find(|e| matches(e, registration))
            .map(|e| e.heartbeats)
    }

    pub async fn instance_count(&self, service: &str, group: &str) -> usize {
        self.groups
            .read()
            .await
            .get(&(service.to_string(), group.to_string()))
            .map_or(0, Vec::len)
    }
}

fn key(registration: &InstanceRegistration) -> GroupKey {
    (registration.service.clone(), registration.group.clone())
}

fn matches(entry: &Entry, registration: &InstanceRegistration) -> bool {
    entry.instance.host == registration.host && entry.instance.port == registration.port
}

#[async_trait]
impl NamingRegistry for StaticNamingRegistry {
    async fn list_healthy_instances(&self, service: &str, group: &str) -> Result<Vec<ServiceInstance>> {
        let groups = self.groups.read().await;
        Ok(groups
            .get(&(service.to_string(), group.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.instance.healthy && e.instance.enabled)
                    .map(|e| e.instance.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn register_instance(&self, registration: &InstanceRegistration) -> Result<()> {
        let mut groups = self.groups.write().await;
        let entries = groups.entry(key(registration)).or_default();
        entries.retain(|e| !matches(e, registration));
        entries.push(Entry {
            instance: registration.to_instance(),
            heartbeats: 0,
        });
        Ok(())
    }

    async fn send_heartbeat(&self, registration: &InstanceRegistration) -> Result<()> {
        let mut groups = self.groups.write().await;
        let entry = groups
            .get_mut(&key(registration))
            .and_then(|entries| entries.iter_mut().find(|e| matches(e, registration)))
            .ok_or_else(|| {
                RpcError::Registry(format!(
                    "heartbeat for unregistered instance {}:{} of '{}'",
                    registration.host, registration.port, registration.service
                ))
            })?;
        entry.heartbeats += 1;
        Ok(())
    }

    async fn deregister_instance(&self, registration: &InstanceRegistration) -> Result<()> {
        let mut groups = self.groups.write().await;
        if let Some(entries) = groups.get_mut(&key(registration)) {
            entries.retain(|e| !matches(e, registration));
        }
        Ok(())
    }
}
