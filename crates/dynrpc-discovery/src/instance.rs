use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One instance of a named service as reported by the naming registry.
///
/// `port` is the application port the instance registered with. The RPC
/// listener is usually elsewhere and is advertised in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    #[serde(rename = "ip")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl ServiceInstance {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            metadata: BTreeMap::new(),
            healthy: true,
            enabled: true,
            weight: default_weight(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
}

/// What a service announces about itself when registering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRegistration {
    pub service: String,
    pub group: String,
    pub host: String,
    pub port: u16,
    pub metadata: BTreeMap<String, String>,
}

impl InstanceRegistration {
    pub fn new(service: impl Into<String>, group: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            group: group.into(),
            host: host.into(),
            port,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn to_instance(&self) -> ServiceInstance {
        ServiceInstance {
            metadata: self.metadata.clone(),
            ..ServiceInstance::new(&self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_nacos_host() {
        let instance: ServiceInstance = serde_json::from_value(json!({
            "instanceId": "10.0.0.5#8080#DEFAULT#SERVICE_GROUP@@lersosa-service-grpc",
            "ip": "10.0.0.5",
            "port": 8080,
            "weight": 1.0,
            "healthy": true,
            "enabled": true,
            "ephemeral": true,
            "metadata": {"gRPC_port": "9090", "preserved.register.source": "SPRING_CLOUD"}
        }))
        .unwrap();

        assert_eq!(instance.host, "10.0.0.5");
        assert_eq!(instance.port, 8080);
        assert_eq!(instance.metadata["gRPC_port"], "9090");
    }

    #[test]
    fn test_deserialize_defaults() {
        let instance: ServiceInstance = serde_json::from_value(json!({"ip": "h", "port": 1})).unwrap();
        assert!(instance.metadata.is_empty());
        assert!(instance.healthy);
        assert_eq!(instance.weight, 1.0);
    }

    #[test]
    fn test_registration_to_instance() {
        let registration = InstanceRegistration::new("svc", "SERVICE_GROUP", "10.0.0.1", 8000)
            .with_metadata("gRPC_port", "6001");
        let instance = registration.to_instance();
        assert_eq!(instance.host, "10.0.0.1");
        assert_eq!(instance.metadata["gRPC_port"], "6001");
    }
}
