//! dynrpc Service Discovery
//!
//! Finds backend RPC endpoints through a naming registry:
//!
//! - **Naming**: the [`NamingRegistry`] trait, an in-memory
//!   [`StaticNamingRegistry`] and a Nacos HTTP client ([`NacosNamingClient`])
//! - **Resolution**: [`ServiceResolver`] picks a healthy instance uniformly at
//!   random and reads its RPC port from instance metadata
//! - **Lifecycle**: [`RegistrationLifecycle`] registers the local service and
//!   keeps it alive with periodic heartbeats
//!
//! # Example
//!
//! ```no_run
//! use dynrpc_discovery::{NacosConfig, NacosNamingClient, ResolverConfig, ServiceResolver};
//! use std::sync::Arc;
//!
//! # async fn run() -> dynrpc_common::Result<()> {
//! let registry = Arc::new(NacosNamingClient::new(NacosConfig::from_env())?);
//! let resolver = ServiceResolver::new(registry, ResolverConfig::default());
//! let endpoint = resolver.resolve_endpoint("lersosa-service-grpc", "SERVICE_GROUP").await?;
//! println!("calling {}", endpoint);
//! # Ok(())
//! # }
//! ```

pub mod instance;
pub mod lifecycle;
pub mod nacos;
pub mod naming;
pub mod resolver;

pub use instance::{InstanceRegistration, ServiceInstance};
pub use lifecycle::{RegistrationConfig, RegistrationLifecycle};
pub use nacos::{NacosConfig, NacosNamingClient};
pub use naming::{NamingRegistry, StaticNamingRegistry};
pub use resolver::{ResolverConfig, ServiceResolver, DEFAULT_ENDPOINT_METADATA_KEY};
