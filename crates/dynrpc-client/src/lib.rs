//! dynrpc Client
//!
//! Calls methods of a discovered backend by name, using the IDL tree to
//! decide what each request looks like:
//!
//! - **Client**: [`RpcClient`] ties together the schema index, endpoint
//!   resolution, request building and the transport
//! - **Request Building**: [`RequestBuilder`] binds a loosely typed payload
//!   onto one field of the method's request type
//! - **Circuit Breaking**: one [`CircuitBreaker`] per remote method, created
//!   lazily by the [`BreakerRegistry`]
//! - **Uploads**: [`FileUpload`] sources are chunked into client-streaming
//!   requests
//!
//! # Example
//!
//! ```no_run
//! use dynrpc_client::{service_unavailable_fallback, RpcClient, RpcClientConfig};
//! use dynrpc_common::HttpTransport;
//! use dynrpc_discovery::{NacosConfig, NacosNamingClient};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> dynrpc_common::Result<()> {
//! let registry = Arc::new(NacosNamingClient::new(NacosConfig::from_env())?);
//! let transport = Arc::new(HttpTransport::new());
//! let client = RpcClient::new(RpcClientConfig::from_env()?, registry, transport)?
//!     .with_fallback(service_unavailable_fallback());
//!
//! let reply = client.invoke("Predict", json!({"fileUrl": "http://x/y.png"})).await?;
//! println!("{}", reply.to_json());
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod builder;
pub mod client;
pub mod config;
pub mod upload;

pub use breaker::{
    BreakerConfig, BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitState, Fallback, OperationKey,
};
pub use builder::{FieldBinding, MatchTier, RequestBuilder, BINARY_FIELD_NAMES};
pub use client::{service_unavailable_fallback, RpcClient};
pub use config::RpcClientConfig;
pub use upload::{ChunkLayout, FileUpload, DEFAULT_CHUNK_SIZE};
