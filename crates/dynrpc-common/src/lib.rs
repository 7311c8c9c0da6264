//! dynrpc Common Types and Transport
//!
//! Shared building blocks for the dynrpc crates:
//!
//! - **Protocol Layer**: the error taxonomy ([`RpcError`], [`ErrorKind`]),
//!   dynamically typed messages ([`TypedMessage`], [`FieldValue`]), call-site
//!   payloads ([`Payload`]) and endpoint identity ([`Endpoint`], [`RemoteMethod`])
//! - **Transport Layer**: the [`Transport`] trait for unary and
//!   client-streaming calls, plus an HTTP adapter built on hyper
//! - **Environment**: small helpers shared by the `from_env` constructors
//!
//! # Example
//!
//! ```
//! use dynrpc_common::{Payload, TypedMessage};
//! use serde_json::json;
//!
//! let payload = Payload::from(json!({"file_url": "http://x/y.png"}));
//! let request = TypedMessage::new("PredictRequest").with_field("file_url", "http://x/y.png");
//! assert_eq!(request.to_json(), json!({"file_url": "http://x/y.png"}));
//! # let _ = payload;
//! ```

pub mod env;
pub mod protocol;
pub mod transport;

pub use protocol::*;
pub use transport::{HttpTransport, HttpTransportConfig, MessageStream, Transport};
