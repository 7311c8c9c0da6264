//! Transport Layer
//!
//! The RPC layer does not define a wire encoding. It talks to backends through
//! the [`Transport`] trait, which covers the two call shapes the client needs:
//!
//! - **Unary**: one typed request, one typed response
//! - **Client-streaming**: a finite sequence of typed requests, one aggregated response
//!
//! [`HttpTransport`] is the bundled adapter (JSON-RPC / NDJSON over HTTP via
//! hyper). Other transports plug in by implementing the trait.

pub mod http;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::protocol::error::Result;
use crate::protocol::{Endpoint, RemoteMethod, TypedMessage};

pub use http::{HttpTransport, HttpTransportConfig};

/// Lazy, finite, non-restartable sequence of request messages.
pub type MessageStream = BoxStream<'static, TypedMessage>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a unary call against `endpoint`.
    async fn call_unary(
        &self,
        endpoint: &Endpoint,
        method: &RemoteMethod,
        request: TypedMessage,
    ) -> Result<TypedMessage>;

    /// Issues a client-streaming call, consuming `requests` until it is
    /// exhausted, and returns the single aggregated response.
    async fn call_client_stream(
        &self,
        endpoint: &Endpoint,
        method: &RemoteMethod,
        requests: MessageStream,
    ) -> Result<TypedMessage>;
}
