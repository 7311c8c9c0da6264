//! HTTP Transport Adapter
//!
//! Carries typed messages over HTTP/1.1 using a single long-lived hyper
//! client, so connections to an endpoint are opened once and kept alive
//! across calls.
//!
//! - Unary calls POST a JSON-RPC 2.0 envelope to `http://host:port/`, with
//!   `method` set to `Service/Method` and `params` to the request message.
//! - Client-streaming calls POST to `http://host:port/Service/Method` with an
//!   `application/x-ndjson` body, one message per line, streamed as the
//!   sequence yields. The server answers with a JSON-RPC response envelope.

use async_trait::async_trait;
use futures::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::time::Duration;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Endpoint, JsonRpcRequest, JsonRpcResponse, RemoteMethod, TypedMessage};
use crate::transport::{MessageStream, Transport};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Upper bound on waiting for response headers. `None` leaves the call
    /// unbounded.
    pub request_timeout: Option<Duration>,
    /// How long an idle pooled connection is kept open.
    pub pool_idle_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

pub struct HttpTransport {
    client: Client<HttpConnector, RequestBody>,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_config(HttpTransportConfig::default())
    }

    pub fn with_config(config: HttpTransportConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .build_http();
        Self { client, config }
    }

    fn build_request(uri: String, content_type: &str, body: RequestBody) -> Result<Request<RequestBody>> {
        Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .map_err(|e| RpcError::Transport(format!("Failed to build request for {}: {}", uri, e)))
    }

    async fn send(&self, request: Request<RequestBody>, response_type: &str) -> Result<TypedMessage> {
        let uri = request.uri().to_string();
        let pending = self.client.request(request);
        let response = match self.config.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| RpcError::Timeout(timeout.as_millis() as u64))?,
            None => pending.await,
        }
        .map_err(|e| RpcError::Transport(format!("HTTP request to {} failed: {}", uri, e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to read response from {}: {}", uri, e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(RpcError::Transport(format!(
                "HTTP {} from {}: {}",
                status,
                uri,
                String::from_utf8_lossy(&body)
            )));
        }

        let envelope: JsonRpcResponse = serde_json::from_slice(&body)?;
        TypedMessage::from_json(response_type, envelope.into_result()?)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn full_body(bytes: Vec<u8>) -> RequestBody {
    Full::new(Bytes::from(bytes))
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

fn ndjson_body(requests: MessageStream) -> RequestBody {
    let frames = requests.map(|message| {
        serde_json::to_vec(&message)
            .map(|mut line| {
                line.push(b'\n');
                Frame::data(Bytes::from(line))
            })
            .map_err(|e| Box::new(e) as BoxError)
    });
    StreamBody::new(frames).boxed_unsync()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call_unary(
        &self,
        endpoint: &Endpoint,
        method: &RemoteMethod,
        request: TypedMessage,
    ) -> Result<TypedMessage> {
        let envelope = JsonRpcRequest::new(method.path(), request.to_json());
        let body = serde_json::to_vec(&envelope)?;
        let request = Self::build_request(
            format!("http://{}/", endpoint.authority()),
            "application/json",
            full_body(body),
        )?;

        tracing::debug!(endpoint = %endpoint, method = %method.path(), "sending unary call");
        self.send(request, &method.response_type).await
    }

    async fn call_client_stream(
        &self,
        endpoint: &Endpoint,
        method: &RemoteMethod,
        requests: MessageStream,
    ) -> Result<TypedMessage> {
        let request = Self::build_request(
            format!("http://{}/{}", endpoint.authority(), method.path()),
            "application/x-ndjson",
            ndjson_body(requests),
        )?;

        tracing::debug!(endpoint = %endpoint, method = %method.path(), "sending client stream");
        self.send(request, &method.response_type).await
    }
}
