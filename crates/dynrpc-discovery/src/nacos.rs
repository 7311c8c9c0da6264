//! Nacos Naming Client
//!
//! Speaks the Nacos v1 open API over plain HTTP:
//!
//! - `GET    /nacos/v1/ns/instance/list` (healthy instances only)
//! - `POST   /nacos/v1/ns/instance` (register)
//! - `PUT    /nacos/v1/ns/instance/beat` (heartbeat)
//! - `DELETE /nacos/v1/ns/instance` (deregister)
//!
//! When credentials are configured, `POST /nacos/v1/auth/login` is called
//! first and the returned access token is attached to every request until it
//! nears expiry.

use async_trait::async_trait;
use bytes::Bytes;
use dynrpc_common::{env, Result, RpcError};
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::instance::{InstanceRegistration, ServiceInstance};
use crate::naming::NamingRegistry;

const LIST_PATH: &str = "/nacos/v1/ns/instance/list";
const INSTANCE_PATH: &str = "/nacos/v1/ns/instance";
const BEAT_PATH: &str = "/nacos/v1/ns/instance/beat";
const LOGIN_PATH: &str = "/nacos/v1/auth/login";

/// Nacos connection settings.
#[derive(Debug, Clone)]
pub struct NacosConfig {
    /// `host:port` of the Nacos server, optionally with an `http://` scheme.
    /// With a comma-separated list the first address is used.
    pub server_addr: String,
    /// Namespace id; `None` targets the public namespace.
    pub namespace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upper bound on each HTTP exchange with the server.
    pub request_timeout: Duration,
}

impl Default for NacosConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8848".to_string(),
            namespace: None,
            username: None,
            password: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl NacosConfig {
    /// Reads `NACOS_SERVER_ADDR`, `NACOS_NAMESPACE`, `NACOS_USERNAME` and
    /// `NACOS_PASSWORD`, keeping the default for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_addr: env::var("NACOS_SERVER_ADDR").unwrap_or(defaults.server_addr),
            namespace: env::var("NACOS_NAMESPACE"),
            username: env::var("NACOS_USERNAME"),
            password: env::var("NACOS_PASSWORD"),
            request_timeout: defaults.request_timeout,
        }
    }

    pub fn with_server_addr(mut self, server_addr: impl Into<String>) -> Self {
        self.server_addr = server_addr.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn base_url(&self) -> Result<Url> {
        let first = self.server_addr.split(',').next().unwrap_or_default().trim();
        let with_scheme = if first.starts_with("http://") || first.starts_with("https://") {
            first.to_string()
        } else {
            format!("http://{}", first)
        };
        Url::parse(&with_scheme)
            .map_err(|e| RpcError::Registry(format!("invalid Nacos server address '{}': {}", self.server_addr, e)))
    }
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(default)]
    hosts: Vec<ServiceInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReply {
    access_token: String,
    /// Seconds.
    #[serde(default = "default_token_ttl")]
    token_ttl: u64,
}

/// Nacos' own default token lifetime, used when the reply omits `tokenTtl`.
fn default_token_ttl() -> u64 {
    18000
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// [`NamingRegistry`] backed by a Nacos server.
pub struct NacosNamingClient {
    client: Client<HttpConnector, Full<Bytes>>,
    config: NacosConfig,
    base_url: Url,
    token: Mutex<Option<AccessToken>>,
}

impl NacosNamingClient {
    pub fn new(config: NacosConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        info!(server = %base_url, namespace = ?config.namespace, "Nacos naming client created");
        Ok(Self {
            client,
            config,
            base_url,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NacosConfig {
        &self.config
    }

    /// Current access token, logging in again when none is cached or the
    /// cached one is close to expiry. `None` without credentials.
    async fn access_token(&self) -> Result<Option<String>> {
        let (Some(username), Some(password)) = (&self.config.username, &self.config.password) else {
            return Ok(None);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(Some(token.value.clone()));
        }

        let url = self.url(LOGIN_PATH, &[])?;
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("username", username)
            .append_pair("password", password)
            .finish();
        let body = self
            .exchange(Method::POST, url, Some(("application/x-www-form-urlencoded", form)))
            .await?;
        let reply: LoginReply = serde_json::from_slice(&body)
            .map_err(|e| RpcError::Registry(format!("unexpected Nacos login reply: {}", e)))?;

        // Refresh a little ahead of the advertised expiry.
        let ttl = Duration::from_secs(reply.token_ttl);
        let token = AccessToken {
            value: reply.access_token,
            refresh_at: Instant::now() + ttl.saturating_sub(ttl / 10),
        };
        debug!(ttl_secs = reply.token_ttl, "Nacos login succeeded");
        let value = token.value.clone();
        *cached = Some(token);
        Ok(Some(value))
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| RpcError::Registry(format!("invalid Nacos path '{}': {}", path, e)))?;
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Sends an authenticated naming request with `params` in the query.
    async fn request(&self, method: Method, path: &str, mut params: Vec<(&str, String)>) -> Result<Bytes> {
        if let Some(namespace) = &self.config.namespace {
            params.push(("namespaceId", namespace.clone()));
        }
        if let Some(token) = self.access_token().await? {
            params.push(("accessToken", token));
        }
        let url = self.url(path, &params)?;
        self.exchange(method, url, None).await
    }

    async fn exchange(&self, method: Method, url: Url, form: Option<(&str, String)>) -> Result<Bytes> {
        let (content_type, body) = form.unwrap_or(("application/json", String::new()));
        let request = Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RpcError::Registry(format!("failed to build Nacos request: {}", e)))?;

        let timeout = self.config.request_timeout;
        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| RpcError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| RpcError::Registry(format!("{} {} failed: {}", method, url.path(), e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RpcError::Registry(format!("failed to read Nacos response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(RpcError::Registry(format!(
                "{} {} returned {}: {}",
                method,
                url.path(),
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(body)
    }

    fn instance_params(registration: &InstanceRegistration) -> Vec<(&'static str, String)> {
        vec![
            ("serviceName", registration.service.clone()),
            ("groupName", registration.group.clone()),
            ("ip", registration.host.clone()),
            ("port", registration.port.to_string()),
            ("ephemeral", "true".to_string()),
        ]
    }
}

#[async_trait]
impl NamingRegistry for NacosNamingClient {
    async fn list_healthy_instances(&self, service: &str, group: &str) -> Result<Vec<ServiceInstance>> {
        let body = self
            .request(
                Method::GET,
                LIST_PATH,
                vec![
                    ("serviceName", service.to_string()),
                    ("groupName", group.to_string()),
                    ("healthyOnly", "true".to_string()),
                ],
            )
            .await?;
        let list: InstanceList = serde_json::from_slice(&body)
            .map_err(|e| RpcError::Registry(format!("unexpected Nacos instance list: {}", e)))?;
        debug!(service = %service, group = %group, count = list.hosts.len(), "Listed instances");
        Ok(list.hosts.into_iter().filter(|h| h.healthy && h.enabled).collect())
    }

    async fn register_instance(&self, registration: &InstanceRegistration) -> Result<()> {
        let mut params = Self::instance_params(registration);
        params.push(("healthy", "true".to_string()));
        params.push(("enabled", "true".to_string()));
        params.push(("weight", "1.0".to_string()));
        if !registration.metadata.is_empty() {
            params.push(("metadata", serde_json::to_string(&registration.metadata)?));
        }
        self.request(Method::POST, INSTANCE_PATH, params).await?;
        info!(
            service = %registration.service,
            group = %registration.group,
            addr = %format!("{}:{}", registration.host, registration.port),
            "Registered instance"
        );
        Ok(())
    }

    async fn send_heartbeat(&self, registration: &InstanceRegistration) -> Result<()> {
        let beat = serde_json::json!({
            "serviceName": registration.service,
            "ip": registration.host,
            "port": registration.port,
            "cluster": "DEFAULT",
            "metadata": registration.metadata,
            "scheduled": true,
        });
        let mut params = Self::instance_params(registration);
        params.push(("beat", beat.to_string()));
        self.request(Method::PUT, BEAT_PATH, params).await?;
        Ok(())
    }

    async fn deregister_instance(&self, registration: &InstanceRegistration) -> Result<()> {
        self.request(Method::DELETE, INSTANCE_PATH, Self::instance_params(registration))
            .await?;
        info!(
            service = %registration.service,
            group = %registration.group,
            addr = %format!("{}:{}", registration.host, registration.port),
            "Deregistered instance"
        );
        Ok(())
    }
}
