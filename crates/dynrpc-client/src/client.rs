use dynrpc_common::{Endpoint, Payload, Result, RpcError, Transport, TypedMessage};
use dynrpc_discovery::{NamingRegistry, ServiceResolver};
use dynrpc_schema::{MethodEntry, SchemaIndex};
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::breaker::{BreakerRegistry, BreakerSnapshot, CircuitState, Fallback, OperationKey};
use crate::builder::RequestBuilder;
use crate::config::RpcClientConfig;
use crate::upload::{chunk_stream, ChunkLayout, DrainTracker, FileUpload};

/// Fallback that turns every failure it receives into `ServiceUnavailable`.
pub fn service_unavailable_fallback() -> Fallback<TypedMessage> {
    Arc::new(|key, err| {
        Err(RpcError::ServiceUnavailable(format!(
            "{} is temporarily unavailable: {}",
            key, err
        )))
    })
}

/// Calls methods of one backend service by name.
///
/// A call goes through: method lookup in the schema, endpoint resolution,
/// request building, then the transport. Everything after lookup runs under
/// the method's circuit breaker, so lookup errors (unknown or ambiguous
/// method) reach the caller directly and never trip a breaker.
///
/// The resolved endpoint is cached and shared by all calls until a breaker
/// opens or [`RpcClient::reresolve`] is called. The client does not retry.
pub struct RpcClient {
    config: RpcClientConfig,
    schema: RwLock<Arc<SchemaIndex>>,
    resolver: ServiceResolver,
    transport: Arc<dyn Transport>,
    breakers: BreakerRegistry,
    fallback: Option<Fallback<TypedMessage>>,
    endpoint: Mutex<Option<Endpoint>>,
}

impl RpcClient {
    /// Creates a client, loading the schema from `config.idl_root`.
    pub fn new(
        config: RpcClientConfig,
        registry: Arc<dyn NamingRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let schema = SchemaIndex::load(&config.idl_root)?;
        Ok(Self::with_schema(config, schema, registry, transport))
    }

    /// Creates a client around an already loaded schema.
    pub fn with_schema(
        config: RpcClientConfig,
        schema: SchemaIndex,
        registry: Arc<dyn NamingRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let resolver = ServiceResolver::new(registry, config.resolver.clone());
        let breakers = BreakerRegistry::new(config.breaker.clone());
        Self {
            config,
            schema: RwLock::new(Arc::new(schema)),
            resolver,
            transport,
            breakers,
            fallback: None,
            endpoint: Mutex::new(None),
        }
    }

    /// Routes counted failures and open-circuit rejections to `fallback`.
    pub fn with_fallback(mut self, fallback: Fallback<TypedMessage>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// The schema currently in use.
    pub fn schema(&self) -> Arc<SchemaIndex> {
        let schema = self.schema.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&schema)
    }

    /// Loads the IDL tree again and swaps the new index in. Calls already
    /// in flight finish against the index they started with.
    pub fn reload_schema(&self) -> Result<()> {
        let fresh = self.schema().reload()?;
        info!(
            root = %fresh.root().display(),
            services = fresh.services().count(),
            errors = fresh.errors().len(),
            "Schema reloaded"
        );
        let mut schema = self.schema.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *schema = Arc::new(fresh);
        Ok(())
    }

    /// Resolves `method` against the current schema. Accepts a bare method
    /// name or `Service/Method` to pick one of several same-named methods;
    /// the service may be package-qualified.
    pub fn lookup(&self, method: &str) -> Result<MethodEntry> {
        let schema = self.schema();
        match method.split_once('/') {
            Some((service, method)) => schema.lookup_qualified(service, method),
            None => schema.lookup(method),
        }
    }

    /// Calls a unary method. `payload` is bound onto the request type by
    /// [`RequestBuilder`].
    pub async fn invoke(&self, method: &str, payload: impl Into<Payload>) -> Result<TypedMessage> {
        let entry = self.lookup(method)?;
        if entry.is_client_streaming() {
            return Err(RpcError::InvalidRequest(format!(
                "method '{}' is client-streaming; use invoke_stream or upload",
                entry.method.name
            )));
        }

        let payload = payload.into();
        let remote = entry.remote_method();
        let key = OperationKey::new(&remote.service, &remote.method);
        let (entry, remote) = (&entry, &remote);

        self.guarded(&key, || async move {
            let endpoint = self.endpoint().await?;
            let request = RequestBuilder::new(&entry.request).build(&payload);
            debug!(method = %remote.path(), endpoint = %endpoint, "Invoking unary method");
            self.transport.call_unary(&endpoint, &remote, request).await
        })
        .await
    }

    /// Calls a client-streaming method, building one request per payload.
    /// The call succeeds only if the transport consumed every payload.
    pub async fn invoke_stream<S>(&self, method: &str, payloads: S) -> Result<TypedMessage>
    where
        S: Stream<Item = Payload> + Send + 'static,
    {
        let entry = self.client_streaming(method)?;
        let remote = entry.remote_method();
        let key = OperationKey::new(&remote.service, &remote.method);
        let descriptor = entry.request;

        self.guarded(&key, || async move {
            let endpoint = self.endpoint().await?;
            let tracker = DrainTracker::new();
            let requests = payloads
                .map(move |payload| RequestBuilder::new(&descriptor).build(&payload))
                .boxed();
            debug!(method = %remote.path(), endpoint = %endpoint, "Invoking client-streaming method");
            let response = self
                .transport
                .call_client_stream(&endpoint, &remote, tracker.track(requests))
                .await;
            tracker.finish(response)
        })
        .await
    }

    /// Streams `upload` to a client-streaming method in chunks of
    /// `config.chunk_size` bytes, each chunk tagged with the file's name and
    /// content type.
    pub async fn upload(&self, method: &str, upload: FileUpload) -> Result<TypedMessage> {
        let entry = self.client_streaming(method)?;
        let layout = ChunkLayout::for_request(&entry.request, &self.schema(), &entry.file)?;
        let remote = entry.remote_method();
        let key = OperationKey::new(&remote.service, &remote.method);
        let chunk_size = self.config.chunk_size;

        self.guarded(&key, || async move {
            let endpoint = self.endpoint().await?;
            let tracker = DrainTracker::new();
            info!(
                method = %remote.path(),
                endpoint = %endpoint,
                file = %upload.name,
                "Uploading file"
            );
            let chunks = chunk_stream(upload, layout, chunk_size, Arc::clone(&tracker));
            let response = self
                .transport
                .call_client_stream(&endpoint, &remote, tracker.track(chunks))
                .await;
            tracker.finish(response)
        })
        .await
    }

    /// Drops the cached endpoint and resolves a new one.
    pub async fn reresolve(&self) -> Result<Endpoint> {
        self.invalidate_endpoint().await;
        self.endpoint().await
    }

    /// States of every breaker used so far.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    fn client_streaming(&self, method: &str) -> Result<MethodEntry> {
        let entry = self.lookup(method)?;
        if !entry.is_client_streaming() {
            return Err(RpcError::InvalidRequest(format!(
                "method '{}' is unary; use invoke",
                entry.method.name
            )));
        }
        Ok(entry)
    }

    async fn guarded<F, Fut>(&self, key: &OperationKey, operation: F) -> Result<TypedMessage>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TypedMessage>>,
    {
        let breaker = self.breakers.breaker(key);
        let result = breaker.guard(operation, self.fallback.as_ref()).await;
        if breaker.state() == CircuitState::Open {
            self.invalidate_endpoint().await;
        }
        result
    }

    async fn endpoint(&self) -> Result<Endpoint> {
        let mut cached = self.endpoint.lock().await;
        if let Some(endpoint) = cached.as_ref() {
            return Ok(endpoint.clone());
        }

        let endpoint = self
            .resolver
            .resolve_endpoint(&self.config.service, &self.config.group)
            .await?;
        info!(
            service = %self.config.service,
            group = %self.config.group,
            endpoint = %endpoint,
            "Resolved backend endpoint"
        );
        *cached = Some(endpoint.clone());
        Ok(endpoint)
    }

    async fn invalidate_endpoint(&self) {
        if let Some(endpoint) = self.endpoint.lock().await.take() {
            info!(service = %self.config.service, endpoint = %endpoint, "Dropped cached endpoint");
        }
    }
}
