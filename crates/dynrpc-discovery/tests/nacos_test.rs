//! Nacos Naming Client Integration Tests
//!
//! These tests run a fake Nacos server on a random loopback port and verify
//! that:
//! - instance queries, registration, heartbeats and deregistration hit the
//!   v1 open API with the expected parameters
//! - login happens once and the token is reused on later requests
//! - non-2xx replies surface as registry errors

use bytes::Bytes;
use dynrpc_common::RpcError;
use dynrpc_discovery::{
    InstanceRegistration, NacosConfig, NacosNamingClient, NamingRegistry, ResolverConfig, ServiceResolver,
};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    query: HashMap<String, String>,
}

/// Fake Nacos server that records every request it receives.
struct FakeNacos {
    addr: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeNacos {
    async fn new() -> Self {
        Self::with_login_reply(json!({"accessToken": "token-1", "tokenTtl": 18000, "globalAdmin": true})).await
    }

    async fn with_login_reply(login_reply: serde_json::Value) -> Self {
        let login_reply = Arc::new(login_reply.to_string());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };
                        let recorded = recorded.clone();
                        let login_reply = login_reply.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                Self::handle(req, recorded.clone(), login_reply.clone())
                            });
                            let _ = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await;
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr: addr.to_string(),
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    async fn handle(
        req: Request<Incoming>,
        recorded: Arc<Mutex<Vec<Recorded>>>,
        login_reply: Arc<String>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let query: HashMap<String, String> = url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
            .into_owned()
            .collect();
        let entry = Recorded {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            query: query.clone(),
        };
        recorded.lock().unwrap().push(entry.clone());

        let (status, body) = match (entry.method.as_str(), entry.path.as_str()) {
            ("POST", "/nacos/v1/auth/login") => (StatusCode::OK, login_reply.to_string()),
            ("GET", "/nacos/v1/ns/instance/list") if query.get("serviceName").map(String::as_str) == Some("down") => {
                (StatusCode::SERVICE_UNAVAILABLE, "server is down".to_string())
            }
            ("GET", "/nacos/v1/ns/instance/list") => (
                StatusCode::OK,
                json!({
                    "name": format!("{}@@{}", query["groupName"], query["serviceName"]),
                    "hosts": [
                        {"ip": "10.0.0.5", "port": 8080, "healthy": true, "enabled": true,
                         "metadata": {"gRPC_port": "9090"}},
                        {"ip": "10.0.0.6", "port": 8080, "healthy": true, "enabled": false,
                         "metadata": {"gRPC_port": "9090"}}
                    ]
                })
                .to_string(),
            ),
            ("PUT", "/nacos/v1/ns/instance/beat") => {
                (StatusCode::OK, json!({"clientBeatInterval": 5000, "code": 10200}).to_string())
            }
            ("POST", "/nacos/v1/ns/instance") | ("DELETE", "/nacos/v1/ns/instance") => {
                (StatusCode::OK, "ok".to_string())
            }
            _ => (StatusCode::NOT_FOUND, "no such endpoint".to_string()),
        };

        Ok(Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(body)))
            .unwrap())
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeNacos {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn registration() -> InstanceRegistration {
    InstanceRegistration::new("lersosa-service-python", "SERVICE_GROUP", "10.0.0.9", 8000)
        .with_metadata("gRPC_port", "6001")
}

#[tokio::test]
async fn test_list_healthy_instances() {
    let server = FakeNacos::new().await;
    let client = NacosNamingClient::new(NacosConfig::default().with_server_addr(&server.addr)).unwrap();

    let instances = client
        .list_healthy_instances("lersosa-service-grpc", "SERVICE_GROUP")
        .await
        .unwrap();

    // Disabled instances are filtered out even when reported healthy.
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].host, "10.0.0.5");
    assert_eq!(instances[0].metadata["gRPC_port"], "9090");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].query["serviceName"], "lersosa-service-grpc");
    assert_eq!(requests[0].query["groupName"], "SERVICE_GROUP");
    assert_eq!(requests[0].query["healthyOnly"], "true");
    assert!(!requests[0].query.contains_key("accessToken"));
}

#[tokio::test]
async fn test_login_token_cached_and_namespace_sent() {
    let server = FakeNacos::new().await;
    let config = NacosConfig::default()
        .with_server_addr(format!("http://{}", server.addr))
        .with_namespace("dev-ns")
        .with_credentials("nacos", "p@ss word");
    let client = NacosNamingClient::new(config).unwrap();

    client.list_healthy_instances("svc", "G").await.unwrap();
    client.list_healthy_instances("svc", "G").await.unwrap();

    let requests = server.requests();
    let logins: Vec<_> = requests.iter().filter(|r| r.path == "/nacos/v1/auth/login").collect();
    assert_eq!(logins.len(), 1);

    let lists: Vec<_> = requests.iter().filter(|r| r.path == "/nacos/v1/ns/instance/list").collect();
    assert_eq!(lists.len(), 2);
    for list in lists {
        assert_eq!(list.query["accessToken"], "token-1");
        assert_eq!(list.query["namespaceId"], "dev-ns");
    }
}

#[tokio::test]
async fn test_login_without_ttl_still_cached() {
    let server = FakeNacos::with_login_reply(json!({"accessToken": "token-2"})).await;
    let config = NacosConfig::default()
        .with_server_addr(format!("http://{}", server.addr))
        .with_credentials("nacos", "nacos");
    let client = NacosNamingClient::new(config).unwrap();

    client.list_healthy_instances("svc", "G").await.unwrap();
    client.list_healthy_instances("svc", "G").await.unwrap();

    let requests = server.requests();
    let logins = requests.iter().filter(|r| r.path == "/nacos/v1/auth/login").count();
    assert_eq!(logins, 1);
    let lists: Vec<_> = requests.iter().filter(|r| r.path == "/nacos/v1/ns/instance/list").collect();
    assert_eq!(lists.len(), 2);
    assert!(lists.iter().all(|r| r.query["accessToken"] == "token-2"));
}

#[tokio::test]
async fn test_register_heartbeat_deregister() {
    let server = FakeNacos::new().await;
    let client = NacosNamingClient::new(NacosConfig::default().with_server_addr(&server.addr)).unwrap();
    let registration = registration();

    client.register_instance(&registration).await.unwrap();
    client.send_heartbeat(&registration).await.unwrap();
    client.deregister_instance(&registration).await.unwrap();

    let requests = server.requests();
    let calls: Vec<_> = requests.iter().map(|r| (r.method.as_str(), r.path.as_str())).collect();
    assert_eq!(
        calls,
        vec![
            ("POST", "/nacos/v1/ns/instance"),
            ("PUT", "/nacos/v1/ns/instance/beat"),
            ("DELETE", "/nacos/v1/ns/instance"),
        ]
    );

    let register = &requests[0].query;
    assert_eq!(register["ip"], "10.0.0.9");
    assert_eq!(register["port"], "8000");
    assert_eq!(register["serviceName"], "lersosa-service-python");
    let metadata: serde_json::Value = serde_json::from_str(&register["metadata"]).unwrap();
    assert_eq!(metadata, json!({"gRPC_port": "6001"}));

    let beat: serde_json::Value = serde_json::from_str(&requests[1].query["beat"]).unwrap();
    assert_eq!(beat["ip"], "10.0.0.9");
    assert_eq!(beat["port"], 8000);
}

#[tokio::test]
async fn test_error_status_is_registry_error() {
    let server = FakeNacos::new().await;
    let client = NacosNamingClient::new(NacosConfig::default().with_server_addr(&server.addr)).unwrap();

    let err = client.list_healthy_instances("down", "G").await.unwrap_err();
    match err {
        RpcError::Registry(message) => {
            assert!(message.contains("503"), "{}", message);
            assert!(message.contains("server is down"), "{}", message);
        }
        other => panic!("expected registry error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_resolver_over_nacos() {
    let server = FakeNacos::new().await;
    let client = NacosNamingClient::new(NacosConfig::default().with_server_addr(&server.addr)).unwrap();
    let resolver = ServiceResolver::new(Arc::new(client), ResolverConfig::default());

    let endpoint = resolver.resolve_endpoint("svc", "SERVICE_GROUP").await.unwrap();
    assert_eq!(endpoint.to_string(), "10.0.0.5:9090");
}
