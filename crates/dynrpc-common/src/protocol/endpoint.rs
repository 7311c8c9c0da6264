use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a resolved RPC listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Identity of a remote method as the transport needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteMethod {
    pub service: String,
    pub method: String,
    pub response_type: String,
}

impl RemoteMethod {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            response_type: response_type.into(),
        }
    }

    /// `Service/Method`, the path form used on the wire.
    pub fn path(&self) -> String {
        format!("{}/{}", self.service, self.method)
    }
}
