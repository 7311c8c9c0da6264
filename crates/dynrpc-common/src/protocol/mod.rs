pub mod endpoint;
pub mod error;
pub mod jsonrpc;
pub mod message;
pub mod payload;

pub use endpoint::{Endpoint, RemoteMethod};
pub use error::{ErrorKind, Result, RpcError};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use message::{FieldValue, TypedMessage, ValueKind};
pub use payload::{Payload, RAW_PAYLOAD_KEY};
