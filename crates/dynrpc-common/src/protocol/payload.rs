use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::protocol::error::Result;
use crate::protocol::message::FieldValue;

/// Key a non-mapping payload is filed under once normalized.
pub const RAW_PAYLOAD_KEY: &str = "data";

/// Call-site input to a remote method, before it is shaped into a request.
///
/// A payload is either a mapping of field name to value, a raw byte
/// sequence, or a single scalar. Arbitrary structs are coerced to a mapping
/// through [`Payload::from_serialize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Map(BTreeMap<String, FieldValue>),
    Bytes(Bytes),
    Scalar(FieldValue),
}

impl Payload {
    /// Coerces any serializable value into a payload. Structs and maps
    /// become [`Payload::Map`], everything else a [`Payload::Scalar`].
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Payload::from(serde_json::to_value(value)?))
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Payload::Bytes(_))
    }

    /// Returns the payload as a mapping. Bytes and scalars are filed under
    /// [`RAW_PAYLOAD_KEY`].
    pub fn normalized(&self) -> BTreeMap<String, FieldValue> {
        match self {
            Payload::Map(map) => map.clone(),
            Payload::Bytes(bytes) => {
                BTreeMap::from([(RAW_PAYLOAD_KEY.to_string(), FieldValue::Bytes(bytes.clone()))])
            }
            Payload::Scalar(value) => BTreeMap::from([(RAW_PAYLOAD_KEY.to_string(), value.clone())]),
        }
    }

    /// The payload as one value, used when nothing matched and the whole
    /// input has to land in a single field.
    pub fn into_value(self) -> FieldValue {
        match self {
            Payload::Map(map) => FieldValue::Map(map),
            Payload::Bytes(bytes) => FieldValue::Bytes(bytes),
            Payload::Scalar(value) => value,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match FieldValue::from(value) {
            FieldValue::Map(map) => Payload::Map(map),
            other => Payload::Scalar(other),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<BTreeMap<String, FieldValue>> for Payload {
    fn from(value: BTreeMap<String, FieldValue>) -> Self {
        Payload::Map(value)
    }
}

impl From<HashMap<String, FieldValue>> for Payload {
    fn from(value: HashMap<String, FieldValue>) -> Self {
        Payload::Map(value.into_iter().collect())
    }
}

impl From<FieldValue> for Payload {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Map(map) => Payload::Map(map),
            FieldValue::Bytes(bytes) => Payload::Bytes(bytes),
            other => Payload::Scalar(other),
        }
    }
}
