//! Typed request synthesis from loosely typed call-site payloads.
//!
//! The builder binds exactly one field of the request message per call. The
//! field is chosen by the first tier that finds a match:
//!
//! 1. a payload key equal to a declared field name (declared order wins)
//! 2. a payload key equal to a declared field name once converted to
//!    `snake_case` (`fileUrl` binds `file_url`)
//! 3. the first declared field whose wire type accepts any payload value
//! 4. for raw byte payloads only: a field named `data`, `content` or
//!    `bytes`, then the first `bytes` field, then the first field
//!
//! A non-byte payload that matches nothing is placed whole into the first
//! declared field. Both last-resort placements are logged as warnings.
//!
//! # Limitation
//!
//! Only requests whose payload maps onto one distinguished field are
//! supported. Extra payload keys are dropped: `{tenantId, fileUrl}` against a
//! request declaring only `file_url` binds `fileUrl` and ignores `tenantId`.
//! Multi-field mapping is not inferred from repeated exact matches.

use dynrpc_common::{FieldValue, Payload, TypedMessage, ValueKind};
use dynrpc_schema::{FieldDescriptor, FieldType, MessageDescriptor, ScalarType};
use heck::ToSnakeCase;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Field names conventionally used for binary content.
pub const BINARY_FIELD_NAMES: [&str; 3] = ["data", "content", "bytes"];

/// Which rule selected the bound field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchTier {
    ExactName,
    NamingConvention,
    TypeCompatible,
    BinaryFallback,
    LastResort,
}

/// The single field a payload was bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    pub field: String,
    pub tier: MatchTier,
    pub value: FieldValue,
}

/// Builds requests of one message type. Stateless; one per lookup is fine.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
    descriptor: &'a MessageDescriptor,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(descriptor: &'a MessageDescriptor) -> Self {
        Self { descriptor }
    }

    /// Builds the request. Never fails: a message type without fields yields
    /// an empty message.
    pub fn build(&self, payload: &Payload) -> TypedMessage {
        let message = TypedMessage::new(&self.descriptor.name);
        match self.bind(payload) {
            Some(binding) => message.with_field(binding.field, binding.value),
            None => message,
        }
    }

    /// Chooses the field `payload` binds to, or `None` when the message has
    /// no fields at all.
    pub fn bind(&self, payload: &Payload) -> Option<FieldBinding> {
        let fields = &self.descriptor.fields;
        let first = fields.first()?;
        let params = payload.normalized();

        // Raw bytes carry no keys, so name matching starts at tier 4.
        if !payload.is_bytes() {
            if let Some(binding) = self.exact_match(&params).or_else(|| self.convention_match(&params)) {
                return Some(binding);
            }
        }
        if let Some(binding) = self.type_match(&params) {
            return Some(binding);
        }

        if let Payload::Bytes(bytes) = payload {
            return Some(self.binary_fallback(FieldValue::Bytes(bytes.clone())));
        }

        warn!(
            message = %self.descriptor.name,
            field = %first.name,
            "No payload key matched; assigning whole payload to first field"
        );
        Some(FieldBinding {
            field: first.name.clone(),
            tier: MatchTier::LastResort,
            value: payload.clone().into_value(),
        })
    }

    fn exact_match(&self, params: &BTreeMap<String, FieldValue>) -> Option<FieldBinding> {
        self.descriptor.fields.iter().find_map(|field| {
            params.get(&field.name).map(|value| FieldBinding {
                field: field.name.clone(),
                tier: MatchTier::ExactName,
                value: value.clone(),
            })
        })
    }

    fn convention_match(&self, params: &BTreeMap<String, FieldValue>) -> Option<FieldBinding> {
        let mut converted: BTreeMap<String, &FieldValue> = BTreeMap::new();
        for (key, value) in params {
            converted.entry(key.to_snake_case()).or_insert(value);
        }

        self.descriptor.fields.iter().find_map(|field| {
            converted.get(&field.name).map(|value| FieldBinding {
                field: field.name.clone(),
                tier: MatchTier::NamingConvention,
                value: (*value).clone(),
            })
        })
    }

    fn type_match(&self, params: &BTreeMap<String, FieldValue>) -> Option<FieldBinding> {
        self.descriptor.fields.iter().find_map(|field| {
            params
                .values()
                .find(|value| accepts(field, value.kind()))
                .map(|value| FieldBinding {
                    field: field.name.clone(),
                    tier: MatchTier::TypeCompatible,
                    value: value.clone(),
                })
        })
    }

    fn binary_fallback(&self, value: FieldValue) -> FieldBinding {
        let fields = &self.descriptor.fields;
        let named = fields.iter().find(|f| BINARY_FIELD_NAMES.contains(&f.name.as_str()));
        let typed = || fields.iter().find(|f| f.field_type.is_bytes() && !f.is_repeated());

        if let Some(field) = named.or_else(typed) {
            return FieldBinding {
                field: field.name.clone(),
                tier: MatchTier::BinaryFallback,
                value,
            };
        }

        // bind() only calls this with at least one field declared.
        let field = &fields[0];
        warn!(
            message = %self.descriptor.name,
            field = %field.name,
            "No binary field declared; assigning raw bytes to first field"
        );
        FieldBinding {
            field: field.name.clone(),
            tier: MatchTier::LastResort,
            value,
        }
    }
}

/// Whether a payload value of `kind` fits `field`'s wire type.
fn accepts(field: &FieldDescriptor, kind: ValueKind) -> bool {
    if field.is_repeated() {
        return kind == ValueKind::List;
    }
    match &field.field_type {
        FieldType::Scalar(scalar) => match scalar {
            ScalarType::Bool => kind == ValueKind::Bool,
            ScalarType::String => kind == ValueKind::String,
            ScalarType::Bytes => kind == ValueKind::Bytes,
            ScalarType::Double | ScalarType::Float => kind == ValueKind::Float,
            s if s.is_integer() => kind == ValueKind::Int,
            _ => false,
        },
        FieldType::Enum(_) => matches!(kind, ValueKind::Int | ValueKind::String),
        FieldType::Message(_) | FieldType::Map { .. } => kind == ValueKind::Map,
    }
}
