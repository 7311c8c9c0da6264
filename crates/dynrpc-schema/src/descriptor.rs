use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Reduces a possibly package-qualified type reference to its trailing
/// identifier: `.pkg.sub.TypeName` becomes `TypeName`.
pub fn bare_type_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub request_type: String,
    pub response_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub file: PathBuf,
    pub package: Option<String>,
    /// Declared order; names are unique within a service.
    pub methods: Vec<MethodDescriptor>,
    /// Every message declared in the defining file, nesting flattened.
    pub message_types: BTreeSet<String>,
}

impl ServiceDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::Sfixed32,
            "sfixed64" => ScalarType::Sfixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Bool | ScalarType::String | ScalarType::Bytes
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Scalar(ScalarType),
    /// A message reference, bare name.
    Message(String),
    /// An enum reference, bare name.
    Enum(String),
    Map { key: ScalarType, value: Box<FieldType> },
}

impl FieldType {
    pub fn is_bytes(&self) -> bool {
        matches!(self, FieldType::Scalar(ScalarType::Bytes))
    }

    pub fn message_name(&self) -> Option<&str> {
        match self {
            FieldType::Message(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(s) => write!(f, "{}", format!("{:?}", s).to_lowercase()),
            FieldType::Message(name) | FieldType::Enum(name) => f.write_str(name),
            FieldType::Map { key, value } => {
                write!(f, "map<{}, {}>", format!("{:?}", key).to_lowercase(), value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldLabel {
    Singular,
    Optional,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: u32,
    pub label: FieldLabel,
    pub field_type: FieldType,
    /// Set when the field is a member of a `oneof` group.
    pub oneof: Option<String>,
}

impl FieldDescriptor {
    pub fn is_repeated(&self) -> bool {
        self.label == FieldLabel::Repeated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDescriptor {
    /// Bare name, as used for lookups.
    pub name: String,
    /// Name qualified by enclosing messages, e.g. `Outer.Inner`.
    pub full_name: String,
    /// Declared order, `oneof` members inlined.
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub full_name: String,
    pub values: Vec<(String, i32)>,
}

/// Everything parsed out of a single IDL file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub syntax: Option<String>,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub services: Vec<ServiceDescriptor>,
    pub messages: Vec<MessageDescriptor>,
    pub enums: Vec<EnumDescriptor>,
}

impl FileDescriptor {
    pub fn message(&self, name: &str) -> Option<&MessageDescriptor> {
        self.messages.iter().find(|m| m.name == name)
    }

    pub fn message_types(&self) -> BTreeSet<String> {
        self.messages.iter().map(|m| m.name.clone()).collect()
    }

    /// Re-tags named field types that refer to a known enum.
    pub(crate) fn resolve_enums(&mut self, enums: &BTreeSet<String>) {
        fn retag(ty: &mut FieldType, enums: &BTreeSet<String>) {
            let enum_name = match ty {
                FieldType::Message(name) if enums.contains(name.as_str()) => std::mem::take(name),
                FieldType::Map { value, .. } => return retag(value, enums),
                _ => return,
            };
            *ty = FieldType::Enum(enum_name);
        }

        for message in &mut self.messages {
            for field in &mut message.fields {
                retag(&mut field.field_type, enums);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_type_name() {
        assert_eq!(bare_type_name("pkg.TypeName"), "TypeName");
        assert_eq!(bare_type_name(".a.b.C"), "C");
        assert_eq!(bare_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_scalar_keywords() {
        assert_eq!(ScalarType::from_keyword("bytes"), Some(ScalarType::Bytes));
        assert_eq!(ScalarType::from_keyword("sfixed64"), Some(ScalarType::Sfixed64));
        assert_eq!(ScalarType::from_keyword("FileChunk"), None);
        assert!(ScalarType::Uint64.is_integer());
        assert!(!ScalarType::Double.is_integer());
    }

    #[test]
    fn test_field_type_display() {
        assert_eq!(FieldType::Scalar(ScalarType::Int64).to_string(), "int64");
        let map = FieldType::Map {
            key: ScalarType::String,
            value: Box::new(FieldType::Message("Label".into())),
        };
        assert_eq!(map.to_string(), "map<string, Label>");
    }

    #[test]
    fn test_resolve_enums_retags_fields() {
        let mut file = FileDescriptor {
            path: PathBuf::from("a.proto"),
            syntax: None,
            package: None,
            imports: vec![],
            services: vec![],
            messages: vec![MessageDescriptor {
                name: "Req".into(),
                full_name: "Req".into(),
                fields: vec![
                    FieldDescriptor {
                        name: "kind".into(),
                        number: 1,
                        label: FieldLabel::Singular,
                        field_type: FieldType::Message("Kind".into()),
                        oneof: None,
                    },
                    FieldDescriptor {
                        name: "file".into(),
                        number: 2,
                        label: FieldLabel::Singular,
                        field_type: FieldType::Message("File".into()),
                        oneof: None,
                    },
                ],
            }],
            enums: vec![],
        };
        file.resolve_enums(&BTreeSet::from(["Kind".to_string()]));
        assert_eq!(file.messages[0].fields[0].field_type, FieldType::Enum("Kind".into()));
        assert_eq!(file.messages[0].fields[1].field_type, FieldType::Message("File".into()));
    }
}
