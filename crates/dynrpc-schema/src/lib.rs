//! dynrpc Schema Loading
//!
//! Discovers remote methods at runtime by reading IDL (`.proto`) files:
//!
//! - **Lexer / Parser**: a tokenizer and recursive-descent parser for the
//!   proto3 subset the backend services use, with per-statement error
//!   recovery
//! - **Descriptors**: services, methods (with streaming flags), messages
//!   with their fields in declared order, and enums
//! - **Index**: [`SchemaIndex`], the immutable method table built from a
//!   directory tree, with [`SchemaIndex::lookup`] as its main entry point
//!
//! # Example
//!
//! ```no_run
//! use dynrpc_schema::SchemaIndex;
//!
//! let index = SchemaIndex::load("proto").unwrap();
//! for err in index.errors() {
//!     eprintln!("{}", err);
//! }
//! let upload = index.lookup("Upload").unwrap();
//! assert!(upload.method.client_streaming);
//! ```

pub mod descriptor;
pub mod error;
pub mod index;
pub mod lexer;
pub mod parser;

pub use descriptor::{
    bare_type_name, EnumDescriptor, FieldDescriptor, FieldLabel, FieldType, FileDescriptor, MessageDescriptor,
    MethodDescriptor, ScalarType, ServiceDescriptor,
};
pub use error::{SchemaError, SchemaParseError};
pub use index::{MethodEntry, SchemaIndex, IDL_EXTENSION};
pub use parser::{parse_file, ParsedFile};
