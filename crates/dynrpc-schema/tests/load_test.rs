//! Schema Loading Integration Tests
//!
//! These tests build IDL trees on disk and verify that:
//! - loading is recursive, filtered by extension and idempotent
//! - a broken file is reported without stopping the rest of the load
//! - lookups resolve, fail with not-found, or flag ambiguity

use dynrpc_common::RpcError;
use dynrpc_schema::{SchemaError, SchemaIndex};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn ticket_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "ticket/ticket.proto",
        r#"
        syntax = "proto3";
        package lersosa.ticket;
        import "common/file.proto";

        service Ticket {
          rpc Upload(stream FileRequest) returns (FileReply);
        }
        "#,
    );
    write(
        dir.path(),
        "common/file.proto",
        r#"
        syntax = "proto3";
        package lersosa.common;

        message FileRequest {
          FileChunk file = 1;
        }
        message FileChunk {
          bytes data = 1;
          string name = 2;
          string content_type = 3;
        }
        message FileReply {
          string url = 1;
        }
        "#,
    );
    write(
        dir.path(),
        "deep/nested/dir/predict.proto",
        r#"
        syntax = "proto3";
        package lersosa.predict;

        service Predict {
          rpc Classify(lersosa.predict.ClassifyRequest) returns (.lersosa.predict.ClassifyReply);
        }
        message ClassifyRequest { string file_url = 1; }
        message ClassifyReply { repeated float scores = 1; }
        "#,
    );
    write(dir.path(), "README.md", "service NotIdl { rpc Nope(A) returns (B); }");
    dir
}

#[test]
fn test_ticket_upload_scenario() {
    let dir = ticket_tree();
    let index = SchemaIndex::load(dir.path()).unwrap();

    assert!(index.errors().is_empty(), "{:?}", index.errors());
    let entry = index.lookup("Upload").unwrap();
    assert!(entry.method.client_streaming);
    assert!(!entry.method.server_streaming);
    assert_eq!(entry.method.request_type, "FileRequest");
    assert_eq!(entry.method.response_type, "FileReply");
    assert_eq!(entry.request.fields[0].name, "file");
}

#[test]
fn test_nested_directories_and_qualified_types() {
    let dir = ticket_tree();
    let index = SchemaIndex::load(dir.path()).unwrap();

    let entry = index.lookup("Classify").unwrap();
    assert_eq!(entry.method.request_type, "ClassifyRequest");
    assert_eq!(entry.method.response_type, "ClassifyReply");
    assert_eq!(entry.remote_method().service, "lersosa.predict.Predict");
    assert!(index.service("NotIdl").is_none());
    assert_eq!(index.files().len(), 3);
}

#[test]
fn test_load_is_idempotent() {
    let dir = ticket_tree();
    let first = SchemaIndex::load(dir.path()).unwrap();
    let second = SchemaIndex::load(dir.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.reload().unwrap(), first);
}

#[test]
fn test_unknown_method_not_found() {
    let dir = ticket_tree();
    let index = SchemaIndex::load(dir.path()).unwrap();

    for name in ["Download", "upload", "Ticket", ""] {
        match index.lookup(name) {
            Err(RpcError::MethodNotFound(method)) => assert_eq!(method, name),
            other => panic!("expected MethodNotFound for {:?}, got {:?}", name, other),
        }
    }
}

#[test]
fn test_bad_file_does_not_stop_load() {
    let dir = ticket_tree();
    write(dir.path(), "broken/lex.proto", "service Bad { rpc X(A) returns (B); } $$$");
    write(
        dir.path(),
        "broken/syntax.proto",
        "service Half {\n  rpc Ok(FileRequest) returns (FileReply);\n  rpc Broken(FileRequest returns FileReply;\n}\n",
    );

    let index = SchemaIndex::load(dir.path()).unwrap();

    assert!(index.lookup("Upload").is_ok());
    assert!(index.lookup("Classify").is_ok());
    // A tokenizer error drops the whole file.
    assert!(index.service("Bad").is_none());
    // A syntax error inside a service keeps the service and its good methods.
    let half = index.service("Half").unwrap();
    assert_eq!(half.methods.len(), 1);
    assert!(index.lookup("Ok").is_ok());

    let failing: Vec<_> = index
        .errors()
        .iter()
        .map(|e| e.file.strip_prefix(dir.path()).unwrap().to_path_buf())
        .collect();
    assert_eq!(failing, vec![Path::new("broken/lex.proto"), Path::new("broken/syntax.proto")]);
    assert_eq!(index.errors()[1].line, 3);
}

#[test]
fn test_malformed_service_recorded_with_no_methods() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "empty.proto", "service Empty {\n  rpc Oops;\n");

    let index = SchemaIndex::load(dir.path()).unwrap();
    let service = index.service("Empty").unwrap();
    assert!(service.methods.is_empty());
    assert!(!index.errors().is_empty());
}

#[test]
fn test_ambiguous_method_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.proto", "service Alpha { rpc Ping(P) returns (P); } message P {}");
    write(dir.path(), "b.proto", "service Beta { rpc Ping(P) returns (P); }");

    let index = SchemaIndex::load(dir.path()).unwrap();
    assert_eq!(index.ambiguous_methods().count(), 1);
    match index.lookup("Ping") {
        Err(RpcError::AmbiguousMethod { method, services }) => {
            assert_eq!(method, "Ping");
            assert_eq!(services, vec!["Alpha".to_string(), "Beta".to_string()]);
        }
        other => panic!("expected AmbiguousMethod, got {:?}", other),
    }
}

#[test]
fn test_root_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        SchemaIndex::load(dir.path().join("missing")),
        Err(SchemaError::Root { .. })
    ));

    let file = dir.path().join("file.proto");
    fs::write(&file, "").unwrap();
    assert!(matches!(SchemaIndex::load(&file), Err(SchemaError::NotADirectory(_))));
}

#[test]
fn test_empty_tree() {
    let dir = tempfile::tempdir().unwrap();
    let index = SchemaIndex::load(dir.path()).unwrap();
    assert_eq!(index.services().count(), 0);
    assert!(index.errors().is_empty());
}
