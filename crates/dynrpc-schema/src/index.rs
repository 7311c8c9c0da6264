use crate::descriptor::{FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor};
use crate::error::{SchemaError, SchemaParseError};
use crate::parser::parse_file;
use dynrpc_common::{RemoteMethod, Result, RpcError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// File extension the loader picks up.
pub const IDL_EXTENSION: &str = "proto";

/// A method resolved to its owning service together with the request
/// message it expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodEntry {
    pub service: String,
    pub package: Option<String>,
    /// File that declares the service.
    pub file: PathBuf,
    pub method: MethodDescriptor,
    pub request: MessageDescriptor,
}

impl MethodEntry {
    /// Service name as the transport addresses it, package-qualified when
    /// the defining file declares a package.
    pub fn qualified_service(&self) -> String {
        match &self.package {
            Some(package) => format!("{}.{}", package, self.service),
            None => self.service.clone(),
        }
    }

    pub fn remote_method(&self) -> RemoteMethod {
        RemoteMethod::new(self.qualified_service(), &self.method.name, &self.method.response_type)
    }

    pub fn is_client_streaming(&self) -> bool {
        self.method.client_streaming
    }
}

/// Every service, method and message found under an IDL root.
///
/// Built in one pass by [`SchemaIndex::load`] and never mutated afterwards;
/// a reload produces a new index. Shared references can be read from any
/// number of tasks without synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIndex {
    root: PathBuf,
    files: Vec<FileDescriptor>,
    services: BTreeMap<String, ServiceDescriptor>,
    /// Method name to the services that declare it.
    methods: BTreeMap<String, Vec<String>>,
    errors: Vec<SchemaParseError>,
}

impl SchemaIndex {
    /// Scans `root` recursively and parses every `.proto` file below it.
    ///
    /// Only an unreadable root fails the load. Problems inside individual
    /// files are collected in [`SchemaIndex::errors`] and the remaining files
    /// are still indexed.
    pub fn load(root: impl AsRef<Path>) -> std::result::Result<Self, SchemaError> {
        let root = root.as_ref();
        let metadata = std::fs::metadata(root).map_err(|source| SchemaError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(SchemaError::NotADirectory(root.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut errors = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root).to_path_buf();
                    error!(file = %path.display(), error = %err, "Failed to read IDL directory entry");
                    errors.push(SchemaParseError::whole_file(path, err.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.path().extension() != Some(OsStr::new(IDL_EXTENSION)) {
                continue;
            }

            let path = entry.path();
            let source = match std::fs::read_to_string(path) {
                Ok(source) => source,
                Err(err) => {
                    error!(file = %path.display(), error = %err, "Failed to read IDL file");
                    errors.push(SchemaParseError::whole_file(path, err.to_string()));
                    continue;
                }
            };

            match parse_file(path, &source) {
                Ok(parsed) => {
                    for err in &parsed.errors {
                        error!(file = %path.display(), line = err.line, column = err.column, "IDL parse error: {}", err.reason);
                    }
                    debug!(
                        file = %path.display(),
                        services = parsed.file.services.len(),
                        messages = parsed.file.messages.len(),
                        "Parsed IDL file"
                    );
                    errors.extend(parsed.errors);
                    files.push(parsed.file);
                }
                Err(err) => {
                    error!(file = %path.display(), line = err.line, column = err.column, "IDL file skipped: {}", err.reason);
                    errors.push(err);
                }
            }
        }

        let index = Self::build(root.to_path_buf(), files, errors);
        info!(
            root = %root.display(),
            files = index.files.len(),
            services = index.services.len(),
            methods = index.methods.len(),
            errors = index.errors.len(),
            "Schema loaded"
        );
        Ok(index)
    }

    fn build(root: PathBuf, mut files: Vec<FileDescriptor>, mut errors: Vec<SchemaParseError>) -> Self {
        let enums: BTreeSet<String> = files
            .iter()
            .flat_map(|f| f.enums.iter().map(|e| e.name.clone()))
            .collect();
        for file in &mut files {
            file.resolve_enums(&enums);
        }

        let mut services: BTreeMap<String, ServiceDescriptor> = BTreeMap::new();
        for service in files.iter().flat_map(|f| f.services.iter()) {
            if let Some(existing) = services.get(&service.name) {
                let reason = format!(
                    "service '{}' already declared in {}",
                    service.name,
                    existing.file.display()
                );
                warn!(file = %service.file.display(), "{}", reason);
                errors.push(SchemaParseError::whole_file(&service.file, reason));
                continue;
            }
            services.insert(service.name.clone(), service.clone());
        }

        let mut methods: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for service in services.values() {
            for method in &service.methods {
                methods.entry(method.name.clone()).or_default().push(service.name.clone());
            }
        }
        for (method, owners) in methods.iter().filter(|(_, owners)| owners.len() > 1) {
            warn!(method = %method, services = %owners.join(", "), "Method name declared by more than one service");
        }

        Self {
            root,
            files,
            services,
            methods,
            errors,
        }
    }

    /// Loads a fresh index from the same root. `self` is left untouched.
    pub fn reload(&self) -> std::result::Result<Self, SchemaError> {
        Self::load(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    /// Per-file problems found while loading.
    pub fn errors(&self) -> &[SchemaParseError] {
        &self.errors
    }

    /// Method names declared by more than one service, with the services
    /// that declare them. Each of these fails [`SchemaIndex::lookup`].
    pub fn ambiguous_methods(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.methods
            .iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(name, owners)| (name.as_str(), owners.as_slice()))
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Finds a message by bare name in any loaded file.
    pub fn message(&self, name: &str) -> Option<&MessageDescriptor> {
        self.files.iter().find_map(|f| f.message(name))
    }

    /// Finds a message by bare name, preferring the given file over the rest
    /// of the index.
    pub fn resolve_message(&self, file: &Path, name: &str) -> Option<&MessageDescriptor> {
        self.files
            .iter()
            .find(|f| f.path == file)
            .and_then(|f| f.message(name))
            .or_else(|| self.message(name))
    }

    /// Resolves a bare method name to exactly one service method.
    pub fn lookup(&self, method: &str) -> Result<MethodEntry> {
        match self.methods.get(method).map(Vec::as_slice) {
            None | Some([]) => Err(RpcError::MethodNotFound(method.to_string())),
            Some([service]) => self.lookup_qualified(service, method),
            Some(services) => Err(RpcError::AmbiguousMethod {
                method: method.to_string(),
                services: services.to_vec(),
            }),
        }
    }

    /// Resolves `service`'s `method`, bypassing the cross-service table.
    /// `service` may carry its package, as in `lersosa.file.Ticket`.
    pub fn lookup_qualified(&self, service: &str, method: &str) -> Result<MethodEntry> {
        let not_found = || RpcError::MethodNotFound(format!("{}/{}", service, method));
        let descriptor = match self.services.get(service) {
            Some(descriptor) => descriptor,
            None => {
                let (package, name) = service.rsplit_once('.').ok_or_else(not_found)?;
                self.services
                    .get(name)
                    .filter(|d| d.package.as_deref() == Some(package))
                    .ok_or_else(not_found)?
            }
        };
        let method_descriptor = descriptor.method(method).ok_or_else(not_found)?;
        let request = self
            .resolve_message(&descriptor.file, &method_descriptor.request_type)
            .ok_or_else(|| RpcError::UnknownMessageType(method_descriptor.request_type.clone()))?;

        Ok(MethodEntry {
            service: descriptor.name.clone(),
            package: descriptor.package.clone(),
            file: descriptor.file.clone(),
            method: method_descriptor.clone(),
            request: request.clone(),
        })
    }
}
