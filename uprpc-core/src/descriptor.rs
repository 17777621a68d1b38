//! # Descriptor Resolver
//!
//! Turns a `.proto` source file into a [`ServiceCatalog`]: the services declared in that
//! file, their methods, streaming modes and input/output message descriptors.
//!
//! Parsing is done at runtime with `protox`, so no compiled stubs or descriptor sets are
//! needed. Imports are looked up in the explicit include directories first, then in the
//! directory that contains the root file (see [`resolver`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use uprpc_core::descriptor::resolve;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let method = resolve("protos/greeter.proto", &["protos/include"], "Greeter", "SayHello")?;
//! println!("{} -> {}", method.input().full_name(), method.output().full_name());
//! # Ok(())
//! # }
//! ```
pub mod resolver;
mod summary;

pub use resolver::{FsAccessor, SourceAccessor};
pub use summary::{MethodSummary, ProtoFile, describe_files};

use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor};
use resolver::ImportResolver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Errors raised while parsing a `.proto` file or any of its transitive imports.
#[derive(Debug, thiserror::Error)]
#[error("Failed to parse proto file '{}': {source}", path.display())]
pub struct ProtoParseError {
    path: PathBuf,
    #[source]
    source: protox::Error,
}

impl ProtoParseError {
    /// The root file whose parse failed.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Errors raised when a parsed file does not contain the requested service or method.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
    #[error("Method '{method}' is {actual}, but the request asked for {requested}")]
    ModeMismatch {
        method: String,
        actual: StreamingMode,
        requested: StreamingMode,
    },
}

/// Either half of a failed [`resolve`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Parse(#[from] ProtoParseError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// The four RPC shapes.
///
/// On the wire (request envelopes) the mode is an integer:
/// `0` unary, `1` client streaming, `2` server streaming, `3` bidirectional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StreamingMode {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

impl StreamingMode {
    /// Derives the mode from a method's streaming flags.
    pub fn of(method: &MethodDescriptor) -> Self {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => StreamingMode::Unary,
            (true, false) => StreamingMode::ClientStreaming,
            (false, true) => StreamingMode::ServerStreaming,
            (true, true) => StreamingMode::Bidirectional,
        }
    }

    /// Whether the caller feeds more messages after the call is opened.
    pub fn accepts_pushes(self) -> bool {
        matches!(
            self,
            StreamingMode::ClientStreaming | StreamingMode::Bidirectional
        )
    }
}

impl fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamingMode::Unary => "unary",
            StreamingMode::ClientStreaming => "client streaming",
            StreamingMode::ServerStreaming => "server streaming",
            StreamingMode::Bidirectional => "bidirectional streaming",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for StreamingMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StreamingMode::Unary),
            1 => Ok(StreamingMode::ClientStreaming),
            2 => Ok(StreamingMode::ServerStreaming),
            3 => Ok(StreamingMode::Bidirectional),
            other => Err(format!("unknown streaming mode {other}, expected 0..=3")),
        }
    }
}

impl From<StreamingMode> for u8 {
    fn from(mode: StreamingMode) -> Self {
        match mode {
            StreamingMode::Unary => 0,
            StreamingMode::ClientStreaming => 1,
            StreamingMode::ServerStreaming => 2,
            StreamingMode::Bidirectional => 3,
        }
    }
}

/// One RPC method of a parsed file.
#[derive(Debug, Clone)]
pub struct Method {
    descriptor: MethodDescriptor,
    mode: StreamingMode,
}

impl Method {
    fn new(descriptor: MethodDescriptor) -> Self {
        let mode = StreamingMode::of(&descriptor);
        Self { descriptor, mode }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn service_name(&self) -> &str {
        self.descriptor.parent_service().name()
    }

    pub fn service_full_name(&self) -> &str {
        self.descriptor.parent_service().full_name()
    }

    pub fn mode(&self) -> StreamingMode {
        self.mode
    }

    pub fn input(&self) -> MessageDescriptor {
        self.descriptor.input()
    }

    pub fn output(&self) -> MessageDescriptor {
        self.descriptor.output()
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }
}

/// The services and methods declared in a single `.proto` file.
///
/// Built once per parse and never mutated afterwards. Services coming from imported
/// files are reachable through [`ServiceCatalog::pool`] but are not listed.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    pool: DescriptorPool,
    file_name: String,
    methods: Vec<Method>,
}

impl ServiceCatalog {
    /// Parses `proto_path` from the local filesystem.
    pub fn parse(
        proto_path: impl AsRef<Path>,
        include_dirs: &[impl AsRef<Path>],
    ) -> Result<Self, ProtoParseError> {
        Self::parse_with(FsAccessor, proto_path, include_dirs)
    }

    /// Parses `proto_path`, reading every source through `accessor`.
    pub fn parse_with<A: SourceAccessor>(
        accessor: A,
        proto_path: impl AsRef<Path>,
        include_dirs: &[impl AsRef<Path>],
    ) -> Result<Self, ProtoParseError> {
        let proto_path = proto_path.as_ref();
        let resolver = ImportResolver::new(accessor, proto_path, include_dirs);
        let file_name = resolver.root_name().to_string();

        let pool = resolver::compile(resolver, proto_path).map_err(|source| {
            tracing::debug!(path = %proto_path.display(), error = %source, "proto parse failed");
            ProtoParseError {
                path: proto_path.to_path_buf(),
                source,
            }
        })?;

        let methods = pool
            .get_file_by_name(&file_name)
            .map(|file| {
                file.services()
                    .flat_map(|service| service.methods().collect::<Vec<_>>())
                    .map(Method::new)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            pool,
            file_name,
            methods,
        })
    }

    /// Name under which the root file was registered in the pool.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Every method of every service declared in the root file, in declaration order.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Finds `method_name` inside the service whose fully qualified name is `service_full_name`.
    pub fn find(
        &self,
        service_full_name: &str,
        method_name: &str,
    ) -> Result<MethodDescriptor, LookupError> {
        let mut in_service = self
            .methods
            .iter()
            .filter(|m| m.service_full_name() == service_full_name)
            .peekable();

        if in_service.peek().is_none() {
            return Err(LookupError::ServiceNotFound(service_full_name.to_string()));
        }

        in_service
            .find(|m| m.name() == method_name)
            .map(|m| m.descriptor.clone())
            .ok_or_else(|| LookupError::MethodNotFound {
                service: service_full_name.to_string(),
                method: method_name.to_string(),
            })
    }
}

/// Parses `proto_path` and looks up one method in it.
///
/// Pure function of its inputs plus the filesystem: nothing is cached between calls.
pub fn resolve(
    proto_path: impl AsRef<Path>,
    include_dirs: &[impl AsRef<Path>],
    service_full_name: &str,
    method_name: &str,
) -> Result<MethodDescriptor, ResolveError> {
    let catalog = ServiceCatalog::parse(proto_path, include_dirs)?;
    Ok(catalog.find(service_full_name, method_name)?)
}

/// Fails with [`LookupError::ModeMismatch`] when `method` is not of the `requested` shape.
pub fn ensure_mode(
    method: &MethodDescriptor,
    requested: StreamingMode,
) -> Result<(), LookupError> {
    let actual = StreamingMode::of(method);
    if actual == requested {
        Ok(())
    } else {
        Err(LookupError::ModeMismatch {
            method: method.full_name().to_string(),
            actual,
            requested,
        })
    }
}
