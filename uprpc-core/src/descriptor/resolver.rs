//! Import lookup for the runtime `.proto` compiler.
//!
//! Every file reference is searched, in order, in the explicit include directories and
//! then in the directory of the root file. The first readable candidate wins. When no
//! candidate exists the bare name is tried as a path as-is, which lets the compiler
//! report its own "file not found" diagnostic.
//!
//! `google/protobuf/*.proto` imports fall back to the copies bundled with `protox`.
use prost_reflect::DescriptorPool;
use protox::{
    Compiler,
    file::{ChainFileResolver, File, FileResolver, GoogleFileResolver},
};
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem collaborator used to read `.proto` sources.
///
/// Returning an error of kind [`io::ErrorKind::NotFound`] means "try the next candidate";
/// any other error aborts the parse.
pub trait SourceAccessor: 'static {
    fn open_readable(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Reads sources from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsAccessor;

impl SourceAccessor for FsAccessor {
    fn open_readable(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

pub(crate) struct ImportResolver<A> {
    accessor: A,
    root_path: PathBuf,
    root_name: String,
    search_dirs: Vec<PathBuf>,
}

impl<A: SourceAccessor> ImportResolver<A> {
    pub(crate) fn new(accessor: A, root_path: &Path, include_dirs: &[impl AsRef<Path>]) -> Self {
        let root_dir = root_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let root_name = root_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_path.to_string_lossy().into_owned());

        let search_dirs = include_dirs
            .iter()
            .map(|dir| dir.as_ref().to_path_buf())
            .chain(std::iter::once(root_dir))
            .collect();

        Self {
            accessor,
            root_path: root_path.to_path_buf(),
            root_name,
            search_dirs,
        }
    }

    pub(crate) fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Candidate paths for an import, in priority order.
    fn candidates<'a>(&'a self, name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        self.search_dirs
            .iter()
            .map(move |dir| dir.join(name))
            .chain(std::iter::once(PathBuf::from(name)))
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        if name == self.root_name {
            return self.accessor.open_readable(&self.root_path);
        }

        for candidate in self.candidates(name) {
            match self.accessor.open_readable(&candidate) {
                Ok(bytes) => {
                    tracing::trace!(import = name, path = %candidate.display(), "resolved import");
                    return Ok(bytes);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("'{name}' not found in any include directory"),
        ))
    }
}

impl<A: SourceAccessor> FileResolver for ImportResolver<A> {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        (path == self.root_path).then(|| self.root_name.clone())
    }

    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        let bytes = self.read(name).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => protox::Error::file_not_found(name),
            _ => protox::Error::new(err),
        })?;

        let source = String::from_utf8(bytes).map_err(protox::Error::new)?;
        File::from_source(name, &source)
    }
}

/// Compiles the root file and everything it imports into a descriptor pool.
pub(crate) fn compile<A: SourceAccessor>(
    resolver: ImportResolver<A>,
    root_path: &Path,
) -> Result<DescriptorPool, protox::Error> {
    let mut chain = ChainFileResolver::new();
    chain.add(resolver);
    chain.add(GoogleFileResolver::new());

    let mut compiler = Compiler::with_file_resolver(chain);
    compiler.include_imports(true);
    compiler.open_file(root_path)?;

    Ok(compiler.descriptor_pool())
}
