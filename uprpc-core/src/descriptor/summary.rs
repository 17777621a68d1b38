use super::{ProtoParseError, ServiceCatalog, StreamingMode};
use crate::codec;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A parsed `.proto` file as presented to a method picker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoFile {
    pub name: String,
    pub path: PathBuf,
    pub methods: Vec<MethodSummary>,
}

/// One callable method plus a prefilled request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSummary {
    pub service_name: String,
    pub service_full_name: String,
    pub name: String,
    pub mode: StreamingMode,
    /// Pretty-printed sample instance of the input message.
    pub request_body: String,
}

/// Parses every file in `paths` and lists their methods with sample request bodies.
///
/// Files that declare no methods are left out. The first parse failure aborts the whole listing.
pub fn describe_files(
    paths: &[impl AsRef<Path>],
    include_dirs: &[impl AsRef<Path>],
) -> Result<Vec<ProtoFile>, ProtoParseError> {
    let mut files = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        let catalog = ServiceCatalog::parse(path, include_dirs)?;

        if catalog.methods().is_empty() {
            continue;
        }

        let methods = catalog
            .methods()
            .iter()
            .map(|method| MethodSummary {
                service_name: method.service_name().to_string(),
                service_full_name: method.service_full_name().to_string(),
                name: method.name().to_string(),
                mode: method.mode(),
                request_body: codec::build_sample_pretty(&method.input()),
            })
            .collect();

        files.push(ProtoFile {
            name: catalog.file_name().to_string(),
            path: path.to_path_buf(),
            methods,
        });
    }

    Ok(files)
}
