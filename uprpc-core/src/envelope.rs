//! Request and response envelopes exchanged with the external caller.
use crate::codec::MetadataPair;
use crate::descriptor::StreamingMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything needed to open a call.
///
/// `id` is chosen by the caller and must be unique among the sessions open at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub id: String,
    pub proto_path: PathBuf,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    pub service_full_name: String,
    pub method_name: String,
    pub mode: StreamingMode,
    pub host: String,
    /// JSON document for the input message. Blank means an empty message.
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub metadata: Vec<MetadataPair>,
}

/// One outbound `data` event: a decoded message, an error text, or an empty body carrying
/// the trailer of a finished stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub metadata: Vec<MetadataPair>,
}

impl ResponseEnvelope {
    pub fn new(
        id: impl Into<String>,
        body: impl Into<String>,
        metadata: Vec<MetadataPair>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            metadata,
        }
    }
}
