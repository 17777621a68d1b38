//! # Message Codec
//!
//! Conversions between the JSON documents exchanged with the caller and the reflective
//! `DynamicMessage` values sent over the wire, plus transport metadata conversion.
//!
//! * [`encode`] / [`decode`]: JSON text to message of a given type, and back.
//! * [`build_sample`]: a deterministic template instance of a message type, used to prefill
//!   request editors.
//! * [`metadata_to_pairs`] / [`pairs_to_metadata`]: `tonic` metadata to a flat, ordered list
//!   of [`MetadataPair`]s, and back.
mod json;
mod metadata;
mod sample;

pub use json::{decode, decode_value, encode};
pub use metadata::{Direction, MetadataPair, metadata_to_pairs, pairs_to_metadata};
pub use sample::{build_sample, build_sample_pretty};

use tonic::metadata::errors::{InvalidMetadataKey, InvalidMetadataValueBytes};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid JSON body for '{type_name}': {source}")]
    InvalidJson {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to map '{type_name}' to JSON: {source}")]
    Serialize {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValueBytes,
    },
}
