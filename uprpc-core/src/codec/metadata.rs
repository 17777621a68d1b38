use super::CodecError;
use serde::{Deserialize, Serialize};
use tonic::metadata::{Ascii, Binary, KeyRef, MetadataKey, MetadataMap, MetadataValue};

/// Which side of the call a metadata pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Request,
    Response,
}

/// One value of one metadata key.
///
/// Repeated keys produce one pair per value; `id` is `"{key}_{index}"` with the index
/// counted within the key, so pairs stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPair {
    #[serde(default)]
    pub id: String,
    pub key: String,
    pub value: Vec<u8>,
    #[serde(default)]
    pub direction: Direction,
}

impl MetadataPair {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        Self {
            id: format!("{key}_0"),
            key,
            value: value.into(),
            direction: Direction::Request,
        }
    }
}

/// Flattens metadata into pairs, tagging every pair with `direction`.
///
/// Binary (`-bin`) values are base64-decoded; a value that does not decode is kept as sent.
pub fn metadata_to_pairs(metadata: &MetadataMap, direction: Direction) -> Vec<MetadataPair> {
    let mut pairs = Vec::with_capacity(metadata.len());

    for key in metadata.keys() {
        let (name, values): (&str, Vec<Vec<u8>>) = match key {
            KeyRef::Ascii(key) => (
                key.as_str(),
                metadata
                    .get_all(key)
                    .iter()
                    .map(|value| value.as_encoded_bytes().to_vec())
                    .collect(),
            ),
            KeyRef::Binary(key) => (
                key.as_str(),
                metadata
                    .get_all_bin(key)
                    .iter()
                    .map(|value| {
                        value
                            .to_bytes()
                            .map(|bytes| bytes.to_vec())
                            .unwrap_or_else(|_| value.as_encoded_bytes().to_vec())
                    })
                    .collect(),
            ),
        };

        pairs.extend(values.into_iter().enumerate().map(|(index, value)| MetadataPair {
            id: format!("{name}_{index}"),
            key: name.to_string(),
            value,
            direction,
        }));
    }

    pairs
}

/// Builds outgoing metadata from pairs, preserving the order of repeated keys.
pub fn pairs_to_metadata(pairs: &[MetadataPair]) -> Result<MetadataMap, CodecError> {
    let mut metadata = MetadataMap::new();

    for pair in pairs {
        let invalid_key = |source| CodecError::InvalidMetadataKey {
            key: pair.key.clone(),
            source,
        };

        if pair.key.ends_with("-bin") {
            let key = MetadataKey::<Binary>::from_bytes(pair.key.as_bytes()).map_err(invalid_key)?;
            metadata.append_bin(key, MetadataValue::from_bytes(&pair.value));
        } else {
            let key = MetadataKey::<Ascii>::from_bytes(pair.key.as_bytes()).map_err(invalid_key)?;
            let value = MetadataValue::try_from(pair.value.as_slice()).map_err(|source| {
                CodecError::InvalidMetadataValue {
                    key: pair.key.clone(),
                    source,
                }
            })?;
            metadata.append(key, value);
        }
    }

    Ok(metadata)
}
