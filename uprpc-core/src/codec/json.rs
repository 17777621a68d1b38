use super::CodecError;
use prost_reflect::{
    DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions,
};

/// Builds a message of type `desc` from a JSON document.
///
/// Unknown fields are ignored. A blank body yields an empty message.
pub fn encode(desc: &MessageDescriptor, body: &str) -> Result<DynamicMessage, CodecError> {
    if body.trim().is_empty() {
        return Ok(DynamicMessage::new(desc.clone()));
    }

    let invalid = |source| CodecError::InvalidJson {
        type_name: desc.full_name().to_string(),
        source,
    };

    let options = DeserializeOptions::new().deny_unknown_fields(false);
    let mut deserializer = serde_json::Deserializer::from_str(body);
    let message =
        DynamicMessage::deserialize_with_options(desc.clone(), &mut deserializer, &options)
            .map_err(invalid)?;
    // Rejects trailing garbage after the document.
    deserializer.end().map_err(invalid)?;

    Ok(message)
}

/// Serializes a message to compact JSON text.
pub fn decode(message: &DynamicMessage) -> Result<String, CodecError> {
    decode_value(message).map(|value| value.to_string())
}

/// Serializes a message to a JSON value.
///
/// Fields use their proto names, default values are emitted, enums are numbers and 64-bit
/// integers stay numbers, so the output has the same shape as [`super::build_sample`].
pub fn decode_value(message: &DynamicMessage) -> Result<serde_json::Value, CodecError> {
    message
        .serialize_with_options(serde_json::value::Serializer, &serialize_options())
        .map_err(|source| CodecError::Serialize {
            type_name: message.descriptor().full_name().to_string(),
            source,
        })
}

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .skip_default_fields(false)
        .use_proto_field_name(true)
        .use_enum_numbers(true)
        .stringify_64_bit_integers(false)
}
