use prost_reflect::{EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor};
use serde_json::{Map, Value, json};

/// Builds a template JSON instance of `desc`, used to prefill request editors.
///
/// The result only depends on the descriptor. Feeding it to [`super::encode`] and back
/// through [`super::decode_value`] gives the same value.
pub fn build_sample(desc: &MessageDescriptor) -> Value {
    SampleBuilder::default().message(desc)
}

/// [`build_sample`], pretty-printed.
pub fn build_sample_pretty(desc: &MessageDescriptor) -> String {
    serde_json::to_string_pretty(&build_sample(desc)).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Default)]
struct SampleBuilder {
    /// Message types currently being expanded, outermost first.
    visiting: Vec<String>,
}

impl SampleBuilder {
    fn message(&mut self, desc: &MessageDescriptor) -> Value {
        if let Some(value) = well_known(desc) {
            return value;
        }

        self.visiting.push(desc.full_name().to_string());

        let mut object = Map::new();
        for field in desc.fields() {
            if let Some(oneof) = field.containing_oneof()
                && !oneof.is_synthetic()
                && oneof.fields().next().is_some_and(|first| first != field)
            {
                continue;
            }

            if let Some(value) = self.field(&field) {
                object.insert(field.name().to_string(), value);
            }
        }

        self.visiting.pop();
        Value::Object(object)
    }

    /// `None` means the field is left out of the sample.
    fn field(&mut self, field: &FieldDescriptor) -> Option<Value> {
        if field.is_map() {
            let Kind::Message(entry) = field.kind() else {
                return None;
            };
            let key = map_key(&entry.map_entry_key_field().kind());
            let value = entry.map_entry_value_field();

            return Some(match self.single(&value.kind()) {
                Some(value) => json!({ key: value }),
                None => json!({}),
            });
        }

        if field.is_list() {
            return Some(match self.single(&field.kind()) {
                Some(element) => json!([element]),
                None => json!([]),
            });
        }

        self.single(&field.kind())
    }

    /// Sample of a single (non-repeated) value. `None` for recursive references and `Any`.
    fn single(&mut self, kind: &Kind) -> Option<Value> {
        let value = match kind {
            Kind::Double => json!(3.141592),
            Kind::Float => json!(1.5),
            Kind::Int32 | Kind::Fixed32 => json!(3200),
            Kind::Uint32 => json!(32000),
            Kind::Int64 | Kind::Fixed64 => json!(6400),
            Kind::Uint64 => json!(64000),
            Kind::Sint32 | Kind::Sfixed32 => json!(320),
            Kind::Sint64 | Kind::Sfixed64 => json!(640),
            Kind::Bool => json!(true),
            Kind::String | Kind::Bytes => json!(""),
            Kind::Enum(desc) => enum_sample(desc),
            Kind::Message(desc) => {
                if desc.full_name() == "google.protobuf.Any"
                    || self.visiting.iter().any(|name| name == desc.full_name())
                {
                    return None;
                }
                self.message(desc)
            }
        };
        Some(value)
    }
}

fn enum_sample(desc: &EnumDescriptor) -> Value {
    if desc.full_name() == "google.protobuf.NullValue" {
        return Value::Null;
    }
    desc.values()
        .next()
        .map(|value| json!(value.number()))
        .unwrap_or_else(|| json!(0))
}

fn map_key(kind: &Kind) -> &'static str {
    match kind {
        Kind::String => "key",
        Kind::Bool => "true",
        _ => "32",
    }
}

/// JSON forms of the well-known types that do not serialize as plain objects.
fn well_known(desc: &MessageDescriptor) -> Option<Value> {
    let value = match desc.full_name() {
        "google.protobuf.Timestamp" => json!("1970-01-01T00:00:00Z"),
        "google.protobuf.Duration" => json!("0s"),
        "google.protobuf.Struct" | "google.protobuf.Empty" => json!({}),
        "google.protobuf.ListValue" => json!([]),
        "google.protobuf.Value" => Value::Null,
        "google.protobuf.FieldMask" => json!(""),
        "google.protobuf.DoubleValue" => json!(3.141592),
        "google.protobuf.FloatValue" => json!(1.5),
        "google.protobuf.Int64Value" => json!(6400),
        "google.protobuf.UInt64Value" => json!(64000),
        "google.protobuf.Int32Value" => json!(3200),
        "google.protobuf.UInt32Value" => json!(32000),
        "google.protobuf.BoolValue" => json!(true),
        "google.protobuf.StringValue" | "google.protobuf.BytesValue" => json!(""),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ServiceCatalog;

    fn input_of(method: &str) -> MessageDescriptor {
        let proto = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/protos/kitchen_sink.proto");
        let catalog = ServiceCatalog::parse(proto, &[] as &[&str]).unwrap();
        catalog.find("kitchen.KitchenSink", method).unwrap().input()
    }

    #[test]
    fn scalars_use_fixed_constants() {
        let sample = build_sample(&input_of("Scalars"));

        assert_eq!(
            sample,
            json!({
                "d": 3.141592, "f": 1.5,
                "i32": 3200, "i64": 6400,
                "u32": 32000, "u64": 64000,
                "s32": 320, "s64": 640,
                "f32": 3200, "f64": 6400,
                "sf32": 320, "sf64": 640,
                "flag": true, "text": "", "data": ""
            })
        );
    }

    #[test]
    fn only_the_first_oneof_member_is_emitted() {
        let sample = build_sample(&input_of("Describe"));

        assert_eq!(sample["label"], json!(""));
        assert!(sample.get("number").is_none());
        // proto3 `optional` is a synthetic one-of and behaves like a plain field.
        assert_eq!(sample["nickname"], json!(""));
    }

    #[test]
    fn collections_wrap_a_single_element() {
        let sample = build_sample(&input_of("Describe"));

        assert_eq!(sample["tags"], json!([""]));
        assert_eq!(sample["counts"], json!({ "key": 3200 }));
        assert_eq!(sample["flags"], json!({ "true": 0 }));
        assert_eq!(sample["by_id"]["32"]["text"], json!(""));
        assert_eq!(sample["rows"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn recursive_references_stop_after_one_level() {
        let sample = build_sample(&input_of("Describe"));

        assert_eq!(sample["tree"], json!({ "name": "", "children": [] }));
    }

    #[test]
    fn well_known_types_use_their_json_forms() {
        let sample = build_sample(&input_of("Describe"));

        assert_eq!(sample["at"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(sample["ttl"], json!("0s"));
        assert_eq!(sample["big"], json!(6400));
        assert_eq!(sample["note"], json!(""));
        assert_eq!(sample["attrs"], json!({}));
        assert_eq!(sample["mask"], json!(""));
        assert_eq!(sample["nothing"], json!({}));
        assert_eq!(sample["list"], json!([]));
        assert!(sample.get("extra").is_none());
    }

    #[test]
    fn samples_are_deterministic() {
        let desc = input_of("Describe");
        assert_eq!(build_sample(&desc), build_sample(&desc));
    }
}
