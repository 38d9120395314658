use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::Value;

/// Build a message of type `desc` from its JSON form.
///
/// Both proto and JSON field names are accepted; unknown fields are ignored and `null`
/// stands for the empty message.
pub(crate) fn to_message(
    desc: &MessageDescriptor,
    value: Value,
) -> Result<DynamicMessage, serde_json::Error> {
    let value = match value {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };

    DynamicMessage::deserialize_with_options(
        desc.clone(),
        value,
        &DeserializeOptions::new().deny_unknown_fields(false),
    )
}

/// JSON form of `msg`, keyed by proto field names, default values included.
pub(crate) fn to_json(msg: &DynamicMessage) -> Result<Value, serde_json::Error> {
    msg.serialize_with_options(
        serde_json::value::Serializer,
        &SerializeOptions::new()
            .skip_default_fields(false)
            .use_proto_field_name(true),
    )
}
