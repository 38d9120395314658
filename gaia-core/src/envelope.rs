//! The error envelope: application error fields carried in gRPC status metadata.
//!
//! A failed call whose status metadata holds [`MARKER_KEY`] set to JSON `true` was produced
//! by a gaia server; every other failure is a plain transport failure. Each whitelisted
//! field travels as its own metadata entry holding the field's JSON encoding.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

use crate::error::{ApplicationError, CallError};

/// Reserved metadata key marking an encoded application error. Must not contain `:`.
pub const MARKER_KEY: &str = "__is_gaia";

/// Status message of every encoded application error. The real message only crosses the
/// wire when `message` is a whitelisted field.
pub const ENCODED_STATUS_MESSAGE: &str = "application error";

const RESERVED_KEYS: &[&str] = &[MARKER_KEY, "content-type", "te", "user-agent"];

pub type Result<T> = std::result::Result<T, FieldsError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldsError {
    #[error("error field list must not be empty")]
    Empty,

    #[error("error field '{0}' is not a valid ascii metadata key")]
    InvalidKey(String),

    #[error("error field '{0}' uses a reserved metadata key")]
    Reserved(String),

    #[error("error field '{0}' is listed more than once")]
    Duplicate(String),
}

#[derive(Debug, Clone)]
struct ErrorField {
    name: String,
    key: AsciiMetadataKey,
}

/// The ordered whitelist of error fields allowed to cross the wire.
#[derive(Debug, Clone)]
pub struct ErrorFields {
    fields: Arc<[ErrorField]>,
}

impl Default for ErrorFields {
    /// `["code", "message"]`
    fn default() -> Self {
        let fields = ["code", "message"].map(|name| ErrorField {
            name: name.to_string(),
            key: AsciiMetadataKey::from_static(name),
        });
        Self {
            fields: Arc::from(fields),
        }
    }
}

impl ErrorFields {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<ErrorField> = Vec::new();

        for name in names {
            let name = name.into();
            let key = AsciiMetadataKey::from_bytes(name.as_bytes())
                .map_err(|_| FieldsError::InvalidKey(name.clone()))?;

            if RESERVED_KEYS.contains(&key.as_str()) || key.as_str().starts_with("grpc-") {
                return Err(FieldsError::Reserved(name));
            }
            if fields.iter().any(|f| f.key == key) {
                return Err(FieldsError::Duplicate(name));
            }

            fields.push(ErrorField { name, key });
        }

        if fields.is_empty() {
            return Err(FieldsError::Empty);
        }

        Ok(Self {
            fields: Arc::from(fields),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// JSON text restricted to printable ascii, as metadata values require.
///
/// Everything outside ascii can only occur inside JSON strings, where `\uXXXX` escapes are
/// equivalent.
fn ascii_json(value: &Value) -> String {
    let raw = value.to_string();
    if raw.bytes().all(|b| b < 0x7f) {
        return raw;
    }

    let mut out = String::with_capacity(raw.len() + 16);
    let mut units = [0u16; 2];
    for ch in raw.chars() {
        if (ch as u32) < 0x7f {
            out.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            let _ = write!(out, "\\u{unit:04x}");
        }
    }
    out
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn json_metadata_value(value: &Value) -> Option<AsciiMetadataValue> {
    AsciiMetadataValue::try_from(ascii_json(value)).ok()
}

/// Build the metadata carrying `err`'s whitelisted fields.
///
/// Fields missing from `err` are omitted, never sent as empty values.
#[must_use]
pub fn encode_metadata(err: &ApplicationError, fields: &ErrorFields) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    metadata.insert(
        AsciiMetadataKey::from_static(MARKER_KEY),
        AsciiMetadataValue::from_static("true"),
    );

    for field in fields.fields.iter() {
        let Some(value) = err.get(&field.name) else {
            continue;
        };

        match json_metadata_value(value) {
            Some(v) => {
                metadata.insert(field.key.clone(), v);
            }
            None => {
                tracing::warn!(field = %field.name, "error field is not representable as metadata, omitted");
            }
        }
    }

    metadata
}

/// Encode an application error as the gRPC status a server sends back.
#[must_use]
pub fn encode(err: &ApplicationError, fields: &ErrorFields) -> tonic::Status {
    tonic::Status::with_metadata(
        tonic::Code::Unknown,
        ENCODED_STATUS_MESSAGE,
        encode_metadata(err, fields),
    )
}

/// Rebuild an application error from status metadata.
///
/// Returns `None` when the metadata carries no truthy marker.
#[must_use]
pub fn decode_metadata(metadata: &MetadataMap, fields: &ErrorFields) -> Option<ApplicationError> {
    let marked = metadata
        .get(MARKER_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .is_some_and(|v| is_truthy(&v));
    if !marked {
        return None;
    }

    let mut err = ApplicationError::empty();
    for field in fields.fields.iter() {
        let Some(raw) = metadata.get(field.key.as_str()) else {
            continue;
        };

        let parsed = raw
            .to_str()
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<Value>(s).map_err(|e| e.to_string()));

        match parsed {
            Ok(value) => err.set(field.name.clone(), value),
            Err(error) => {
                tracing::warn!(field = %field.name, %error, "skipping malformed error field");
            }
        }
    }

    Some(err)
}

/// Classify a failed call.
///
/// A status without metadata, or whose metadata lacks the marker, is returned unchanged as a
/// transport error.
#[must_use]
pub fn decode(status: tonic::Status, fields: &ErrorFields) -> CallError {
    if status.metadata().is_empty() {
        return CallError::Transport(status);
    }

    match decode_metadata(status.metadata(), fields) {
        Some(err) => CallError::Application(err),
        None => CallError::Transport(status),
    }
}
