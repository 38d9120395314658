use serde_json::{Map, Value};

/// Message reported by an [`ApplicationError`] that carries no `message` field.
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

/// An application-level failure raised by a controller, or rebuilt from the wire.
///
/// The error is a bag of named JSON fields. `message` is an ordinary field; when it is
/// absent the error still displays [`UNKNOWN_ERROR_MESSAGE`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationError {
    fields: Map<String, Value>,
}

impl ApplicationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("message".to_string(), Value::String(message.into()));
        Self { fields }
    }

    /// An error with no fields at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// `code` as a string, when present and a string.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.fields.get("code").and_then(Value::as_str)
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self.fields.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => UNKNOWN_ERROR_MESSAGE.to_string(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code}: {}", self.message()),
            None => f.write_str(&self.message()),
        }
    }
}

impl std::error::Error for ApplicationError {}

impl From<serde_json::Error> for ApplicationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with("code", "INVALID_JSON")
    }
}

/// Which side of the wire a client-side failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Network or infrastructure failure; nothing from the remote application.
    Transport,
    /// A failure raised by the remote controller and carried in the error envelope.
    Application,
}

/// Error returned by a bound client method.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(#[source] tonic::Status),

    #[error("application error: {0}")]
    Application(#[source] ApplicationError),
}

impl CallError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Transport,
            Self::Application(_) => ErrorClass::Application,
        }
    }

    #[must_use]
    pub fn as_application(&self) -> Option<&ApplicationError> {
        match self {
            Self::Application(err) => Some(err),
            Self::Transport(_) => None,
        }
    }

    #[must_use]
    pub fn as_status(&self) -> Option<&tonic::Status> {
        match self {
            Self::Transport(status) => Some(status),
            Self::Application(_) => None,
        }
    }
}

/// A failure while binding a plan to clients or controllers. Always fatal for startup.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("failed to resolve controller for '{package}'")]
    Resolve {
        package: String,
        #[source]
        source: crate::controller::ResolveError,
    },

    #[error("rpc method '{method}' not found in {location}")]
    MethodNotFound { method: String, location: String },

    #[error("method '{method}' of '{service}' is streaming; only unary methods can be bound")]
    Streaming { service: String, method: String },

    #[error("invalid host '{host}'")]
    Endpoint {
        host: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("invalid method path for '{method}'")]
    MethodPath {
        method: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error(transparent)]
    Namespace(#[from] crate::namespace::Error),

    #[error(transparent)]
    Register(#[from] crate::transport::RegisterError),
}
