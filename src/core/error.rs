use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// Catalog document failed schema validation or carries duplicate ids/names.
    MalformedCatalog(String),
    /// Data document is corrupt: bad field order, unknown source id, truncation.
    MalformedStore(String),
    StreamNotFound(String),
    StoreClosed,
    ReaderDisposed,
    InvalidArgument(String),
    /// Payload encode/decode failure reported by the serializer.
    Serialization(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::MalformedCatalog(msg) => write!(f, "malformed catalog: {msg}"),
            Error::MalformedStore(msg) => write!(f, "malformed store: {msg}"),
            Error::StreamNotFound(msg) => write!(f, "stream not found: {msg}"),
            Error::StoreClosed => write!(f, "store closed"),
            Error::ReaderDisposed => write!(f, "reader disposed"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Serialization(err) => write!(f, "serialization error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn malformed_store(msg: impl Into<String>) -> Error {
    Error::MalformedStore(msg.into())
}
