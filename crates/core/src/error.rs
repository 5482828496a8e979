use thiserror::Error;

/// Faults raised by the durable storage device or the ring store on top of it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("access at {offset}+{len} exceeds device size {size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("device i/o failed: {0}")]
    Io(String),
    #[error("ring store not initialised")]
    Uninitialized,
}

/// Faults raised by network collaborators. Every variant is transient from
/// the core's point of view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link offline")]
    Offline,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// A remote control message that could not be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("unrecognised control path '{0}'")]
    UnknownPath(String),
    #[error("bad value for {field}: {value}")]
    BadValue { field: &'static str, value: String },
    #[error("no control fields in payload")]
    Empty,
}
