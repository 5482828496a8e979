//! Offline-resilient irrigation controller core.
//!
//! Everything here is hardware- and network-agnostic: collaborators are
//! reached through the traits in [`link`], and the binary crate supplies the
//! concrete MQTT, HTTP, GPIO and file-backed implementations.

pub mod app;
pub mod chat;
pub mod clock;
pub mod control;
pub mod error;
pub mod health;
pub mod link;
pub mod remote;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod uploader;

pub use app::{Controller, Intervals, Io, Settings};
pub use clock::Tick;
pub use control::Thresholds;
pub use error::{LinkError, RemoteError, StoreError};
pub use store::{RingStore, StorageDevice};
