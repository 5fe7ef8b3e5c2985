//! Field Ops Client - Hosted Backend Adapters
//!
//! Implements the `fieldops-core` ports against a PostgREST table API, an
//! object storage API and a Phoenix-channel realtime feed. Also provides the
//! file-backed session store and a configured location provider for hosts
//! without positioning hardware.

pub mod config;
pub mod error;
pub mod location;
pub mod persistence;
pub mod realtime;
pub mod rest;
pub mod rows;
pub mod storage;

pub use config::{BackendConfig, ConfigError, RealtimeConfig, ReconnectConfig};
pub use error::ClientError;
pub use location::{ConfiguredLocation, LocationConfig};
pub use persistence::{FileKeyValueStore, PersistenceError};
pub use realtime::{Backoff, RealtimeClient};
pub use rest::PostgrestClient;
pub use storage::StorageClient;
