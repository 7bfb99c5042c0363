//! Interleaved multi-stream JSON message store.
//!
//! A store is a pair of documents in one directory: a catalog listing every
//! stream, and a data document holding `{Envelope, Data}` records from all
//! streams interleaved in write order.

pub mod admission;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod envelope;
pub mod error;
pub mod interval;
pub mod layout;
pub mod multiplex;
pub mod reader;
pub mod schema;
pub mod serializer;
pub mod token;
pub mod wait;
pub mod writer;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use cancel::CancellationToken;
pub use catalog::{Catalog, StreamMetadata};
pub use config::{SchemaSet, StoreConfig};
pub use envelope::{Envelope, Message, StreamId};
pub use error::{Error, Result};
pub use interval::{ReplayDescriptor, TimeInterval, Timestamp};
pub use layout::{catalog_file_name, data_file_name, resolve_latest_version, StoreLayout};
pub use multiplex::{Producer, StoreMultiplexer, WriteStats};
pub use reader::{ReaderState, Replay, StoreReader};
pub use schema::{Schema, SchemaRegistry, ValidationError};
pub use serializer::{JsonSerializer, Serializer};
pub use writer::StoreWriter;
