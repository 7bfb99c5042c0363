//! Interleaved multi-stream JSON message store.
//!
//! Many logical streams are written round-robin into one sequential data
//! document and replayed with per-stream enable/disable and time-window
//! filtering.

pub mod core;

pub use crate::core::{
    AdmissionGate, Catalog, Envelope, Error, Message, ReplayDescriptor, Result, StoreConfig,
    StoreMultiplexer, StoreReader, StoreWriter, StreamMetadata, TimeInterval,
};
