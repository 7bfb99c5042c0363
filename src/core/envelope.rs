use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::interval::Timestamp;
use crate::core::serializer::{JsonSerializer, Serializer};
use crate::core::Result;

pub type StreamId = u32;

/// Per-record metadata, written verbatim ahead of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub source_id: StreamId,
    pub sequence_id: u64,
    pub originating_time: Timestamp,
    pub time: Timestamp,
}

impl Envelope {
    pub fn new(
        source_id: StreamId,
        sequence_id: u64,
        originating_time: Timestamp,
        time: Timestamp,
    ) -> Self {
        Self {
            source_id,
            sequence_id,
            originating_time,
            time,
        }
    }

    /// Timestamp that governs replay filtering.
    pub fn governing_time(&self, use_originating_time: bool) -> Timestamp {
        if use_originating_time {
            self.originating_time
        } else {
            self.time
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub envelope: Envelope,
    pub data: T,
}

impl<T> Message<T> {
    pub fn new(envelope: Envelope, data: T) -> Self {
        Self { envelope, data }
    }
}

impl Message<Value> {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        JsonSerializer.decode(&self.data)
    }
}
