//! Stream catalog: the manifest of every logical stream in a store.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::envelope::{Envelope, StreamId};
use crate::core::interval::{TimeInterval, Timestamp};
use crate::core::schema::Schema;
use crate::core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamMetadata {
    pub id: StreamId,
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub partition_name: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default = "empty_left")]
    pub first_message_time: Timestamp,
    #[serde(default = "empty_right")]
    pub last_message_time: Timestamp,
    pub first_message_originating_time: Timestamp,
    pub last_message_originating_time: Timestamp,
}

fn empty_left() -> Timestamp {
    TimeInterval::empty().left
}

fn empty_right() -> Timestamp {
    TimeInterval::empty().right
}

impl StreamMetadata {
    /// Metadata for a stream that has not carried any message yet.
    pub fn new(id: StreamId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            type_name: None,
            partition_name: None,
            message_count: 0,
            first_message_time: empty_left(),
            last_message_time: empty_right(),
            first_message_originating_time: empty_left(),
            last_message_originating_time: empty_right(),
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_partition_name(mut self, partition_name: impl Into<String>) -> Self {
        self.partition_name = Some(partition_name.into());
        self
    }

    pub fn with_originating_times(mut self, first: Timestamp, last: Timestamp) -> Self {
        self.first_message_originating_time = first;
        self.last_message_originating_time = last;
        self
    }

    pub fn originating_interval(&self) -> TimeInterval {
        TimeInterval::new(
            self.first_message_originating_time,
            self.last_message_originating_time,
        )
    }

    pub fn time_interval(&self) -> TimeInterval {
        TimeInterval::new(self.first_message_time, self.last_message_time)
    }

    /// Fold one written envelope into the counters and time bounds.
    pub(crate) fn observe(&mut self, envelope: &Envelope) {
        if self.message_count == 0 {
            self.first_message_time = envelope.time;
            self.last_message_time = envelope.time;
            self.first_message_originating_time = envelope.originating_time;
            self.last_message_originating_time = envelope.originating_time;
        } else {
            self.first_message_time = self.first_message_time.min(envelope.time);
            self.last_message_time = self.last_message_time.max(envelope.time);
            self.first_message_originating_time = self
                .first_message_originating_time
                .min(envelope.originating_time);
            self.last_message_originating_time = self
                .last_message_originating_time
                .max(envelope.originating_time);
        }
        self.message_count += 1;
    }
}

/// Ordered, id- and name-unique sequence of stream metadata.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    streams: Vec<StreamMetadata>,
    coverage: TimeInterval,
}

impl Catalog {
    /// Load and validate a catalog document.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: the file cannot be opened
    /// - `Error::MalformedCatalog`: not JSON, schema violation, or duplicate ids/names
    pub fn load(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let document: Value = serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            Error::MalformedCatalog(format!("{}: {err}", path.display()))
        })?;
        let catalog = Self::from_document(document, schema)?;
        log::debug!(
            "loaded catalog {} with {} streams",
            path.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    pub fn from_document(document: Value, schema: &Schema) -> Result<Self> {
        schema
            .validate(&document)
            .map_err(|err| Error::MalformedCatalog(err.to_string()))?;
        let streams: Vec<StreamMetadata> = serde_json::from_value(document)
            .map_err(|err| Error::MalformedCatalog(err.to_string()))?;
        Self::from_streams(streams)
    }

    pub fn from_streams(streams: Vec<StreamMetadata>) -> Result<Self> {
        let mut ids = HashSet::with_capacity(streams.len());
        let mut names = HashSet::with_capacity(streams.len());
        for stream in &streams {
            if stream.id == 0 {
                return Err(Error::MalformedCatalog(format!(
                    "stream {} has id 0; ids must be positive",
                    stream.name
                )));
            }
            if !ids.insert(stream.id) {
                return Err(Error::MalformedCatalog(format!(
                    "duplicate stream id {}",
                    stream.id
                )));
            }
            if !names.insert(stream.name.as_str()) {
                return Err(Error::MalformedCatalog(format!(
                    "duplicate stream name {}",
                    stream.name
                )));
            }
        }
        let mut catalog = Self {
            streams,
            coverage: TimeInterval::empty(),
        };
        catalog.refresh_coverage();
        Ok(catalog)
    }

    pub fn streams(&self) -> &[StreamMetadata] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Originating-time coverage of all streams; empty for an empty catalog.
    pub fn coverage(&self) -> TimeInterval {
        self.coverage
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.streams.iter().any(|m| m.name == name))
    }

    pub fn contains_id(&self, id: StreamId) -> bool {
        self.streams.iter().any(|m| m.id == id)
    }

    pub fn resolve(&self, name: &str) -> Result<&StreamMetadata> {
        validate_name(name)?;
        self.streams
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::StreamNotFound(format!("stream named '{name}'")))
    }

    pub fn resolve_id(&self, id: StreamId) -> Result<&StreamMetadata> {
        self.streams
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::StreamNotFound(format!("stream id {id}")))
    }

    pub(crate) fn insert(&mut self, metadata: StreamMetadata) -> Result<&StreamMetadata> {
        validate_name(&metadata.name)?;
        if metadata.id == 0 {
            return Err(Error::InvalidArgument("stream id must be positive".into()));
        }
        if self.contains_id(metadata.id) {
            return Err(Error::InvalidArgument(format!(
                "stream id {} already exists",
                metadata.id
            )));
        }
        if self.streams.iter().any(|m| m.name == metadata.name) {
            return Err(Error::InvalidArgument(format!(
                "stream name {} already exists",
                metadata.name
            )));
        }
        self.streams.push(metadata);
        self.refresh_coverage();
        let index = self.streams.len() - 1;
        Ok(&self.streams[index])
    }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamMetadata> {
        self.streams.iter_mut().find(|m| m.id == id)
    }

    pub(crate) fn refresh_coverage(&mut self) {
        let intervals: Vec<TimeInterval> = self
            .streams
            .iter()
            .map(StreamMetadata::originating_interval)
            .collect();
        self.coverage = TimeInterval::coverage(&intervals);
    }

    /// Write the catalog document through a temp file and rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, &self.streams).map_err(Error::Serialization)?;
        out.write_all(b"\n")?;
        let file = out.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument("stream name cannot be empty".into()));
    }
    Ok(())
}
