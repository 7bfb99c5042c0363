use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;

use serde_json::Value;

use crate::core::catalog::{Catalog, StreamMetadata};
use crate::core::config::{SchemaSet, StoreConfig};
use crate::core::envelope::Envelope;
use crate::core::layout::{create_store_dir, StoreLayout};
use crate::core::token::{record_value, RecordWriter};
use crate::core::{Error, Result};

/// Writes one store: a data document of `{Envelope, Data}` records plus the
/// catalog describing every stream that appears in it.
///
/// The writer owns its output files exclusively. Records are appended in
/// call order; nothing is sorted.
pub struct StoreWriter {
    layout: StoreLayout,
    config: StoreConfig,
    schemas: SchemaSet,
    catalog: Catalog,
    records: Option<RecordWriter<BufWriter<File>>>,
}

impl StoreWriter {
    /// Create a new store named `name` under `base`.
    ///
    /// With `create_subdirectory` the files go into the next numbered version
    /// directory (`{name}.0000`, `{name}.0001`, ...).
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument`: empty or path-like name, bad schema text
    /// - `Error::Io`: failed to create the directory or files
    pub fn create(
        name: &str,
        base: impl AsRef<Path>,
        create_subdirectory: bool,
        config: StoreConfig,
    ) -> Result<Self> {
        let schemas = config.compile()?;
        let dir = create_store_dir(name, base, create_subdirectory)?;
        let layout = StoreLayout::new(dir, name, &config.extension)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(layout.data_path())?;
        let records = RecordWriter::new(BufWriter::new(file))?;

        let catalog = Catalog::default();
        catalog.save(layout.catalog_path())?;
        log::debug!("created store {} at {}", name, layout.dir().display());

        Ok(Self {
            layout,
            config,
            schemas,
            catalog,
            records: Some(records),
        })
    }

    pub fn name(&self) -> &str {
        self.layout.name()
    }

    /// Concrete (versioned) directory holding the store files.
    pub fn path(&self) -> &Path {
        self.layout.dir()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_closed(&self) -> bool {
        self.records.is_none()
    }

    /// Records written so far.
    pub fn records_written(&self) -> u64 {
        self.records.as_ref().map(RecordWriter::records).unwrap_or(0)
    }

    /// Add a stream to the catalog.
    ///
    /// Message count and time bounds are maintained from the envelopes written
    /// afterwards; bounds already present on `metadata` survive only if the
    /// stream never carries a message.
    pub fn open_stream(&mut self, mut metadata: StreamMetadata) -> Result<&StreamMetadata> {
        if self.is_closed() {
            return Err(Error::StoreClosed);
        }
        metadata.message_count = 0;
        let id = metadata.id;
        self.catalog.insert(metadata)?;
        self.catalog.save(self.layout.catalog_path())?;
        self.catalog.resolve_id(id)
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// - `Error::StoreClosed`: the writer was closed
    /// - `Error::StreamNotFound`: `envelope.source_id` was never opened
    /// - `Error::InvalidArgument`: record violates the data schema (with
    ///   `validate_writes`)
    pub fn write(&mut self, envelope: &Envelope, data: &Value) -> Result<()> {
        let records = self.records.as_mut().ok_or(Error::StoreClosed)?;
        if self.config.validate_writes {
            let record = record_value(envelope, data)?;
            self.schemas
                .record
                .validate(&record)
                .map_err(|err| Error::InvalidArgument(format!("record rejected: {err}")))?;
        }
        let metadata = self
            .catalog
            .get_mut(envelope.source_id)
            .ok_or_else(|| Error::StreamNotFound(format!("stream id {}", envelope.source_id)))?;
        records.write_record(envelope, data)?;
        metadata.observe(envelope);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.records.as_mut().ok_or(Error::StoreClosed)?.flush()
    }

    /// Terminate the data document and write the final catalog. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut records) = self.records.take() else {
            return Ok(());
        };
        records.finish()?;
        self.catalog.refresh_coverage();
        self.catalog.save(self.layout.catalog_path())?;
        log::debug!(
            "closed store {} with {} records in {} streams",
            self.layout.name(),
            records.records(),
            self.catalog.len()
        );
        Ok(())
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("closing store {} failed: {err}", self.layout.name());
        }
    }
}
