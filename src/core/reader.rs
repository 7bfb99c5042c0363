use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::{Map, Value};

use crate::core::catalog::{Catalog, StreamMetadata};
use crate::core::config::{SchemaSet, StoreConfig};
use crate::core::envelope::{Envelope, Message, StreamId};
use crate::core::error::malformed_store;
use crate::core::interval::{ReplayDescriptor, TimeInterval};
use crate::core::layout::{resolve_latest_version, StoreLayout};
use crate::core::schema::Schema;
use crate::core::token::{RecordParser, DATA_FIELD, ENVELOPE_FIELD};
use crate::core::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// No cursor yet; the first `seek`, `move_next` or `read` opens one.
    Unseeked,
    /// Linear scan towards the start of the replay window is in progress.
    Seeking,
    /// Cursor sits on a record boundary.
    Positioned,
    /// Data document fully consumed.
    Exhausted,
    /// A malformed record was hit; every further read reports it again.
    Faulted,
    Disposed,
}

/// Forward-only cursor over the data document.
struct Cursor {
    parser: RecordParser<BufReader<File>>,
    /// Envelope parsed by `seek` whose data has not been read.
    pending: Option<(Envelope, Value)>,
}

impl Cursor {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            parser: RecordParser::new(BufReader::new(file)),
            pending: None,
        })
    }

    fn next_envelope(&mut self, catalog: &Catalog) -> Result<Option<(Envelope, Value)>> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        let Some((envelope, raw)) = self.parser.next_envelope()? else {
            return Ok(None);
        };
        if !catalog.contains_id(envelope.source_id) {
            return Err(malformed_store(format!(
                "message source/stream id ({}) was not found in catalog",
                envelope.source_id
            )));
        }
        Ok(Some((envelope, raw)))
    }

    fn next_record(&mut self, catalog: &Catalog, schema: &Schema) -> Result<Option<Message<Value>>> {
        let Some((envelope, raw)) = self.next_envelope(catalog)? else {
            return Ok(None);
        };
        let data = self.parser.read_data()?;
        let data = validate_record(schema, raw, data)?;
        Ok(Some(Message::new(envelope, data)))
    }
}

/// Check one `{Envelope, Data}` record against the data schema and hand the
/// data back.
fn validate_record(schema: &Schema, envelope: Value, data: Value) -> Result<Value> {
    let mut record = Map::with_capacity(2);
    record.insert(ENVELOPE_FIELD.to_string(), envelope);
    record.insert(DATA_FIELD.to_string(), data);
    let record = Value::Object(record);
    schema
        .validate(&record)
        .map_err(|err| malformed_store(format!("record failed validation: {err}")))?;
    match record {
        Value::Object(mut record) => Ok(record.remove(DATA_FIELD).unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

/// Filtered, single-pass reader over one store.
///
/// Holds the catalog, the set of enabled streams, the active
/// [`ReplayDescriptor`] and one explicit cursor. `move_next` and `read`
/// advance the same cursor, so they may be interleaved freely: `move_next`
/// returns the next record passing the filters, `read` the next record
/// whatever it is.
///
/// # Example
///
/// ```no_run
/// use jsonstore::core::{ReplayDescriptor, StoreConfig, StoreReader, TimeInterval};
///
/// let mut reader = StoreReader::open("session", "./stores", StoreConfig::default())?;
/// reader.open_stream_by_name("audio")?;
/// reader.seek(ReplayDescriptor::new(TimeInterval::new(0, 5_000_000_000), true))?;
/// while let Some(message) = reader.move_next()? {
///     println!("{} {}", message.envelope.originating_time, message.data);
/// }
/// # Ok::<(), jsonstore::core::Error>(())
/// ```
pub struct StoreReader {
    layout: StoreLayout,
    schemas: SchemaSet,
    catalog: Catalog,
    enabled: BTreeSet<StreamId>,
    descriptor: ReplayDescriptor,
    state: ReaderState,
    cursor: Option<Cursor>,
    fault: Option<String>,
}

impl StoreReader {
    /// Open the latest version of store `name` under `base` and load its
    /// catalog. No stream is enabled yet.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument`: empty name or bad schema text
    /// - `Error::Io`: catalog missing or unreadable
    /// - `Error::MalformedCatalog`: catalog fails validation
    pub fn open(name: &str, base: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let schemas = config.compile()?;
        let dir = resolve_latest_version(name, base)?;
        let layout = StoreLayout::new(dir, name, &config.extension)?;
        let catalog = Catalog::load(layout.catalog_path(), &schemas.catalog)?;
        log::debug!(
            "opened store {} at {} ({} streams, coverage {:?})",
            name,
            layout.dir().display(),
            catalog.len(),
            catalog.coverage()
        );

        Ok(Self {
            layout,
            schemas,
            catalog,
            enabled: BTreeSet::new(),
            descriptor: ReplayDescriptor::replay_all(),
            state: ReaderState::Unseeked,
            cursor: None,
            fault: None,
        })
    }

    pub fn name(&self) -> &str {
        self.layout.name()
    }

    /// Concrete (versioned) directory the store was read from.
    pub fn path(&self) -> &Path {
        self.layout.dir()
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn descriptor(&self) -> ReplayDescriptor {
        self.descriptor
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn available_streams(&self) -> &[StreamMetadata] {
        self.catalog.streams()
    }

    /// Earliest to latest originating time across all streams.
    pub fn originating_time_interval(&self) -> TimeInterval {
        self.catalog.coverage()
    }

    pub fn enabled_streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.enabled.iter().copied()
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        self.catalog.contains(name)
    }

    pub fn metadata(&self, name: &str) -> Result<&StreamMetadata> {
        self.catalog.resolve(name)
    }

    pub fn metadata_by_id(&self, id: StreamId) -> Result<&StreamMetadata> {
        self.catalog.resolve_id(id)
    }

    /// Enable delivery of a stream. Returns `false` if it was already enabled.
    ///
    /// `metadata` must name a catalog entry by both id and name.
    pub fn open_stream(&mut self, metadata: &StreamMetadata) -> Result<bool> {
        self.ensure_live()?;
        let known = self.catalog.resolve_id(metadata.id)?;
        if known.name != metadata.name {
            return Err(Error::InvalidArgument(format!(
                "stream id {} is {} in this store, not {}",
                metadata.id, known.name, metadata.name
            )));
        }
        Ok(self.enabled.insert(metadata.id))
    }

    pub fn open_stream_by_name(&mut self, name: &str) -> Result<&StreamMetadata> {
        self.ensure_live()?;
        let id = self.catalog.resolve(name)?.id;
        self.enabled.insert(id);
        self.catalog.resolve_id(id)
    }

    pub fn open_stream_by_id(&mut self, id: StreamId) -> Result<&StreamMetadata> {
        self.ensure_live()?;
        self.catalog.resolve_id(id)?;
        self.enabled.insert(id);
        self.catalog.resolve_id(id)
    }

    pub fn open_all_streams(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.enabled
            .extend(self.catalog.streams().iter().map(|m| m.id));
        Ok(())
    }

    /// Stop delivering a stream, effective from the next record scanned.
    /// Returns `false` if it was not enabled.
    pub fn close_stream(&mut self, id: StreamId) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.enabled.remove(&id))
    }

    pub fn close_stream_by_name(&mut self, name: &str) -> Result<bool> {
        self.ensure_live()?;
        let id = self.catalog.resolve(name)?.id;
        Ok(self.enabled.remove(&id))
    }

    pub fn close_all_streams(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.enabled.clear();
        Ok(())
    }

    /// Restart from the top of the data document and advance to the first
    /// record whose governing timestamp is strictly after
    /// `descriptor.interval.left`. `descriptor` becomes the active filter.
    ///
    /// There is no index: every seek is a linear rescan.
    ///
    /// # Errors
    ///
    /// - `Error::MalformedStore`: a record on the way is out of order,
    ///   truncated, invalid, or names an unknown stream
    /// - `Error::ReaderDisposed`
    pub fn seek(&mut self, descriptor: ReplayDescriptor) -> Result<()> {
        self.ensure_live()?;
        self.descriptor = descriptor;
        self.fault = None;
        self.cursor = None;
        self.state = ReaderState::Seeking;

        let mut cursor = Cursor::open(&self.layout.data_path())?;
        let mut skipped = 0u64;
        loop {
            let next = self.guard(cursor.next_envelope(&self.catalog))?;
            let Some((envelope, raw)) = next else {
                log::debug!("seek ran off the end after {skipped} records");
                self.cursor = Some(cursor);
                self.state = ReaderState::Exhausted;
                return Ok(());
            };
            let t = envelope.governing_time(descriptor.use_originating_time);
            if descriptor.interval.left < t {
                cursor.pending = Some((envelope, raw));
                break;
            }
            let data = self.guard(cursor.parser.read_data())?;
            self.guard(validate_record(&self.schemas.record, raw, data))?;
            skipped += 1;
        }

        log::debug!(
            "seek to {} skipped {} records",
            descriptor.interval.left,
            skipped
        );
        self.cursor = Some(cursor);
        self.state = ReaderState::Positioned;
        Ok(())
    }

    /// Advance to the next record that lies inside the replay window and
    /// belongs to an enabled stream.
    ///
    /// A record past the window's right edge closes its stream; scanning
    /// continues for the others. Returns `Ok(None)` once the document is
    /// exhausted or no stream is enabled.
    pub fn move_next(&mut self) -> Result<Option<Message<Value>>> {
        self.ensure_readable()?;
        if self.state == ReaderState::Unseeked {
            self.seek(self.descriptor)?;
        }

        while !self.enabled.is_empty() {
            let Some(message) = self.advance()? else {
                return Ok(None);
            };
            let envelope = message.envelope;
            let t = envelope.governing_time(self.descriptor.use_originating_time);
            if self.descriptor.interval.point_is_within(t)
                && self.enabled.contains(&envelope.source_id)
            {
                return Ok(Some(message));
            }
            if self.descriptor.interval.right < t && self.enabled.remove(&envelope.source_id) {
                log::debug!(
                    "stream {} passed the replay window at {}; closing",
                    envelope.source_id,
                    t
                );
            }
        }
        Ok(None)
    }

    /// Next raw record from the shared cursor, ignoring the enabled set and
    /// the replay window. Starts at the top of the document if no cursor is
    /// open.
    pub fn read(&mut self) -> Result<Option<Message<Value>>> {
        self.ensure_readable()?;
        if self.state == ReaderState::Unseeked {
            self.cursor = Some(Cursor::open(&self.layout.data_path())?);
            self.state = ReaderState::Positioned;
        }
        self.advance()
    }

    /// Iterate `move_next` until it returns `None` or fails.
    pub fn replay(&mut self) -> Replay<'_> {
        Replay {
            reader: self,
            done: false,
        }
    }

    /// Release the data file. Every later operation fails with
    /// `Error::ReaderDisposed`.
    pub fn dispose(&mut self) {
        self.cursor = None;
        self.state = ReaderState::Disposed;
    }

    fn advance(&mut self) -> Result<Option<Message<Value>>> {
        if self.state == ReaderState::Exhausted {
            return Ok(None);
        }
        let result = match self.cursor.as_mut() {
            Some(cursor) => cursor.next_record(&self.catalog, &self.schemas.record),
            None => return Ok(None),
        };
        match self.guard(result)? {
            Some(message) => Ok(Some(message)),
            None => {
                self.state = ReaderState::Exhausted;
                Ok(None)
            }
        }
    }

    /// Latch `MalformedStore` so the reader keeps reporting it.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(Error::MalformedStore(msg)) = &result {
            self.fault = Some(msg.clone());
            self.cursor = None;
            self.state = ReaderState::Faulted;
        }
        result
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == ReaderState::Disposed {
            return Err(Error::ReaderDisposed);
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        self.ensure_live()?;
        if let Some(fault) = &self.fault {
            return Err(Error::MalformedStore(fault.clone()));
        }
        Ok(())
    }
}

pub struct Replay<'a> {
    reader: &'a mut StoreReader,
    done: bool,
}

impl Iterator for Replay<'_> {
    type Item = Result<Message<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.move_next() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::writer::StoreWriter;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    /// Stream A (id 1) at 1, 5, 10 and stream B (id 2) at 5, 10, 15,
    /// written interleaved.
    fn two_stream_store() -> TempDir {
        let dir = tempdir().expect("tempdir");
        let mut writer =
            StoreWriter::create("s", dir.path(), false, StoreConfig::default()).expect("create");
        writer.open_stream(StreamMetadata::new(1, "A")).expect("A");
        writer.open_stream(StreamMetadata::new(2, "B")).expect("B");
        for (seq, (a, b)) in [(1, 5), (5, 10), (10, 15)].into_iter().enumerate() {
            let seq = seq as u64;
            writer
                .write(&Envelope::new(1, seq, a, a), &json!({"a": a}))
                .expect("write A");
            writer
                .write(&Envelope::new(2, seq, b, b), &json!({"b": b}))
                .expect("write B");
        }
        writer.close().expect("close");
        dir
    }

    fn times(reader: &mut StoreReader) -> Vec<(StreamId, i64)> {
        reader
            .replay()
            .map(|m| m.expect("message"))
            .map(|m| (m.envelope.source_id, m.envelope.originating_time))
            .collect()
    }

    #[test]
    fn nothing_enabled_yields_nothing() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        assert_eq!(reader.state(), ReaderState::Unseeked);
        assert!(reader.move_next().expect("move").is_none());
    }

    #[test]
    fn open_all_replays_in_write_order() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.open_all_streams().expect("open all");
        reader
            .seek(ReplayDescriptor::new(TimeInterval::new(0, 100), true))
            .expect("seek");
        assert_eq!(
            times(&mut reader),
            vec![(1, 1), (2, 5), (1, 5), (2, 10), (1, 10), (2, 15)]
        );
        assert_eq!(reader.state(), ReaderState::Exhausted);
        assert_eq!(reader.originating_time_interval(), TimeInterval::new(1, 15));
    }

    #[test]
    fn seek_skips_left_bound_exclusive() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.open_all_streams().expect("open all");
        reader
            .seek(ReplayDescriptor::new(TimeInterval::new(5, 100), true))
            .expect("seek");
        // First record strictly after 5 is B@10; A@5 sits after B@5 and is
        // not revisited.
        assert_eq!(times(&mut reader), vec![(2, 10), (1, 10), (2, 15)]);
    }

    #[test]
    fn right_bound_closes_streams() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.open_all_streams().expect("open all");
        reader
            .seek(ReplayDescriptor::new(TimeInterval::new(0, 9), true))
            .expect("seek");
        assert_eq!(times(&mut reader), vec![(1, 1), (2, 5), (1, 5)]);
        assert_eq!(reader.enabled_streams().count(), 0);
    }

    #[test]
    fn read_ignores_filters_and_shares_cursor() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.open_stream_by_name("B").expect("B");

        let first = reader.read().expect("read").expect("record");
        assert_eq!(first.envelope.source_id, 1);
        assert_eq!(first.data, json!({"a": 1}));

        let next = reader.move_next().expect("move").expect("B record");
        assert_eq!(next.envelope.source_id, 2);
        assert_eq!(next.envelope.originating_time, 5);

        let raw = reader.read().expect("read").expect("record");
        assert_eq!((raw.envelope.source_id, raw.envelope.originating_time), (1, 5));
    }

    #[test]
    fn close_stream_mid_replay() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.open_all_streams().expect("open all");
        reader.seek(ReplayDescriptor::replay_all()).expect("seek");
        reader.move_next().expect("move").expect("A@1");
        assert!(reader.close_stream_by_name("A").expect("close"));
        assert!(!reader.close_stream(1).expect("already closed"));
        assert_eq!(times(&mut reader), vec![(2, 5), (2, 10), (2, 15)]);
    }

    #[test]
    fn unknown_stream_lookups() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        assert!(reader.contains("A").expect("contains"));
        assert!(!reader.contains("C").expect("contains"));
        assert!(matches!(reader.contains(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            reader.open_stream_by_name("C"),
            Err(Error::StreamNotFound(_))
        ));
        assert!(matches!(reader.open_stream_by_id(7), Err(Error::StreamNotFound(_))));
        let b = reader.metadata("B").expect("B").clone();
        assert!(reader.open_stream(&b).expect("open"));
        assert!(!reader.open_stream(&b).expect("open again"));
    }

    #[test]
    fn open_stream_rejects_mismatched_metadata() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        let renamed = StreamMetadata::new(1, "B");
        assert!(matches!(
            reader.open_stream(&renamed),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(reader.enabled_streams().count(), 0);
        let a = reader.metadata_by_id(1).expect("A").clone();
        assert!(reader.open_stream(&a).expect("open A"));
    }

    #[test]
    fn disposed_reader_rejects_everything() {
        let dir = two_stream_store();
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.dispose();
        assert!(matches!(reader.move_next(), Err(Error::ReaderDisposed)));
        assert!(matches!(reader.read(), Err(Error::ReaderDisposed)));
        assert!(matches!(
            reader.seek(ReplayDescriptor::replay_all()),
            Err(Error::ReaderDisposed)
        ));
        assert!(matches!(reader.open_all_streams(), Err(Error::ReaderDisposed)));
    }

    #[test]
    fn unknown_source_id_faults_reader() {
        let dir = two_stream_store();
        std::fs::write(
            dir.path().join("s.Data.json"),
            r#"[{"Envelope":{"SourceId":9,"SequenceId":0,"OriginatingTime":1,"Time":1},"Data":1}]"#,
        )
        .expect("rewrite data");
        let mut reader = StoreReader::open("s", dir.path(), StoreConfig::default()).expect("open");
        reader.open_all_streams().expect("open all");
        assert!(matches!(reader.move_next(), Err(Error::MalformedStore(_))));
        assert_eq!(reader.state(), ReaderState::Faulted);
        assert!(matches!(reader.move_next(), Err(Error::MalformedStore(_))));
        assert!(matches!(reader.read(), Err(Error::MalformedStore(_))));
    }
}
