//! Round-robin interleaving of many lazy producers into one store.
//!
//! Every round pulls one message from each live producer in registration
//! order. A producer that reports exhaustion is retired for good. Output order
//! across streams is pull order, never timestamp order; callers that need a
//! globally time-sorted file must sort each producer at the source.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::core::cancel::CancellationToken;
use crate::core::catalog::StreamMetadata;
use crate::core::config::StoreConfig;
use crate::core::envelope::{Message, StreamId};
use crate::core::serializer::{JsonSerializer, Serializer};
use crate::core::writer::StoreWriter;
use crate::core::{Error, Result};

/// Pulls the next message of one stream, `None` once exhausted.
pub type Producer = Box<dyn FnMut() -> Result<Option<Message<Value>>>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub records_written: u64,
    pub producers_retired: usize,
    pub cancelled: bool,
}

pub struct StoreMultiplexer<S: Serializer = JsonSerializer> {
    writer: StoreWriter,
    serializer: S,
    producers: Vec<(StreamId, Producer)>,
}

impl StoreMultiplexer<JsonSerializer> {
    pub fn create(
        name: &str,
        base: impl AsRef<Path>,
        create_subdirectory: bool,
        config: StoreConfig,
    ) -> Result<Self> {
        let writer = StoreWriter::create(name, base, create_subdirectory, config)?;
        Ok(Self::new(writer))
    }

    pub fn new(writer: StoreWriter) -> Self {
        Self::with_serializer(writer, JsonSerializer)
    }
}

impl<S: Serializer> StoreMultiplexer<S> {
    pub fn with_serializer(writer: StoreWriter, serializer: S) -> Self {
        Self {
            writer,
            serializer,
            producers: Vec::new(),
        }
    }

    pub fn writer(&self) -> &StoreWriter {
        &self.writer
    }

    /// Producers registered and not yet retired.
    pub fn live_producers(&self) -> usize {
        self.producers.len()
    }

    /// Open `metadata` on the underlying writer and bind `producer` to it.
    ///
    /// Envelopes pulled from the producer are stamped with the stream's id.
    pub fn register_producer<F>(&mut self, metadata: StreamMetadata, producer: F) -> Result<StreamId>
    where
        F: FnMut() -> Result<Option<Message<Value>>> + 'static,
    {
        if self.writer.is_closed() {
            return Err(Error::StoreClosed);
        }
        let id = self.writer.open_stream(metadata)?.id;
        self.producers.push((id, Box::new(producer)));
        Ok(id)
    }

    /// Register a typed message sequence, encoding payloads lazily as they are
    /// pulled.
    pub fn create_stream<T, I>(&mut self, metadata: StreamMetadata, source: I) -> Result<StreamId>
    where
        T: Serialize + 'static,
        I: IntoIterator<Item = Message<T>>,
        I::IntoIter: 'static,
        S: Clone + 'static,
    {
        let serializer = self.serializer.clone();
        let mut source = source.into_iter();
        self.register_producer(metadata, move || {
            source
                .next()
                .map(|message| -> Result<Message<Value>> {
                    let data = serializer.encode(&message.data)?;
                    Ok(Message::new(message.envelope, data))
                })
                .transpose()
        })
    }

    pub fn write_all(&mut self) -> Result<WriteStats> {
        self.write_all_with_cancel(&CancellationToken::new())
    }

    /// Drain every producer into the store.
    ///
    /// `cancel` is checked before each pull. A cancelled run returns early
    /// with `cancelled` set; records already written stay, and producers not
    /// yet exhausted remain registered.
    pub fn write_all_with_cancel(&mut self, cancel: &CancellationToken) -> Result<WriteStats> {
        if self.writer.is_closed() {
            return Err(Error::StoreClosed);
        }
        let mut live = std::mem::take(&mut self.producers);
        let mut stats = WriteStats::default();
        let result = self.run_rounds(&mut live, cancel, &mut stats);
        self.producers = live;
        result?;

        if stats.cancelled {
            log::info!(
                "write cancelled after {} records; {} producers still live",
                stats.records_written,
                self.producers.len()
            );
        } else {
            log::info!(
                "wrote {} records from {} producers into {}",
                stats.records_written,
                stats.producers_retired,
                self.writer.name()
            );
        }
        Ok(stats)
    }

    fn run_rounds(
        &mut self,
        live: &mut Vec<(StreamId, Producer)>,
        cancel: &CancellationToken,
        stats: &mut WriteStats,
    ) -> Result<()> {
        while !live.is_empty() {
            let mut index = 0;
            while index < live.len() {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    return Ok(());
                }
                let (id, producer) = &mut live[index];
                match producer()? {
                    Some(mut message) => {
                        message.envelope.source_id = *id;
                        self.writer.write(&message.envelope, &message.data)?;
                        stats.records_written += 1;
                        index += 1;
                    }
                    None => {
                        live.remove(index);
                        stats.producers_retired += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Close the underlying writer; later registrations and writes fail with
    /// `Error::StoreClosed`.
    pub fn close(&mut self) -> Result<()> {
        self.producers.clear();
        self.writer.close()
    }

    pub fn into_writer(self) -> StoreWriter {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::Envelope;
    use serde_json::json;
    use tempfile::tempdir;

    fn messages(id: StreamId, times: &[i64]) -> Vec<Message<i64>> {
        times
            .iter()
            .enumerate()
            .map(|(seq, t)| Message::new(Envelope::new(id, seq as u64, *t, *t), *t))
            .collect()
    }

    #[test]
    fn round_robin_order() {
        let dir = tempdir().expect("tempdir");
        let mut mux =
            StoreMultiplexer::create("mux", dir.path(), false, StoreConfig::default()).expect("mux");
        mux.create_stream(StreamMetadata::new(1, "A"), messages(1, &[1, 2, 3]))
            .expect("A");
        mux.create_stream(StreamMetadata::new(2, "B"), messages(2, &[10]))
            .expect("B");

        let stats = mux.write_all().expect("write all");
        assert_eq!(stats.records_written, 4);
        assert_eq!(stats.producers_retired, 2);
        assert!(!stats.cancelled);
        assert_eq!(mux.live_producers(), 0);
        mux.close().expect("close");

        let text = std::fs::read_to_string(dir.path().join("mux.Data.json")).expect("data");
        let doc: Value = serde_json::from_str(&text).expect("valid json");
        let order: Vec<i64> = doc
            .as_array()
            .expect("array")
            .iter()
            .map(|record| record["Data"].as_i64().expect("int"))
            .collect();
        assert_eq!(order, vec![1, 10, 2, 3]);
    }

    #[test]
    fn source_id_is_bound_to_stream() {
        let dir = tempdir().expect("tempdir");
        let mut mux =
            StoreMultiplexer::create("mux", dir.path(), false, StoreConfig::default()).expect("mux");
        let mut sent = false;
        mux.register_producer(StreamMetadata::new(5, "five"), move || {
            if sent {
                return Ok(None);
            }
            sent = true;
            Ok(Some(Message::new(Envelope::new(99, 0, 1, 1), json!("x"))))
        })
        .expect("register");
        mux.write_all().expect("write");
        assert_eq!(
            mux.writer().catalog().resolve_id(5).expect("five").message_count,
            1
        );
    }

    #[test]
    fn producer_error_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let mut mux =
            StoreMultiplexer::create("mux", dir.path(), false, StoreConfig::default()).expect("mux");
        mux.register_producer(StreamMetadata::new(1, "bad"), || {
            Err(Error::InvalidArgument("sensor offline".into()))
        })
        .expect("register");
        assert!(matches!(mux.write_all(), Err(Error::InvalidArgument(_))));
        assert_eq!(mux.live_producers(), 1);
    }

    #[test]
    fn closed_multiplexer_rejects_work() {
        let dir = tempdir().expect("tempdir");
        let mut mux =
            StoreMultiplexer::create("mux", dir.path(), false, StoreConfig::default()).expect("mux");
        mux.close().expect("close");
        assert!(matches!(
            mux.register_producer(StreamMetadata::new(1, "A"), || Ok(None)),
            Err(Error::StoreClosed)
        ));
        assert!(matches!(mux.write_all(), Err(Error::StoreClosed)));
    }
}
