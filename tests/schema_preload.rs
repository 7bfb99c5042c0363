use serde_json::json;
use tempfile::tempdir;

use jsonstore::core::{Envelope, Error, StoreConfig, StoreReader, StoreWriter, StreamMetadata};

const PAYLOAD_URI: &str = "https://schemas.example/reading.json";

const DATA_SCHEMA: &str = r##"{
  "type": "array",
  "items": {
    "type": "object",
    "required": ["Envelope", "Data"],
    "properties": {
      "Envelope": { "type": "object" },
      "Data": { "$ref": "https://schemas.example/reading.json#" }
    }
  }
}"##;

fn config() -> StoreConfig {
    StoreConfig::default()
        .with_data_schema(DATA_SCHEMA)
        .with_preloaded_schema(
            PAYLOAD_URI,
            r#"{"type": "object", "required": ["value"], "properties": {"value": {"type": "number"}}}"#,
        )
}

#[test]
fn preloaded_payload_schema_guards_reads() {
    let dir = tempdir().expect("tempdir");
    {
        // Writes are not validated unless asked for.
        let mut writer =
            StoreWriter::create("pre", dir.path(), false, config()).expect("writer");
        writer.open_stream(StreamMetadata::new(1, "r")).expect("stream");
        writer
            .write(&Envelope::new(1, 0, 1, 1), &json!({"value": 1.5}))
            .expect("good");
        writer
            .write(&Envelope::new(1, 1, 2, 2), &json!({"value": "high"}))
            .expect("bad payload still written");
        writer.close().expect("close");
    }

    let mut reader = StoreReader::open("pre", dir.path(), config()).expect("reader");
    reader.open_all_streams().expect("open all");
    let first = reader.move_next().expect("first").expect("record");
    assert_eq!(first.data, json!({"value": 1.5}));
    assert!(matches!(reader.move_next(), Err(Error::MalformedStore(_))));
}

#[test]
fn validate_writes_rejects_before_writing() {
    let dir = tempdir().expect("tempdir");
    let mut writer = StoreWriter::create("pre", dir.path(), false, config().with_validate_writes(true))
        .expect("writer");
    writer.open_stream(StreamMetadata::new(1, "r")).expect("stream");
    assert!(matches!(
        writer.write(&Envelope::new(1, 0, 1, 1), &json!({"v": 1})),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(writer.records_written(), 0);
    assert_eq!(writer.catalog().resolve("r").expect("r").message_count, 0);
}

#[test]
fn missing_preload_fails_when_a_record_needs_it() {
    let dir = tempdir().expect("tempdir");
    {
        let mut writer =
            StoreWriter::create("pre", dir.path(), false, StoreConfig::default()).expect("writer");
        writer.open_stream(StreamMetadata::new(1, "r")).expect("stream");
        writer
            .write(&Envelope::new(1, 0, 1, 1), &json!({"value": 1}))
            .expect("write");
        writer.close().expect("close");
    }
    let config = StoreConfig::default().with_data_schema(DATA_SCHEMA);
    let mut reader = StoreReader::open("pre", dir.path(), config).expect("reader");
    assert!(matches!(reader.read(), Err(Error::MalformedStore(_))));
}

const STORE_SCHEMA_URI: &str = "https://schemas.example/store-data.json";

#[test]
fn data_schema_may_be_a_preloaded_reference() {
    let config = StoreConfig::default()
        .with_data_schema(format!(r#"{{"$ref": "{STORE_SCHEMA_URI}#"}}"#))
        .with_preloaded_schema(STORE_SCHEMA_URI, jsonstore::core::schema::DEFAULT_DATA_SCHEMA)
        .with_validate_writes(true);
    let dir = tempdir().expect("tempdir");
    {
        let mut writer =
            StoreWriter::create("refd", dir.path(), false, config.clone()).expect("writer");
        writer.open_stream(StreamMetadata::new(1, "r")).expect("stream");
        writer
            .write(&Envelope::new(1, 0, 1, 1), &json!({"value": 1}))
            .expect("record accepted");
        writer.close().expect("close");
    }

    let mut reader = StoreReader::open("refd", dir.path(), config).expect("reader");
    reader.open_all_streams().expect("open all");
    let record = reader.move_next().expect("move").expect("record");
    assert_eq!(record.data, json!({"value": 1}));
    assert!(reader.move_next().expect("end").is_none());
}

#[test]
fn unresolvable_data_schema_fails_at_open() {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig::default().with_data_schema(format!(r#"{{"$ref": "{STORE_SCHEMA_URI}#"}}"#));
    assert!(matches!(
        StoreWriter::create("refd", dir.path(), false, config),
        Err(Error::InvalidArgument(_))
    ));
}
