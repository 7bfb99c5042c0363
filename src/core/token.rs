//! Single-pass record codec for the data document.
//!
//! The data document is a JSON array of two-field objects,
//! `{"Envelope": <envelope>, "Data": <data>}`, always in that order. The
//! envelope names the owning stream, so it is parsed and handed to the caller
//! before any byte of the payload is decoded. Only the record currently under
//! the cursor is ever held in memory.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::envelope::Envelope;
use crate::core::error::malformed_store;
use crate::core::{Error, Result};

pub const ENVELOPE_FIELD: &str = "Envelope";
pub const DATA_FIELD: &str = "Data";

const ORDER_HINT: &str = "records must be ordered objects {\"Envelope\": <Envelope>, \"Data\": <Data>}; \
the envelope is read first to learn which stream owns the data";

#[derive(Serialize)]
struct RecordRef<'a> {
    #[serde(rename = "Envelope")]
    envelope: &'a Envelope,
    #[serde(rename = "Data")]
    data: &'a Value,
}

/// Build the `{Envelope, Data}` object for schema validation.
pub fn record_value(envelope: &Envelope, data: &Value) -> Result<Value> {
    serde_json::to_value(RecordRef { envelope, data }).map_err(Error::Serialization)
}

/// Appends records to a data document.
pub struct RecordWriter<W: Write> {
    out: W,
    records: u64,
    finished: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(b"[")?;
        out.flush()?;
        Ok(Self {
            out,
            records: 0,
            finished: false,
        })
    }

    pub fn write_record(&mut self, envelope: &Envelope, data: &Value) -> Result<()> {
        if self.finished {
            return Err(Error::StoreClosed);
        }
        if self.records > 0 {
            self.out.write_all(b",")?;
        }
        self.out.write_all(b"\n")?;
        serde_json::to_writer(&mut self.out, &RecordRef { envelope, data })
            .map_err(Error::Serialization)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Close the array. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.out.write_all(b"\n]\n")?;
        self.out.flush()?;
        self.finished = true;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Before the opening `[`.
    Start,
    /// At a record boundary.
    BetweenRecords { first: bool },
    /// Envelope consumed, `Data` not yet.
    AwaitingData,
    Done,
}

/// Pull parser over a data document.
pub struct RecordParser<R: BufRead> {
    input: R,
    state: ParserState,
    offset: u64,
    records: u64,
    scratch: Vec<u8>,
}

impl<R: BufRead> RecordParser<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            state: ParserState::Start,
            offset: 0,
            records: 0,
            scratch: Vec::with_capacity(256),
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records whose data has been consumed.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_done(&self) -> bool {
        self.state == ParserState::Done
    }

    /// Parse the next record's envelope, leaving its data unread.
    ///
    /// Returns `Ok(None)` at the end of the array. If the previous record's
    /// data was never read it is consumed and discarded first.
    pub fn next_envelope(&mut self) -> Result<Option<(Envelope, Value)>> {
        loop {
            match self.state {
                ParserState::Done => return Ok(None),
                ParserState::AwaitingData => {
                    self.read_data()?;
                }
                ParserState::Start => {
                    self.skip_ws()?;
                    match self.next_byte()? {
                        Some(b'[') => self.state = ParserState::BetweenRecords { first: true },
                        Some(_) => return Err(self.malformed("data document must be an array")),
                        None => return Err(self.malformed("data document is empty")),
                    }
                }
                ParserState::BetweenRecords { first } => {
                    self.skip_ws()?;
                    match self.peek_byte()? {
                        Some(b']') => {
                            self.consume_byte();
                            self.state = ParserState::Done;
                            return Ok(None);
                        }
                        None => {
                            // Writer stopped after a complete record without
                            // closing the array.
                            log::warn!(
                                "data document ends without ']' after {} records",
                                self.records
                            );
                            self.state = ParserState::Done;
                            return Ok(None);
                        }
                        Some(_) => {}
                    }
                    if !first {
                        self.expect_byte(b',', "',' between records")?;
                        self.skip_ws()?;
                    }
                    self.expect_byte(b'{', "record object")?;
                    self.expect_key(ENVELOPE_FIELD)?;
                    let raw = self.read_value()?;
                    let envelope = Envelope::deserialize(&raw)
                        .map_err(|err| self.malformed(&format!("invalid envelope: {err}")))?;
                    self.state = ParserState::AwaitingData;
                    return Ok(Some((envelope, raw)));
                }
            }
        }
    }

    /// Parse the data of the record whose envelope was just returned.
    pub fn read_data(&mut self) -> Result<Value> {
        if self.state != ParserState::AwaitingData {
            return Err(Error::InvalidArgument(
                "read_data called without a pending envelope".into(),
            ));
        }
        self.skip_ws()?;
        self.expect_byte(b',', "',' after envelope")?;
        self.expect_key(DATA_FIELD)?;
        let data = self.read_value()?;
        self.skip_ws()?;
        self.expect_byte(b'}', "end of record object")?;
        self.state = ParserState::BetweenRecords { first: false };
        self.records += 1;
        Ok(data)
    }

    fn expect_key(&mut self, expected: &str) -> Result<()> {
        self.skip_ws()?;
        if self.peek_byte()? != Some(b'"') {
            return Err(self.malformed(&format!("expected field \"{expected}\"")));
        }
        self.scratch.clear();
        self.scan_string()?;
        let key: String = serde_json::from_slice(&self.scratch)
            .map_err(|err| self.malformed(&format!("bad field name: {err}")))?;
        if key != expected {
            return Err(self.malformed(&format!(
                "found field \"{key}\" where \"{expected}\" was expected; {ORDER_HINT}"
            )));
        }
        self.skip_ws()?;
        self.expect_byte(b':', "':' after field name")
    }

    /// Copy the bytes of one JSON value into `scratch` and parse it.
    fn read_value(&mut self) -> Result<Value> {
        self.skip_ws()?;
        self.scratch.clear();
        match self.peek_byte()? {
            Some(b'{') | Some(b'[') => self.scan_container()?,
            Some(b'"') => self.scan_string()?,
            Some(_) => self.scan_scalar()?,
            None => return Err(self.truncated()),
        }
        serde_json::from_slice(&self.scratch)
            .map_err(|err| self.malformed(&format!("invalid value: {err}")))
    }

    fn scan_container(&mut self) -> Result<()> {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        loop {
            let byte = self.next_byte()?.ok_or_else(|| self.truncated())?;
            self.scratch.push(byte);
            if in_string {
                match byte {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    fn scan_string(&mut self) -> Result<()> {
        let opening = self.next_byte()?.ok_or_else(|| self.truncated())?;
        self.scratch.push(opening);
        let mut escaped = false;
        loop {
            let byte = self.next_byte()?.ok_or_else(|| self.truncated())?;
            self.scratch.push(byte);
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => return Ok(()),
                _ => {}
            }
        }
    }

    fn scan_scalar(&mut self) -> Result<()> {
        while let Some(byte) = self.peek_byte()? {
            if matches!(byte, b',' | b'}' | b']') || byte.is_ascii_whitespace() {
                break;
            }
            self.consume_byte();
            self.scratch.push(byte);
        }
        if self.scratch.is_empty() {
            return Err(self.malformed("expected a value"));
        }
        Ok(())
    }

    fn expect_byte(&mut self, expected: u8, what: &str) -> Result<()> {
        match self.next_byte()? {
            Some(byte) if byte == expected => Ok(()),
            Some(byte) => Err(self.malformed(&format!(
                "expected {what}, found '{}'; {ORDER_HINT}",
                char::from(byte)
            ))),
            None => Err(self.truncated()),
        }
    }

    fn skip_ws(&mut self) -> Result<()> {
        loop {
            let buf = self.input.fill_buf()?;
            if buf.is_empty() {
                return Ok(());
            }
            let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            let exhausted = skip == buf.len();
            self.input.consume(skip);
            self.offset += skip as u64;
            if !exhausted {
                return Ok(());
            }
        }
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.input.fill_buf()?.first().copied())
    }

    /// Consume a byte already seen through `peek_byte`.
    fn consume_byte(&mut self) {
        self.input.consume(1);
        self.offset += 1;
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.consume_byte();
        }
        Ok(byte)
    }

    fn malformed(&self, msg: &str) -> Error {
        malformed_store(format!("{msg} (byte {})", self.offset))
    }

    fn truncated(&self) -> Error {
        self.malformed("truncated record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn parser(text: &str) -> RecordParser<Cursor<Vec<u8>>> {
        RecordParser::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn writer_output_parses_back() {
        let mut writer = RecordWriter::new(Vec::new()).expect("writer");
        writer
            .write_record(&Envelope::new(1, 0, 10, 11), &json!({"v": "a,b}]"}))
            .expect("record");
        writer
            .write_record(&Envelope::new(2, 0, 12, 13), &json!(-4.5e3))
            .expect("record");
        writer.finish().expect("finish");
        assert_eq!(writer.records(), 2);

        let bytes = writer.get_ref().clone();
        let mut parser = RecordParser::new(Cursor::new(bytes));
        let (first, _) = parser.next_envelope().expect("parse").expect("first");
        assert_eq!(first.source_id, 1);
        assert_eq!(parser.read_data().expect("data"), json!({"v": "a,b}]"}));
        let (second, _) = parser.next_envelope().expect("parse").expect("second");
        assert_eq!(second.time, 13);
        assert_eq!(parser.read_data().expect("data"), json!(-4500.0));
        assert!(parser.next_envelope().expect("end").is_none());
        assert!(parser.is_done());
        assert_eq!(parser.records(), 2);
    }

    #[test]
    fn unread_data_is_skipped() {
        let mut parser = parser(
            r#"[{"Envelope":{"SourceId":1,"SequenceId":0,"OriginatingTime":1,"Time":1},"Data":[1,[2]]},
               {"Envelope":{"SourceId":2,"SequenceId":0,"OriginatingTime":2,"Time":2},"Data":"x"}]"#,
        );
        parser.next_envelope().expect("parse").expect("first");
        let (second, _) = parser.next_envelope().expect("parse").expect("second");
        assert_eq!(second.source_id, 2);
    }

    #[test]
    fn reversed_fields_are_malformed() {
        let mut parser = parser(
            r#"[{"Data": 1, "Envelope":{"SourceId":1,"SequenceId":0,"OriginatingTime":1,"Time":1}}]"#,
        );
        let err = parser.next_envelope().expect_err("malformed");
        match err {
            Error::MalformedStore(msg) => assert!(msg.contains("\"Data\"")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_data_is_malformed() {
        let mut parser =
            parser(r#"[{"Envelope":{"SourceId":1,"SequenceId":0,"OriginatingTime":1,"Time":1}}]"#);
        parser.next_envelope().expect("parse").expect("envelope");
        assert!(matches!(parser.read_data(), Err(Error::MalformedStore(_))));
    }

    #[test]
    fn truncated_record_is_malformed() {
        let mut parser =
            parser(r#"[{"Envelope":{"SourceId":1,"SequenceId":0,"OriginatingTime":1,"Ti"#);
        assert!(matches!(parser.next_envelope(), Err(Error::MalformedStore(_))));
    }

    #[test]
    fn unterminated_array_ends_at_record_boundary() {
        let mut parser = parser(
            r#"[{"Envelope":{"SourceId":1,"SequenceId":0,"OriginatingTime":1,"Time":1},"Data":null}"#,
        );
        parser.next_envelope().expect("parse").expect("envelope");
        assert_eq!(parser.read_data().expect("data"), Value::Null);
        assert!(parser.next_envelope().expect("end").is_none());
    }

    #[test]
    fn empty_array_and_empty_file() {
        assert!(parser(" [ ] ").next_envelope().expect("empty array").is_none());
        assert!(matches!(
            parser("").next_envelope(),
            Err(Error::MalformedStore(_))
        ));
    }

    #[test]
    fn read_data_requires_envelope() {
        let mut parser = parser("[]");
        assert!(matches!(parser.read_data(), Err(Error::InvalidArgument(_))));
    }
}
