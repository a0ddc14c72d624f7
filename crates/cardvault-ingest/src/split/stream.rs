//! Incremental reader over a top-level JSON array of records
//!
//! The bulk file is one multi-gigabyte array, so it is never decoded as a
//! whole. [`RecordStream`] walks the array punctuation itself and hands each
//! element to serde_json, yielding one [`SourceRecord`] at a time. The stream
//! is finite and not restartable; re-read the input by opening it again.
//!
//! Reading is pull-based: nothing is read ahead of the consumer beyond the
//! `BufReader` buffer, so a consumer that stops pulling while it drains a
//! batch is the backpressure signal.

use crate::error::{IngestError, Result};
use crate::models::SourceRecord;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

const READ_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Elements,
    Done,
}

/// Lazy sequence of records from a JSON array
pub struct RecordStream<R> {
    reader: R,
    state: State,
    records_read: u64,
}

/// Boxed reader for files, plain or gzip-compressed
pub type FileReader = Box<dyn BufRead + Send>;

/// Open the bulk file, decompressing `*.gz` transparently
pub fn open(path: &Path) -> Result<RecordStream<FileReader>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            IngestError::MissingPrerequisite(format!("bulk file not found: {}", path.display()))
        },
        _ => IngestError::Io(e),
    })?;

    let gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    let reader: FileReader = if gzipped {
        Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, GzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, file))
    };

    Ok(RecordStream::new(reader))
}

impl<R: BufRead> RecordStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Start,
            records_read: 0,
        }
    }

    /// Records yielded so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Pull up to `max` records; an empty batch means the stream is exhausted
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<SourceRecord>> {
        let mut batch = Vec::with_capacity(max.min(4096));
        while batch.len() < max {
            match self.next_record()? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Next record, `None` once the closing `]` has been read
    pub fn next_record(&mut self) -> Result<Option<SourceRecord>> {
        match self.state {
            State::Done => return Ok(None),
            State::Start => {
                match self.peek_significant()? {
                    Some(b'[') => self.reader.consume(1),
                    Some(other) => {
                        return Err(self.fail(format!(
                            "expected '[' at start of input, found '{}'",
                            other as char
                        )))
                    },
                    None => return Err(self.fail("input is empty".to_string())),
                }

                if self.peek_significant()? == Some(b']') {
                    self.reader.consume(1);
                    self.state = State::Done;
                    return Ok(None);
                }
                self.state = State::Elements;
            },
            State::Elements => {},
        }

        match self.peek_significant()? {
            Some(b'{') => {},
            Some(other) => {
                return Err(self.fail(format!("expected an object, found '{}'", other as char)))
            },
            None => return Err(self.fail("unexpected end of input".to_string())),
        }

        let record = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            SourceRecord::deserialize(&mut de)
        };
        let record = match record {
            Ok(record) => record,
            Err(e) => return Err(self.fail(e.to_string())),
        };
        self.records_read += 1;

        match self.peek_significant()? {
            Some(b',') => self.reader.consume(1),
            Some(b']') => {
                self.reader.consume(1);
                self.state = State::Done;
            },
            Some(other) => {
                return Err(self.fail(format!(
                    "expected ',' or ']' after record, found '{}'",
                    other as char
                )))
            },
            None => return Err(self.fail("unexpected end of input".to_string())),
        }

        Ok(Some(record))
    }

    /// Skip whitespace and return the next byte without consuming it
    fn peek_significant(&mut self) -> Result<Option<u8>> {
        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(None);
            }

            let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            if skip < buf.len() {
                let byte = buf[skip];
                self.reader.consume(skip);
                return Ok(Some(byte));
            }

            let len = buf.len();
            self.reader.consume(len);
        }
    }

    fn fail(&mut self, message: String) -> IngestError {
        self.state = State::Done;
        IngestError::InvalidInput {
            record: self.records_read + 1,
            message,
        }
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
