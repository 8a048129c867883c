//! Async decoder for chunked InfluxQL JSON responses.
//!
//! With `chunked=true` the `/query` endpoint writes one complete JSON object
//! per chunk, back to back, on a single response body:
//!
//! ```text
//! {"results":[{"statement_id":0,"series":[...],"partial":true}]}
//! {"results":[{"statement_id":0,"series":[...]}]}
//! ```
//!
//! A single-document JSON parser rejects the second object as trailing
//! content. [`ResponseDecoder`] frames the byte stream into top-level objects
//! first and hands each complete object to `serde_json`.

use std::pin::Pin;

use async_stream::stream;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::types::ResponseDocument;

const READ_CHUNK: usize = 16 * 1024;

/// Byte-level state machine that finds the end of one top-level JSON object.
///
/// State survives across reads, so a frame boundary is found no matter where
/// the transport split the bytes.
#[derive(Debug, Default)]
struct FrameScanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Start of the current object in the buffer.
    start: Option<usize>,
    /// Next buffer index to scan.
    pos: usize,
}

enum Scan {
    /// A complete object spans `start..end` of the buffer.
    Frame { start: usize, end: usize },
    /// Need more bytes.
    Incomplete,
}

impl FrameScanner {
    /// Scans `buf` from where the last call stopped. `base` is the stream
    /// offset of `buf[0]`, used for error reporting.
    fn scan(&mut self, buf: &[u8], base: u64) -> Result<Scan> {
        while self.pos < buf.len() {
            let i = self.pos;
            let b = buf[i];
            self.pos += 1;

            if self.depth == 0 {
                match b {
                    b' ' | b'\t' | b'\r' | b'\n' => continue,
                    b'{' => {
                        self.start = Some(i);
                        self.depth = 1;
                        continue;
                    }
                    other => {
                        return Err(Error::Malformed {
                            offset: base + i as u64,
                            message: format!(
                                "expected '{{' at top level, found {:?}",
                                char::from(other)
                            ),
                        });
                    }
                }
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let start = self.start.take().unwrap_or(0);
                        return Ok(Scan::Frame { start, end: i + 1 });
                    }
                }
                _ => {}
            }
        }
        Ok(Scan::Incomplete)
    }

    /// Shifts indices after the first `n` buffer bytes were dropped.
    fn consume(&mut self, n: usize) {
        self.pos -= n;
        if let Some(start) = self.start.as_mut() {
            *start -= n;
        }
    }

    fn in_document(&self) -> bool {
        self.depth > 0
    }
}

/// Async streaming decoder for multi-document JSON query responses.
///
/// Reads an async byte stream and yields one [`ResponseDocument`] per complete
/// top-level JSON object, in arrival order, without buffering more than the
/// document currently being read.
///
/// # Example
///
/// ```ignore
/// use influxql_stream::ResponseDecoder;
///
/// let mut decoder = ResponseDecoder::new(reader);
/// while let Some(doc) = decoder.next_document().await? {
///     for row in doc.into_rows()? {
///         println!("{:?}", row);
///     }
/// }
/// ```
pub struct ResponseDecoder<R: AsyncRead + Unpin> {
    reader: R,
    buf: Vec<u8>,
    scanner: FrameScanner,
    /// Stream offset of `buf[0]`.
    offset: u64,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ResponseDecoder<R> {
    /// Create a new decoder over an async reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            scanner: FrameScanner::default(),
            offset: 0,
            eof: false,
        }
    }

    /// Decode and return the next document.
    ///
    /// Returns:
    /// - `Ok(Some(doc))` - A complete document was decoded
    /// - `Ok(None)` - Clean end of stream
    /// - `Err(e)` - Read failure, malformed framing, or invalid JSON
    pub async fn next_document(&mut self) -> Result<Option<ResponseDocument>> {
        loop {
            match self.scanner.scan(&self.buf, self.offset)? {
                Scan::Frame { start, end } => {
                    let doc = serde_json::from_slice::<ResponseDocument>(&self.buf[start..end]);
                    self.discard(end);
                    return Ok(Some(doc?));
                }
                Scan::Incomplete => {
                    // Drop whitespace already scanned past between documents.
                    let keep_from = self.scanner.start.unwrap_or(self.scanner.pos);
                    self.discard(keep_from);
                }
            }

            if self.eof {
                if self.scanner.in_document() {
                    return Err(Error::Malformed {
                        offset: self.offset + self.buf.len() as u64,
                        message: "stream ended inside a document".to_string(),
                    });
                }
                return Ok(None);
            }

            self.buf.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }

    /// Turn the decoder into a stream of documents.
    ///
    /// The stream ends after the first error.
    pub fn into_stream(mut self) -> Pin<Box<dyn Stream<Item = Result<ResponseDocument>> + Send>>
    where
        R: Send + 'static,
    {
        let s = stream! {
            loop {
                match self.next_document().await {
                    Ok(Some(doc)) => yield Ok(doc),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Box::pin(s)
    }

    /// Total bytes consumed from the reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.offset + self.buf.len() as u64
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.buf.drain(..n);
        self.scanner.consume(n);
        self.offset += n as u64;
    }
}
