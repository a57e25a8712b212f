use std::io;
use std::mem;

use async_trait::async_trait;
use encoding_rs::Encoding;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::types::types::{FileDestination, TransferError, TransferPayload};

/// Write buffer for file destinations.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// How far into the body we look for an XML declaration.
const PROLOG_SCAN_LIMIT: usize = 256;

/// Destination abstraction for downloaded bytes. One sink exists per
/// session, selected by the start operation invoked.
#[async_trait]
pub(crate) trait Sink: Send {
    /// Acquire the destination. File-backed sinks fail here, before any
    /// request is issued.
    async fn open(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Called once the response headers are in, with the declared remaining
    /// body length.
    fn prepare(&mut self, _expected_len: Option<u64>) {}

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError>;

    /// Materialize the payload. Called once, after the body is drained.
    async fn finish(&mut self) -> Result<TransferPayload, TransferError>;

    /// Drop any held destination resources. Runs on every path, before the
    /// terminal notification goes out.
    async fn release(&mut self) {}
}

/// Accumulates the body in memory, sized up front when the server declared
/// a length.
pub(crate) struct MemorySink {
    buffer: Vec<u8>,
}

impl MemorySink {
    pub(crate) fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn prepare(&mut self, expected_len: Option<u64>) {
        if let Some(len) = expected_len {
            self.buffer.reserve_exact(len as usize);
        }
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<TransferPayload, TransferError> {
        Ok(TransferPayload::Buffer(mem::take(&mut self.buffer)))
    }
}

/// Streams each chunk straight through to a file or caller-supplied
/// writer; never holds the payload in memory.
pub(crate) struct FileSink {
    destination: Option<FileDestination>,
    writer: Option<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
    bytes_written: u64,
}

impl FileSink {
    pub(crate) fn new(destination: FileDestination) -> Self {
        Self {
            destination: Some(destination),
            writer: None,
            bytes_written: 0,
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn open(&mut self) -> Result<(), TransferError> {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = match self.destination.take() {
            Some(FileDestination::Path(path)) => {
                let file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .await?;
                Box::new(file)
            }
            Some(FileDestination::Writer(writer)) => writer,
            None => return Err(TransferError::Disk(io::Error::other("file sink reopened"))),
        };
        self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, writer));
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TransferError::Disk(io::Error::other("file sink not opened")))?;
        writer.write_all(chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<TransferPayload, TransferError> {
        if let Some(writer) = &mut self.writer {
            writer.flush().await?;
        }
        Ok(TransferPayload::File {
            bytes_written: self.bytes_written,
        })
    }

    /// Bytes already written stay in place; the buffered tail is flushed
    /// best-effort so the file reflects everything the sink accepted.
    async fn release(&mut self) {
        if let Some(writer) = &mut self.writer {
            let _ = writer.flush().await;
        }
        self.writer = None;
        self.destination = None;
    }
}

/// A memory sink with a decode step: at completion the buffered bytes are
/// decoded with the configured encoding, unless an XML prolog declares a
/// different, resolvable one.
pub(crate) struct TextSink {
    buffer: Vec<u8>,
    encoding: Option<String>,
}

impl TextSink {
    pub(crate) fn new(encoding: Option<String>) -> Self {
        Self {
            buffer: Vec::new(),
            encoding,
        }
    }
}

#[async_trait]
impl Sink for TextSink {
    fn prepare(&mut self, expected_len: Option<u64>) {
        if let Some(len) = expected_len {
            self.buffer.reserve_exact(len as usize);
        }
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<TransferPayload, TransferError> {
        let bytes = mem::take(&mut self.buffer);
        Ok(TransferPayload::Text(decode_text(
            &bytes,
            self.encoding.as_deref(),
        )))
    }
}

/// Decode the body. An XML-declared encoding wins over the configured one
/// when it resolves; a failed decode degrades to an empty string rather
/// than failing the transfer.
pub(crate) fn decode_text(bytes: &[u8], configured: Option<&str>) -> String {
    let configured = configured.unwrap_or("utf-8");

    if let Some(label) = declared_xml_encoding(bytes) {
        if !label.eq_ignore_ascii_case(configured) {
            if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
                return match decode_with(encoding, bytes) {
                    Some(text) => text,
                    None => {
                        log::warn!("text decode failed (declared encoding {label:?}); yielding empty text");
                        String::new()
                    }
                };
            }
            // Declared but unresolvable: fall through to the configured label.
        }
    }

    match Encoding::for_label(configured.as_bytes()) {
        Some(encoding) => match decode_with(encoding, bytes) {
            Some(text) => text,
            None => {
                log::warn!("text decode failed (encoding {configured:?}); yielding empty text");
                String::new()
            }
        },
        None => {
            log::warn!("unknown text encoding {configured:?}; yielding empty text");
            String::new()
        }
    }
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

/// Scan the start of the body for `<?xml ... encoding="..."?>`. The prolog
/// is ASCII by construction, so the raw bytes are scanned directly.
pub(crate) fn declared_xml_encoding(bytes: &[u8]) -> Option<String> {
    let mut head = &bytes[..bytes.len().min(PROLOG_SCAN_LIMIT)];

    if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
        head = &head[3..];
    }
    while let Some((first, rest)) = head.split_first() {
        if first.is_ascii_whitespace() {
            head = rest;
        } else {
            break;
        }
    }
    if !head.starts_with(b"<?xml") {
        return None;
    }

    let end = head.iter().position(|&b| b == b'>')?;
    let declaration = std::str::from_utf8(&head[..end]).ok()?;

    let idx = declaration.find("encoding")?;
    let rest = declaration[idx + "encoding".len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let label: String = rest[1..].chars().take_while(|c| *c != quote).collect();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prolog_encoding_is_found() {
        let body = br#"<?xml version="1.0" encoding="iso-8859-1"?><feed/>"#;
        assert_eq!(
            declared_xml_encoding(body).as_deref(),
            Some("iso-8859-1")
        );
    }

    #[test]
    fn prolog_single_quotes_and_bom() {
        let mut body = vec![0xEF, 0xBB, 0xBF];
        body.extend_from_slice(b"<?xml version='1.0' encoding='utf-16'?>");
        assert_eq!(declared_xml_encoding(&body).as_deref(), Some("utf-16"));
    }

    #[test]
    fn no_prolog_means_no_declared_encoding() {
        assert_eq!(declared_xml_encoding(b"<html></html>"), None);
        assert_eq!(declared_xml_encoding(b"<?xml version=\"1.0\"?><a/>"), None);
    }

    #[test]
    fn utf8_document_declaring_latin1_is_redecoded() {
        // "é" as UTF-8 is 0xC3 0xA9; read as latin-1 that is "Ã©".
        let body = "<?xml version=\"1.0\" encoding=\"iso-8859-1\"?><t>é</t>".as_bytes();
        let text = decode_text(body, None);
        assert!(text.contains("Ã©"), "got {text:?}");
    }

    #[test]
    fn latin1_document_decodes_despite_utf8_default() {
        let mut body = b"<?xml version=\"1.0\" encoding=\"iso-8859-1\"?><t>".to_vec();
        body.push(0xE9); // "é" in latin-1, invalid as UTF-8
        body.extend_from_slice(b"</t>");
        let text = decode_text(&body, Some("utf-8"));
        assert!(text.contains('é'), "got {text:?}");
    }

    #[test]
    fn undecodable_body_degrades_to_empty() {
        let body = [0xFF, 0xFE, 0xFF, 0xFF];
        assert_eq!(decode_text(&body, Some("utf-8")), "");
    }

    #[test]
    fn unresolvable_declared_encoding_falls_back() {
        let body = b"<?xml version=\"1.0\" encoding=\"no-such-charset\"?><a/>";
        assert_eq!(
            decode_text(body, Some("utf-8")),
            String::from_utf8_lossy(body)
        );
    }

    #[tokio::test]
    async fn memory_sink_returns_written_bytes() {
        let mut sink = MemorySink::new();
        sink.prepare(Some(10));
        sink.write_chunk(b"hello ").await.unwrap();
        sink.write_chunk(b"world").await.unwrap();
        match sink.finish().await.unwrap() {
            TransferPayload::Buffer(bytes) => assert_eq!(bytes, b"hello world"),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
