//! Remote response payloads and their normalization to bytes.

use std::fmt;
use std::io::Read;

/// Hex characters of a binary payload kept in a page preview.
const BINARY_PREVIEW_HEX_CHARS: usize = 200;

/// One element of a chunked response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Bytes(Vec<u8>),
    Text(String),
}

/// Payload delivered by a link's response continuation.
pub enum Response {
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    Chunks(Vec<Chunk>),
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Empty => f.write_str("Empty"),
            Response::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Response::Text(text) => write!(f, "Text({} chars)", text.chars().count()),
            Response::Chunks(chunks) => write!(f, "Chunks({})", chunks.len()),
            Response::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl Response {
    /// Flatten the payload into one byte sequence.
    ///
    /// Chunks are concatenated in order. Text chunks keep code points up to
    /// U+00FF as single bytes. Streams are drained and closed; a stream that
    /// fails to read yields no bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Response::Empty => Vec::new(),
            Response::Bytes(bytes) => bytes,
            Response::Text(text) => text.into_bytes(),
            Response::Chunks(chunks) => {
                let mut out = Vec::new();
                for chunk in chunks {
                    match chunk {
                        Chunk::Bytes(bytes) => out.extend_from_slice(&bytes),
                        Chunk::Text(text) => push_latin1(&mut out, &text),
                    }
                }
                out
            }
            Response::Stream(mut reader) => {
                let mut out = Vec::new();
                match reader.read_to_end(&mut out) {
                    Ok(n) => {
                        tracing::debug!("Drained {} bytes from response stream", n);
                        out
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read response stream");
                        Vec::new()
                    }
                }
            }
        }
    }
}

fn push_latin1(out: &mut Vec<u8>, text: &str) {
    for c in text.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(byte) => out.push(byte),
            Err(_) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

/// Decode page bytes as UTF-8, or describe them as binary when they are not text.
pub fn decode_page(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let bytes = e.into_bytes();
            tracing::debug!("Received {} bytes of binary page data", bytes.len());
            binary_preview(&bytes)
        }
    }
}

/// `Binary data: <hex>...` with the hex truncated to 200 characters.
pub fn binary_preview(bytes: &[u8]) -> String {
    let mut hex = hex::encode(bytes);
    hex.truncate(BINARY_PREVIEW_HEX_CHARS);
    format!("Binary data: {hex}...")
}
