//! Gram framing codec for tokio_util.
//!
//! Messages are split into chunks with a 2-byte big-endian length prefix and
//! terminated by a zero-length end marker. A bare end marker between messages
//! is a NOOP keep-alive and is skipped.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Request, Response};
use super::value::{decode, encode, WireValue};
use super::GramError;

/// Maximum chunk size (16KB)
pub const MAX_CHUNK_SIZE: usize = 16384;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Default cap on a reassembled message (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Chunked framing codec over raw wire values.
#[derive(Debug)]
pub struct GramCodec {
    /// Maximum reassembled message size
    max_message_size: usize,
    /// Buffer for accumulating chunks
    message_buffer: BytesMut,
}

impl GramCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            message_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Create a codec with a custom max message size.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            message_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Split an encoded message into chunks.
    fn encode_chunked(&self, data: &[u8], dst: &mut BytesMut) {
        let mut offset = 0;

        while offset < data.len() {
            let remaining = data.len() - offset;
            let chunk_size = remaining.min(MAX_CHUNK_SIZE);

            dst.put_u16(chunk_size as u16);
            dst.put_slice(&data[offset..offset + chunk_size]);

            offset += chunk_size;
        }

        dst.put_slice(&END_MARKER);
    }
}

impl Default for GramCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for GramCodec {
    type Item = WireValue;
    type Error = GramError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Need at least 2 bytes for a chunk header
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            // End marker
            if chunk_size == 0 {
                src.advance(2);

                if self.message_buffer.is_empty() {
                    // NOOP keep-alive, skip
                    continue;
                }

                let message_data = self.message_buffer.split();
                let value = decode(&message_data).map_err(GramError::Wire)?;
                return Ok(Some(value));
            }

            // Need chunk header + chunk data
            if src.len() < 2 + chunk_size {
                return Ok(None);
            }

            if self.message_buffer.len() + chunk_size > self.max_message_size {
                return Err(GramError::MessageTooLarge {
                    size: self.message_buffer.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            src.advance(2);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl Encoder<WireValue> for GramCodec {
    type Error = GramError;

    fn encode(&mut self, item: WireValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = encode(&item).map_err(GramError::Wire)?;
        self.encode_chunked(&encoded, dst);
        Ok(())
    }
}

/// Client-side message codec: encodes requests, decodes responses.
#[derive(Debug, Default)]
pub struct ClientMessageCodec {
    inner: GramCodec,
}

impl ClientMessageCodec {
    /// Create a new client codec.
    pub fn new() -> Self {
        Self {
            inner: GramCodec::new(),
        }
    }
}

impl Decoder for ClientMessageCodec {
    type Item = Response;
    type Error = GramError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(value) => {
                let structure = value
                    .as_structure()
                    .ok_or_else(|| GramError::Protocol("Expected structure".to_string()))?;

                let response = Response::from_structure(structure).map_err(GramError::Wire)?;

                Ok(Some(response))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Request> for ClientMessageCodec {
    type Error = GramError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let structure = item.to_structure();
        let value = WireValue::Structure(structure);
        self.inner.encode(value, dst)
    }
}
