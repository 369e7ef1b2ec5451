//! Framing and fragmentation for small-MTU writes
//!
//! An encoded envelope is wrapped in a frame before it is split:
//!
//! ```text
//! +----------------+----------------+------------------+
//! | length (u32 BE)| crc32 (u32 BE) | payload          |
//! +----------------+----------------+------------------+
//! ```
//!
//! The whole frame is then cut into chunks no larger than the negotiated write
//! size. The receiver learns the payload length from the first eight bytes, so
//! completion never depends on chunk sizes or on the payload's contents.

use crc32fast::Hasher;

use crate::envelope::Envelope;
use crate::errors::FragmentationError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of the length + checksum header preceding every payload
pub const FRAME_HEADER_LEN: usize = 8;

/// Chunk size used when the transport refuses size negotiation
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Bytes of a negotiated ATT MTU consumed by the write opcode and handle
pub const ATT_OVERHEAD: usize = 3;

/// Largest payload a frame may declare by default (64 KiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Usable chunk size for a negotiated MTU, never below one byte
pub fn effective_chunk_size(negotiated_mtu: usize, overhead: usize) -> usize {
    negotiated_mtu.saturating_sub(overhead).max(1)
}

// ----------------------------------------------------------------------------
// Frame Header
// ----------------------------------------------------------------------------

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes, excluding the header
    pub length: u32,
    /// CRC32 of the payload
    pub checksum: u32,
}

impl FrameHeader {
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            length: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut bytes = [0u8; FRAME_HEADER_LEN];
        bytes[..4].copy_from_slice(&self.length.to_be_bytes());
        bytes[4..].copy_from_slice(&self.checksum.to_be_bytes());
        bytes
    }

    /// Read a header from the first eight bytes, if present
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let length = u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
        let checksum = u32::from_be_bytes(bytes.get(4..FRAME_HEADER_LEN)?.try_into().ok()?);
        Some(Self { length, checksum })
    }

    /// Total frame size including the header
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }
}

/// CRC32 of a payload
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ----------------------------------------------------------------------------
// Chunk Iterator
// ----------------------------------------------------------------------------

/// Ordered, contiguous chunks over a byte slice
///
/// Cloning yields a fresh pass over the same bytes, so a send attempt can be
/// restarted without re-splitting.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = &self.data[self.offset..end];
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.data.len() - self.offset;
        let count = remaining.div_ceil(self.chunk_size);
        (count, Some(count))
    }
}

impl<'a> ExactSizeIterator for Chunks<'a> {}

// ----------------------------------------------------------------------------
// Fragmenter
// ----------------------------------------------------------------------------

/// Splits byte sequences and framed envelopes into transport-sized chunks
pub struct Fragmenter;

impl Fragmenter {
    /// Split `bytes` into chunks of at most `max_chunk_size` bytes
    ///
    /// An input that is an exact multiple of the chunk size produces no empty
    /// trailing chunk; an empty input produces no chunks at all.
    pub fn split(bytes: &[u8], max_chunk_size: usize) -> Result<Chunks<'_>, FragmentationError> {
        if max_chunk_size == 0 {
            return Err(FragmentationError::InvalidChunkSize {
                size: max_chunk_size,
            });
        }

        Ok(Chunks {
            data: bytes,
            chunk_size: max_chunk_size,
            offset: 0,
        })
    }

    /// Prefix a payload with its frame header
    pub fn frame(payload: &[u8], max_message_size: usize) -> Result<Vec<u8>, FragmentationError> {
        if payload.is_empty() {
            return Err(FragmentationError::Encoding {
                reason: "cannot frame an empty payload".to_string(),
            });
        }
        if payload.len() > max_message_size || payload.len() > u32::MAX as usize {
            return Err(FragmentationError::MessageTooLarge {
                size: payload.len(),
                max_size: max_message_size,
            });
        }

        let header = FrameHeader::for_payload(payload);
        let mut frame = Vec::with_capacity(header.frame_len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Encode, frame and prepare an envelope for chunked transmission
    pub fn prepare(
        envelope: &Envelope,
        max_chunk_size: usize,
        max_message_size: usize,
    ) -> Result<OutboundFrame, FragmentationError> {
        let payload = envelope.encode()?;
        let frame = Self::frame(&payload, max_message_size)?;
        OutboundFrame::new(frame, max_chunk_size)
    }
}

/// A framed message ready to be written chunk by chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    bytes: Vec<u8>,
    chunk_size: usize,
}

impl OutboundFrame {
    pub fn new(bytes: Vec<u8>, chunk_size: usize) -> Result<Self, FragmentationError> {
        if chunk_size == 0 {
            return Err(FragmentationError::InvalidChunkSize { size: chunk_size });
        }
        Ok(Self { bytes, chunk_size })
    }

    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            data: &self.bytes,
            chunk_size: self.chunk_size,
            offset: 0,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks().len()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
