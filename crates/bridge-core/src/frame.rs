//! Frame codec for the device byte stream.
//!
//! Every message exchanged with the device travels in a frame:
//!
//! ```text
//! | magic (3 bytes)  | length (u16 BE) | payload (length bytes) |
//! |------------------|-----------------|------------------------|
//! | E2 82 BF  ("₿")  | len_hi len_lo   | ...                    |
//! ```
//!
//! There is no checksum, sequence number or request id. A reader that loses
//! alignment (line noise, a reset mid-frame, a partial read at connect time)
//! recovers by discarding one byte per scan pass until the magic lines up
//! again.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use ohw_bridge_core::frame::{encode, scan};
//!
//! let packet = encode(b"ping").unwrap();
//! assert_eq!(&packet[..5], &[0xE2, 0x82, 0xBF, 0x00, 0x04]);
//!
//! let mut buffer = BytesMut::from(&packet[..]);
//! let payloads = scan(&mut buffer);
//! assert_eq!(payloads.len(), 1);
//! assert_eq!(&payloads[0][..], b"ping");
//! assert!(buffer.is_empty());
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{Error, Result};

/// Frame start marker, the UTF-8 encoding of "₿".
pub const MAGIC: [u8; 3] = [0xE2, 0x82, 0xBF];

/// Width of the big-endian length field.
pub const LENGTH_BYTES: usize = 2;

/// Bytes preceding the payload.
pub const HEADER_LENGTH: usize = MAGIC.len() + LENGTH_BYTES;

/// Largest payload a frame may carry.
pub const MAX_LENGTH: usize = 1024;

/// Frames a payload for the wire.
///
/// # Errors
///
/// Returns [`Error::PayloadTooLarge`] if `payload` is longer than
/// [`MAX_LENGTH`]. Nothing is produced in that case.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    let too_large = || Error::PayloadTooLarge {
        len: payload.len(),
        max: MAX_LENGTH,
    };
    if payload.len() > MAX_LENGTH {
        return Err(too_large());
    }
    let length = u16::try_from(payload.len()).map_err(|_| too_large())?;

    let mut packet = BytesMut::with_capacity(HEADER_LENGTH + payload.len());
    packet.put_slice(&MAGIC);
    packet.put_u16(length);
    packet.put_slice(payload);
    Ok(packet.freeze())
}

/// Runs one extraction pass over `buffer`.
///
/// Complete frames at the front of the buffer are split off and their
/// payloads returned in arrival order. The pass stops at the first partial
/// frame, or after dropping a single byte when the buffer does not start with
/// [`MAGIC`]. Scanning for the next marker is left to the following pass,
/// once more bytes have had a chance to arrive.
///
/// The length field is honored as written even above [`MAX_LENGTH`]; the
/// limit binds senders, the reader only waits for the announced bytes.
pub fn scan(buffer: &mut BytesMut) -> Vec<Bytes> {
    let mut payloads = Vec::new();

    while buffer.len() >= HEADER_LENGTH {
        if buffer[..MAGIC.len()] != MAGIC {
            trace!(byte = buffer[0], "dropping unaligned byte");
            buffer.advance(1);
            break;
        }

        let length = usize::from(u16::from_be_bytes([buffer[3], buffer[4]]));
        if buffer.len() < HEADER_LENGTH + length {
            break;
        }

        buffer.advance(HEADER_LENGTH);
        payloads.push(buffer.split_to(length).freeze());
    }

    payloads
}

/// Receive buffer accumulating chunks from the channel.
///
/// Each [`push`](Self::push) appends the chunk and runs exactly one
/// [`scan`] pass. Between pushes the buffer holds nothing, a partial frame,
/// or a prefix still being resynchronized.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    /// Bytes received but not yet framed.
    buffer: BytesMut,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every payload completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        scan(&mut self.buffer)
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discards everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
