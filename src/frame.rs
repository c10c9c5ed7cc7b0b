//! Length-prefixed framing over a stream connection.
//!
//! Wire shape: `size:u64 little-endian` then four header bytes
//! (`command compressed object text`, one bool per byte) then
//! `payload[size - 4]`. `size` counts header + payload, never the length
//! prefix itself.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// The four independent header flags, packed one per byte in this fixed
/// order on the wire. Exactly one of `object`/`text` is set for non-bytes
/// payloads; both false means raw bytes, both true is never produced by
/// this crate's codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: bool,
    pub compressed: bool,
    pub object: bool,
    pub text: bool,
}

impl FrameHeader {
    pub const LEN: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        [
            self.command as u8,
            self.compressed as u8,
            self.object as u8,
            self.text as u8,
        ]
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        FrameHeader {
            command: bytes[0] != 0,
            compressed: bytes[1] != 0,
            object: bytes[2] != 0,
            text: bytes[3] != 0,
        }
    }
}

/// A single wire-level unit: header plus payload bytes. `Frame` never
/// carries a decoded user value — that happens one layer up, in
/// [`crate::codec`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// The exact bytes that will cross the wire for this frame, length
    /// prefix included. Used both by `write_frame` and by the journaled
    /// endpoint, which persists this same representation to its journal.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let size = (FrameHeader::LEN + self.payload.len()) as u64;
        let mut out = Vec::with_capacity(8 + FrameHeader::LEN + self.payload.len());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a complete, already-in-memory wire representation, as
    /// produced by [`Frame::to_wire_bytes`]. Used to read frames back out
    /// of a journal or paging store, where the bytes are already fully
    /// buffered and there's no stream to read incrementally from.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Frame> {
        if bytes.len() < 8 {
            return Err(Error::IncompleteMessage);
        }
        let size = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        let body = &bytes[8..];
        if size < FrameHeader::LEN || body.len() != size {
            return Err(Error::IncompleteMessage);
        }

        let mut header_bytes = [0u8; FrameHeader::LEN];
        header_bytes.copy_from_slice(&body[..FrameHeader::LEN]);
        let header = FrameHeader::from_bytes(header_bytes);
        let payload = body[FrameHeader::LEN..].to_vec();
        Ok(Frame::new(header, payload))
    }
}

/// Writes one frame, blocking (in the async sense) until the entire frame
/// has been handed to the kernel.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.to_wire_bytes()).await?;
    Ok(())
}

/// Reads chunk size used when pulling a frame's body off the wire. 4096 is
/// the spec's stated floor; larger is fine, this just keeps memory bounded
/// per read call.
const READ_CHUNK: usize = 4096;

/// Reads exactly one frame. A short read (zero bytes returned before the
/// frame is complete) surfaces as [`Error::IncompleteMessage`] rather than
/// as a bare IO error, since the coordinator treats that specifically as
/// "this peer is dead, purge it".
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut size_bytes = [0u8; 8];
    read_exact_or_incomplete(reader, &mut size_bytes).await?;
    let size = u64::from_le_bytes(size_bytes) as usize;

    if size < FrameHeader::LEN {
        return Err(Error::IncompleteMessage);
    }

    let mut body = vec![0u8; size];
    let mut filled = 0;
    while filled < body.len() {
        let end = (filled + READ_CHUNK).min(body.len());
        let n = reader.read(&mut body[filled..end]).await?;
        if n == 0 {
            return Err(Error::IncompleteMessage);
        }
        filled += n;
    }

    let mut header_bytes = [0u8; FrameHeader::LEN];
    header_bytes.copy_from_slice(&body[..FrameHeader::LEN]);
    let header = FrameHeader::from_bytes(header_bytes);
    let payload = body[FrameHeader::LEN..].to_vec();

    Ok(Frame::new(header, payload))
}

/// `read_exact` that reports a zero-length read as `IncompleteMessage`
/// rather than the generic `UnexpectedEof` IO error, matching the
/// distinction the coordinator's retrieve loop needs to make.
async fn read_exact_or_incomplete<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::IncompleteMessage);
        }
        filled += n;
    }
    Ok(())
}
