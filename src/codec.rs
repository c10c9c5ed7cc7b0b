//! Serialises and deserialises [`Payload`] values, optionally compressing
//! the result. This is the only place in the crate that materialises a
//! user value out of wire bytes — everywhere else a frame's payload is
//! opaque.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::Result;
use crate::frame::{Frame, FrameHeader};
use crate::payload::Payload;

/// Encodes a payload into wire bytes and the header flags that describe
/// it. `compress` applies block zlib compression on top of whichever kind
/// the payload already is; commands are never compressed regardless of
/// this flag; wiring one through would only cost CPU on control traffic
/// that is always tiny.
pub fn encode(payload: &Payload, compress: bool) -> Result<Frame> {
    let (mut bytes, mut header) = match payload {
        Payload::Bytes(data) => (data.clone(), FrameHeader::default()),
        Payload::Text(text) => (
            text.clone().into_bytes(),
            FrameHeader {
                text: true,
                ..Default::default()
            },
        ),
        Payload::Object(value) => (
            serde_json::to_vec(value)?,
            FrameHeader {
                object: true,
                ..Default::default()
            },
        ),
        Payload::Command(command) => (
            command.clone().into_bytes(),
            FrameHeader {
                command: true,
                ..Default::default()
            },
        ),
    };

    if compress && !header.command {
        bytes = compress_block(&bytes)?;
        header.compressed = true;
    }

    Ok(Frame::new(header, bytes))
}

/// Inverse of [`encode`]: applies decompression first if the compressed
/// flag is set, then interprets the remaining bytes per the kind flags.
pub fn decode(frame: &Frame) -> Result<Payload> {
    let header = frame.header;
    let bytes = if header.compressed {
        decompress_block(&frame.payload)?
    } else {
        frame.payload.clone()
    };

    if header.command {
        return Ok(Payload::Command(String::from_utf8_lossy(&bytes).into_owned()));
    }
    if header.object {
        return Ok(Payload::Object(serde_json::from_slice(&bytes)?));
    }
    if header.text {
        return Ok(Payload::Text(String::from_utf8_lossy(&bytes).into_owned()));
    }
    Ok(Payload::Bytes(bytes))
}

fn compress_block(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress_block(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
