//! One peer connection: framing, handshake, liveness probe, send,
//! receive, graceful close. Everything here operates on a single TCP
//! connection and assumes no two calls against the same `Endpoint`
//! interleave — the coordinator and the worker driver both honour that by
//! construction (a single control task owns each endpoint).

use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::sleep;

use crate::codec;
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame, Frame};
use crate::payload::Payload;
use crate::protocol::{ProtocolDescriptor, KILL_COMMAND};

/// Stand-in for the kernel's actual (kernel-clamped) receive buffer size.
/// The reference implementation asks the OS to grow `SO_RCVBUF` to ~10 GB
/// and records whatever the kernel actually granted; tokio doesn't expose
/// a socket-option setter for this without an extra platform crate, so
/// this crate advertises a fixed, conservative ceiling instead. Every
/// `free_space` calculation in `journal.rs` is still correct relative to
/// whatever number is advertised here — it only needs both peers to agree
/// on *a* number, not the literal kernel maximum.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: u64 = 1 << 20;

/// Backlog passed to `listen` the first time a coordinator binds its
/// accept socket, per spec.
pub const ACCEPT_BACKLOG: u32 = 1000;

pub struct Endpoint {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    is_server: bool,
    local: ProtocolDescriptor,
    remote: ProtocolDescriptor,
}

impl Endpoint {
    /// Establishes a TCP connection, retrying once a second until success
    /// or `retry_budget` elapses. On budget exhaustion one final attempt
    /// is made and its error (if any) is surfaced to the caller. Runs the
    /// handshake before returning.
    pub async fn connect<A: ToSocketAddrs + Clone>(
        address: A,
        retry_budget: Duration,
        handshake_enabled: bool,
    ) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + retry_budget;
        let stream = loop {
            match TcpStream::connect(address.clone()).await {
                Ok(stream) => break stream,
                Err(err) => {
                    if tokio::time::Instant::now() >= deadline {
                        break TcpStream::connect(address.clone()).await?;
                    }
                    debug!("connect attempt failed, retrying in 1s: {err}");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        Self::from_stream(stream, false, handshake_enabled).await
    }

    /// Wraps a freshly accepted connection and, unless `handshake_enabled`
    /// is false, runs the handshake. The listener itself (bind + listen
    /// with backlog 1000, accept loop) is owned by the coordinator rather
    /// than by `Endpoint`, since Rust has no equivalent of transparently
    /// upgrading a bound-on-first-call socket — see
    /// `coordinator.rs::Coordinator::mount`.
    pub async fn accept(stream: TcpStream, handshake_enabled: bool) -> Result<Self> {
        Self::from_stream(stream, true, handshake_enabled).await
    }

    async fn from_stream(stream: TcpStream, is_server: bool, handshake_enabled: bool) -> Result<Self> {
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let mut endpoint = Endpoint {
            reader: BufReader::new(read_half),
            writer: write_half,
            is_server,
            local: ProtocolDescriptor::local(DEFAULT_RECEIVE_BUFFER_SIZE),
            remote: ProtocolDescriptor::local(DEFAULT_RECEIVE_BUFFER_SIZE),
        };
        if handshake_enabled {
            endpoint.handshake().await?;
        }
        Ok(endpoint)
    }

    /// Sends the local protocol descriptor, receives the peer's, and
    /// resolves both to the element-wise minimum (buffer size is always
    /// the peer's, since that's the sender's outbound budget).
    async fn handshake(&mut self) -> Result<()> {
        let local = self.local;
        self.write_frame_raw(&codec::encode(
            &Payload::from_job(&local)?,
            false,
        )?)
        .await?;

        let frame = read_frame(&mut self.reader).await?;
        let peer: ProtocolDescriptor = match codec::decode(&frame)? {
            Payload::Object(value) => serde_json::from_value(value)?,
            _ => {
                return Err(Error::ProtocolMisuse(
                    "first frame on a connection must be an object-encoded protocol descriptor",
                ))
            }
        };

        self.remote = ProtocolDescriptor::negotiate(local, peer);
        debug!(
            "handshake resolved: serializer={} protocol={} peer_buf={}",
            self.remote.serializer_version, self.remote.protocol_version, self.remote.receive_buffer_size
        );
        Ok(())
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn remote_descriptor(&self) -> ProtocolDescriptor {
        self.remote
    }

    /// Returns whether the socket currently has readable data.
    /// `timeout = None` blocks indefinitely; `Some(Duration::ZERO)` is a
    /// single non-blocking check; any other `Some(d)` waits up to `d`.
    pub async fn poll(&self, timeout: Option<Duration>) -> Result<bool> {
        let readable = self.reader.get_ref().readable();
        match timeout {
            None => {
                readable.await?;
                Ok(true)
            }
            Some(d) if d.is_zero() => {
                // tokio has no synchronous "is this ready right now"
                // check on a stream split into owned halves; a
                // microsecond timeout is close enough to non-blocking for
                // a socket that's either already readable or isn't.
                match tokio::time::timeout(Duration::from_micros(10), readable).await {
                    Ok(result) => {
                        result?;
                        Ok(true)
                    }
                    Err(_) => Ok(false),
                }
            }
            Some(d) => match tokio::time::timeout(d, readable).await {
                Ok(result) => {
                    result?;
                    Ok(true)
                }
                Err(_) => Ok(false),
            },
        }
    }

    /// True unless a zero-length peek proves the peer has closed its
    /// write side (a dead socket). A socket with nothing to read at all
    /// is still alive.
    pub async fn is_alive(&self) -> Result<bool> {
        if !self.poll(Some(Duration::ZERO)).await? {
            return Ok(true);
        }
        let mut probe = [0u8; 1];
        let n = self.reader.get_ref().peek(&mut probe).await?;
        Ok(n != 0)
    }

    /// Encodes, frames and writes `value`. Blocks (in the async sense)
    /// until the kernel has accepted every byte.
    pub async fn send(&mut self, payload: &Payload, compress: bool) -> Result<Frame> {
        let frame = codec::encode(payload, compress)?;
        self.write_frame_raw(&frame).await?;
        Ok(frame)
    }

    /// Sends an already-encoded frame verbatim. Used by the coordinator's
    /// handshake-disabled fast path, where one worker's codec pre-encodes
    /// a job once and the identical wire bytes are replayed to every peer.
    pub async fn send_raw(&mut self, frame: &Frame) -> Result<()> {
        self.write_frame_raw(frame).await
    }

    async fn write_frame_raw(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.writer, frame).await?;
        trace!(
            "wrote frame: {} bytes, compressed={}",
            frame.payload.len(),
            frame.header.compressed
        );
        Ok(())
    }

    /// Reads one frame straight off the wire without interpreting it —
    /// used by the journaled endpoint, which needs the raw frame to
    /// account for and journal before handing a decoded value up to the
    /// coordinator.
    pub async fn read_frame_raw(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        match timeout {
            Some(d) => tokio::time::timeout(d, read_frame(&mut self.reader))
                .await
                .map_err(|_| Error::IncompleteMessage)?,
            None => read_frame(&mut self.reader).await,
        }
    }

    /// Reads one frame, executing and discarding command frames
    /// transparently (recursing to read the next real frame), per spec.
    /// The only supported command is the kill signal, which surfaces as
    /// [`Error::KillSignal`]; anything else is [`Error::UnknownCommand`].
    pub async fn await_message(&mut self, timeout: Option<Duration>) -> Result<Payload> {
        loop {
            let frame = self.read_frame_raw(timeout).await?;
            let payload = codec::decode(&frame)?;
            match payload {
                Payload::Command(command) if command == KILL_COMMAND => {
                    return Err(Error::KillSignal)
                }
                Payload::Command(command) => return Err(Error::UnknownCommand(command)),
                other => return Ok(other),
            }
        }
    }

    /// Half-closes the write side, informing the peer no more data is
    /// coming, then lets the socket drop and close fully.
    pub async fn kill(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
