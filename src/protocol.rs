//! The protocol descriptor exchanged once, by both peers, as the very
//! first framed message after a TCP connection is established.

use serde::{Deserialize, Serialize};

/// This crate's serializer format version. Bumped only on wire-incompatible
/// changes to the object-graph encoding; kept deliberately separate from
/// the crate's own semver so that legacy peers (which may declare a lower
/// number) can still negotiate down to a mutually understood version.
pub const SERIALIZER_VERSION: u32 = 1;

/// This crate's framing/control-protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// The control command recognised by [`crate::endpoint::Endpoint::await_message`].
pub const KILL_COMMAND: &str = "CONMAN_KILL";

/// Exchanged once per connection, immediately after the TCP handshake, as
/// an `Object`-flagged frame. After exchange both peers adopt the
/// element-wise minimum of the integer versions, and each peer records
/// the other's `receive_buffer_size` as its own send-budget ceiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub serializer_version: u32,
    pub protocol_version: u32,
    pub receive_buffer_size: u64,
}

impl ProtocolDescriptor {
    pub fn local(receive_buffer_size: u64) -> Self {
        ProtocolDescriptor {
            serializer_version: SERIALIZER_VERSION,
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size,
        }
    }

    /// Resolves the mutually supported versions from this (local)
    /// descriptor and the peer's descriptor. The buffer size carried in
    /// the result is always the *peer's*, since that's what a sender
    /// needs to track as its outbound budget.
    pub fn negotiate(local: ProtocolDescriptor, peer: ProtocolDescriptor) -> ProtocolDescriptor {
        ProtocolDescriptor {
            serializer_version: local.serializer_version.min(peer.serializer_version),
            protocol_version: local.protocol_version.min(peer.protocol_version),
            receive_buffer_size: peer.receive_buffer_size,
        }
    }
}
