//! A lightweight distributed task-farming runtime.
//!
//! A single [`Coordinator`] accepts TCP connections from many
//! [`WorkerDriver`] processes, dispatches opaque job payloads to them,
//! collects opaque result payloads, and reassigns in-flight jobs when a
//! worker dies. Jobs and results are arbitrary `serde`-compatible user
//! values; the runtime never inspects their contents.
//!
//! It's an async library built on the tokio runtime, using a framed,
//! self-describing wire protocol over a plain `TcpStream` — no transport
//! security, no multi-coordinator consensus, no cross-restart durability.
//! Pair this crate with `rustls` at the call site if you need encryption;
//! it stays out of that business deliberately.

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod frame;
mod journal;
pub mod paging;
pub mod payload;
pub mod protocol;
pub mod worker;

pub use config::{CoordinatorConfig, WorkerConfig};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use payload::Payload;
pub use worker::WorkerDriver;
