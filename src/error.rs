use thiserror::Error;

/// Unified error type for every subsystem in this crate.
///
/// Transport/timeout/protocol errors detected on a worker connection are
/// converted into a purge of that peer by the coordinator and never reach a
/// caller directly; only the threshold errors (`MaxWorkerLoss`,
/// `NoWorkersFound`) and caller misuse (`InvalidArgument`) propagate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("object payload failed to (de)serialize: {source}")]
    DecodeError {
        #[from]
        source: serde_json::Error,
    },

    #[error("expected an object payload, got a {0} payload")]
    WrongPayloadKind(&'static str),

    #[error("connection closed before a complete frame was received")]
    IncompleteMessage,

    #[error("received CONMAN_KILL control message")]
    KillSignal,

    #[error("received an unrecognised control command: {0}")]
    UnknownCommand(String),

    #[error("number of lost workers ({lost}) exceeds max_worker_loss ({max})")]
    MaxWorkerLoss { lost: usize, max: usize },

    #[error("all workers have been lost")]
    NoWorkersFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("timed out waiting for a connection")]
    ConnectTimeout,

    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
