//! Connect, handshake, and drive the reactive request/reply loop against
//! a single coordinator connection.
//!
//! A worker never journals anything — it only ever has one job
//! outstanding, and that job lives in the coordinator's journal, not
//! here.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::ToSocketAddrs;

use crate::config::WorkerConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::payload::Payload;

/// Wraps a single connection to a coordinator. `J` is the job type
/// received, `R` the result type sent back.
pub struct WorkerDriver<J, R> {
    endpoint: Endpoint,
    free_pass_taken: bool,
    exited: bool,
    compress: bool,
    _marker: PhantomData<(J, R)>,
}

impl<J, R> WorkerDriver<J, R>
where
    J: DeserializeOwned,
    R: Serialize,
{
    /// Connects, retrying every second until `config.connect_retry`
    /// elapses, then runs the handshake unless disabled.
    pub async fn connect<A: ToSocketAddrs + Clone>(address: A, config: WorkerConfig) -> Result<Self> {
        let endpoint =
            Endpoint::connect(address, config.connect_retry, config.handshake_enabled).await?;
        Ok(WorkerDriver {
            endpoint,
            free_pass_taken: false,
            exited: false,
            compress: config.compress,
            _marker: PhantomData,
        })
    }

    /// The reactive cycle. The first call is a "free pass": the caller
    /// has no result yet, so it must pass `None`, and the call returns
    /// the first job without sending anything. Every later call must
    /// pass `Some(result)` — it sends that result, then blocks for the
    /// next job. Returns `Ok(None)` once the coordinator sends the kill
    /// command, signalling a clean shutdown.
    pub async fn call(&mut self, result: Option<R>) -> Result<Option<J>> {
        if !self.free_pass_taken {
            if result.is_some() {
                return Err(Error::InvalidArgument(
                    "the first call to WorkerDriver::call must pass None",
                ));
            }
            self.free_pass_taken = true;
        } else {
            let result = result.ok_or(Error::InvalidArgument(
                "WorkerDriver::call must pass Some(result) after the first invocation",
            ))?;
            self.endpoint
                .send(&Payload::from_job(&result)?, self.compress)
                .await?;
        }

        match self.endpoint.await_message(None).await {
            Ok(payload) => Ok(Some(payload.into_job()?)),
            Err(Error::KillSignal) => {
                self.exited = true;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    /// Closes the connection, unless a prior `KillSignal` already closed
    /// it (sending on an already half-closed socket would just error).
    pub async fn exit(&mut self) -> Result<()> {
        if !self.exited {
            self.endpoint.kill().await?;
            self.exited = true;
        }
        Ok(())
    }
}
