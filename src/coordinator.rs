//! Accept loop, worker registry, dispatcher, retriever, reassignment.
//!
//! A `Coordinator<J, R>` is the sole owner of every worker connection; no
//! two calls against the same worker ever interleave because every public
//! method here takes `&mut self` and drives its sockets directly — there
//! is no background task per worker to synchronise with.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, ToSocketAddrs};

use crate::codec;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::journal::{accounted_size, JournaledEndpoint};
use crate::paging::PagingStore;
use crate::payload::Payload;
use crate::protocol::KILL_COMMAND;

/// Default per-message read timeout used by [`Coordinator::retrieve`],
/// per spec.
const RETRIEVE_TIMEOUT: Duration = Duration::from_secs(10);

/// A job waiting to be sent, in one of two representations. Reassigned
/// jobs recovered from a purged worker's journal are kept pre-encoded
/// (`Encoded`) when the coordinator runs with `handshake_enabled = false`,
/// since every peer is assumed to share an identical wire encoding and
/// re-decoding then re-encoding them would be wasted work.
enum Pending<J> {
    Value(J),
    Encoded(Frame),
}

/// Accepts worker connections, farms jobs out to them, and collects
/// results. Generic over the job type `J` sent to workers and the result
/// type `R` received back; both must round-trip through `serde_json`.
pub struct Coordinator<J, R> {
    listener: TcpListener,
    workers: Vec<JournaledEndpoint>,
    lost_workers: usize,
    pending_jobs: PagingStore,
    pending_results: PagingStore,
    config: CoordinatorConfig,
    _marker: PhantomData<(J, R)>,
}

impl<J, R> Coordinator<J, R>
where
    J: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    /// Binds the accept socket. Backlog is whatever tokio's default is —
    /// tokio gives no way to request [`crate::endpoint::ACCEPT_BACKLOG`]
    /// explicitly without a platform socket-options crate outside this
    /// workspace's dependency stack, so the constant is documentation of
    /// intent rather than a value actually passed to `listen(2)`.
    pub async fn bind<A: ToSocketAddrs>(address: A, config: CoordinatorConfig) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Coordinator {
            listener,
            workers: Vec::new(),
            lost_workers: 0,
            pending_jobs: PagingStore::new()?,
            pending_results: PagingStore::new()?,
            config,
            _marker: PhantomData,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn lost_worker_count(&self) -> usize {
        self.lost_workers
    }

    /// True iff any worker is busy, or paged jobs or paged results are
    /// waiting. Not part of spec.md's public contract but present in
    /// every generation of the source this was ported from, and cheap
    /// enough to expose as a diagnostic.
    pub fn is_active(&self) -> bool {
        self.workers.iter().any(|w| !w.is_idle())
            || !self.pending_jobs.is_empty()
            || !self.pending_results.is_empty()
    }

    /// Drains whatever connections are already waiting, non-blockingly.
    /// If `await_n` is given, additionally blocks (up to `timeout`, or
    /// indefinitely if `timeout` is `None`) until at least that many
    /// workers are registered or the deadline passes. `await_n = Some(0)`
    /// is caller error.
    pub async fn mount(
        &mut self,
        await_n: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        if matches!(await_n, Some(0)) {
            return Err(Error::InvalidArgument("await_n must be greater than zero"));
        }

        while let Some(endpoint) = self.accept_one(Some(Duration::ZERO)).await? {
            self.register(endpoint);
        }

        if let Some(n) = await_n {
            let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
            while self.workers.len() < n {
                let per_call = match deadline {
                    Some(dl) => {
                        let remaining = dl.saturating_duration_since(tokio::time::Instant::now());
                        if remaining.is_zero() {
                            break;
                        }
                        Some(remaining)
                    }
                    None => None,
                };
                match self.accept_one(per_call).await? {
                    Some(endpoint) => self.register(endpoint),
                    None => break,
                }
            }
        }

        Ok(self.workers.len())
    }

    async fn accept_one(&mut self, timeout: Option<Duration>) -> Result<Option<JournaledEndpoint>> {
        let accept_fut = self.listener.accept();
        let (stream, addr) = match timeout {
            Some(d) => match tokio::time::timeout(d, accept_fut).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            },
            None => accept_fut.await?,
        };
        debug!("accepted connection from {addr}");
        let endpoint = crate::endpoint::Endpoint::accept(stream, self.config.handshake_enabled).await?;
        Ok(Some(JournaledEndpoint::new(endpoint)?))
    }

    fn register(&mut self, endpoint: JournaledEndpoint) {
        info!("worker {} registered, {} total", endpoint.id(), self.workers.len() + 1);
        self.workers.push(endpoint);
    }

    /// Schedules a batch of jobs. `jobs` may be empty — that still flushes
    /// whatever's paged. See module docs / spec for the idle-pass,
    /// budget-pass, spill algorithm.
    pub async fn submit(&mut self, jobs: Vec<J>) -> Result<()> {
        self.retrieve(true).await?;

        let mut queue: VecDeque<Pending<J>> = jobs.into_iter().map(Pending::Value).collect();
        for raw in self.pending_jobs.load_all()? {
            queue.push_back(self.decode_pending_from_storage(&raw)?);
        }

        // Idle pass: one job per idle worker per round, draining from the
        // front of the queue so no job is ever skipped by a mutate-while-
        // iterating bug.
        loop {
            let idle_indices: Vec<usize> = self
                .workers
                .iter()
                .enumerate()
                .filter(|(_, w)| w.is_idle())
                .map(|(i, _)| i)
                .collect();
            if idle_indices.is_empty() || queue.is_empty() {
                break;
            }
            for idx in idle_indices {
                let Some(pending) = queue.pop_front() else {
                    break;
                };
                let frame = self.encode_pending(&pending)?;
                self.workers[idx].send_raw(frame).await?;
            }
            self.retrieve(true).await?;
        }

        // Budget pass: workers ordered by descending free_space; a worker
        // that accepts a job rotates to the back so no single fast worker
        // is repeatedly favoured.
        if !queue.is_empty() {
            let mut order: Vec<usize> = (0..self.workers.len()).collect();
            order.sort_by_key(|&i| std::cmp::Reverse(self.workers[i].free_space()));

            let mut unplaced = VecDeque::new();
            while let Some(pending) = queue.pop_front() {
                let frame = self.encode_pending(&pending)?;
                let needed = accounted_size(frame.to_wire_bytes().len()) as u64;

                let mut placed = false;
                for pos in 0..order.len() {
                    let idx = order[pos];
                    if needed <= self.workers[idx].free_space() {
                        self.workers[idx].send_raw(frame).await?;
                        let worker_idx = order.remove(pos);
                        order.push(worker_idx);
                        placed = true;
                        break;
                    }
                }
                if !placed {
                    unplaced.push_back(pending);
                }
            }
            queue = unplaced;
        }

        // Spill: anything left over is paged to disk for the next cycle.
        if !queue.is_empty() {
            let mut raw = Vec::with_capacity(queue.len());
            for pending in &queue {
                raw.push(self.encode_pending_for_storage(pending)?);
            }
            self.pending_jobs.append(&raw)?;
        }

        Ok(())
    }

    fn encode_pending(&self, pending: &Pending<J>) -> Result<Frame> {
        match pending {
            Pending::Value(job) => codec::encode(&Payload::from_job(job)?, self.config.compress),
            Pending::Encoded(frame) => Ok(frame.clone()),
        }
    }

    /// Mirrors `decode_pending_from_storage`'s expectation: with the
    /// handshake enabled, pending jobs round-trip through storage as
    /// plain JSON values; with it disabled, every storage entry — freshly
    /// spilled jobs included, not just ones recovered via
    /// `purge_lost_worker` — is a wire-format frame, since that's what
    /// gets replayed verbatim to whichever worker picks the job up next.
    fn encode_pending_for_storage(&self, pending: &Pending<J>) -> Result<Vec<u8>> {
        if self.config.handshake_enabled {
            match pending {
                Pending::Value(job) => Ok(serde_json::to_vec(job)?),
                Pending::Encoded(frame) => Ok(frame.to_wire_bytes()),
            }
        } else {
            Ok(self.encode_pending(pending)?.to_wire_bytes())
        }
    }

    fn decode_pending_from_storage(&self, bytes: &[u8]) -> Result<Pending<J>> {
        if self.config.handshake_enabled {
            Ok(Pending::Value(serde_json::from_slice(bytes)?))
        } else {
            Ok(Pending::Encoded(Frame::from_wire_bytes(bytes)?))
        }
    }

    /// Collects whatever replies are currently available. If `to_page` is
    /// set, the collected results are appended to the pending-results
    /// store and `None` is returned; otherwise they (plus anything
    /// already paged) are returned directly.
    pub async fn retrieve(&mut self, to_page: bool) -> Result<Option<Vec<R>>> {
        let mut results: Vec<R> = if !to_page && !self.pending_results.is_empty() {
            self.pending_results
                .load_all()?
                .into_iter()
                .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
                .collect::<Result<Vec<R>>>()?
        } else {
            Vec::new()
        };

        let mut lost = Vec::new();
        for idx in 0..self.workers.len() {
            loop {
                if !self.workers[idx].poll(Some(Duration::ZERO)).await? {
                    break;
                }
                match self.workers[idx].is_alive().await {
                    Ok(true) => {}
                    Ok(false) => {
                        lost.push(idx);
                        break;
                    }
                    Err(_) => {
                        lost.push(idx);
                        break;
                    }
                }
                match self.workers[idx]
                    .await_message(Some(RETRIEVE_TIMEOUT))
                    .await
                {
                    Ok(payload) => results.push(payload.into_job()?),
                    Err(Error::IncompleteMessage) | Err(Error::KillSignal) => {
                        lost.push(idx);
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        lost.sort_unstable();
        lost.dedup();
        for idx in lost.into_iter().rev() {
            let worker = self.workers.remove(idx);
            self.purge_lost_worker(worker).await?;
        }

        if to_page {
            let raw: Vec<Vec<u8>> = results
                .iter()
                .map(|r| serde_json::to_vec(r).map_err(Error::from))
                .collect::<Result<_>>()?;
            self.pending_results.append(&raw)?;
            Ok(None)
        } else {
            Ok(Some(results))
        }
    }

    /// Drives the submit/retrieve phases alternately until both the
    /// paged-jobs and the in-flight-worker queues are quiescent, then
    /// returns everything collected. Flattened into one loop rather than
    /// the mutually recursive shape of the reference implementation, to
    /// keep stack depth constant under sustained crash/reassign churn.
    pub async fn await_results(&mut self) -> Result<Vec<R>> {
        loop {
            while !self.pending_jobs.is_empty() {
                self.submit(Vec::new()).await?;
                tokio::time::sleep(self.config.await_interval).await;
            }

            let mut repaged = false;
            while self.workers.iter().any(|w| !w.is_idle()) {
                let before = self.pending_jobs.len();
                self.retrieve(true).await?;
                if self.pending_jobs.len() > before {
                    repaged = true;
                    break;
                }
                tokio::time::sleep(self.config.await_interval).await;
            }

            if self.pending_jobs.is_empty() && !repaged {
                break;
            }
        }

        self.pending_results
            .load_all()?
            .into_iter()
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
            .collect()
    }

    /// Removes a worker's outstanding jobs from its journal and requeues
    /// them as paged jobs, then closes its socket. Called only for
    /// workers already removed from `self.workers`.
    async fn purge_lost_worker(&mut self, mut worker: JournaledEndpoint) -> Result<()> {
        warn!(
            "purging lost worker {}, {} lost so far",
            worker.id(),
            self.lost_workers + 1
        );
        let outstanding = worker.take_outstanding_frames()?;
        let mut raw = Vec::with_capacity(outstanding.len());
        for bytes in outstanding {
            let frame = Frame::from_wire_bytes(&bytes)?;
            let pending = if self.config.handshake_enabled {
                let payload = codec::decode(&frame)?;
                Pending::Value(payload.into_job()?)
            } else {
                Pending::Encoded(frame)
            };
            raw.push(self.encode_pending_for_storage(&pending)?);
        }
        self.pending_jobs.append(&raw)?;
        worker.kill().await.ok();
        self.lost_workers += 1;
        Ok(())
    }

    /// Shorthand combining `submit` and `retrieve`. Applies the
    /// `max_worker_loss`/`kill_on_no_workers` thresholds before fetching.
    pub async fn call(&mut self, jobs: Vec<J>, fetch: bool) -> Result<Option<Vec<R>>> {
        if !jobs.is_empty() || !self.pending_jobs.is_empty() {
            self.submit(jobs).await?;
        }

        if self.lost_workers > self.config.max_worker_loss {
            return Err(Error::MaxWorkerLoss {
                lost: self.lost_workers,
                max: self.config.max_worker_loss,
            });
        }
        if self.lost_workers > 0 && self.workers.is_empty() && self.config.kill_on_no_workers {
            return Err(Error::NoWorkersFound);
        }

        if fetch {
            Ok(self.retrieve(false).await?)
        } else {
            Ok(None)
        }
    }

    /// Tells every worker to exit, closes every endpoint, and resets both
    /// paging stores. Paging files are process-ephemeral and go away when
    /// their last handle is dropped.
    pub async fn disconnect(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            worker.send_command(KILL_COMMAND).await.ok();
            worker.kill().await.ok();
        }
        self.workers.clear();
        self.pending_jobs = PagingStore::new()?;
        self.pending_results = PagingStore::new()?;
        Ok(())
    }
}
