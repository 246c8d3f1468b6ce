//! Producer side: answers follower requests from the replication log and
//! the store.

use config::Config;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use store::Storage;
use tracing::{debug, info, warn};

use crate::error::{ReplResult, ReplicationError};
use crate::log::{FetchLimits, FetchResult, ReplicationLog};
use crate::protocol::{read_frame, write_frame, Request, Response};
use crate::transport::BufferedStream;

/// Longest a single fetch may be held waiting for new entries.
pub const MAX_FETCH_WAIT: Duration = Duration::from_secs(30);

/// Most pairs a single snapshot chunk may carry.
pub const MAX_SNAPSHOT_CHUNK: usize = 4096;

/// Stateless request handler. Every request carries its own cursor, so one
/// `Producer` serves any number of followers.
#[derive(Debug)]
pub struct Producer {
    storage: Arc<Storage>,
    log: Arc<ReplicationLog>,
    limits: FetchLimits,
}

impl Producer {
    pub fn new(storage: Arc<Storage>, log: Arc<ReplicationLog>, cfg: &Config) -> Self {
        Self::with_limits(
            storage,
            log,
            FetchLimits {
                max_entries: cfg.fetch_batch,
                ..FetchLimits::default()
            },
        )
    }

    pub fn with_limits(storage: Arc<Storage>, log: Arc<ReplicationLog>, limits: FetchLimits) -> Self {
        Self {
            storage,
            log,
            limits,
        }
    }

    pub fn log(&self) -> &Arc<ReplicationLog> {
        &self.log
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Fetch {
                next_sequence,
                max_entries,
                max_wait_ms,
            } => {
                let limits = FetchLimits {
                    max_entries: (max_entries as usize).clamp(1, self.limits.max_entries.max(1)),
                    max_bytes: self.limits.max_bytes,
                };
                let mut result = self.log.fetch(next_sequence, limits);
                if matches!(result, FetchResult::UpToDate { .. }) && max_wait_ms > 0 {
                    let wait = Duration::from_millis(max_wait_ms).min(MAX_FETCH_WAIT);
                    if self.log.wait_for(next_sequence, wait) {
                        result = self.log.fetch(next_sequence, limits);
                    }
                }
                if let FetchResult::SequenceTooOld { floor } = result {
                    info!(next_sequence, floor, "follower fell behind retention floor");
                }
                Response::from(result)
            }
            Request::SnapshotChunk { start, max_pairs } => {
                let max_pairs = (max_pairs as usize).clamp(1, MAX_SNAPSHOT_CHUNK);
                match self.storage.snapshot_chunk(&start, max_pairs, self.limits.max_bytes) {
                    Ok(chunk) => {
                        if start.is_empty() {
                            info!(seq = chunk.seq, "serving snapshot");
                        }
                        debug!(seq = chunk.seq, pairs = chunk.pairs.len(), last = chunk.next.is_none(), "snapshot chunk");
                        Response::SnapshotChunk {
                            seq: chunk.seq,
                            pairs: chunk.pairs,
                            next: chunk.next,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "snapshot chunk failed");
                        Response::error(e.to_string())
                    }
                }
            }
            Request::Status => Response::Status(self.log.status()),
        }
    }

    /// Answers requests from `stream` until the peer closes it.
    ///
    /// A request with an unknown tag gets an `Error` response and the stream
    /// carries on; a corrupt frame ends it.
    ///
    /// # Errors
    ///
    /// `Io` or `Corrupt` from the stream.
    pub fn serve<S: Read + Write>(&self, stream: S) -> ReplResult<()> {
        let mut stream = stream;
        while let Some(body) = read_frame(&mut stream)? {
            let response = match Request::decode(&body) {
                Ok(request) => self.handle(request),
                Err(ReplicationError::Protocol(message)) => {
                    warn!(%message, "rejecting replication request");
                    Response::Error { message }
                }
                Err(e) => return Err(e),
            };
            write_frame(&mut stream, &response.encode()?)?;
        }
        Ok(())
    }

    /// Serves replication over TCP on `addr`, one thread per connection.
    ///
    /// # Errors
    ///
    /// `Io` if the address cannot be bound.
    pub fn listen(self: Arc<Self>, addr: &str) -> ReplResult<ListenerHandle> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stopping);
        let thread = thread::Builder::new()
            .name("eddy-repl-listener".into())
            .spawn(move || {
                info!(%local_addr, "replication listener started");
                for conn in listener.incoming() {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    match conn {
                        Ok(stream) => self.spawn_connection(stream),
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                info!(%local_addr, "replication listener stopped");
            })?;

        Ok(ListenerHandle {
            local_addr,
            stopping,
            thread: Some(thread),
        })
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let producer = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("eddy-repl-conn".into())
            .spawn(move || {
                debug!(?peer, "follower connected");
                let served = BufferedStream::new(stream)
                    .map_err(ReplicationError::from)
                    .and_then(|stream| producer.serve(stream));
                match served {
                    Ok(()) => debug!(?peer, "follower disconnected"),
                    Err(e) => warn!(?peer, error = %e, "replication connection closed"),
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start replication connection thread");
        }
    }
}

/// A running TCP listener. Stops accepting on [`stop`](Self::stop) or drop;
/// open connections finish on their own.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stopping.store(true, Ordering::Release);
        // wake the blocking accept
        if let Err(e) = TcpStream::connect(self.local_addr) {
            warn!(error = %e, "could not wake replication listener");
            return;
        }
        if thread.join().is_err() {
            warn!("replication listener panicked");
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
