//! Per-log actor (spec §4.C): a single task that owns one [`LogFile`] and
//! is the only thing ever allowed to touch it. Callers talk to it over a
//! bounded `mpsc` channel with one-shot reply channels, the classic Tokio
//! "actor" shape also used for per-connection state in the teacher's
//! `client_connection.rs` and for per-module state in `module_host.rs`.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::codec::{CodecError, Record};
use crate::logfile::{LogFile, LogFileError};

#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Log(#[from] LogFileError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("empty logfile")]
    EmptyLog,
    #[error("upto not given")]
    NoUpto,
    #[error("log actor is no longer running")]
    Closed,
}

/// Snapshot returned by `Stat`, also the shape the stats loop renders as
/// JSON (spec §4.C.4, §4.F).
#[derive(Debug, Clone)]
pub struct StatSnapshot {
    pub name: String,
    pub lastmsg: u32,
    pub gets: u64,
    pub puts: u64,
    pub archives: u64,
    pub errs: u64,
}

enum ActorMessage {
    Get {
        from: u32,
        reply: oneshot::Sender<Result<Vec<Record>, ActorError>>,
    },
    Put {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<u32, ActorError>>,
    },
    Archive {
        upto: u32,
        reply: oneshot::Sender<Result<(), ActorError>>,
    },
    Stat {
        reply: oneshot::Sender<StatSnapshot>,
    },
}

/// A cheaply-cloneable handle to a running per-log actor. Every method
/// sends one request and awaits its reply; there is no queuing beyond the
/// channel's own buffer.
#[derive(Clone)]
pub struct ActorHandle {
    pub name: String,
    tx: mpsc::Sender<ActorMessage>,
}

impl ActorHandle {
    pub async fn get(&self, from: u32) -> Result<Vec<Record>, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Get { from, reply })
            .await
            .map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)?
    }

    pub async fn put(&self, data: Vec<u8>) -> Result<u32, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Put { data, reply })
            .await
            .map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)?
    }

    pub async fn archive(&self, upto: u32) -> Result<(), ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Archive { upto, reply })
            .await
            .map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)?
    }

    pub async fn stat(&self) -> Result<StatSnapshot, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Stat { reply })
            .await
            .map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)
    }
}

/// Spawns the actor task that owns `log` for the rest of the process
/// lifetime, and returns a handle to it.
pub fn spawn(log: LogFile) -> ActorHandle {
    let name = log.name.clone();
    let (tx, rx) = mpsc::channel(32);

    let span = tracing::info_span!("log", name = %name);
    tokio::spawn(run(log, rx).instrument(span));

    ActorHandle { name, tx }
}

async fn run(mut log: LogFile, mut rx: mpsc::Receiver<ActorMessage>) {
    while let Some(msg) = rx.recv().await {
        log = dispatch(log, msg).await;
    }
}

/// Processes exactly one request to completion, then hands the log state
/// back so the next iteration of `run`'s loop can accept another. File I/O
/// runs on a blocking-pool thread via `spawn_blocking`, since [`LogFile`]'s
/// operations are synchronous `std::fs` calls (mirroring the teacher's
/// fully-synchronous `commitlog` crate, wrapped here at the async seam
/// instead of inside the storage code itself).
async fn dispatch(log: LogFile, msg: ActorMessage) -> LogFile {
    match msg {
        ActorMessage::Get { from, reply } => {
            tracing::debug!(from, "get");
            let (result, log) = tokio::task::spawn_blocking(move || {
                let mut log = log;
                let result = log.get(from).map_err(ActorError::from);
                (result, log)
            })
            .await
            .expect("actor blocking task panicked");
            let _ = reply.send(result);
            log
        }
        ActorMessage::Put { data, reply } => {
            tracing::debug!(size = data.len(), "put");
            let (result, log) = tokio::task::spawn_blocking(move || {
                let mut log = log;
                let result = log.put(&data).map_err(ActorError::from);
                (result, log)
            })
            .await
            .expect("actor blocking task panicked");
            let _ = reply.send(result);
            log
        }
        ActorMessage::Archive { upto, reply } => {
            tracing::debug!(upto, "archive");
            let (result, log) = tokio::task::spawn_blocking(move || {
                let mut log = log;
                let result = crate::archive::archive(&mut log, upto);
                (result, log)
            })
            .await
            .expect("actor blocking task panicked");
            if result.is_ok() {
                tracing::info!(upto, "archived log");
            }
            let _ = reply.send(result);
            log
        }
        ActorMessage::Stat { reply } => {
            let (snapshot, log) = tokio::task::spawn_blocking(move || {
                let mut log = log;
                let counters = log.take_counters();
                let snapshot = StatSnapshot {
                    name: log.name.clone(),
                    lastmsg: log.lastmsg(),
                    gets: counters.gets,
                    puts: counters.puts,
                    archives: counters.archives,
                    errs: counters.errs,
                };
                (snapshot, log)
            })
            .await
            .expect("actor blocking task panicked");
            let _ = reply.send(snapshot);
            log
        }
    }
}
