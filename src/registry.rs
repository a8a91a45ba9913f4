//! Log-set registry (spec §4.D): a single serial executor owning the map
//! of log name to running actor. Because it is single-threaded, racing
//! `LookupOrCreate` calls for the same not-yet-known name can only ever
//! produce one actor -- the second call simply finds the first one's
//! insert already in the map by the time it's serviced.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::actor::{self, ActorHandle};
use crate::logfile::{LogFile, LogFileError};

/// Reserved log used by the stats loop (spec §3, §4.F).
pub const RESERVED_STATS_LOG: &str = "_kaf";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Load(#[from] LogFileError),
}

/// A log name must be non-empty, printable, and not look like an archived
/// file (`--<name>--<timestamp>`) or a dotfile (spec §3). It also must not
/// be able to escape the data directory once joined onto it: no path
/// separators and no `..` component, since `axum`'s `Path<String>` hands us
/// a percent-decoded segment that can smuggle both even though the raw URL
/// matched a single route segment.
pub fn is_valid_log_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.starts_with("--")
        && name.chars().all(|c| c.is_ascii_graphic() && c != '/' && c != '\\')
}

enum RegistryMessage {
    LookupOrCreate {
        name: String,
        create: bool,
        reply: oneshot::Sender<Result<Option<ActorHandle>, RegistryError>>,
    },
    EnumerateAll {
        reply: oneshot::Sender<Vec<ActorHandle>>,
    },
}

#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryMessage>,
}

impl RegistryHandle {
    pub async fn lookup_or_create(&self, name: &str, create: bool) -> Result<Option<ActorHandle>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryMessage::LookupOrCreate {
                name: name.to_owned(),
                create,
                reply,
            })
            .await
            .expect("registry task died");
        rx.await.expect("registry task died while servicing request")
    }

    pub async fn enumerate_all(&self) -> Vec<ActorHandle> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryMessage::EnumerateAll { reply })
            .await
            .expect("registry task died");
        rx.await.expect("registry task died while servicing request")
    }
}

/// Spawns the registry task rooted at `data_dir` and returns a handle to it.
pub fn spawn(data_dir: PathBuf) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run(data_dir, rx));
    RegistryHandle { tx }
}

async fn run(data_dir: PathBuf, mut rx: mpsc::Receiver<RegistryMessage>) {
    let mut logs: HashMap<String, ActorHandle> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            RegistryMessage::LookupOrCreate { name, create, reply } => {
                let result = lookup_or_create(&data_dir, &mut logs, &name, create);
                let _ = reply.send(result);
            }
            RegistryMessage::EnumerateAll { reply } => {
                let handles: Vec<ActorHandle> = logs.values().cloned().collect();
                let _ = reply.send(handles);
            }
        }
    }
}

fn lookup_or_create(
    data_dir: &std::path::Path,
    logs: &mut HashMap<String, ActorHandle>,
    name: &str,
    create: bool,
) -> Result<Option<ActorHandle>, RegistryError> {
    if let Some(handle) = logs.get(name) {
        return Ok(Some(handle.clone()));
    }

    let path = data_dir.join(name);
    if create && !path.exists() {
        LogFile::create(path.clone(), name.to_owned(), 0)?;
        tracing::info!(name, "created log");
    }
    if !path.exists() {
        return Ok(None);
    }

    let logfile = LogFile::open_and_scan(path, name.to_owned())?;
    let handle = actor::spawn(logfile);
    logs.insert(name.to_owned(), handle.clone());
    Ok(Some(handle))
}
