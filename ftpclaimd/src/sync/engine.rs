use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ftpclaim_core::{FtpError, RemoteConnector, RemoteSession};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::backoff::Backoff;
use super::events::EngineEvent;
use super::ledger::{Ledger, LedgerError};
use super::mirror::MirrorError;
use super::paths::{PathError, remote_root};
use super::state::{FolderStates, FolderStatus};
use crate::config::ConfigError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("remote access failed: {0}")]
    RemoteAccess(#[from] FtpError),
    #[error("download failed: {0}")]
    Download(#[from] MirrorError),
    #[error("ledger access failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("{0}")]
    Validation(String),
    #[error("invalid folder name: {0}")]
    Path(#[from] PathError),
    #[error("cannot prepare {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Short heading for the presentation layer.
    pub fn title(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "Configuration error",
            EngineError::RemoteAccess(_) | EngineError::Download(_) => "Remote access error",
            EngineError::Ledger(_) => "Ledger error",
            EngineError::Validation(_) | EngineError::Path(_) => "Validation error",
            EngineError::LocalIo { .. } => "Local storage error",
        }
    }
}

/// Coordinates folder claims between the remote tree and the shared ledger.
///
/// The status cache is advisory; the ledger is authoritative and is re-read
/// before every claim.
pub struct ClaimEngine<L, C> {
    pub(super) ledger: L,
    pub(super) connector: C,
    pub(super) base_path: String,
    pub(super) download_root: PathBuf,
    pub(super) connect_timeout: Duration,
    pub(super) claim_backoff: Option<Backoff>,
    states: Mutex<FolderStates>,
    in_flight: Mutex<HashSet<String>>,
    /// Folders whose row this engine has written `en proceso` and not yet
    /// finalized or released.
    locked: Mutex<HashSet<String>>,
    events: Option<UnboundedSender<EngineEvent>>,
}

/// Marks a folder as busy for the lifetime of one claim.
pub(super) struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    folder: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.folder);
    }
}

impl<L, C> ClaimEngine<L, C>
where
    L: Ledger,
    C: RemoteConnector,
{
    pub fn new(
        ledger: L,
        connector: C,
        base_path: impl AsRef<str>,
        download_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            connector,
            base_path: remote_root(base_path.as_ref()),
            download_root: download_root.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            claim_backoff: None,
            states: Mutex::new(FolderStates::default()),
            in_flight: Mutex::new(HashSet::new()),
            locked: Mutex::new(HashSet::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Waits a random slice of `window` and re-reads the ledger before
    /// committing a claim. `None` skips the second read.
    pub fn with_claim_jitter(mut self, window: Option<Duration>) -> Self {
        self.claim_backoff = window.map(Backoff::settle_window);
        self
    }

    pub fn status_of(&self, folder: &str) -> Option<FolderStatus> {
        lock(&self.states).get(folder)
    }

    pub fn folder_states(&self) -> BTreeMap<String, FolderStatus> {
        lock(&self.states).snapshot()
    }

    /// The only writer of the status cache.
    pub(super) fn set_status(&self, folder: &str, status: FolderStatus) {
        let changed = lock(&self.states).set(folder, status);
        if changed {
            self.emit(EngineEvent::StateChanged {
                folder: folder.to_string(),
                status,
            });
        }
    }

    pub(super) fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    pub(super) fn events(&self) -> Option<UnboundedSender<EngineEvent>> {
        self.events.clone()
    }

    pub(super) fn report_error(&self, err: &EngineError) {
        warn!(title = err.title(), "{err}");
        self.emit(EngineEvent::Error {
            title: err.title().to_string(),
            message: err.to_string(),
        });
    }

    pub(super) fn begin_claim(&self, folder: &str) -> Option<InFlightGuard<'_>> {
        lock(&self.in_flight)
            .insert(folder.to_string())
            .then(|| InFlightGuard {
                set: &self.in_flight,
                folder: folder.to_string(),
            })
    }

    pub(super) fn is_in_flight(&self, folder: &str) -> bool {
        lock(&self.in_flight).contains(folder)
    }

    pub(super) fn mark_locked(&self, folder: &str) {
        lock(&self.locked).insert(folder.to_string());
    }

    pub(super) fn clear_locked(&self, folder: &str) {
        lock(&self.locked).remove(folder);
    }

    pub(super) fn holds_lock(&self, folder: &str) -> bool {
        lock(&self.locked).contains(folder)
    }

    /// Connects on a blocking thread, bounded by the connect timeout.
    pub(super) async fn open_session(&self) -> Result<C::Session, FtpError> {
        let connector = self.connector.clone();
        let task = tokio::task::spawn_blocking(move || connector.connect());
        match tokio::time::timeout(self.connect_timeout, task).await {
            Ok(joined) => joined.map_err(|err| FtpError::Task(err.to_string()))?,
            Err(_) => Err(FtpError::Timeout(self.connect_timeout)),
        }
    }

    /// Runs `work` against a fresh session on a blocking thread and closes
    /// the session afterwards.
    pub(super) async fn with_session<T, E, F>(&self, work: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        E: Into<EngineError> + Send + 'static,
        F: FnOnce(&mut C::Session) -> Result<T, E> + Send + 'static,
    {
        let mut session = self.open_session().await?;
        let result = tokio::task::spawn_blocking(move || {
            let result = work(&mut session);
            session.close();
            result
        })
        .await
        .map_err(|err| FtpError::Task(err.to_string()))?;
        result.map_err(Into::into)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
