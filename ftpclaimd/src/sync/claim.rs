use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

use ftpclaim_core::RemoteConnector;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::engine::{ClaimEngine, EngineError};
use super::events::EngineEvent;
use super::ledger::{Ledger, LedgerRow, RowUpdate, format_timestamp, now_utc};
use super::mirror::{MirrorProgress, mirror_directory};
use super::paths::{local_child, remote_join};
use super::state::FolderStatus;

#[derive(Debug)]
pub enum ClaimOutcome {
    /// The folder was downloaded to this directory and marked done.
    Claimed(PathBuf),
    Rejected(RejectReason),
    Failed(EngineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyClaimed {
        status: FolderStatus,
        editor: String,
    },
    /// Another claim for the folder is running in this process.
    ClaimInProgress,
    NotTracked,
    Cancelled,
    /// The claim was stopped from outside (Ctrl-C) before it finished.
    Interrupted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AlreadyClaimed { status, editor } if editor.is_empty() => {
                write!(f, "folder is already {status}")
            }
            RejectReason::AlreadyClaimed { status, editor } => {
                write!(f, "folder is already {status} by {editor}")
            }
            RejectReason::ClaimInProgress => f.write_str("a claim for this folder is already running"),
            RejectReason::NotTracked => f.write_str("folder has no ledger row; reconcile first"),
            RejectReason::Cancelled => f.write_str("no editor name was given"),
            RejectReason::Interrupted => f.write_str("claim was interrupted"),
        }
    }
}

struct ClaimAttempt {
    folder: String,
    editor: String,
    started_at: Instant,
}

impl<L, C> ClaimEngine<L, C>
where
    L: Ledger,
    C: RemoteConnector,
{
    /// Claims `folder` for `editor`, downloads it and records the result.
    ///
    /// The folder is written `en proceso` only after a fresh ledger read
    /// shows it available. A failed download puts the row back to
    /// `disponible`.
    pub async fn claim(&self, folder: &str, editor: &str) -> ClaimOutcome {
        let Some(_guard) = self.begin_claim(folder) else {
            return ClaimOutcome::Rejected(RejectReason::ClaimInProgress);
        };
        let outcome = self.claim_for(folder, editor).await;
        self.clear_locked(folder);
        outcome
    }

    /// Like [`claim`](Self::claim), but asks for the editor name only after
    /// the folder is locked. `prompt` runs on its own thread; no answer or a
    /// blank one releases the folder.
    pub async fn claim_with_prompt<F>(&self, folder: &str, prompt: F) -> ClaimOutcome
    where
        F: FnOnce() -> Option<String> + Send + 'static,
    {
        let Some(_guard) = self.begin_claim(folder) else {
            return ClaimOutcome::Rejected(RejectReason::ClaimInProgress);
        };
        let outcome = self.claim_after_prompt(folder, prompt).await;
        self.clear_locked(folder);
        outcome
    }

    /// Drives `claim` (a [`claim`](Self::claim) or
    /// [`claim_with_prompt`](Self::claim_with_prompt) future for `folder`)
    /// until `interrupted` resolves first. An interrupted claim releases the
    /// row if this engine had already locked it.
    pub async fn claim_until<F, I>(&self, folder: &str, claim: F, interrupted: I) -> ClaimOutcome
    where
        F: Future<Output = ClaimOutcome>,
        I: Future<Output = ()>,
    {
        tokio::select! {
            outcome = claim => outcome,
            () = interrupted => {
                warn!(folder, "claim interrupted");
                self.abandon(folder).await
            }
        }
    }

    async fn claim_for(&self, folder: &str, editor: &str) -> ClaimOutcome {
        if let Err(outcome) = self.ensure_claimable(folder).await {
            return outcome;
        }
        let editor = editor.trim();
        if editor.is_empty() {
            return self.fail(EngineError::Validation(
                "editor name must not be empty".to_string(),
            ));
        }

        let attempt = ClaimAttempt::new(folder, editor);
        if let Err(err) = self.acquire(&attempt.folder, &attempt.editor).await {
            return self.fail(err);
        }
        self.download_and_finalize(attempt).await
    }

    async fn claim_after_prompt<F>(&self, folder: &str, prompt: F) -> ClaimOutcome
    where
        F: FnOnce() -> Option<String> + Send + 'static,
    {
        if let Err(outcome) = self.ensure_claimable(folder).await {
            return outcome;
        }
        if let Err(err) = self.acquire(folder, "").await {
            return self.fail(err);
        }

        // A detached thread, so a pending read never holds up shutdown.
        let (answer_tx, answer_rx) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = answer_tx.send(prompt());
        });
        let answer = answer_rx
            .await
            .ok()
            .flatten()
            .map(|editor| editor.trim().to_string())
            .filter(|editor| !editor.is_empty());
        let Some(editor) = answer else {
            info!(folder, "claim cancelled before download");
            if let Err(err) = self.release(folder).await {
                return self.fail(err);
            }
            return ClaimOutcome::Rejected(RejectReason::Cancelled);
        };
        self.download_and_finalize(ClaimAttempt::new(folder, &editor))
            .await
    }

    async fn abandon(&self, folder: &str) -> ClaimOutcome {
        if !self.holds_lock(folder) {
            return ClaimOutcome::Rejected(RejectReason::Interrupted);
        }
        let outcome = match self.release(folder).await {
            Ok(()) => ClaimOutcome::Rejected(RejectReason::Interrupted),
            Err(err) => self.fail(err),
        };
        self.clear_locked(folder);
        outcome
    }

    async fn ensure_claimable(&self, folder: &str) -> Result<(), ClaimOutcome> {
        self.check_row(folder).await?;
        if let Some(backoff) = self.claim_backoff {
            let delay = backoff.delay();
            debug!(folder, ?delay, "re-checking ledger before claim");
            tokio::time::sleep(delay).await;
            self.check_row(folder).await?;
        }
        Ok(())
    }

    async fn check_row(&self, folder: &str) -> Result<(), ClaimOutcome> {
        let row = self
            .ledger
            .find_row(folder)
            .await
            .map_err(|err| self.fail(err.into()))?;
        match row {
            None => Err(ClaimOutcome::Rejected(RejectReason::NotTracked)),
            Some(LedgerRow { record, .. }) if record.status == FolderStatus::Available => Ok(()),
            Some(LedgerRow { record, .. }) => {
                self.set_status(folder, record.status);
                Err(ClaimOutcome::Rejected(RejectReason::AlreadyClaimed {
                    status: record.status,
                    editor: record.editor,
                }))
            }
        }
    }

    async fn acquire(&self, folder: &str, editor: &str) -> Result<(), EngineError> {
        self.ledger
            .update_row(folder, &RowUpdate::in_progress(editor))
            .await?;
        self.mark_locked(folder);
        self.set_status(folder, FolderStatus::InProgress);
        info!(folder, editor, "folder claimed");
        Ok(())
    }

    async fn download_and_finalize(&self, attempt: ClaimAttempt) -> ClaimOutcome {
        let local_dir = match self.download(&attempt.folder).await {
            Ok(local_dir) => local_dir,
            Err(err) => {
                if let Err(release_err) = self.release(&attempt.folder).await {
                    self.report_error(&release_err);
                }
                return self.fail(err);
            }
        };

        let completed_at = now_utc();
        let update = RowUpdate::downloaded(&attempt.editor, completed_at);
        if let Err(err) = self.ledger.update_row(&attempt.folder, &update).await {
            // The files are on disk but the ledger still says en proceso.
            error!(folder = %attempt.folder, "download finished but ledger update failed: {err}");
            return self.fail(err.into());
        }
        self.set_status(&attempt.folder, FolderStatus::Downloaded);
        info!(
            folder = %attempt.folder,
            editor = %attempt.editor,
            completed_at = %format_timestamp(completed_at),
            elapsed_ms = attempt.started_at.elapsed().as_millis() as u64,
            "folder downloaded"
        );
        self.emit(EngineEvent::Finished {
            folder: attempt.folder.clone(),
            message: format!("downloaded to {}", local_dir.display()),
        });
        ClaimOutcome::Claimed(local_dir)
    }

    async fn download(&self, folder: &str) -> Result<PathBuf, EngineError> {
        let local_dir = local_child(&self.download_root, folder)?;
        tokio::fs::create_dir_all(&local_dir)
            .await
            .map_err(|source| EngineError::LocalIo {
                path: local_dir.clone(),
                source,
            })?;

        let remote_dir = remote_join(&self.base_path, folder);
        let target = local_dir.clone();
        let events = self.events();
        let folder_name = folder.to_string();
        let summary = self
            .with_session(move |session| {
                let mut on_progress = |progress: MirrorProgress| {
                    if let Some(events) = &events {
                        let _ = events.send(EngineEvent::Progress {
                            folder: folder_name.clone(),
                            done: progress.done,
                            total: progress.total,
                            item: progress.item,
                        });
                    }
                };
                mirror_directory(session, &remote_dir, &target, &mut on_progress)
            })
            .await?;
        debug!(folder, files = summary.files, bytes = summary.bytes, "mirror complete");
        Ok(local_dir)
    }

    /// Puts the row back to available. On failure the cache keeps
    /// `InProgress`, matching what the ledger still says.
    async fn release(&self, folder: &str) -> Result<(), EngineError> {
        match self.ledger.update_row(folder, &RowUpdate::released()).await {
            Ok(()) => {
                self.set_status(folder, FolderStatus::Available);
                Ok(())
            }
            Err(err) => {
                error!(folder, "could not release claim, ledger still shows it in progress: {err}");
                Err(err.into())
            }
        }
    }

    fn fail(&self, err: EngineError) -> ClaimOutcome {
        self.report_error(&err);
        ClaimOutcome::Failed(err)
    }
}

impl ClaimAttempt {
    fn new(folder: &str, editor: &str) -> Self {
        Self {
            folder: folder.to_string(),
            editor: editor.to_string(),
            started_at: Instant::now(),
        }
    }
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

#[cfg(test)]
#[path = "claim_tests.rs"]
mod tests;
