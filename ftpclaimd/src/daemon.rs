use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use ftpclaim_core::{Credentials, FtpConnector, OAuthClient, ServiceAccountClient};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::sync::engine::{ClaimEngine, EngineError};
use crate::sync::events::EngineEvent;
use crate::sync::ledger::SheetLedger;
use crate::sync::state::FolderStatus;
use crate::sync::{ClaimOutcome, ReconcileReport};
use crate::token_provider::TokenProvider;

const DEFAULT_LOG_FILTER: &str = "ftpclaimd=info,ftpclaim_core=info";
const VERBOSE_LOG_FILTER: &str = "ftpclaimd=debug,ftpclaim_core=debug";
const NO_EDITOR: &str = "Sin Editor";

pub type SheetEngine = ClaimEngine<SheetLedger, FtpConnector>;

/// Logs go to stderr; `RUST_LOG` applies unless `verbose` is set.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub struct DaemonRuntime {
    config: RuntimeConfig,
    engine: Arc<SheetEngine>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl DaemonRuntime {
    pub fn bootstrap(config: RuntimeConfig) -> anyhow::Result<Self> {
        let settings = config
            .settings_store()
            .load()
            .and_then(|settings| settings.resolve())
            .map_err(EngineError::from)
            .with_context(|| {
                format!(
                    "settings in {} are incomplete",
                    config.settings_path.display()
                )
            })?;
        let tokens = token_provider(&config)?;
        let ledger = SheetLedger::from_sheet_url(&settings.sheet_url, tokens)
            .map_err(EngineError::from)?
            .with_worksheet(config.worksheet.clone());
        let connector =
            FtpConnector::new(settings.endpoint.clone().with_io_timeout(config.connect_timeout));

        let (events_tx, events) = mpsc::unbounded_channel();
        let engine = ClaimEngine::new(
            ledger,
            connector,
            &settings.base_path,
            config.download_root.clone(),
        )
        .with_events(events_tx)
        .with_connect_timeout(config.connect_timeout)
        .with_claim_jitter(config.claim_jitter);

        info!(
            host = %settings.endpoint.address(),
            base_path = %settings.base_path,
            spreadsheet = %settings.spreadsheet_id,
            "engine configured"
        );
        Ok(Self {
            config,
            engine: Arc::new(engine),
            events,
        })
    }

    pub fn engine(&self) -> &Arc<SheetEngine> {
        &self.engine
    }

    /// Reconciles every poll interval until interrupted.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            engine,
            events,
        } = self;
        info!(
            poll_secs = config.poll_interval.as_secs(),
            download_root = %config.download_root.display(),
            "started"
        );

        let logger_handle = tokio::spawn(log_events(events));
        let poll_interval = config.poll_interval;
        let poll_handle = tokio::spawn(async move {
            loop {
                if let Ok(report) = engine.reconcile().await {
                    let view = status_view(&report);
                    info!(
                        folders = report.folders.len(),
                        available = view.available.len(),
                        in_use = view.in_use.len(),
                        seeded = report.seeded.len(),
                        "reconciled"
                    );
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("shutting down");
        poll_handle.abort();
        logger_handle.abort();
        Ok(())
    }

    pub async fn reconcile_once(&self) -> Result<ReconcileReport, EngineError> {
        self.engine.reconcile().await
    }

    /// Claims one folder, printing progress to stdout. Without `editor` the
    /// name is read from stdin once the folder is locked. Ctrl-C stops the
    /// claim and releases the row.
    pub async fn claim(self, folder: &str, editor: Option<String>) -> ClaimOutcome {
        let Self {
            engine, mut events, ..
        } = self;
        let stale = discard_pending(&mut events);
        tracing::debug!(stale, "dropped events queued before the claim");
        let printer = tokio::spawn(print_events(events));

        let interrupted = AtomicBool::new(false);
        let claim = async {
            match editor {
                Some(editor) => engine.claim(folder, &editor).await,
                None => engine.claim_with_prompt(folder, prompt_editor).await,
            }
        };
        let outcome = engine
            .claim_until(folder, claim, ctrl_c_pressed(&interrupted))
            .await;

        // Dropping the last engine handle closes the event channel, unless an
        // interrupted transfer thread still holds a sender.
        drop(engine);
        if interrupted.load(Ordering::Relaxed) {
            printer.abort();
        } else if let Err(err) = printer.await {
            warn!("event printer stopped: {err}");
        }
        outcome
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
