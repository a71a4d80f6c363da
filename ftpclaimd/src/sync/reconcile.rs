use std::collections::{BTreeMap, BTreeSet, HashMap};

use ftpclaim_core::{RemoteConnector, RemoteSession};
use tracing::{debug, info};

use super::engine::{ClaimEngine, EngineError};
use super::ledger::Ledger;
use super::paths::entry_name;
use super::state::{FolderRecord, FolderStatus};

/// Outcome of one reconciliation pass, keyed by folder name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub folders: BTreeMap<String, FolderStatus>,
    /// Non-empty ledger editors of listed folders.
    pub editors: BTreeMap<String, String>,
    /// Folders that had no ledger row and were added as available.
    pub seeded: Vec<String>,
}

impl<L, C> ClaimEngine<L, C>
where
    L: Ledger,
    C: RemoteConnector,
{
    /// Lists the remote base directory and aligns the status cache with the
    /// ledger, adding an available row for every folder the ledger lacks.
    ///
    /// Nothing is cached when any step fails. Folders with a claim running
    /// in this process keep their local status.
    pub async fn reconcile(&self) -> Result<ReconcileReport, EngineError> {
        match self.reconcile_pass().await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.report_error(&err);
                Err(err)
            }
        }
    }

    async fn reconcile_pass(&self) -> Result<ReconcileReport, EngineError> {
        let remote = self.list_remote_folders().await?;
        let rows = self.ledger.read_rows().await?;
        let mut known: HashMap<&str, &FolderRecord> = HashMap::new();
        for row in &rows {
            known.entry(row.record.name.as_str()).or_insert(&row.record);
        }

        let mut report = ReconcileReport::default();
        let mut staged = Vec::new();
        for folder in &remote {
            let status = if self.is_in_flight(folder) {
                self.status_of(folder).unwrap_or(FolderStatus::InProgress)
            } else if let Some(record) = known.get(folder.as_str()) {
                if !record.editor.trim().is_empty() {
                    report
                        .editors
                        .insert(folder.clone(), record.editor.clone());
                }
                record.status
            } else {
                staged.push(FolderRecord::available(folder.as_str()));
                FolderStatus::Available
            };
            report.folders.insert(folder.clone(), status);
        }

        if !staged.is_empty() {
            // Rows another instance added since our read win over the seed.
            let present = self.ledger.seed_missing(&staged).await?;
            for record in &present {
                report.folders.insert(record.name.clone(), record.status);
                if !record.editor.trim().is_empty() {
                    report
                        .editors
                        .insert(record.name.clone(), record.editor.clone());
                }
            }
            report.seeded = staged
                .into_iter()
                .map(|record| record.name)
                .filter(|name| !present.iter().any(|record| &record.name == name))
                .collect();
            if !report.seeded.is_empty() {
                info!(count = report.seeded.len(), "added new folders to ledger");
            }
        }

        for (folder, status) in &report.folders {
            if !self.is_in_flight(folder) {
                self.set_status(folder, *status);
            }
        }
        debug!(folders = report.folders.len(), "reconcile pass complete");
        Ok(report)
    }

    async fn list_remote_folders(&self) -> Result<BTreeSet<String>, EngineError> {
        let base_path = self.base_path.clone();
        self.with_session(move |session| {
            session.list_names(Some(base_path.as_str())).map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry_name(entry))
                    .map(str::to_string)
                    .collect()
            })
        })
        .await
    }
}
