use std::collections::HashMap;
use std::future::Future;

use ftpclaim_core::{SheetsClient, SheetsError, ValueRange};
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::sync::Mutex;
use tracing::debug;

use super::state::{FolderRecord, FolderStatus};
use crate::token_provider::{TokenProvider, TokenProviderError};

pub const HEADER: [&str; 4] = ["Carpeta", "Editor", "Fecha de descarga", "Estado"];
const COLUMNS: usize = HEADER.len();
const TABLE_CELLS: &str = "A1:D";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("spreadsheet request failed: {0}")]
    Sheets(#[from] SheetsError),
    #[error("spreadsheet credentials unavailable: {0}")]
    Token(#[from] TokenProviderError),
    #[error("spreadsheet url is malformed: {0}")]
    MalformedUrl(String),
    #[error("ledger header mismatch: expected {expected:?}, found {found:?}")]
    HeaderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("row {row} (folder {folder:?}): unknown status {value:?}")]
    InvalidStatus {
        row: usize,
        folder: String,
        value: String,
    },
    #[error("row {row} (folder {folder:?}): invalid timestamp {value:?}")]
    InvalidTimestamp {
        row: usize,
        folder: String,
        value: String,
    },
    #[error("folder {0:?} has no ledger row")]
    RowNotFound(String),
}

/// A folder record together with its 1-based sheet row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub number: usize,
    pub record: FolderRecord,
}

/// New values for the editor, timestamp and status columns of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub editor: String,
    pub completed_at: Option<PrimitiveDateTime>,
    pub status: FolderStatus,
}

impl RowUpdate {
    pub fn in_progress(editor: &str) -> Self {
        Self {
            editor: editor.to_string(),
            completed_at: None,
            status: FolderStatus::InProgress,
        }
    }

    pub fn downloaded(editor: &str, completed_at: PrimitiveDateTime) -> Self {
        Self {
            editor: editor.to_string(),
            completed_at: Some(completed_at),
            status: FolderStatus::Downloaded,
        }
    }

    pub fn released() -> Self {
        Self {
            editor: String::new(),
            completed_at: None,
            status: FolderStatus::Available,
        }
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.editor.clone(),
            self.completed_at.map(format_timestamp).unwrap_or_default(),
            self.status.as_ledger_str().to_string(),
        ]
    }
}

/// Shared record of folder claims. Every read is a fresh read.
pub trait Ledger: Send + Sync {
    fn read_rows(&self) -> impl Future<Output = Result<Vec<LedgerRow>, LedgerError>> + Send;

    /// First row whose folder matches exactly.
    fn find_row(
        &self,
        folder: &str,
    ) -> impl Future<Output = Result<Option<LedgerRow>, LedgerError>> + Send {
        async move {
            Ok(self
                .read_rows()
                .await?
                .into_iter()
                .find(|row| row.record.name == folder))
        }
    }

    /// Rewrites the editor, timestamp and status of the first matching row.
    fn update_row(
        &self,
        folder: &str,
        update: &RowUpdate,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn append_row(
        &self,
        record: &FolderRecord,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Overwrites matching rows and appends the rest after the last used row,
    /// as one read followed by one write.
    fn batch_upsert(
        &self,
        records: &[FolderRecord],
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Appends the records whose folder has no row yet, as one read and at
    /// most one write. Folders that gained a row since the caller looked are
    /// left alone; their current records are returned.
    fn seed_missing(
        &self,
        records: &[FolderRecord],
    ) -> impl Future<Output = Result<Vec<FolderRecord>, LedgerError>> + Send;
}

pub fn format_timestamp(at: PrimitiveDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

pub fn parse_timestamp(value: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
}

pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    PrimitiveDateTime::new(now.date(), now.time())
}

pub fn header_row() -> Vec<String> {
    HEADER.iter().map(|cell| cell.to_string()).collect()
}

pub fn encode_record(record: &FolderRecord) -> Vec<String> {
    vec![
        record.name.clone(),
        record.editor.clone(),
        record
            .completed_at
            .map(format_timestamp)
            .unwrap_or_default(),
        record.status.as_ledger_str().to_string(),
    ]
}

/// Decodes a raw `A1:D` table. An empty table has no rows; otherwise the
/// first row must be the header. Rows without a folder name are skipped.
pub fn decode_rows(values: &[Vec<String>]) -> Result<Vec<LedgerRow>, LedgerError> {
    let Some((header, body)) = values.split_first() else {
        return Ok(Vec::new());
    };
    let found: Vec<String> = padded(header)
        .into_iter()
        .map(|cell| cell.trim().to_string())
        .collect();
    if found != header_row() {
        return Err(LedgerError::HeaderMismatch {
            expected: header_row(),
            found,
        });
    }

    let mut rows = Vec::with_capacity(body.len());
    for (index, raw) in body.iter().enumerate() {
        let number = index + 2;
        let [folder, editor, completed_at, status] = padded(raw);
        if folder.trim().is_empty() {
            continue;
        }
        let status = FolderStatus::parse_ledger(&status).ok_or_else(|| {
            LedgerError::InvalidStatus {
                row: number,
                folder: folder.clone(),
                value: status.clone(),
            }
        })?;
        let completed_at = match completed_at.trim() {
            "" => None,
            value => Some(parse_timestamp(value).map_err(|_| {
                LedgerError::InvalidTimestamp {
                    row: number,
                    folder: folder.clone(),
                    value: value.to_string(),
                }
            })?),
        };
        rows.push(LedgerRow {
            number,
            record: FolderRecord {
                name: folder,
                status,
                editor,
                completed_at,
            },
        });
    }
    Ok(rows)
}

fn padded(row: &[String]) -> [String; COLUMNS] {
    std::array::from_fn(|column| row.get(column).cloned().unwrap_or_default())
}

/// Splits `records` into the current records of folders that already have a
/// row and the records still missing from the ledger.
pub fn partition_seed(
    existing: &[LedgerRow],
    records: &[FolderRecord],
) -> (Vec<FolderRecord>, Vec<FolderRecord>) {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for record in records {
        match existing.iter().find(|row| row.record.name == record.name) {
            Some(row) => present.push(row.record.clone()),
            None => missing.push(record.clone()),
        }
    }
    (present, missing)
}

/// Target row and cells for each record. Existing folders keep their row;
/// new folders are numbered after `used_rows`; repeated folders collapse
/// into one write carrying the last record.
fn plan_upsert(
    used_rows: usize,
    existing: &[LedgerRow],
    records: &[FolderRecord],
) -> Vec<(usize, Vec<String>)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for row in existing {
        positions.entry(row.record.name.as_str()).or_insert(row.number);
    }
    let mut next_row = used_rows.max(1) + 1;
    let mut planned: Vec<(usize, Vec<String>)> = Vec::new();
    let mut planned_at: HashMap<usize, usize> = HashMap::new();

    for record in records {
        let number = *positions.entry(record.name.as_str()).or_insert_with(|| {
            let number = next_row;
            next_row += 1;
            number
        });
        let cells = encode_record(record);
        match planned_at.get(&number) {
            Some(&index) => planned[index].1 = cells,
            None => {
                planned_at.insert(number, planned.len());
                planned.push((number, cells));
            }
        }
    }
    planned
}

/// The ledger kept in a Google spreadsheet.
pub struct SheetLedger {
    client: SheetsClient,
    tokens: Mutex<TokenProvider>,
    worksheet: Option<String>,
}

impl SheetLedger {
    pub fn new(client: SheetsClient, tokens: TokenProvider) -> Self {
        Self {
            client,
            tokens: Mutex::new(tokens),
            worksheet: None,
        }
    }

    pub fn from_sheet_url(sheet_url: &str, tokens: TokenProvider) -> Result<Self, LedgerError> {
        let client = SheetsClient::from_sheet_url(sheet_url, String::new()).map_err(|err| match err {
            SheetsError::InvalidSheetUrl(url) => LedgerError::MalformedUrl(url),
            other => LedgerError::Sheets(other),
        })?;
        Ok(Self::new(client, tokens))
    }

    /// Targets a named tab instead of the first one.
    pub fn with_worksheet(mut self, worksheet: Option<String>) -> Self {
        self.worksheet = worksheet;
        self
    }

    fn range(&self, cells: &str) -> String {
        match &self.worksheet {
            Some(name) => format!("'{}'!{cells}", name.replace('\'', "''")),
            None => cells.to_string(),
        }
    }

    async fn read_table(&self) -> Result<Vec<Vec<String>>, LedgerError> {
        let range = self.range(TABLE_CELLS);
        let range = range.as_str();
        let table = self
            .with_client(|client| async move { client.get_values(range).await })
            .await?;
        Ok(table.values)
    }

    /// Runs `op` with a valid token, retrying once after a refresh when the
    /// API rejects the credentials.
    async fn with_client<T, F, Fut>(&self, op: F) -> Result<T, LedgerError>
    where
        F: Fn(SheetsClient) -> Fut,
        Fut: Future<Output = Result<T, SheetsError>>,
    {
        let token = self.tokens.lock().await.valid_access_token().await?;
        match op(self.client.with_token(token)).await {
            Err(err) if err.is_auth_error() => {
                let refreshed = self.tokens.lock().await.refresh_now().await;
                let Ok(token) = refreshed else {
                    return Err(err.into());
                };
                debug!("retrying spreadsheet request with refreshed token");
                Ok(op(self.client.with_token(token)).await?)
            }
            result => Ok(result?),
        }
    }
}

impl Ledger for SheetLedger {
    async fn read_rows(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        decode_rows(&self.read_table().await?)
    }

    async fn update_row(&self, folder: &str, update: &RowUpdate) -> Result<(), LedgerError> {
        let rows = self.read_rows().await?;
        let row = rows
            .iter()
            .find(|row| row.record.name == folder)
            .ok_or_else(|| LedgerError::RowNotFound(folder.to_string()))?;
        let range = self.range(&format!("B{0}:D{0}", row.number));
        let values = vec![update.cells()];
        let (range, values) = (range.as_str(), values.as_slice());
        self.with_client(|client| async move { client.update_values(range, values).await })
            .await?;
        debug!(folder, row = row.number, status = %update.status, "ledger row updated");
        Ok(())
    }

    async fn append_row(&self, record: &FolderRecord) -> Result<(), LedgerError> {
        let range = self.range(TABLE_CELLS);
        let values = vec![encode_record(record)];
        let (range, values) = (range.as_str(), values.as_slice());
        self.with_client(|client| async move { client.append_values(range, values).await })
            .await?;
        Ok(())
    }

    async fn batch_upsert(&self, records: &[FolderRecord]) -> Result<(), LedgerError> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.read_table().await?;
        let existing = decode_rows(&table)?;
        self.write_batch(&table, &existing, records).await
    }

    async fn seed_missing(&self, records: &[FolderRecord]) -> Result<Vec<FolderRecord>, LedgerError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.read_table().await?;
        let existing = decode_rows(&table)?;
        let (present, missing) = partition_seed(&existing, records);
        if !missing.is_empty() {
            self.write_batch(&table, &existing, &missing).await?;
        }
        if !present.is_empty() {
            debug!(skipped = present.len(), "folders gained a row before seeding");
        }
        Ok(present)
    }
}

impl SheetLedger {
    /// One `batchUpdate` covering every record, plus the header on an
    /// empty sheet.
    async fn write_batch(
        &self,
        table: &[Vec<String>],
        existing: &[LedgerRow],
        records: &[FolderRecord],
    ) -> Result<(), LedgerError> {
        let mut data = Vec::new();
        if table.is_empty() {
            data.push(ValueRange::rows(self.range("A1:D1"), vec![header_row()]));
        }
        for (number, cells) in plan_upsert(table.len(), existing, records) {
            data.push(ValueRange::rows(
                self.range(&format!("A{number}:D{number}")),
                vec![cells],
            ));
        }
        let data = data.as_slice();
        self.with_client(|client| async move { client.batch_update_values(data).await })
            .await?;
        debug!(records = records.len(), ranges = data.len(), "ledger batch upsert");
        Ok(())
    }
}
