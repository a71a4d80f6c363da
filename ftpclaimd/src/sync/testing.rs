//! In-memory ledger and remote tree for engine tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};

use ftpclaim_core::{FtpError, RemoteConnector, RemoteSession};

use super::ledger::{
    Ledger, LedgerError, LedgerRow, RowUpdate, decode_rows, encode_record, header_row,
    partition_seed,
};
use super::state::{FolderRecord, FolderStatus};

#[derive(Debug, Default)]
struct LedgerInner {
    table: Vec<Vec<String>>,
    reads: usize,
    writes: usize,
    batch_calls: usize,
    fail_reads: bool,
    fail_batch: bool,
    fail_updates_to: Option<FolderStatus>,
    before_seed: Option<FolderRecord>,
}

/// Keeps the raw table so the real codec runs on every read.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl MemoryLedger {
    pub fn with_records(records: &[FolderRecord]) -> Self {
        let ledger = Self::default();
        {
            let mut inner = ledger.lock();
            inner.table.push(header_row());
            inner.table.extend(records.iter().map(encode_record));
        }
        ledger
    }

    pub fn records(&self) -> Vec<FolderRecord> {
        decode_rows(&self.lock().table)
            .map(|rows| rows.into_iter().map(|row| row.record).collect())
            .unwrap_or_default()
    }

    pub fn record(&self, folder: &str) -> Option<FolderRecord> {
        self.records().into_iter().find(|record| record.name == folder)
    }

    pub fn table(&self) -> Vec<Vec<String>> {
        self.lock().table.clone()
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn batch_calls(&self) -> usize {
        self.lock().batch_calls
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn fail_batch(&self, fail: bool) {
        self.lock().fail_batch = fail;
    }

    /// Makes row updates that would set `status` fail.
    pub fn fail_updates_to(&self, status: Option<FolderStatus>) {
        self.lock().fail_updates_to = status;
    }

    /// Changes a row behind the engine's back, as another instance would.
    pub fn overwrite(&self, record: FolderRecord) {
        write_record(&mut self.lock().table, &record);
    }

    /// Applies `record` right before the next seed reads the table, as if
    /// another instance wrote it after this one's reconcile read.
    pub fn overwrite_before_seed(&self, record: FolderRecord) {
        self.lock().before_seed = Some(record);
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap()
    }
}

fn write_record(table: &mut Vec<Vec<String>>, record: &FolderRecord) {
    if table.is_empty() {
        table.push(header_row());
    }
    let cells = encode_record(record);
    match table
        .iter_mut()
        .skip(1)
        .find(|row| row.first() == Some(&record.name))
    {
        Some(row) => *row = cells,
        None => table.push(cells),
    }
}

fn unavailable(what: &str) -> LedgerError {
    LedgerError::RowNotFound(format!("ledger unavailable during {what}"))
}

impl Ledger for MemoryLedger {
    async fn read_rows(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        let mut inner = self.lock();
        inner.reads += 1;
        if inner.fail_reads {
            return Err(unavailable("read"));
        }
        decode_rows(&inner.table)
    }

    async fn update_row(&self, folder: &str, update: &RowUpdate) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.fail_updates_to == Some(update.status) {
            return Err(unavailable("update"));
        }
        let number = decode_rows(&inner.table)?
            .into_iter()
            .find(|row| row.record.name == folder)
            .map(|row| row.number)
            .ok_or_else(|| LedgerError::RowNotFound(folder.to_string()))?;
        let record = FolderRecord {
            name: folder.to_string(),
            status: update.status,
            editor: update.editor.clone(),
            completed_at: update.completed_at,
        };
        inner.table[number - 1] = encode_record(&record);
        inner.writes += 1;
        Ok(())
    }

    async fn append_row(&self, record: &FolderRecord) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.table.is_empty() {
            inner.table.push(header_row());
        }
        inner.table.push(encode_record(record));
        inner.writes += 1;
        Ok(())
    }

    async fn batch_upsert(&self, records: &[FolderRecord]) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if records.is_empty() {
            return Ok(());
        }
        inner.batch_calls += 1;
        if inner.fail_batch {
            return Err(unavailable("batch upsert"));
        }
        for record in records {
            write_record(&mut inner.table, record);
        }
        inner.writes += 1;
        Ok(())
    }

    async fn seed_missing(&self, records: &[FolderRecord]) -> Result<Vec<FolderRecord>, LedgerError> {
        let mut inner = self.lock();
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(record) = inner.before_seed.take() {
            write_record(&mut inner.table, &record);
        }
        inner.batch_calls += 1;
        if inner.fail_batch {
            return Err(unavailable("seed"));
        }
        let existing = decode_rows(&inner.table)?;
        let (present, missing) = partition_seed(&existing, records);
        if !missing.is_empty() {
            for record in &missing {
                write_record(&mut inner.table, record);
            }
            inner.writes += 1;
        }
        Ok(present)
    }
}

/// Rendezvous that parks a retrieve until the test releases it.
struct Gate {
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

#[derive(Default)]
struct RemoteInner {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    fail_connect: bool,
    fail_list: bool,
    fail_retrieve: Option<String>,
    gate: Option<Gate>,
    connects: usize,
}

/// A remote tree of absolute POSIX paths.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<RemoteInner>>,
}

impl MemoryRemote {
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut inner = self.lock();
            for dir in ancestors_and_self(path) {
                inner.dirs.insert(dir);
            }
        }
        self
    }

    pub fn with_file(self, path: &str, bytes: &[u8]) -> Self {
        let path = normalize(path);
        let remote = self.with_dir(&parent(&path));
        remote.lock().files.insert(path, bytes.to_vec());
        remote
    }

    pub fn fail_retrieve(self, name: &str) -> Self {
        self.lock().fail_retrieve = Some(name.to_string());
        self
    }

    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// The next retrieve signals `started` and then blocks until `release`
    /// receives a value.
    pub fn gate(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.lock().gate = Some(Gate {
            started: started_tx,
            release: release_rx,
        });
        (started_rx, release_tx)
    }

    fn lock(&self) -> MutexGuard<'_, RemoteInner> {
        self.inner.lock().unwrap()
    }
}

impl RemoteConnector for MemoryRemote {
    type Session = MemorySession;

    fn connect(&self) -> Result<MemorySession, FtpError> {
        let mut inner = self.lock();
        inner.connects += 1;
        if inner.fail_connect {
            return Err(FtpError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(MemorySession {
            remote: self.clone(),
            cwd: "/".to_string(),
        })
    }
}

pub struct MemorySession {
    remote: MemoryRemote,
    cwd: String,
}

impl MemorySession {
    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            normalize(path)
        } else {
            normalize(&format!("{}/{path}", self.cwd))
        }
    }
}

impl RemoteSession for MemorySession {
    fn change_dir(&mut self, path: &str) -> Result<(), FtpError> {
        let target = self.resolve(path);
        if self.remote.lock().dirs.contains(&target) {
            self.cwd = target;
            Ok(())
        } else {
            Err(not_found(&target))
        }
    }

    fn list_names(&mut self, path: Option<&str>) -> Result<Vec<String>, FtpError> {
        let dir = path.map_or_else(|| self.cwd.clone(), |path| self.resolve(path));
        let inner = self.remote.lock();
        if inner.fail_list {
            return Err(FtpError::Io(io::Error::other("421 service not available")));
        }
        if !inner.dirs.contains(&dir) {
            return Err(not_found(&dir));
        }
        let children = inner
            .dirs
            .iter()
            .chain(inner.files.keys())
            .filter(|candidate| *candidate != "/" && parent(candidate) == dir);
        // Listing an explicit path echoes it back, like many servers do.
        let mut names: Vec<String> = match path {
            Some(_) => children.cloned().collect(),
            None => children.map(|child| basename(child).to_string()).collect(),
        };
        names.sort_by(|a, b| basename(a).cmp(basename(b)));
        Ok(names)
    }

    fn retrieve_to(&mut self, remote_path: &str, local_path: &Path) -> Result<u64, FtpError> {
        let target = self.resolve(remote_path);
        let (bytes, gate) = {
            let mut inner = self.remote.lock();
            if inner.fail_retrieve.as_deref() == Some(basename(&target)) {
                return Err(FtpError::Io(io::Error::other("451 transfer aborted")));
            }
            let bytes = inner
                .files
                .get(&target)
                .cloned()
                .ok_or_else(|| not_found(&target))?;
            (bytes, inner.gate.take())
        };
        if let Some(gate) = gate {
            let _ = gate.started.send(());
            let _ = gate.release.recv();
        }
        std::fs::write(local_path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    fn close(&mut self) {}
}

fn not_found(path: &str) -> FtpError {
    FtpError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("550 {path}: no such file or directory"),
    ))
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn ancestors_and_self(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let normalized = normalize(path);
    let mut current = String::new();
    for part in normalized.split('/').filter(|part| !part.is_empty()) {
        current.push('/');
        current.push_str(part);
        out.push(current.clone());
    }
    out
}
