use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use time::PrimitiveDateTime;

/// Lifecycle of a folder. Only `Available` may be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    Available,
    InProgress,
    Downloaded,
}

impl FolderStatus {
    /// Cell value stored in the ledger's status column.
    pub fn as_ledger_str(self) -> &'static str {
        match self {
            FolderStatus::Available => "disponible",
            FolderStatus::InProgress => "en proceso",
            FolderStatus::Downloaded => "descargada",
        }
    }

    /// Blank cells read as `Available`.
    pub fn parse_ledger(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "disponible" => Some(FolderStatus::Available),
            "en proceso" => Some(FolderStatus::InProgress),
            "descargada" => Some(FolderStatus::Downloaded),
            _ => None,
        }
    }
}

impl fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FolderStatus::Available => "available",
            FolderStatus::InProgress => "in progress",
            FolderStatus::Downloaded => "downloaded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub name: String,
    pub status: FolderStatus,
    /// Empty unless the folder is or was claimed.
    pub editor: String,
    /// UTC, whole seconds.
    pub completed_at: Option<PrimitiveDateTime>,
}

impl FolderRecord {
    pub fn available(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: FolderStatus::Available,
            editor: String::new(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FolderStates {
    inner: HashMap<String, FolderStatus>,
}

impl FolderStates {
    pub fn get(&self, folder: &str) -> Option<FolderStatus> {
        self.inner.get(folder).copied()
    }

    /// Returns whether the stored value changed.
    pub fn set(&mut self, folder: &str, status: FolderStatus) -> bool {
        match self.inner.insert(folder.to_string(), status) {
            Some(previous) => previous != status,
            None => true,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, FolderStatus> {
        self.inner
            .iter()
            .map(|(folder, status)| (folder.clone(), *status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_strings_map_both_ways() {
        for status in [
            FolderStatus::Available,
            FolderStatus::InProgress,
            FolderStatus::Downloaded,
        ] {
            assert_eq!(FolderStatus::parse_ledger(status.as_ledger_str()), Some(status));
        }
        assert_eq!(
            FolderStatus::parse_ledger("  Descargada "),
            Some(FolderStatus::Downloaded)
        );
        assert_eq!(FolderStatus::parse_ledger(""), Some(FolderStatus::Available));
        assert_eq!(FolderStatus::parse_ledger("archivada"), None);
    }

    #[test]
    fn set_reports_changes_only() {
        let mut states = FolderStates::default();
        assert!(states.set("A", FolderStatus::Available));
        assert!(!states.set("A", FolderStatus::Available));
        assert!(states.set("A", FolderStatus::InProgress));
        assert_eq!(states.get("A"), Some(FolderStatus::InProgress));
        assert_eq!(states.get("B"), None);
        assert_eq!(states.snapshot().len(), 1);
    }
}
