use super::state::FolderStatus;

/// Everything the engine reports to its presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A file finished downloading; counters are per directory level.
    Progress {
        folder: String,
        done: usize,
        total: usize,
        item: String,
    },
    Finished {
        folder: String,
        message: String,
    },
    Error {
        title: String,
        message: String,
    },
    StateChanged {
        folder: String,
        status: FolderStatus,
    },
}

impl EngineEvent {
    pub fn render(&self) -> String {
        match self {
            EngineEvent::Progress {
                folder,
                done,
                total,
                item,
            } => format!("[{folder}] {done}/{total} {item}"),
            EngineEvent::Finished { folder, message } => format!("[{folder}] {message}"),
            EngineEvent::Error { title, message } => format!("{title}: {message}"),
            EngineEvent::StateChanged { folder, status } => format!("[{folder}] -> {status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_progress_and_errors() {
        let progress = EngineEvent::Progress {
            folder: "A".into(),
            done: 2,
            total: 5,
            item: "cover.jpg".into(),
        };
        assert_eq!(progress.render(), "[A] 2/5 cover.jpg");

        let error = EngineEvent::Error {
            title: "Ledger error".into(),
            message: "row missing".into(),
        };
        assert_eq!(error.render(), "Ledger error: row missing");

        let changed = EngineEvent::StateChanged {
            folder: "A".into(),
            status: FolderStatus::InProgress,
        };
        assert_eq!(changed.render(), "[A] -> in progress");
    }
}
