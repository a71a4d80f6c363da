use std::io;
use std::path::{Path, PathBuf};

use ftpclaim_core::{FtpError, RemoteSession};
use thiserror::Error;
use tracing::{debug, trace};

use super::paths::{PathError, entry_name, local_child, remote_join};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Remote(#[from] FtpError),
    #[error("cannot write {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorProgress {
    pub done: usize,
    pub total: usize,
    pub item: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Copies the remote tree under `remote_dir` into `local_dir`.
///
/// An entry the session can change into is treated as a directory and
/// descended into; anything else is retrieved as a file. `on_progress`
/// fires after each file with counters scoped to the directory being
/// walked. The first failure aborts the walk.
pub fn mirror_directory<S>(
    session: &mut S,
    remote_dir: &str,
    local_dir: &Path,
    on_progress: &mut dyn FnMut(MirrorProgress),
) -> Result<MirrorSummary, MirrorError>
where
    S: RemoteSession + ?Sized,
{
    create_dir(local_dir)?;
    let mut summary = MirrorSummary::default();
    mirror_level(session, remote_dir, local_dir, on_progress, &mut summary)?;
    debug!(
        remote_dir,
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes,
        "mirror finished"
    );
    Ok(summary)
}

fn mirror_level<S>(
    session: &mut S,
    remote_dir: &str,
    local_dir: &Path,
    on_progress: &mut dyn FnMut(MirrorProgress),
    summary: &mut MirrorSummary,
) -> Result<(), MirrorError>
where
    S: RemoteSession + ?Sized,
{
    session.change_dir(remote_dir)?;
    let entries: Vec<String> = session
        .list_names(None)?
        .iter()
        .filter_map(|entry| entry_name(entry))
        .map(str::to_string)
        .collect();
    let total = entries.len();
    let mut done = 0;

    for name in entries {
        let remote_path = remote_join(remote_dir, &name);
        let local_path = local_child(local_dir, &name)?;
        if session.change_dir(&remote_path).is_ok() {
            trace!(%remote_path, "descending");
            create_dir(&local_path)?;
            summary.directories += 1;
            mirror_level(session, &remote_path, &local_path, on_progress, summary)?;
            continue;
        }

        let bytes = session.retrieve_to(&remote_path, &local_path)?;
        summary.files += 1;
        summary.bytes += bytes;
        done += 1;
        on_progress(MirrorProgress {
            done,
            total,
            item: name,
        });
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), MirrorError> {
    std::fs::create_dir_all(path).map_err(|source| MirrorError::Local {
        path: path.to_path_buf(),
        source,
    })
}
