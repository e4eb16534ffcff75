//! Staged file writes
//!
//! Content is written to a temporary file in the target directory and only
//! becomes visible under its final name on `commit`. A dropped, uncommitted
//! `StagedFile` removes the temporary file.
//!
//! The filesystem work is blocking; the async entry points run it on tokio's
//! blocking pool so the coordinator loop is never stalled by a slow disk.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{PhaseGateError, Result};

/// Filename timestamp layout, e.g. `20240131_235959`
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// First free `<stem>_<ts>[_<n>].<ext>` in `dir`
pub fn unique_path(dir: &Path, stem: &str, at: DateTime<Utc>, ext: &str) -> PathBuf {
    let ts = at.format(FILE_TIMESTAMP_FORMAT);
    let first = dir.join(format!("{stem}_{ts}.{ext}"));
    if !first.exists() {
        return first;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{ts}_{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Pretty JSON with a trailing newline
pub fn pretty_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Run blocking filesystem work off the async runtime
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| PhaseGateError::Persistence(format!("file write task failed: {err}")))?
}

/// One file to create with [`write_new_files`]
#[derive(Debug, Clone)]
pub struct NewFile {
    pub stem: String,
    pub ext: &'static str,
    pub contents: Vec<u8>,
}

/// Stage and commit each file in order; stops at the first failure
pub async fn write_new_files(
    dir: PathBuf,
    at: DateTime<Utc>,
    files: Vec<NewFile>,
) -> Result<Vec<PathBuf>> {
    run_blocking(move || {
        files
            .into_iter()
            .map(|file| {
                let mut staged = StagedFile::begin(&dir, &file.stem, at, file.ext)?;
                staged.write_all(&file.contents)?;
                staged.commit()
            })
            .collect()
    })
    .await
}

/// An in-progress write to `target`
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Stage a new file named `<stem>_<ts>.<ext>` in `dir`, creating `dir` if needed
    pub fn begin(dir: &Path, stem: &str, at: DateTime<Utc>, ext: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|err| {
            PhaseGateError::Persistence(format!(
                "failed to create directory {}: {err}",
                dir.display()
            ))
        })?;

        let temp = NamedTempFile::new_in(dir).map_err(|err| {
            PhaseGateError::Persistence(format!("failed to create temporary file: {err}"))
        })?;

        Ok(Self {
            temp,
            target: unique_path(dir, stem, at, ext),
        })
    }

    /// [`StagedFile::begin`] on the blocking pool
    pub async fn begin_async(
        dir: PathBuf,
        stem: &'static str,
        at: DateTime<Utc>,
        ext: &'static str,
    ) -> Result<Self> {
        run_blocking(move || Self::begin(&dir, stem, at, ext)).await
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn write_all(&mut self, contents: &[u8]) -> Result<()> {
        let file = self.temp.as_file_mut();
        file.write_all(contents)?;
        file.flush()?;
        Ok(())
    }

    /// Move the staged content to its final name; never replaces an existing file
    pub fn commit(self) -> Result<PathBuf> {
        let Self { temp, target } = self;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(&target).map_err(|err| {
            PhaseGateError::Persistence(format!(
                "failed to persist file to {}: {}",
                target.display(),
                err.error
            ))
        })?;
        Ok(target)
    }

    /// Write `contents` and commit, on the blocking pool
    pub async fn commit_with(self, contents: Vec<u8>) -> Result<PathBuf> {
        run_blocking(move || {
            let mut staged = self;
            staged.write_all(&contents)?;
            staged.commit()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap()
    }

    #[test]
    fn test_unique_path_adds_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "training", at(), "json");
        assert!(first.ends_with("training_20240131_235959.json"));

        std::fs::write(&first, "{}").unwrap();
        let second = unique_path(dir.path(), "training", at(), "json");
        assert!(second.ends_with("training_20240131_235959_1.json"));
    }

    #[test]
    fn test_commit_makes_file_visible() {
        let dir = tempfile::tempdir().unwrap();
        let mut staged = StagedFile::begin(dir.path(), "checkpoint", at(), "json").unwrap();
        staged
            .write_all(&pretty_json(&serde_json::json!({"ok": true})).unwrap())
            .unwrap();
        assert!(!staged.target().exists());

        let path = staged.commit().unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"ok\": true"));
    }

    #[test]
    fn test_dropped_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut staged = StagedFile::begin(dir.path(), "checkpoint", at(), "json").unwrap();
            staged.write_all(b"{\"ok\": false}").unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_async_stage_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let staged = StagedFile::begin_async(nested.clone(), "checkpoint", at(), "json")
            .await
            .unwrap();
        let path = staged.commit_with(b"{}\n".to_vec()).await.unwrap();
        assert_eq!(path.parent().unwrap(), nested.as_path());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "{}\n");
    }

    #[tokio::test]
    async fn test_write_new_files_in_order_without_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let file = |stem: &str| NewFile {
            stem: stem.to_string(),
            ext: "csv",
            contents: b"timestamp,type\n".to_vec(),
        };

        let paths = write_new_files(
            dir.path().to_path_buf(),
            at(),
            vec![file("metrics_history"), file("metrics_history")],
        )
        .await
        .unwrap();

        assert!(paths[0].ends_with("metrics_history_20240131_235959.csv"));
        assert!(paths[1].ends_with("metrics_history_20240131_235959_1.csv"));
    }
}
