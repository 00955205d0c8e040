use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

use crate::domain::Snapshot;

const ARCHIVE_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("no snapshot found at {path}")]
    NoData { path: PathBuf },
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid snapshot timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Paths produced by one successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSnapshot {
    pub archive_path: PathBuf,
    pub latest_path: PathBuf,
}

/// Directory holding the timestamped archive copies and the "latest" file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    latest_file_name: String,
    archive_prefix: String,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(dir: P, latest_file_name: &str, archive_prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            latest_file_name: latest_file_name.to_string(),
            archive_prefix: archive_prefix.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(&self.latest_file_name)
    }

    pub fn archive_path(&self, captured_at: OffsetDateTime) -> Result<PathBuf, SnapshotError> {
        let stamp = captured_at
            .to_offset(time::UtcOffset::UTC)
            .format(ARCHIVE_STAMP)?;
        Ok(self.dir.join(format!("{}_{stamp}.json", self.archive_prefix)))
    }

    pub fn load_latest(&self) -> Result<Snapshot, SnapshotError> {
        load_latest(&self.latest_path())
    }

    /// Writes the archive copy first, then replaces the latest file. Both go
    /// through a temp file + rename, so readers see either the old or the new
    /// content, never a partial file.
    pub fn write(&self, snapshot: &Snapshot) -> Result<WrittenSnapshot, SnapshotError> {
        fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let archive_path = self.archive_path(snapshot.captured_at)?;
        let latest_path = self.latest_path();

        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|source| SnapshotError::Json {
            path: latest_path.clone(),
            source,
        })?;

        write_atomic(&archive_path, &bytes)?;
        write_atomic(&latest_path, &bytes)?;

        Ok(WrittenSnapshot {
            archive_path,
            latest_path,
        })
    }
}

/// Reads a snapshot file. A missing file is `NoData`, not an io error.
pub fn load_latest(path: &Path) -> Result<Snapshot, SnapshotError> {
    let contents = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SnapshotError::NoData {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&contents).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write to a sibling temp file, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot.json".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));

    let io_err = |source: io::Error| SnapshotError::Io {
        path: tmp_path.clone(),
        source,
    };

    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }

    Ok(())
}
