//! Reading and writing the persisted state file.
//!
//! A [`Snapshot`] is the parsed document together with the file's
//! modification time, captured as one unit: the file is stat'ed, read and
//! stat'ed again, and the read is repeated if the two stats disagree. The
//! modification time is the version used by the write queue's
//! compare-and-swap check.
//!
//! Parse policy:
//!
//! | File state           | Result                          |
//! |----------------------|---------------------------------|
//! | does not exist       | empty snapshot (default state)  |
//! | valid YAML mapping   | the document                    |
//! | anything else        | [`StoreError::Unavailable`]     |
//!
//! Writes go to a temporary file in the same directory which is synced and
//! then renamed over the target, so a reader never sees a partial file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use town_types::WorldState;
use tracing::debug;

use crate::error::StoreError;

/// Read attempts before settling for a read that raced a writer.
const STABLE_READ_ATTEMPTS: u32 = 3;

/// The state file's contents and version at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Parsed document; `None` when the file does not exist.
    pub document: Option<Value>,
    /// Modification time; `None` when the file does not exist.
    pub modified: Option<SystemTime>,
}

impl Snapshot {
    /// Whether the file existed when the snapshot was taken.
    pub const fn exists(&self) -> bool {
        self.modified.is_some()
    }
}

/// Whether two modification times denote the same version of the file.
///
/// Times within `epsilon` of each other compare equal, which absorbs
/// timestamp quantization on filesystems that round or truncate. Two absent
/// times (file missing both times) are equal; absent and present are not.
pub fn same_modification_time(
    a: Option<SystemTime>,
    b: Option<SystemTime>,
    epsilon: Duration,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            let gap = a
                .duration_since(b)
                .unwrap_or_else(|earlier| earlier.duration());
            gap <= epsilon
        }
        _ => false,
    }
}

/// Reads and writes one state file.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    path: PathBuf,
    epsilon: Duration,
}

impl SnapshotReader {
    /// Create a reader for `path` with the given CAS tolerance.
    pub fn new(path: impl Into<PathBuf>, epsilon: Duration) -> Self {
        Self {
            path: path.into(),
            epsilon,
        }
    }

    /// The state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The CAS tolerance.
    pub const fn epsilon(&self) -> Duration {
        self.epsilon
    }

    /// Current modification time, or `None` if the file does not exist.
    pub fn modified(&self) -> Result<Option<SystemTime>, StoreError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Take a snapshot.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the file exists but is not a YAML
    /// mapping, or [`StoreError::Io`] if it cannot be read.
    pub fn read(&self) -> Result<Snapshot, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let Some(before) = self.modified()? else {
                return Ok(Snapshot::default());
            };
            let bytes = match fs::read(&self.path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(Snapshot::default());
                }
                Err(e) => return Err(e.into()),
            };
            let after = self.modified()?;
            let stable = same_modification_time(Some(before), after, self.epsilon);
            if stable || attempt >= STABLE_READ_ATTEMPTS {
                if !stable {
                    debug!(path = %self.path.display(), "state file kept changing during read");
                }
                // The earlier time is kept on an unstable read so that a
                // later CAS check fails rather than trusting stale bytes.
                return Ok(Snapshot {
                    document: Some(parse_document(&bytes)?),
                    modified: Some(before),
                });
            }
            debug!(
                attempt,
                path = %self.path.display(),
                "state file changed during read, re-reading"
            );
        }
    }

    /// Serialize `state` and atomically replace the file. Returns the new
    /// modification time.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serialization`] or [`StoreError::Io`].
    pub fn write(&self, state: &WorldState) -> Result<Option<SystemTime>, StoreError> {
        let yaml = serde_yml::to_string(state)?;
        write_atomic(&self.path, yaml.as_bytes())?;
        self.modified()
    }
}

fn ignore_missing(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}

fn parse_document(bytes: &[u8]) -> Result<Value, StoreError> {
    match serde_yml::from_slice::<Value>(bytes) {
        Ok(document @ Value::Object(_)) => Ok(document),
        Ok(Value::Null) => Err(StoreError::Unavailable {
            reason: "state file is empty".to_owned(),
        }),
        Ok(_) => Err(StoreError::Unavailable {
            reason: "state file is not a mapping".to_owned(),
        }),
        Err(e) => Err(StoreError::Unavailable {
            reason: e.to_string(),
        }),
    }
}

/// Write `bytes` to a sibling temporary file, sync it, then rename it over
/// `path`. The parent directory is created if needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.tmp-{}", uuid::Uuid::now_v7()));

    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
        // Best effort; the original error is what matters.
        if let Err(cleanup) = fs::remove_file(&tmp).or_else(ignore_missing) {
            debug!(path = %tmp.display(), error = %cleanup, "could not remove temp file");
        }
        return Err(e);
    }
    Ok(())
}
