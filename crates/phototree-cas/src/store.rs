//! Crash-safe blob persistence below a storage root.
//!
//! Blobs are written to a temporary file inside their target directory,
//! fsynced, then linked into place under their final name. Readers never
//! observe a partially written file, and a crash mid-write leaves only a
//! `.phototree-*.part` artifact that bootstrap recognizes and removes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::digest::RelativePath;

/// Upper bound on accepted blob size (10 MiB).
pub const DEFAULT_MAX_BLOB_BYTES: u64 = 10 * 1024 * 1024;

const PARTIAL_PREFIX: &str = ".phototree-";
const PARTIAL_SUFFIX: &str = ".part";

/// Input rejected before any I/O. Always safe to retry with corrected input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no blob provided")]
    MissingBlob,

    #[error("blob of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: u64, limit: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to overwrite existing file {path}")]
    AlreadyExists { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory-tree blob store.
#[derive(Debug, Clone)]
pub struct DurableStore {
    root: PathBuf,
    max_blob_bytes: u64,
}

impl DurableStore {
    /// Open a store at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P, max_blob_bytes: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_at(&root))?;
        Ok(Self {
            root,
            max_blob_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_blob_bytes(&self) -> u64 {
        self.max_blob_bytes
    }

    /// Reject blobs above the configured bound.
    pub fn validate_size(&self, size: u64) -> std::result::Result<(), ValidationError> {
        if size > self.max_blob_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: self.max_blob_bytes,
            });
        }
        Ok(())
    }

    /// Absolute location of a relative path.
    pub fn absolute(&self, path: &RelativePath) -> PathBuf {
        path.as_str()
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    pub fn exists(&self, path: &RelativePath) -> bool {
        self.absolute(path).is_file()
    }

    /// Whether a file name belongs to an in-progress or abandoned write.
    pub fn is_partial(file_name: &str) -> bool {
        file_name.starts_with(PARTIAL_PREFIX) && file_name.ends_with(PARTIAL_SUFFIX)
    }

    /// Persist `data` at `path`, creating intermediate directories.
    ///
    /// Never overwrites an existing final file. On any error the temporary
    /// artifact is removed; created directories are left in place.
    #[instrument(skip(self, data), fields(len = data.len()), level = "debug")]
    pub fn write(&self, path: &RelativePath, data: &[u8]) -> Result<PathBuf> {
        self.validate_size(data.len() as u64)?;

        let target = self.absolute(path);
        let dir = target.parent().unwrap_or(&self.root);
        // Idempotent; concurrent creators of the same partition both succeed.
        fs::create_dir_all(dir).map_err(io_at(dir))?;

        let mut temp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(dir)
            .map_err(io_at(dir))?;
        let temp_path = temp.path().to_path_buf();

        temp.write_all(data).map_err(io_at(&temp_path))?;
        temp.as_file().sync_all().map_err(io_at(&temp_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(io_at(&temp_path))?;
        }

        // Dropping the returned NamedTempFile inside PersistError deletes the temp file.
        temp.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                StoreError::AlreadyExists {
                    path: target.clone(),
                }
            } else {
                StoreError::Io {
                    path: target.clone(),
                    source: e.error,
                }
            }
        })?;

        Ok(target)
    }
}
