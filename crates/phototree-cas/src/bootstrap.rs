//! Startup rehydration of the content index from the storage tree.
//!
//! The tree is the source of truth; the index is re-derived by rehashing
//! every stored blob. Traversal is sorted by file name, so when two files
//! share a digest the lexicographically last one wins, deterministically,
//! and both are reported in [`BootstrapReport::duplicates`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::digest::{ContentDigest, RelativePath};
use crate::index::ContentIndex;
use crate::store::DurableStore;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("cannot read storage root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot rebuild while {reserved} reservations are held")]
    InFlight { reserved: usize },
}

/// Files on disk that hash to the same digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateSet {
    pub digest: ContentDigest,
    /// The path the index maps the digest to.
    pub kept: RelativePath,
    /// Earlier-visited paths with identical content.
    pub shadowed: Vec<RelativePath>,
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    /// Regular files hashed.
    pub files: usize,
    /// Distinct digests now in the index.
    pub indexed: usize,
    /// Entries that could not be read and were left out.
    pub skipped: usize,
    /// Abandoned temporary writes that were removed.
    pub partials_removed: usize,
    pub bytes_hashed: u64,
    pub duplicates: Vec<DuplicateSet>,
}

/// Walk `root` and repopulate `index` with every blob found.
///
/// A missing root is created. Individual unreadable entries are logged and
/// skipped; only a root that cannot be listed at all is fatal.
#[instrument(skip(index), fields(root = %root.display()))]
pub fn rebuild(root: &Path, index: &ContentIndex) -> Result<BootstrapReport, BootstrapError> {
    let root_err = |source| BootstrapError::Root {
        path: root.to_path_buf(),
        source,
    };
    fs::create_dir_all(root).map_err(root_err)?;
    fs::read_dir(root).map_err(root_err)?;

    index
        .reset_for_rebuild()
        .map_err(|reserved| BootstrapError::InFlight { reserved })?;

    let started = Instant::now();
    let mut report = BootstrapReport::default();
    let mut duplicates: BTreeMap<ContentDigest, DuplicateSet> = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = ?e.path(), error = %e, "Bootstrap: skipping unreadable entry");
                report.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if DurableStore::is_partial(&file_name) {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "Bootstrap: removed abandoned partial write");
                    report.partials_removed += 1;
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Bootstrap: cannot remove partial write");
                    report.skipped += 1;
                }
            }
            continue;
        }

        let Some(rel) = RelativePath::from_path_under(root, entry.path()) else {
            warn!(path = %entry.path().display(), "Bootstrap: skipping path that is not valid UTF-8");
            report.skipped += 1;
            continue;
        };

        let (digest, len) = match File::open(entry.path()).and_then(ContentDigest::of_reader) {
            Ok(hashed) => hashed,
            Err(e) => {
                warn!(path = %rel, error = %e, "Bootstrap: skipping unreadable file");
                report.skipped += 1;
                continue;
            }
        };
        report.files += 1;
        report.bytes_hashed += len;

        if let Some(previous) = index.insert_committed(digest, rel.clone()) {
            warn!(%digest, kept = %rel, shadowed = %previous, "Bootstrap: duplicate content on disk");
            duplicates
                .entry(digest)
                .and_modify(|set| {
                    set.shadowed.push(previous.clone());
                    set.kept = rel.clone();
                })
                .or_insert_with(|| DuplicateSet {
                    digest,
                    kept: rel.clone(),
                    shadowed: vec![previous],
                });
        }
    }

    report.indexed = index.len();
    report.duplicates = duplicates.into_values().collect();

    info!(
        files = report.files,
        indexed = report.indexed,
        skipped = report.skipped,
        duplicates = report.duplicates.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Loaded existing content hashes"
    );
    Ok(report)
}
