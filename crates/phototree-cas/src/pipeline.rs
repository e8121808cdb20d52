//! Per-upload ingestion: validate, digest, reserve, place, write, commit.
//!
//! ```text
//! Received → SizeValidated → Digested → Reserved ──────────▶ DateResolved
//!                                          │                    │
//!                                          └─▶ Duplicate        ▼
//!                          Committed ◀── Written ◀──────── PathPlanned
//! ```
//!
//! Side effects start only once a reservation is granted. Any failure after
//! that point drops the [`Reservation`](crate::index::Reservation), which
//! releases the digest before the error is returned.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::bootstrap::{BootstrapError, BootstrapReport};
use crate::digest::{ContentDigest, RelativePath};
use crate::index::{Claim, ContentIndex, IndexError};
use crate::metadata::{self, DateField};
use crate::planner::{self, CaptureDate};
use crate::store::{DurableStore, StoreError, ValidationError, DEFAULT_MAX_BLOB_BYTES};

/// Request lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Received,
    SizeValidated,
    Digested,
    Reserved,
    DateResolved,
    PathPlanned,
    Written,
    Committed,
}

/// What to do when no capture date can be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateFallback {
    /// Place the item in the `unknown/` partition.
    #[default]
    Unknown,
    /// Use the ingestion wall-clock time (UTC) as the capture date.
    IngestTime,
}

impl fmt::Display for DateFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFallback::Unknown => f.write_str("unknown"),
            DateFallback::IngestTime => f.write_str("ingest-time"),
        }
    }
}

impl FromStr for DateFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(DateFallback::Unknown),
            "ingest-time" | "ingest_time" => Ok(DateFallback::IngestTime),
            other => Err(format!(
                "unknown date fallback {:?} (expected \"unknown\" or \"ingest-time\")",
                other
            )),
        }
    }
}

/// Where an item's capture date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    Original,
    Digitized,
    FileTimestamp,
    IngestTime,
    Unknown,
}

impl From<DateField> for DateSource {
    fn from(field: DateField) -> Self {
        match field {
            DateField::Original => DateSource::Original,
            DateField::Digitized => DateSource::Digitized,
            DateField::FileTimestamp => DateSource::FileTimestamp,
        }
    }
}

/// Pipeline construction parameters.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub root: PathBuf,
    pub max_blob_bytes: u64,
    pub date_fallback: DateFallback,
}

impl IngestOptions {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
            date_fallback: DateFallback::default(),
        }
    }
}

/// One upload request. The filename is used only for its extension.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub data: &'a [u8],
    pub filename: &'a str,
    /// Acting identity supplied by the authentication layer.
    pub identity: &'a str,
}

/// A newly stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredItem {
    pub digest: ContentDigest,
    pub path: RelativePath,
    pub capture_date: CaptureDate,
    pub date_source: DateSource,
    pub size: u64,
    pub uploaded_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored(StoredItem),
    /// Identical content was stored earlier; nothing was written.
    Duplicate {
        digest: ContentDigest,
        path: RelativePath,
    },
}

impl IngestOutcome {
    pub fn path(&self) -> &RelativePath {
        match self {
            IngestOutcome::Stored(item) => &item.path,
            IngestOutcome::Duplicate { path, .. } => path,
        }
    }

    pub fn digest(&self) -> &ContentDigest {
        match self {
            IngestOutcome::Stored(item) => &item.digest,
            IngestOutcome::Duplicate { digest, .. } => digest,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage failure while {stage:?}: {source}")]
    Store {
        stage: IngestStage,
        #[source]
        source: StoreError,
    },

    #[error("internal invariant violated: {0}")]
    Invariant(#[from] IndexError),
}

impl IngestError {
    /// Last stage reached before the failure.
    pub fn stage(&self) -> IngestStage {
        match self {
            IngestError::Validation(_) => IngestStage::Received,
            IngestError::Store { stage, .. } => *stage,
            IngestError::Invariant(_) => IngestStage::Written,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::Validation(_)
                | IngestError::Store {
                    source: StoreError::Validation(_),
                    ..
                }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Orchestrates ingestion against one storage root and one index.
///
/// Only obtainable through [`open`](Self::open) or
/// [`with_index`](Self::with_index), both of which finish rebuilding the
/// index before returning, so no upload can race the rebuild.
#[derive(Debug)]
pub struct IngestPipeline {
    store: DurableStore,
    index: Arc<ContentIndex>,
    date_fallback: DateFallback,
}

impl IngestPipeline {
    /// Open the store, rebuild a fresh index from it, and return the pipeline.
    pub fn open(options: IngestOptions) -> Result<(Self, BootstrapReport), OpenError> {
        Self::with_index(options, Arc::new(ContentIndex::new()))
    }

    /// Like [`open`](Self::open), rebuilding into a caller-owned index.
    pub fn with_index(
        options: IngestOptions,
        index: Arc<ContentIndex>,
    ) -> Result<(Self, BootstrapReport), OpenError> {
        let store = DurableStore::new(&options.root, options.max_blob_bytes)?;
        let report = index.rebuild_from(store.root())?;
        let pipeline = Self {
            store,
            index,
            date_fallback: options.date_fallback,
        };
        Ok((pipeline, report))
    }

    pub fn index(&self) -> &Arc<ContentIndex> {
        &self.index
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn date_fallback(&self) -> DateFallback {
        self.date_fallback
    }

    /// Ingest one upload, stamping it with the current time.
    pub fn ingest(&self, upload: &Upload<'_>) -> Result<IngestOutcome, IngestError> {
        self.ingest_at(upload, Utc::now())
    }

    /// Ingest one upload with an explicit ingestion time.
    #[instrument(
        skip(self, upload, now),
        fields(identity = upload.identity, filename = upload.filename, size = upload.data.len()),
        level = "debug"
    )]
    pub fn ingest_at(
        &self,
        upload: &Upload<'_>,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let mut stage = IngestStage::Received;
        let data = upload.data;

        if data.is_empty() {
            return Err(ValidationError::MissingBlob.into());
        }
        self.store.validate_size(data.len() as u64)?;
        advance(&mut stage, IngestStage::SizeValidated);

        let digest = ContentDigest::of(data);
        advance(&mut stage, IngestStage::Digested);

        let reservation = match self.index.reserve(digest) {
            Claim::Granted(reservation) => reservation,
            Claim::AlreadyPresent(path) => {
                info!(%digest, %path, identity = upload.identity, "Ingest: duplicate content, not stored");
                return Ok(IngestOutcome::Duplicate { digest, path });
            }
        };
        advance(&mut stage, IngestStage::Reserved);

        let (capture_date, date_source) = self.resolve_date(data, now);
        advance(&mut stage, IngestStage::DateResolved);

        let stamp = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let path = planner::plan(
            &digest,
            &capture_date,
            planner::extension_of(upload.filename),
            stamp,
        );
        advance(&mut stage, IngestStage::PathPlanned);

        // On error `reservation` drops here and releases the digest.
        self.store
            .write(&path, data)
            .map_err(|source| IngestError::Store { stage, source })?;
        advance(&mut stage, IngestStage::Written);

        reservation.commit(path.clone())?;
        advance(&mut stage, IngestStage::Committed);

        info!(
            %digest,
            %path,
            date = %capture_date,
            date_source = ?date_source,
            identity = upload.identity,
            "Ingest: stored new item"
        );

        Ok(IngestOutcome::Stored(StoredItem {
            digest,
            path,
            capture_date,
            date_source,
            size: data.len() as u64,
            uploaded_by: upload.identity.to_string(),
        }))
    }

    /// Capture date for a blob, applying this pipeline's fallback policy.
    pub fn resolve_date(&self, blob: &[u8], now: DateTime<Utc>) -> (CaptureDate, DateSource) {
        match metadata::extract(blob) {
            Ok(found) => (CaptureDate::Known(found.taken_at), found.field.into()),
            Err(e) => {
                debug!(error = %e, fallback = %self.date_fallback, "No capture date, applying fallback");
                match self.date_fallback {
                    DateFallback::Unknown => (CaptureDate::Unknown, DateSource::Unknown),
                    DateFallback::IngestTime => {
                        (CaptureDate::Known(now.naive_utc()), DateSource::IngestTime)
                    }
                }
            }
        }
    }
}

fn advance(stage: &mut IngestStage, next: IngestStage) {
    debug!(from = ?*stage, to = ?next, "Ingest stage transition");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::TryClaim;
    use crate::testing::ExifFixture;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn upload<'a>(data: &'a [u8], filename: &'a str) -> Upload<'a> {
        Upload {
            data,
            filename,
            identity: "alice",
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_pipeline_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IngestPipeline>();
    }

    #[test]
    fn test_date_fallback_parse() {
        assert_eq!("unknown".parse::<DateFallback>(), Ok(DateFallback::Unknown));
        assert_eq!(
            "Ingest-Time".parse::<DateFallback>(),
            Ok(DateFallback::IngestTime)
        );
        assert!("sometime".parse::<DateFallback>().is_err());
    }

    #[test]
    fn test_exif_date_drives_partition() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();
        let jpeg = ExifFixture::new().original("2017:06:21 18:30:00").to_jpeg();

        let outcome = pipeline
            .ingest_at(&upload(&jpeg, "IMG_1.JPG"), fixed_now())
            .unwrap();
        let IngestOutcome::Stored(item) = outcome else {
            panic!("expected a stored item");
        };
        assert_eq!(item.date_source, DateSource::Original);
        assert_eq!(item.path.partition(), "2017/06/21");
        assert!(item.path.file_name().ends_with(".jpg"));
        assert_eq!(item.uploaded_by, "alice");
    }

    #[test]
    fn test_ingest_time_fallback() {
        let temp = TempDir::new().unwrap();
        let mut options = IngestOptions::new(temp.path());
        options.date_fallback = DateFallback::IngestTime;
        let (pipeline, _) = IngestPipeline::open(options).unwrap();

        let outcome = pipeline
            .ingest_at(&upload(b"no metadata", "a.bin"), fixed_now())
            .unwrap();
        let IngestOutcome::Stored(item) = outcome else {
            panic!("expected a stored item");
        };
        assert_eq!(item.date_source, DateSource::IngestTime);
        assert_eq!(item.path.partition(), "2024/05/06");
    }

    #[test]
    fn test_filename_uses_stamp_and_digest_prefix() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();

        let outcome = pipeline
            .ingest_at(&upload(b"stamp me", "x.PNG"), fixed_now())
            .unwrap();
        let digest = ContentDigest::of(b"stamp me");
        assert_eq!(
            outcome.path().as_str(),
            format!(
                "unknown/{}-{}.png",
                fixed_now().timestamp_millis(),
                digest.short()
            )
        );
    }

    #[test]
    fn test_empty_blob_is_missing() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();
        let err = pipeline.ingest(&upload(b"", "empty.jpg")).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Validation(ValidationError::MissingBlob)
        ));
        assert_eq!(err.stage(), IngestStage::Received);
        assert!(err.is_validation());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_releases_reservation() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = IngestPipeline::open(IngestOptions::new(temp.path())).unwrap();

        // A file where the `unknown` partition directory should be.
        std::fs::write(temp.path().join("unknown"), b"in the way").unwrap();

        let data = b"cannot land";
        let err = pipeline.ingest(&upload(data, "c.jpg")).unwrap_err();
        assert!(matches!(err, IngestError::Store { stage: IngestStage::PathPlanned, .. }));

        let digest = ContentDigest::of(data);
        assert!(pipeline.index().lookup(&digest).is_none());
        assert_eq!(pipeline.index().reserved_count(), 0);

        // Once the obstacle is gone the same content can be stored.
        std::fs::remove_file(temp.path().join("unknown")).unwrap();
        let outcome = pipeline.ingest(&upload(data, "c.jpg")).unwrap();
        assert!(!outcome.is_duplicate());
    }

    #[test]
    fn test_reopen_on_shared_index_refused_mid_ingest() {
        let temp = TempDir::new().unwrap();
        let index = Arc::new(ContentIndex::new());
        let (first, _) =
            IngestPipeline::with_index(IngestOptions::new(temp.path()), Arc::clone(&index))
                .unwrap();
        let stored = first.ingest(&upload(b"already here", "a.jpg")).unwrap();

        let digest = ContentDigest::of(b"being written");
        let held = index.try_reserve(digest);
        assert!(matches!(held, TryClaim::Granted(_)));

        let err =
            IngestPipeline::with_index(IngestOptions::new(temp.path()), Arc::clone(&index))
                .unwrap_err();
        assert!(matches!(
            err,
            OpenError::Bootstrap(BootstrapError::InFlight { reserved: 1 })
        ));
        // Nothing was cleared: the claim and the committed entry both survive.
        assert!(matches!(index.try_reserve(digest), TryClaim::InFlight));
        assert_eq!(index.lookup(stored.digest()), Some(stored.path().clone()));

        drop(held);
        assert_eq!(index.reserved_count(), 0);
    }
}
