//! Deterministic placement of blobs in the date-partitioned layout.
//!
//! ```text
//! <root>/
//! ├── 2021/
//! │   └── 07/
//! │       └── 04/
//! │           └── 1625400000000-3fa9c1d2.jpg   # stamp-digest8.ext
//! └── unknown/
//!     └── 1700000000000-0b12aa7e.png
//! ```
//!
//! Two different items collide on a filename only if they fall in the same
//! partition with the same millisecond stamp *and* the same 8-hex digest
//! prefix. That residual risk is accepted; the store refuses to overwrite
//! an existing final name, so a collision fails the second write.

use std::fmt;
use std::path::Path;

use chrono::{Datelike, NaiveDateTime};
use serde::{Serialize, Serializer};

use crate::digest::{ContentDigest, RelativePath};

/// Partition for items whose capture date could not be recovered.
pub const UNKNOWN_PARTITION: &str = "unknown";

/// Longest extension carried into a stored filename.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Capture date of an item, or the explicit unknown sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDate {
    Known(NaiveDateTime),
    Unknown,
}

impl CaptureDate {
    /// Directory segments of the partition this date maps to.
    pub fn partition(&self) -> Vec<String> {
        match self {
            CaptureDate::Known(dt) => vec![
                format!("{:04}", dt.year()),
                format!("{:02}", dt.month()),
                format!("{:02}", dt.day()),
            ],
            CaptureDate::Unknown => vec![UNKNOWN_PARTITION.to_string()],
        }
    }
}

impl fmt::Display for CaptureDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureDate::Known(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            CaptureDate::Unknown => f.write_str(UNKNOWN_PARTITION),
        }
    }
}

impl Serialize for CaptureDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CaptureDate::Known(_) => serializer.collect_str(self),
            CaptureDate::Unknown => serializer.serialize_none(),
        }
    }
}

/// Raw extension of an uploaded filename, if any.
pub fn extension_of(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|ext| ext.to_str())
}

/// Lower-case the extension; drop it unless it is short ASCII alphanumerics.
pub fn sanitize_extension(ext: &str) -> Option<String> {
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Relative storage path for an item.
///
/// `stamp_millis` is the ingestion time in milliseconds since the Unix
/// epoch, sampled once per upload by the caller.
pub fn plan(
    digest: &ContentDigest,
    date: &CaptureDate,
    extension: Option<&str>,
    stamp_millis: u64,
) -> RelativePath {
    let mut file_name = format!("{}-{}", stamp_millis, digest.short());
    if let Some(ext) = extension.and_then(sanitize_extension) {
        file_name.push('.');
        file_name.push_str(&ext);
    }

    let mut segments = date.partition();
    segments.push(file_name);
    RelativePath::from_segments(segments)
}
