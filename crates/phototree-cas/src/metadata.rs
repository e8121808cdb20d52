//! Capture-date extraction from embedded EXIF metadata.
//!
//! Extraction is an ordered list of strategies built on [`exif::Reader`].
//! Each strategy locates an EXIF structure in the blob and runs the same
//! field cascade over it:
//!
//! | Priority | Field               | Tag      | IFD      |
//! |----------|---------------------|----------|----------|
//! | 1        | `DateTimeOriginal`  | `0x9003` | Exif     |
//! | 2        | `DateTimeDigitized` | `0x9004` | Exif     |
//! | 3        | `DateTime`          | `0x0132` | IFD0     |
//!
//! A strategy that hits malformed or truncated input fails on its own and
//! the next one is tried.

use std::fmt;
use std::io::Cursor;

use chrono::{NaiveDate, NaiveDateTime};
use exif::{Exif, Field, In, Reader, Tag, Value};
use serde::Serialize;
use tracing::{debug, instrument};

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";

/// Which metadata field a date was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    /// `DateTimeOriginal`: when the shutter fired.
    Original,
    /// `DateTimeDigitized`: when the image was digitized.
    Digitized,
    /// `DateTime`: generic file modification timestamp.
    FileTimestamp,
}

impl DateField {
    fn tag(self) -> Tag {
        match self {
            DateField::Original => Tag::DateTimeOriginal,
            DateField::Digitized => Tag::DateTimeDigitized,
            DateField::FileTimestamp => Tag::DateTime,
        }
    }
}

impl fmt::Display for DateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DateField::Original => "DateTimeOriginal",
            DateField::Digitized => "DateTimeDigitized",
            DateField::FileTimestamp => "DateTime",
        };
        f.write_str(name)
    }
}

/// Field cascade, highest priority first.
const CASCADE: [DateField; 3] = [
    DateField::Original,
    DateField::Digitized,
    DateField::FileTimestamp,
];

/// A successfully recovered capture timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedDate {
    pub taken_at: NaiveDateTime,
    pub field: DateField,
    /// Name of the strategy that found it.
    pub strategy: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// No strategy produced a parsable date. Recoverable.
    #[error("no capture date found")]
    NotFound,

    #[error("malformed metadata: {0}")]
    Malformed(String),
}

impl From<exif::Error> for ExtractError {
    fn from(err: exif::Error) -> Self {
        match err {
            exif::Error::NotFound(_) => ExtractError::NotFound,
            other => ExtractError::Malformed(other.to_string()),
        }
    }
}

type Result<T> = std::result::Result<T, ExtractError>;

type Attempt = fn(&[u8]) -> Result<(NaiveDateTime, DateField)>;

struct Strategy {
    name: &'static str,
    attempt: Attempt,
}

/// Strategies in the order they are tried.
const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "container",
        attempt: from_container,
    },
    Strategy {
        name: "exif-scan",
        attempt: from_exif_scan,
    },
];

/// Recover the best-available capture timestamp from a blob.
#[instrument(skip(blob), fields(len = blob.len()), level = "debug")]
pub fn extract(blob: &[u8]) -> Result<ExtractedDate> {
    for strategy in STRATEGIES {
        match (strategy.attempt)(blob) {
            Ok((taken_at, field)) => {
                debug!(strategy = strategy.name, %field, %taken_at, "Capture date extracted");
                return Ok(ExtractedDate {
                    taken_at,
                    field,
                    strategy: strategy.name,
                });
            }
            Err(e) => {
                debug!(strategy = strategy.name, error = %e, "Extraction strategy failed");
            }
        }
    }
    Err(ExtractError::NotFound)
}

/// Parse an EXIF ASCII timestamp (`YYYY:MM:DD HH:MM:SS`), tolerating NUL
/// padding and trailing sub-seconds. Zeroed or blank values yield `None`.
pub fn parse_exif_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    // Sub-seconds or a zone suffix past the seconds field are ignored.
    let head = trimmed.get(..19).unwrap_or(trimmed);
    let dt = exif::DateTime::from_ascii(head.as_bytes()).ok()?;
    NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))?
        .and_hms_opt(u32::from(dt.hour), u32::from(dt.minute), u32::from(dt.second))
}

// ============================================================================
// Strategies
// ============================================================================

/// Standard parse: let the reader detect the container (JPEG, TIFF and
/// TIFF-based raws, HEIF, PNG, WebP).
fn from_container(data: &[u8]) -> Result<(NaiveDateTime, DateField)> {
    let exif = Reader::new().read_from_container(&mut Cursor::new(data))?;
    capture_date(&exif)
}

/// Permissive: find any `Exif\0\0` signature and parse the TIFF block after
/// it, ignoring whatever container framing surrounds it.
fn from_exif_scan(data: &[u8]) -> Result<(NaiveDateTime, DateField)> {
    let mut last_err = ExtractError::Malformed("no Exif signature in data".to_string());
    let mut start = 0;
    while let Some(found) = find(&data[start..], EXIF_SIGNATURE) {
        let tiff_start = start + found + EXIF_SIGNATURE.len();
        let parsed = Reader::new()
            .read_raw(data[tiff_start..].to_vec())
            .map_err(ExtractError::from)
            .and_then(|exif| capture_date(&exif));
        match parsed {
            Ok(date) => return Ok(date),
            Err(e) => last_err = e,
        }
        start = tiff_start;
    }
    Err(last_err)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// First present and parsable field wins.
fn capture_date(exif: &Exif) -> Result<(NaiveDateTime, DateField)> {
    let mut last_err = ExtractError::NotFound;
    for field in CASCADE {
        let Some(entry) = exif.get_field(field.tag(), In::PRIMARY) else {
            continue;
        };
        match date_of(entry) {
            Ok(dt) => return Ok((dt, field)),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn date_of(entry: &Field) -> Result<NaiveDateTime> {
    let raw = match &entry.value {
        Value::Ascii(parts) => parts.first().map(Vec::as_slice).unwrap_or_default(),
        _ => {
            return Err(ExtractError::Malformed(format!(
                "{} is not ASCII",
                entry.tag
            )))
        }
    };
    std::str::from_utf8(raw)
        .ok()
        .and_then(parse_exif_datetime)
        .ok_or_else(|| {
            ExtractError::Malformed(format!(
                "unparsable {}: {:?}",
                entry.tag,
                String::from_utf8_lossy(raw)
            ))
        })
}
