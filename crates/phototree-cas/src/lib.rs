//! # phototree-cas
//!
//! Content-addressed, date-partitioned photo storage.
//!
//! Every uploaded blob is identified by its BLAKE3 digest. Identical content
//! is stored at most once no matter how many concurrent uploads carry it,
//! and each stored item lands in a directory named after the date the photo
//! was taken.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── 2021/07/04/1625400000000-3fa9c1d2.jpg   # YYYY/MM/DD/stamp-digest8.ext
//! └── unknown/1700000000000-0b12aa7e.png      # no recoverable capture date
//! ```
//!
//! ## Components
//!
//! - [`ContentIndex`]: process-wide digest map with reserve/commit/release
//! - [`bootstrap`]: rebuilds the index from the tree at startup
//! - [`metadata`]: EXIF capture-date extraction
//! - [`planner`]: pure path planning
//! - [`DurableStore`]: atomic, crash-safe writes
//! - [`IngestPipeline`]: per-upload orchestration

pub mod bootstrap;
mod digest;
pub mod index;
pub mod metadata;
pub mod pipeline;
pub mod planner;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bootstrap::{BootstrapError, BootstrapReport, DuplicateSet};
pub use digest::{ContentDigest, ParseDigestError, RelativePath};
pub use index::{Claim, ContentIndex, IndexError, Reservation, TryClaim};
pub use metadata::{DateField, ExtractError, ExtractedDate};
pub use pipeline::{
    DateFallback, DateSource, IngestError, IngestOptions, IngestOutcome, IngestPipeline,
    IngestStage, OpenError, StoredItem, Upload,
};
pub use planner::CaptureDate;
pub use store::{DurableStore, StoreError, ValidationError, DEFAULT_MAX_BLOB_BYTES};
