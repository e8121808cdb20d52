//! In-memory content index with a reserve/commit/release protocol.
//!
//! Each digest is in one of three states:
//!
//! ```text
//!            reserve                commit
//! unclaimed ─────────▶ reserved ─────────────▶ committed
//!     ▲                   │
//!     └───── release ─────┘
//! ```
//!
//! `reserve` is the single decision point for who writes a blob. Every
//! transition happens under one mutex, so two callers can never both be
//! granted the same digest. Callers that find a digest reserved wait on a
//! condition variable until the holder commits or releases.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::bootstrap::{self, BootstrapError, BootstrapReport};
use crate::digest::{ContentDigest, RelativePath};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Reserved,
    Committed(RelativePath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    Commit,
    Release,
}

impl fmt::Display for IndexOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOp::Commit => f.write_str("commit"),
            IndexOp::Release => f.write_str("release"),
        }
    }
}

/// Protocol breach by the caller. Never a user-facing condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("{op} for digest {digest} that holds no reservation")]
    NotReserved { digest: ContentDigest, op: IndexOp },
}

/// Result of [`ContentIndex::reserve`].
#[derive(Debug)]
pub enum Claim<'a> {
    /// Exclusive right to write this digest.
    Granted(Reservation<'a>),
    /// Content is already stored at this path.
    AlreadyPresent(RelativePath),
}

/// Result of [`ContentIndex::try_reserve`].
#[derive(Debug)]
pub enum TryClaim<'a> {
    Granted(Reservation<'a>),
    AlreadyPresent(RelativePath),
    /// Another caller holds the reservation right now.
    InFlight,
}

/// Digest → relative path map. Explicitly owned; never a global.
#[derive(Debug, Default)]
pub struct ContentIndex {
    slots: Mutex<HashMap<ContentDigest, Slot>>,
    settled: Condvar,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ContentDigest, Slot>> {
        // Every mutation is a single map operation, so a poisoned map is still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed path for a digest. Reservations in flight are invisible.
    pub fn lookup(&self, digest: &ContentDigest) -> Option<RelativePath> {
        match self.slots().get(digest) {
            Some(Slot::Committed(path)) => Some(path.clone()),
            _ => None,
        }
    }

    /// Claim a digest before writing it.
    ///
    /// Blocks while another caller holds the reservation, then either
    /// reports the committed path or, if the holder released, tries again.
    pub fn reserve(&self, digest: ContentDigest) -> Claim<'_> {
        let mut slots = self.slots();
        loop {
            match slots.get(&digest) {
                None => {
                    slots.insert(digest, Slot::Reserved);
                    return Claim::Granted(Reservation::new(self, digest));
                }
                Some(Slot::Committed(path)) => return Claim::AlreadyPresent(path.clone()),
                Some(Slot::Reserved) => {
                    slots = self
                        .settled
                        .wait(slots)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Non-blocking [`reserve`](Self::reserve).
    pub fn try_reserve(&self, digest: ContentDigest) -> TryClaim<'_> {
        let mut slots = self.slots();
        match slots.get(&digest) {
            None => {
                slots.insert(digest, Slot::Reserved);
                TryClaim::Granted(Reservation::new(self, digest))
            }
            Some(Slot::Committed(path)) => TryClaim::AlreadyPresent(path.clone()),
            Some(Slot::Reserved) => TryClaim::InFlight,
        }
    }

    /// Finalize a granted reservation, making `path` visible to lookups.
    pub fn commit(&self, digest: ContentDigest, path: RelativePath) -> Result<(), IndexError> {
        let committed = {
            let mut slots = self.slots();
            match slots.get_mut(&digest) {
                Some(slot) if *slot == Slot::Reserved => {
                    *slot = Slot::Committed(path);
                    true
                }
                _ => false,
            }
        };
        if !committed {
            return Err(violation(digest, IndexOp::Commit));
        }
        self.settled.notify_all();
        Ok(())
    }

    /// Abandon a reservation, returning the digest to the unclaimed state.
    pub fn release(&self, digest: ContentDigest) -> Result<(), IndexError> {
        if !self.take_reserved(digest) {
            return Err(violation(digest, IndexOp::Release));
        }
        Ok(())
    }

    /// Remove a reserved slot, waking waiters. `false` if it was not reserved.
    fn take_reserved(&self, digest: ContentDigest) -> bool {
        let released = {
            let mut slots = self.slots();
            if slots.get(&digest) == Some(&Slot::Reserved) {
                slots.remove(&digest);
                true
            } else {
                false
            }
        };
        if released {
            self.settled.notify_all();
        }
        released
    }

    /// Clear the index and repopulate it from the tree under `root`.
    ///
    /// Refused with [`BootstrapError::InFlight`] while any reservation is held.
    pub fn rebuild_from(&self, root: &Path) -> Result<BootstrapReport, BootstrapError> {
        bootstrap::rebuild(root, self)
    }

    /// Drop every committed entry, unless reservations are held, in which
    /// case their count is returned and nothing changes.
    pub(crate) fn reset_for_rebuild(&self) -> Result<(), usize> {
        let mut slots = self.slots();
        let reserved = slots
            .values()
            .filter(|slot| matches!(slot, Slot::Reserved))
            .count();
        if reserved > 0 {
            return Err(reserved);
        }
        slots.clear();
        Ok(())
    }

    /// Insert a committed entry directly, returning the path it replaced.
    /// A digest reserved in the meantime is left to its holder.
    pub(crate) fn insert_committed(
        &self,
        digest: ContentDigest,
        path: RelativePath,
    ) -> Option<RelativePath> {
        let mut slots = self.slots();
        match slots.get_mut(&digest) {
            Some(Slot::Reserved) => None,
            Some(Slot::Committed(previous)) => Some(std::mem::replace(previous, path)),
            None => {
                slots.insert(digest, Slot::Committed(path));
                None
            }
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Committed(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of reservations currently held.
    pub fn reserved_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Reserved))
            .count()
    }

    /// Committed entries sorted by path.
    pub fn snapshot(&self) -> Vec<(ContentDigest, RelativePath)> {
        let mut entries: Vec<_> = self
            .slots()
            .iter()
            .filter_map(|(digest, slot)| match slot {
                Slot::Committed(path) => Some((*digest, path.clone())),
                Slot::Reserved => None,
            })
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        entries
    }
}

fn violation(digest: ContentDigest, op: IndexOp) -> IndexError {
    let err = IndexError::NotReserved { digest, op };
    error!(%digest, %op, "Content index invariant violated");
    debug_assert!(false, "{}", err);
    err
}

/// Exclusive claim on a digest.
///
/// Dropping it without calling [`commit`](Self::commit) releases the
/// digest, so every early return or unwind after `reserve` cleans up.
#[must_use = "dropping a reservation releases it"]
#[derive(Debug)]
pub struct Reservation<'a> {
    index: &'a ContentIndex,
    digest: ContentDigest,
    settled: bool,
}

impl<'a> Reservation<'a> {
    fn new(index: &'a ContentIndex, digest: ContentDigest) -> Self {
        Self {
            index,
            digest,
            settled: false,
        }
    }

    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    pub fn commit(mut self, path: RelativePath) -> Result<(), IndexError> {
        self.settled = true;
        self.index.commit(self.digest, path)
    }

    pub fn release(mut self) -> Result<(), IndexError> {
        self.settled = true;
        self.index.release(self.digest)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        // Quiet: the slot may already have been released explicitly.
        if !self.settled {
            self.index.take_reserved(self.digest);
        }
    }
}
