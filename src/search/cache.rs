//! Per-library cache of built indexes.
//!
//! Each `(library, kind)` key owns a slot with a build lock and the
//! currently published index. Readers clone the published `Arc`; a rebuild
//! swaps in a new one, so a reader sees either the old or the new index.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::types::{Chunk, IndexKind, LibraryId};
use crate::vector::VectorIndex;

type CacheKey = (LibraryId, IndexKind);

#[derive(Debug, Default)]
struct Published {
    index: Option<Arc<VectorIndex>>,
    /// Set by invalidation; a stale slot must not reuse a persisted snapshot.
    stale: bool,
    /// Bumped on every invalidation.
    generation: u64,
}

/// Slot state observed by a builder before it starts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildTicket {
    generation: u64,
    stale: bool,
}

impl BuildTicket {
    /// Whether the builder may reuse a persisted snapshot.
    pub(crate) fn trust_snapshot(&self) -> bool {
        !self.stale
    }
}

#[derive(Debug, Default)]
pub(crate) struct IndexSlot {
    build_lock: Mutex<()>,
    state: RwLock<Published>,
}

impl IndexSlot {
    /// Serializes builders of this key.
    pub(crate) async fn lock_build(&self) -> MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }

    pub(crate) fn current(&self) -> Option<Arc<VectorIndex>> {
        self.state.read().index.clone()
    }

    /// The published index if it covers exactly `chunks`.
    pub(crate) fn current_for(&self, chunks: &[Chunk]) -> Option<Arc<VectorIndex>> {
        let state = self.state.read();
        if state.stale {
            return None;
        }
        state
            .index
            .clone()
            .filter(|index| index.covers_exactly(chunks))
    }

    pub(crate) fn begin_build(&self) -> BuildTicket {
        let state = self.state.read();
        BuildTicket {
            generation: state.generation,
            stale: state.stale,
        }
    }

    /// Publishes a built index. The stale marker is only cleared when no
    /// invalidation happened since `ticket` was taken.
    pub(crate) fn publish(&self, index: Arc<VectorIndex>, ticket: BuildTicket) {
        let mut state = self.state.write();
        state.index = Some(index);
        if state.generation == ticket.generation {
            state.stale = false;
        } else {
            debug!("Slot invalidated during build; keeping it stale");
        }
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.state.read().stale
    }

    fn invalidate(&self) {
        let mut state = self.state.write();
        state.generation = state.generation.wrapping_add(1);
        state.stale = true;
        state.index = None;
    }
}

/// Built indexes shared by every search and mutation path.
#[derive(Debug, Default)]
pub struct IndexCache {
    slots: DashMap<CacheKey, Arc<IndexSlot>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn slot(&self, library_id: LibraryId, kind: IndexKind) -> Arc<IndexSlot> {
        Arc::clone(&self.slots.entry((library_id, kind)).or_default())
    }

    /// Currently published index for a key, if any.
    pub fn get(&self, library_id: LibraryId, kind: IndexKind) -> Option<Arc<VectorIndex>> {
        self.slots
            .get(&(library_id, kind))
            .and_then(|slot| slot.current())
    }

    /// Drops published indexes of a library, one kind or all of them.
    ///
    /// The next search rebuilds rather than trusting a persisted snapshot.
    /// Returns how many slots held an index.
    pub fn invalidate(&self, library_id: LibraryId, kind: Option<IndexKind>) -> usize {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => IndexKind::ALL.to_vec(),
        };

        let mut dropped = 0;
        for kind in kinds {
            // Mark even untouched keys so a later load skips the snapshot
            let slot = self.slot(library_id, kind);
            if slot.current().is_some() {
                dropped += 1;
            }
            slot.invalidate();
        }
        debug!("Invalidated {dropped} cached index(es) for library {library_id}");
        dropped
    }

    /// Number of keys with a published index.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().current().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
