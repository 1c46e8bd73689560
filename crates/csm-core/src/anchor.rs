use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use text_size::{TextRange, TextSize};

/// Number of tracked anchors after which dead entries are pruned eagerly.
const PRUNE_THRESHOLD: usize = 1024;

/// A text offset that follows edits applied to its [`AnchorSet`].
///
/// Anchors compare by their current offset.
#[derive(Clone)]
pub struct Anchor {
    offset: Arc<AtomicU32>,
}

impl Anchor {
    /// Creates an anchor that is not tracked by any set and never moves.
    pub fn detached(offset: TextSize) -> Self {
        Self {
            offset: Arc::new(AtomicU32::new(offset.into())),
        }
    }

    #[inline]
    pub fn offset(&self) -> TextSize {
        TextSize::from(self.offset.load(Ordering::Acquire))
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", u32::from(self.offset()))
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.offset() == other.offset()
    }
}

impl Eq for Anchor {}

/// The anchors of one document.
///
/// Cloning an `AnchorSet` yields another handle to the same set.
#[derive(Clone, Default)]
pub struct AnchorSet {
    anchors: Arc<Mutex<Vec<Weak<AtomicU32>>>>,
}

impl AnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(&self, offset: TextSize) -> Anchor {
        let cell = Arc::new(AtomicU32::new(offset.into()));
        let mut anchors = self.anchors.lock();
        if anchors.len() >= PRUNE_THRESHOLD && anchors.len().is_power_of_two() {
            anchors.retain(|weak| weak.strong_count() > 0);
        }
        anchors.push(Arc::downgrade(&cell));
        Anchor { offset: cell }
    }

    /// Replaces `deleted` with `inserted_len` bytes of new text.
    ///
    /// Anchors at or before the edit start stay put, anchors inside the
    /// deleted range collapse to its start, and anchors at or after its end
    /// shift by the size difference.
    pub fn apply_edit(&self, deleted: TextRange, inserted_len: TextSize) {
        let start = u32::from(deleted.start());
        let end = u32::from(deleted.end());
        let inserted = u32::from(inserted_len);

        let mut anchors = self.anchors.lock();
        anchors.retain(|weak| {
            let Some(cell) = weak.upgrade() else {
                return false;
            };
            let offset = cell.load(Ordering::Acquire);
            let moved = if offset <= start {
                offset
            } else if offset < end {
                start
            } else {
                (offset - end).saturating_add(start).saturating_add(inserted)
            };
            cell.store(moved, Ordering::Release);
            true
        });
    }

    /// Number of anchors still referenced outside the set.
    pub fn live_anchors(&self) -> usize {
        self.anchors
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for AnchorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchorSet")
            .field("live_anchors", &self.live_anchors())
            .finish()
    }
}
