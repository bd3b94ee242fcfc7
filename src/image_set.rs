//! The group of pictures representing one logical image.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::cache::HandleId;
use crate::picture::Picture;

/// All pictures (original and derived) behind one logical image, together
/// with the names that resolve to it and the handles that keep it alive.
///
/// `originals` is ordered newest-first, `resized` most-recently-used first.
/// The owning cache enforces `resized.len() <= max_resized` and keeps every
/// picture here registered in its content index.
#[derive(Debug, Default)]
pub(crate) struct ImageSet {
    pub(crate) names: BTreeSet<String>,
    pub(crate) originals: VecDeque<Picture>,
    pub(crate) resized: VecDeque<Picture>,
    pub(crate) holders: HashSet<HandleId>,
}

/// Counts describing one image set, for diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetStats {
    pub names: usize,
    pub originals: usize,
    pub resized: usize,
    pub holders: usize,
}

impl ImageSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Index of an original whose dominant axis matches `dim`.
    pub(crate) fn find_original_by_max_dim(&self, dim: u32) -> Option<usize> {
        self.originals.iter().position(|p| p.max_dim() == dim)
    }

    /// Index of a resized picture whose dominant axis matches `dim`.
    pub(crate) fn find_resized_by_max_dim(&self, dim: u32) -> Option<usize> {
        self.resized.iter().position(|p| p.max_dim() == dim)
    }

    /// Index of a resized picture of the given exact size.
    pub(crate) fn find_resized_of_size(&self, width: u32, height: u32) -> Option<usize> {
        self.resized
            .iter()
            .position(|p| p.width() == width && p.height() == height)
    }

    /// Moves `resized[idx]` to the front (most recently used).
    pub(crate) fn touch_resized(&mut self, idx: usize) {
        if idx > 0 {
            let pic = self.resized.remove(idx).expect("resized index in range");
            self.resized.push_front(pic);
        }
    }

    /// Removes the resized entry of the given exact size, if any. An original
    /// of a size is authoritative over a derived picture of the same size, so
    /// inserting an original calls this first. The removed picture is handed
    /// back so the cache can unregister it.
    pub(crate) fn take_resized_of_size(&mut self, width: u32, height: u32) -> Option<Picture> {
        let idx = self.find_resized_of_size(width, height)?;
        self.resized.remove(idx)
    }

    pub(crate) fn stats(&self) -> SetStats {
        SetStats {
            names: self.names.len(),
            originals: self.originals.len(),
            resized: self.resized.len(),
            holders: self.holders.len(),
        }
    }
}

/// Alternately interleaves two newest-first lists, one element from each in
/// turn. Neither list carries timestamps; alternation approximates "recently
/// touched entries from both sides stay near the front", which is all the
/// eviction policy needs.
pub(crate) fn interleave(a: VecDeque<Picture>, b: VecDeque<Picture>) -> VecDeque<Picture> {
    let mut out = VecDeque::with_capacity(a.len() + b.len());
    let mut a = a.into_iter();
    let mut b = b.into_iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => break,
            (pa, pb) => {
                out.extend(pa);
                out.extend(pb);
            }
        }
    }
    out
}
