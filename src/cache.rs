//! The registry: name index, content index, handle lifetimes, set merging.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace};

use crate::error::CacheError;
use crate::hash::{self, ContentKey};
use crate::image_set::{ImageSet, SetStats, interleave};
use crate::picture::Picture;

/// Identifier of a live [`ImageSet`] inside one cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SetId(u64);

/// Identifier of a live handle slot inside one cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct HandleId(u64);

#[derive(Debug)]
struct HandleSlot {
    set: SetId,
    refs: u32,
}

/// All mutable cache state. Sets and handles live in id-keyed maps; the two
/// indices and the handle slots store ids only, so a merge re-homes handles
/// by rewriting slot entries and nothing ever dangles.
#[derive(Debug)]
pub(crate) struct CacheInner {
    max_resized: usize,
    next_set: u64,
    next_handle: u64,
    sets: HashMap<SetId, ImageSet>,
    handles: HashMap<HandleId, HandleSlot>,
    name_index: HashMap<String, SetId>,
    content_index: HashMap<ContentKey, SetId>,
}

impl CacheInner {
    fn new(max_resized: usize) -> Self {
        Self {
            max_resized,
            next_set: 0,
            next_handle: 0,
            sets: HashMap::new(),
            handles: HashMap::new(),
            name_index: HashMap::new(),
            content_index: HashMap::new(),
        }
    }

    pub(crate) fn max_resized(&self) -> usize {
        self.max_resized
    }

    pub(crate) fn set_of(&self, handle: HandleId) -> SetId {
        self.handles.get(&handle).expect("live handle slot").set
    }

    pub(crate) fn set(&self, id: SetId) -> &ImageSet {
        self.sets.get(&id).expect("live image set")
    }

    pub(crate) fn set_mut(&mut self, id: SetId) -> &mut ImageSet {
        self.sets.get_mut(&id).expect("live image set")
    }

    pub(crate) fn content_owner(&self, key: &ContentKey) -> Option<SetId> {
        self.content_index.get(key).copied()
    }

    pub(crate) fn register_picture(&mut self, key: ContentKey, owner: SetId) {
        self.content_index.insert(key, owner);
    }

    /// # Panics
    ///
    /// Panics if the picture was not tracked; that means the indices and the
    /// set lists have diverged, which is cache corruption.
    pub(crate) fn unregister_picture(&mut self, key: &ContentKey) {
        assert!(
            self.content_index.remove(key).is_some(),
            "picture {key:?} missing from content index"
        );
    }

    fn alloc_set(&mut self) -> SetId {
        let id = SetId(self.next_set);
        self.next_set += 1;
        self.sets.insert(id, ImageSet::new());
        id
    }

    fn new_handle(&mut self, set: SetId) -> HandleId {
        let id = HandleId(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(id, HandleSlot { set, refs: 1 });
        self.set_mut(set).holders.insert(id);
        id
    }

    fn retain(&mut self, handle: HandleId) {
        self.handles.get_mut(&handle).expect("live handle slot").refs += 1;
    }

    fn release(&mut self, handle: HandleId) {
        let slot = self.handles.get_mut(&handle).expect("live handle slot");
        slot.refs -= 1;
        if slot.refs > 0 {
            return;
        }
        let set_id = slot.set;
        self.handles.remove(&handle);
        let set = self.set_mut(set_id);
        set.holders.remove(&handle);
        if set.holders.is_empty() {
            self.destroy_set(set_id);
        }
    }

    /// Tears down a set once its last holder is gone: every owned picture
    /// leaves the content index and every alias leaves the name index before
    /// the set itself is dropped.
    fn destroy_set(&mut self, id: SetId) {
        let set = self.sets.remove(&id).expect("live image set");
        debug!(
            "destroying image set: {} names, {} originals, {} resized",
            set.names.len(),
            set.originals.len(),
            set.resized.len()
        );
        for name in &set.names {
            assert!(
                self.name_index.remove(name).is_some(),
                "name {name:?} missing from name index"
            );
        }
        for pic in set.originals.iter().chain(set.resized.iter()) {
            self.unregister_picture(&pic.key());
        }
    }

    fn fetch_by_data(&mut self, width: u32, height: u32, pixels: &[u32]) -> SetId {
        assert!(width > 0 && height > 0, "zero-sized picture {width}x{height}");
        assert_eq!(
            pixels.len(),
            width as usize * height as usize,
            "pixel buffer length does not match {width}x{height}"
        );
        // Transient key; nothing is allocated until we know it is new content.
        let key = ContentKey::new(width, height, hash::checksum(pixels));
        if let Some(owner) = self.content_owner(&key) {
            trace!("content hit for {width}x{height}, checksum {:#010x}", key.checksum);
            return owner;
        }
        let id = self.alloc_set();
        let pic = Picture::from_pixels(width, height, pixels);
        self.set_mut(id).originals.push_front(pic);
        self.register_picture(key, id);
        debug!("new image set for {width}x{height}, checksum {:#010x}", key.checksum);
        id
    }

    /// Adds another original size to an existing set. A content collision
    /// with a different set merges the two instead of duplicating the data.
    /// Returns the surviving set id.
    fn add_size(&mut self, set_id: SetId, width: u32, height: u32, pixels: &[u32]) -> SetId {
        assert!(width > 0 && height > 0, "zero-sized picture {width}x{height}");
        assert_eq!(
            pixels.len(),
            width as usize * height as usize,
            "pixel buffer length does not match {width}x{height}"
        );
        let key = ContentKey::new(width, height, hash::checksum(pixels));
        match self.content_owner(&key) {
            Some(owner) if owner == set_id => {
                trace!("size {width}x{height} already tracked by this set");
                set_id
            }
            Some(owner) => {
                debug!("content collision on {width}x{height}, merging sets");
                self.merge(set_id, owner)
            }
            None => {
                // The original is authoritative; a derived picture of the
                // same size is superseded.
                if let Some(old) = self.set_mut(set_id).take_resized_of_size(width, height) {
                    self.unregister_picture(&old.key());
                }
                let pic = Picture::from_pixels(width, height, pixels);
                self.set_mut(set_id).originals.push_front(pic);
                self.register_picture(key, set_id);
                set_id
            }
        }
    }

    /// Unifies two sets discovered to hold identical content. `a` survives:
    /// names, holders and pictures from `b` are re-homed onto it, the
    /// combined resized list is capped at `max_resized`, and `b` is
    /// destroyed. Returns the survivor.
    pub(crate) fn merge(&mut self, a: SetId, b: SetId) -> SetId {
        if a == b {
            return a;
        }
        let b_set = self.sets.remove(&b).expect("live image set");
        debug!(
            "merging image sets: absorbing {} names, {} originals, {} resized, {} holders",
            b_set.names.len(),
            b_set.originals.len(),
            b_set.resized.len(),
            b_set.holders.len()
        );

        for name in &b_set.names {
            let prev = self.name_index.insert(name.clone(), a);
            assert_eq!(prev, Some(b), "name {name:?} bound outside the absorbed set");
        }
        for handle in &b_set.holders {
            self.handles.get_mut(handle).expect("live handle slot").set = a;
        }

        let max_resized = self.max_resized;
        let mut dropped = Vec::new();
        let kept = {
            let a_set = self.set_mut(a);
            for name in &b_set.names {
                debug_assert!(
                    !a_set.names.contains(name),
                    "name {name:?} present in both merged sets"
                );
            }
            a_set.names.extend(b_set.names);
            a_set.holders.extend(b_set.holders);

            let a_originals = std::mem::take(&mut a_set.originals);
            a_set.originals = interleave(a_originals, b_set.originals);

            let a_resized = std::mem::take(&mut a_set.resized);
            let mut combined = interleave(a_resized, b_set.resized);
            while combined.len() > max_resized {
                let surplus = combined.pop_back().expect("non-empty surplus");
                dropped.push(surplus.key());
            }
            a_set.resized = combined;

            let kept: Vec<ContentKey> = a_set
                .originals
                .iter()
                .chain(a_set.resized.iter())
                .map(Picture::key)
                .collect();
            kept
        };

        // Surplus entries leave the index while still attributed to whichever
        // side owned them; everything retained now points at the survivor.
        for key in &dropped {
            self.unregister_picture(key);
        }
        for key in kept {
            self.register_picture(key, a);
        }
        a
    }

    /// Makes room in a set's resized list before a new entry goes in front.
    /// The least-recently-used tail entries are unregistered and dropped.
    pub(crate) fn evict_resized_if_full(&mut self, set_id: SetId) {
        if self.max_resized == 0 {
            return;
        }
        while self.set(set_id).resized.len() >= self.max_resized {
            let evicted = self
                .set_mut(set_id)
                .resized
                .pop_back()
                .expect("non-empty resized list");
            debug!(
                "evicting resized picture {}x{}",
                evicted.width(),
                evicted.height()
            );
            self.unregister_picture(&evicted.key());
        }
    }

    fn register_name(&mut self, set_id: SetId, name: &str) {
        match self.name_index.get(name) {
            Some(&bound) if bound == set_id => {} // idempotent re-registration
            Some(_) => panic!("name {name:?} already bound to a different image set"),
            None => {
                self.name_index.insert(name.to_owned(), set_id);
                self.set_mut(set_id).names.insert(name.to_owned());
                trace!("registered name {name:?}");
            }
        }
    }
}

/// The cache itself: a shared, explicitly-passed instance (no process-wide
/// singleton). Cloning the wrapper shares the same underlying cache.
///
/// Single-threaded by design; wrap the whole cache in a lock if a
/// concurrent environment ever needs it, since a merge mutates two sets and
/// both indices as one step.
#[derive(Clone)]
pub struct PictureCache {
    inner: Rc<RefCell<CacheInner>>,
}

impl PictureCache {
    /// Creates a cache retaining at most `max_resized` derived pictures per
    /// logical image. Zero disables caching of derived pictures entirely.
    #[must_use]
    pub fn new(max_resized: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CacheInner::new(max_resized))),
        }
    }

    #[must_use]
    pub fn max_resized(&self) -> usize {
        self.inner.borrow().max_resized
    }

    /// Looks up a logical name. A miss is recoverable: decode externally,
    /// then call [`fetch_by_data`](Self::fetch_by_data) and
    /// [`register_name`](Self::register_name).
    pub fn fetch_by_name(&self, name: &str) -> Result<ImageHandle, CacheError> {
        let mut inner = self.inner.borrow_mut();
        let Some(&set_id) = inner.name_index.get(name) else {
            return Err(CacheError::NotFound {
                name: name.to_owned(),
            });
        };
        let id = inner.new_handle(set_id);
        drop(inner);
        Ok(self.handle(id))
    }

    /// Submits raw pixel data. Content already tracked (same width, height
    /// and checksum) returns a handle on the existing set without copying;
    /// new content is copied into a fresh set.
    pub fn fetch_by_data(&self, width: u32, height: u32, pixels: &[u32]) -> ImageHandle {
        let mut inner = self.inner.borrow_mut();
        let set_id = inner.fetch_by_data(width, height, pixels);
        let id = inner.new_handle(set_id);
        drop(inner);
        self.handle(id)
    }

    /// Attaches a logical name to the handle's set.
    ///
    /// # Panics
    ///
    /// Panics if the name is already bound to a *different* set; binding the
    /// same pair again is a no-op.
    pub fn register_name(&self, handle: &ImageHandle, name: &str) {
        let mut inner = self.inner.borrow_mut();
        let set_id = inner.set_of(handle.id);
        inner.register_name(set_id, name);
    }

    /// Adds another original size to the handle's set, merging with another
    /// set if the content is already tracked there.
    pub fn add_size(&self, handle: &ImageHandle, width: u32, height: u32, pixels: &[u32]) {
        let mut inner = self.inner.borrow_mut();
        let set_id = inner.set_of(handle.id);
        inner.add_size(set_id, width, height, pixels);
    }

    /// Number of live image sets.
    #[must_use]
    pub fn len_sets(&self) -> usize {
        self.inner.borrow().sets.len()
    }

    /// Number of registered logical names.
    #[must_use]
    pub fn len_names(&self) -> usize {
        self.inner.borrow().name_index.len()
    }

    /// Number of pictures tracked by the content index.
    #[must_use]
    pub fn len_tracked_pictures(&self) -> usize {
        self.inner.borrow().content_index.len()
    }

    fn handle(&self, id: HandleId) -> ImageHandle {
        ImageHandle {
            inner: Rc::clone(&self.inner),
            id,
        }
    }
}

impl Drop for PictureCache {
    fn drop(&mut self) {
        // Only meaningful when this wrapper is the last owner: every handle
        // should have been released by now.
        if Rc::strong_count(&self.inner) == 1 {
            debug_assert!(
                self.inner.borrow().sets.is_empty(),
                "cache dropped with live image sets"
            );
        }
    }
}

/// Reference-counted handle on one logical image. Many handles may share one
/// set; the set is destroyed when the last handle goes away. Merges re-home
/// handles transparently.
#[derive(Debug)]
pub struct ImageHandle {
    pub(crate) inner: Rc<RefCell<CacheInner>>,
    pub(crate) id: HandleId,
}

impl Clone for ImageHandle {
    fn clone(&self) -> Self {
        self.inner.borrow_mut().retain(self.id);
        Self {
            inner: Rc::clone(&self.inner),
            id: self.id,
        }
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.inner.borrow_mut().release(self.id);
    }
}

impl ImageHandle {
    /// Whether two handles resolve to the same underlying image set.
    #[must_use]
    pub fn same_set(&self, other: &ImageHandle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
            && self.inner.borrow().set_of(self.id) == other.inner.borrow().set_of(other.id)
    }

    /// Counts describing the underlying set.
    #[must_use]
    pub fn set_stats(&self) -> SetStats {
        let inner = self.inner.borrow();
        let set_id = inner.set_of(self.id);
        inner.set(set_id).stats()
    }

    /// Sizes currently held in the resized list, most recently used first.
    #[must_use]
    pub fn resized_sizes(&self) -> Vec<(u32, u32)> {
        let inner = self.inner.borrow();
        let set_id = inner.set_of(self.id);
        inner
            .set(set_id)
            .resized
            .iter()
            .map(|p| (p.width(), p.height()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, fill: u32) -> Vec<u32> {
        vec![fill; (w * h) as usize]
    }

    #[test]
    fn identical_data_shares_one_set() {
        let cache = PictureCache::new(4);
        let a = cache.fetch_by_data(4, 4, &solid(4, 4, 0xff00_00ff));
        let b = cache.fetch_by_data(4, 4, &solid(4, 4, 0xff00_00ff));
        assert!(a.same_set(&b));
        assert_eq!(cache.len_sets(), 1);
        assert_eq!(cache.len_tracked_pictures(), 1);
    }

    #[test]
    fn name_lookup_after_registration() {
        let cache = PictureCache::new(4);
        assert!(matches!(
            cache.fetch_by_name("titlebar"),
            Err(CacheError::NotFound { .. })
        ));

        let h = cache.fetch_by_data(4, 4, &solid(4, 4, 7));
        cache.register_name(&h, "titlebar");
        // Re-registering the same binding is a no-op.
        cache.register_name(&h, "titlebar");

        let by_name = cache.fetch_by_name("titlebar").unwrap();
        assert!(by_name.same_set(&h));
        assert_eq!(cache.len_names(), 1);
    }

    #[test]
    #[should_panic(expected = "already bound to a different image set")]
    fn rebinding_a_name_is_fatal() {
        let cache = PictureCache::new(4);
        let a = cache.fetch_by_data(4, 4, &solid(4, 4, 1));
        let b = cache.fetch_by_data(4, 4, &solid(4, 4, 2));
        cache.register_name(&a, "icon");
        cache.register_name(&b, "icon");
    }

    #[test]
    fn last_handle_release_destroys_the_set() {
        let cache = PictureCache::new(4);
        let a = cache.fetch_by_data(4, 4, &solid(4, 4, 1));
        cache.register_name(&a, "glyph");
        let b = a.clone();
        drop(a);
        assert_eq!(cache.len_sets(), 1);
        drop(b);
        assert_eq!(cache.len_sets(), 0);
        assert_eq!(cache.len_names(), 0);
        assert_eq!(cache.len_tracked_pictures(), 0);
    }

    #[test]
    fn add_size_collision_merges_sets() {
        let cache = PictureCache::new(4);
        let a = cache.fetch_by_data(4, 4, &solid(4, 4, 1));
        let b = cache.fetch_by_data(8, 8, &solid(8, 8, 2));
        cache.register_name(&a, "small");
        cache.register_name(&b, "large");
        assert!(!a.same_set(&b));

        // The same 8x8 content added to `a` proves both sets are one image.
        cache.add_size(&a, 8, 8, &solid(8, 8, 2));

        assert!(a.same_set(&b));
        assert_eq!(cache.len_sets(), 1);
        let stats = a.set_stats();
        assert_eq!(stats.names, 2);
        assert_eq!(stats.originals, 2);
        assert_eq!(stats.holders, 2);
        // Both names now resolve to the merged set.
        assert!(cache.fetch_by_name("small").unwrap().same_set(&b));
        assert!(cache.fetch_by_name("large").unwrap().same_set(&a));
    }

    #[test]
    fn handles_format_for_diagnostics() {
        // `unwrap_err` and test assertions format the `Ok` arm, so handles
        // must be debug-printable.
        let cache = PictureCache::new(2);
        let h = cache.fetch_by_data(1, 1, &[5]);
        assert!(format!("{h:?}").contains("ImageHandle"));
    }

    #[test]
    fn add_size_supersedes_same_size_resized() {
        let cache = PictureCache::new(4);
        let h = cache.fetch_by_data(4, 4, &solid(4, 4, 1));
        cache.add_size(&h, 8, 8, &solid(8, 8, 2));
        let stats = h.set_stats();
        assert_eq!(stats.originals, 2);
        assert_eq!(cache.len_tracked_pictures(), 2);
    }
}
