//! Storage for ensembles the smoother still has to revisit.

use nd::prelude::*;
use parking_lot::Mutex;

use std::collections::HashMap;
use std::sync::Arc;

/// Opaque reference to a cached array. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

#[derive(Debug)]
pub struct ArrayCacheEntry {
  pub array: Array<f64, Ix2>,
  dirty: bool,
}
impl ArrayCacheEntry {
  fn new(array: Array<f64, Ix2>) -> ArrayCacheEntry {
    ArrayCacheEntry {
      array: array,
      dirty: false,
    }
  }
  pub fn is_dirty(&self) -> bool { self.dirty }
}

/// A checked out entry. Lock it to read or write the array.
pub type EntryRef = Arc<Mutex<ArrayCacheEntry>>;

/// Maps handles to 2-d arrays.
///
/// Operating on a handle that was removed (or never issued) is a bug in the caller and
/// panics.
pub trait ArrayCache: Send {
  /// Stores a deep copy of `a`.
  fn put(&mut self, a: ArrayView<f64, Ix2>) -> Handle;
  fn get(&mut self, h: Handle) -> EntryRef;
  fn remove(&mut self, h: Handle);
  /// Invalidates every handle.
  fn clear(&mut self);
  /// Signals the array behind `h` was modified after `get`. The entry must not be
  /// locked by the caller.
  fn mark_dirty(&mut self, h: Handle);

  fn contains(&self, h: Handle) -> bool;
  fn len(&self) -> usize;
  fn is_empty(&self) -> bool { self.len() == 0 }

  /// `get` followed by `remove`.
  fn pop(&mut self, h: Handle) -> EntryRef {
    let entry = self.get(h);
    self.remove(h);
    entry
  }
}

#[derive(Debug, Default)]
pub struct MemoryArrayCache {
  entries: HashMap<Handle, EntryRef>,
  next: u64,
}
impl MemoryArrayCache {
  pub fn new() -> MemoryArrayCache {
    Default::default()
  }

  fn entry(&self, h: Handle) -> &EntryRef {
    match self.entries.get(&h) {
      Some(entry) => entry,
      None => panic!("invalid array cache handle {:?}", h),
    }
  }
}

impl ArrayCache for MemoryArrayCache {
  fn put(&mut self, a: ArrayView<f64, Ix2>) -> Handle {
    let h = Handle(self.next);
    self.next += 1;
    let entry = ArrayCacheEntry::new(a.to_owned());
    self.entries.insert(h, Arc::new(Mutex::new(entry)));
    h
  }
  fn get(&mut self, h: Handle) -> EntryRef {
    self.entry(h).clone()
  }
  fn remove(&mut self, h: Handle) {
    let removed = self.entries.remove(&h);
    assert!(removed.is_some(), "invalid array cache handle {:?}", h);
  }
  fn clear(&mut self) {
    self.entries.clear();
  }
  fn mark_dirty(&mut self, h: Handle) {
    // nothing to persist; just keep the flag honest.
    self.entry(h).lock().dirty = true;
  }
  fn contains(&self, h: Handle) -> bool {
    self.entries.contains_key(&h)
  }
  fn len(&self) -> usize { self.entries.len() }
}
