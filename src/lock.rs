//! Locking discipline for the item tree.
//!
//! Grounded in the scope-lock / folder-lock / tree-delete-lock split
//! described for `Item`/`Folder` in `original_source/src/lib/andromeda/`
//! (`Item::TryLockScope`, `Folder`'s mutex around its child map). The
//! arena-of-handles redesign (§3) moves all three lock kinds out of the
//! items themselves and into one registry keyed by `ItemHandle`, since
//! `Item` values living in a `HashMap` can't own a lock that outlives a
//! `remove()` call the way an owned C++ object could.
//!
//! Acquisition order, strictly enforced by callers: delete lock, then
//! folder locks in ascending `ItemHandle` order, then item scope locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::item::ItemHandle;

/// An RAII token proving the holder is "inside" an item — i.e. it was
/// resolved to a handle and the caller promises not to let the handle
/// outlive the token's scope. Deletion checks that no such token is
/// outstanding before removing the item from the arena.
pub struct ScopeLock(Arc<()>);

/// Registry of per-item and per-folder locks, plus the single tree-wide
/// delete lock. One instance is shared by an entire mounted filesystem.
pub struct LockManager {
    delete_lock: Mutex<()>,
    scope_tokens: Mutex<HashMap<ItemHandle, Arc<()>>>,
    folder_locks: Mutex<HashMap<ItemHandle, Arc<RwLock<()>>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            delete_lock: Mutex::new(()),
            scope_tokens: Mutex::new(HashMap::new()),
            folder_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Locks out all concurrent deletion in the tree. Held only for the
    /// short window a `DeleteItem`/`RenameItem`/`MoveItem` call spends
    /// deciding whether its target is safe to mutate; must be acquired
    /// before any folder lock.
    pub fn lock_delete(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.delete_lock.lock()
    }

    /// Returns the shared read/write lock guarding one folder's child map,
    /// creating it on first use.
    pub fn folder_lock(&self, handle: ItemHandle) -> Arc<RwLock<()>> {
        self.folder_locks.lock().entry(handle).or_insert_with(|| Arc::new(RwLock::new(()))).clone()
    }

    /// Returns the locks for several folders, deduplicated and sorted by
    /// handle so that acquiring them in the returned order can never
    /// deadlock against another caller locking the same set.
    pub fn folder_locks_ordered(&self, handles: &[ItemHandle]) -> Vec<Arc<RwLock<()>>> {
        let mut unique: Vec<ItemHandle> = handles.to_vec();
        unique.sort_by_key(|h| h.0);
        unique.dedup();
        unique.into_iter().map(|h| self.folder_lock(h)).collect()
    }

    /// Acquires a scope lock on `handle`, creating its token on first use.
    /// Cheap: cloning an `Arc<()>` and bumping a refcount.
    pub fn lock_scope(&self, handle: ItemHandle) -> ScopeLock {
        let token = self.scope_tokens.lock().entry(handle).or_insert_with(|| Arc::new(())).clone();
        ScopeLock(token)
    }

    /// Attempts to retire `handle`'s scope token: succeeds only if no
    /// `ScopeLock` for it is currently held anywhere (strong count 1, i.e.
    /// only this registry's own reference remains). On success the token
    /// entry is removed so a later `lock_scope` call for a reused handle
    /// value (which cannot happen with a monotonic counter, but would with
    /// any handle-reuse scheme) starts fresh.
    pub fn try_retire_scope(&self, handle: ItemHandle) -> bool {
        let mut tokens = self.scope_tokens.lock();
        match tokens.get(&handle) {
            Some(token) if Arc::strong_count(token) == 1 => {
                tokens.remove(&handle);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Drops the folder-lock entry for `handle`. Called once a folder is
    /// deleted, so the registry does not grow unboundedly over the life of
    /// a long-running mount.
    pub fn forget_folder(&self, handle: ItemHandle) {
        self.folder_locks.lock().remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_lock_blocks_retirement_while_held() {
        let manager = LockManager::new();
        let handle = ItemHandle(1);
        let guard = manager.lock_scope(handle);
        assert!(!manager.try_retire_scope(handle));
        drop(guard);
        assert!(manager.try_retire_scope(handle));
    }

    #[test]
    fn unused_handle_retires_trivially() {
        let manager = LockManager::new();
        assert!(manager.try_retire_scope(ItemHandle(42)));
    }

    #[test]
    fn folder_locks_ordered_is_sorted_and_deduplicated() {
        let manager = LockManager::new();
        let a = ItemHandle(5);
        let b = ItemHandle(2);
        let locks = manager.folder_locks_ordered(&[a, b, a]);
        assert_eq!(locks.len(), 2);
    }
}
