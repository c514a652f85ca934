//! A folder item: a name → child map, plus the listing/mutation logic.
//!
//! Grounded in `original_source/src/lib/andromeda/filesystem/Folder.cpp`
//! (`GetItemByPath`, `SyncContents`, `CreateFile`/`CreateFolder`/
//! `DeleteItem`/`RenameItem`/`MoveItem`) and the six folder-kind headers
//! under `original_source/.../filesystem/folders/` for which kinds are
//! read-only and non-refreshing. The class-per-kind hierarchy there becomes
//! one [`FolderKind`] enum read by the shared logic below, since the
//! per-kind behavior is only ever "is it mutable" / "does it refresh",
//! never a distinct algorithm.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::backend::BackendSession;
use crate::error::{AndromedaError, FsError, ProtocolError};
use crate::filedata::ReadAheadConfig;
use crate::item::{File, Item, ItemArena, ItemHandle};

/// Which of the six folder roles this folder plays. Mirrors
/// `original_source`'s `PlainFolder`/`Filesystem`/`Filesystems`/
/// `SuperRoot`/`Adopted`/`Share` class split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    /// An ordinary subfolder of a mounted filesystem.
    Plain,
    /// The root folder of one storage filesystem; carries that
    /// filesystem's own id separately from its child map.
    Filesystem,
    /// Synthetic listing of every filesystem on the account.
    Filesystems,
    /// The mount's top-level folder when no single filesystem was
    /// selected: lists `Filesystems` and `Adopted` as its two children.
    SuperRoot,
    /// Synthetic listing of storage adopted from other accounts.
    Adopted,
    /// Synthetic listing of items shared with this account.
    Shared,
}

impl FolderKind {
    /// `SuperRoot`, `Filesystems`, `Adopted`, and `Shared` are synthetic
    /// listings with no backend folder of their own to write into.
    pub fn is_mutable(self) -> bool {
        matches!(self, FolderKind::Plain | FolderKind::Filesystem)
    }

    /// `SuperRoot` is built once from static structure and `Adopted` is a
    /// point-in-time snapshot handed back by the backend; neither is
    /// refreshed again once loaded. Every other kind refreshes on the normal
    /// `refresh_time`/memory-mode schedule.
    pub fn refreshes_after_first_load(self) -> bool {
        !matches!(self, FolderKind::SuperRoot | FolderKind::Adopted)
    }
}

/// One incoming child record from a backend listing, tagged by which kind
/// of item it describes.
pub enum NewChild {
    File(Value),
    Folder(Value),
}

pub struct Folder {
    kind: FolderKind,
    parent: Option<ItemHandle>,
    id: Option<String>,
    name: String,
    read_only: bool,
    children: HashMap<String, ItemHandle>,
    have_items: bool,
    refreshed_at: Option<Instant>,
}

impl Folder {
    pub fn new(kind: FolderKind, parent: Option<ItemHandle>, id: Option<String>, name: String) -> Self {
        Self {
            kind,
            parent,
            id,
            name,
            read_only: !kind.is_mutable(),
            children: HashMap::new(),
            have_items: false,
            refreshed_at: None,
        }
    }

    /// Builds a `Plain` subfolder from a backend listing entry.
    pub fn from_backend_plain(parent: ItemHandle, data: &Value) -> Result<Self, AndromedaError> {
        let id = data
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("id".to_string())))?
            .to_string();
        let name = data
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("name".to_string())))?
            .to_string();
        Ok(Self::new(FolderKind::Plain, Some(parent), Some(id), name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ItemHandle> {
        self.parent
    }

    pub fn kind(&self) -> FolderKind {
        self.kind
    }

    pub fn backend_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn children(&self) -> &HashMap<String, ItemHandle> {
        &self.children
    }

    /// Read-only policy (design §4.3): special synthetic folders always
    /// reject mutation; a `Plain`/`Filesystem` folder is read-only if the
    /// filesystem's own config or the server-wide config says so.
    pub fn is_read_only(&self, server_read_only: bool) -> bool {
        !self.kind.is_mutable() || self.read_only || server_read_only
    }

    /// Sets the per-filesystem read-only flag derived from `FSConfig`.
    /// Only meaningful for `Plain`/`Filesystem` folders.
    pub fn set_fs_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn refresh(&mut self, data: &Value) -> Result<(), AndromedaError> {
        if let Some(name) = data.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }
        Ok(())
    }

    /// Whether `GetItems()` must reload before returning, per design §4.3's
    /// contract: not yet loaded, or stale past `refresh_time` and not in
    /// memory mode — except kinds that never refresh after their first
    /// load regardless of age.
    pub fn needs_refresh(&self, refresh_time: Duration, is_memory_mode: bool) -> bool {
        if !self.have_items {
            return true;
        }
        if !self.kind.refreshes_after_first_load() {
            return false;
        }
        if is_memory_mode {
            return false;
        }
        match self.refreshed_at {
            Some(t) => t.elapsed() > refresh_time,
            None => true,
        }
    }

    pub fn mark_loaded(&mut self) {
        self.have_items = true;
        self.refreshed_at = Some(Instant::now());
    }

    /// Merges a fresh listing into the child map: refreshes items that
    /// still exist, inserts new ones, and removes children the backend no
    /// longer reports — unless that child is a file that was created
    /// locally and never successfully flushed, which must survive a
    /// refresh that raced ahead of its own upload (design §4.3 point 1-3,
    /// `Folder::SyncContents`).
    pub fn sync_contents(
        &mut self,
        arena: &mut ItemArena,
        this_handle: ItemHandle,
        page_size: u64,
        read_ahead: ReadAheadConfig,
        new_items: Vec<(String, NewChild)>,
    ) -> Result<(), AndromedaError> {
        let mut incoming_names: std::collections::HashSet<String> = std::collections::HashSet::with_capacity(new_items.len());

        for (name, child) in new_items {
            incoming_names.insert(name.clone());

            if let Some(&handle) = self.children.get(&name) {
                if let Some(item) = arena.get_mut(handle) {
                    match (item, &child) {
                        (Item::File(f), NewChild::File(data)) => f.refresh(data)?,
                        (Item::Folder(fo), NewChild::Folder(data)) => fo.refresh(data)?,
                        // Server-side type changed (file replaced by a
                        // folder of the same name or vice versa): leave
                        // the stale entry; the next full listing, once the
                        // old entry ages out, will settle it.
                        _ => {}
                    }
                }
                continue;
            }

            let handle = match child {
                NewChild::File(data) => {
                    let file = File::from_backend_with_read_ahead(this_handle, &data, page_size, read_ahead)?;
                    arena.insert(|_| Item::File(file))
                }
                NewChild::Folder(data) => {
                    let folder = Folder::from_backend_plain(this_handle, &data)?;
                    arena.insert(|_| Item::Folder(folder))
                }
            };
            self.children.insert(name, handle);
        }

        let mut to_remove = Vec::new();
        for (name, &handle) in self.children.iter() {
            if incoming_names.contains(name) {
                continue;
            }
            let keep_anyway = matches!(arena.get(handle), Some(Item::File(f)) if !f.backend_exists());
            if !keep_anyway {
                to_remove.push((name.clone(), handle));
            }
        }
        for (name, handle) in to_remove {
            self.children.remove(&name);
            arena.remove(handle);
        }

        self.mark_loaded();
        Ok(())
    }

    /// Looks up a single path component in the live child map; does not
    /// itself trigger a refresh (callers resolve `GetItems()` staleness
    /// first, matching `GetItemByPath`'s iterative descent).
    pub fn child(&self, name: &str) -> Option<ItemHandle> {
        self.children.get(name).copied()
    }

    /// Resolves a backend folder listing (`getfolder`'s `files`/`folders`
    /// arrays) into the `(name, NewChild)` pairs [`Self::sync_contents`]
    /// expects.
    pub fn parse_listing(data: &Value) -> Result<Vec<(String, NewChild)>, AndromedaError> {
        let mut items = Vec::new();
        for file in data.get("files").and_then(|v| v.as_array()).into_iter().flatten() {
            let name = file
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("name".to_string())))?;
            items.push((name.to_string(), NewChild::File(file.clone())));
        }
        for folder in data.get("folders").and_then(|v| v.as_array()).into_iter().flatten() {
            let name = folder
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("name".to_string())))?;
            items.push((name.to_string(), NewChild::Folder(folder.clone())));
        }
        Ok(items)
    }

    /// Ensures this folder's listing is current, reloading it from the
    /// backend if [`Self::needs_refresh`] says so. Dispatches by
    /// [`FolderKind`], mirroring `SubLoadItems` (design §4.3): `Plain`,
    /// `Filesystem`, and `Shared` reload via `GetFolder`; `Filesystems`
    /// reloads via `GetFilesystems` (resolving each entry's own root
    /// through `GetFSRoot`); `Adopted` reloads via `GetAdopted`; `SuperRoot`
    /// builds its two permanent children once and never calls the backend
    /// again. Split out of [`Self::resolve_path`] so a single-folder
    /// `readdir` can reuse it without walking a path.
    pub async fn ensure_loaded(
        arena: &mut ItemArena,
        backend: &BackendSession,
        handle: ItemHandle,
        page_size: u64,
        read_ahead: ReadAheadConfig,
        refresh_time: Duration,
        is_memory_mode: bool,
    ) -> Result<(), AndromedaError> {
        let folder = arena.get(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?;
        let needs_refresh = folder.needs_refresh(refresh_time, is_memory_mode);
        if !needs_refresh {
            return Ok(());
        }
        let kind = folder.kind();

        match kind {
            FolderKind::SuperRoot => {
                let mut item = arena.remove(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
                if let Item::Folder(folder) = &mut item {
                    folder.populate_super_root(arena, handle);
                }
                arena.put_back(handle, item);
                Ok(())
            }
            FolderKind::Filesystems => {
                let data = backend.get_filesystems().await?;
                Self::load_filesystems(arena, backend, handle, page_size, read_ahead, &data).await
            }
            FolderKind::Adopted => {
                let data = backend.get_adopted().await?;
                let new_items = Self::parse_listing(&data)?;
                Self::apply_listing(arena, handle, page_size, read_ahead, new_items)
            }
            FolderKind::Plain | FolderKind::Filesystem | FolderKind::Shared => {
                let folder_id = arena.get(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?.backend_id().map(|s| s.to_string());
                let data = backend.get_folder(folder_id.as_deref()).await?;
                let new_items = Self::parse_listing(&data)?;
                Self::apply_listing(arena, handle, page_size, read_ahead, new_items)
            }
        }
    }

    /// Removes the folder at `handle` from the arena, hands it `new_items`
    /// via [`Self::sync_contents`], and puts it back — the remove/put-back
    /// dance a folder's own mutation needs whenever it must also hold a
    /// `&mut ItemArena` (it can't be mutably borrowed out of the arena's
    /// map while the arena itself is borrowed).
    fn apply_listing(arena: &mut ItemArena, handle: ItemHandle, page_size: u64, read_ahead: ReadAheadConfig, new_items: Vec<(String, NewChild)>) -> Result<(), AndromedaError> {
        let mut item = arena.remove(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        let result = match &mut item {
            Item::Folder(folder) => folder.sync_contents(arena, handle, page_size, read_ahead, new_items),
            Item::File(_) => Err(AndromedaError::Fs(FsError::NotFolder)),
        };
        arena.put_back(handle, item);
        result
    }

    /// Populates a `Filesystems` listing: one `FolderKind::Filesystem`
    /// child per `GetFilesystems` entry, each resolved to its own root
    /// folder id (and pre-populated with that root's own listing) via
    /// `GetFSRoot`, matching `Filesystem::LoadFromData`'s eager bootstrap.
    async fn load_filesystems(arena: &mut ItemArena, backend: &BackendSession, handle: ItemHandle, page_size: u64, read_ahead: ReadAheadConfig, data: &Value) -> Result<(), AndromedaError> {
        let mut resolved = Vec::new();
        for entry in data.as_array().into_iter().flatten() {
            let fsid = entry
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("id".to_string())))?;
            let rdata = backend.get_fsroot(fsid).await?;
            let root_id = rdata
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AndromedaError::Protocol(ProtocolError::MissingField("id".to_string())))?
                .to_string();
            let name = entry.get("name").and_then(|v| v.as_str()).unwrap_or(fsid).to_string();
            resolved.push((name, root_id, rdata));
        }

        let mut item = arena.remove(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        let result = (|| -> Result<(), AndromedaError> {
            let Item::Folder(parent) = &mut item else {
                return Err(AndromedaError::Fs(FsError::NotFolder));
            };

            let mut incoming_names = std::collections::HashSet::with_capacity(resolved.len());
            for (name, root_id, rdata) in resolved {
                incoming_names.insert(name.clone());
                let fs_handle = match parent.children.get(&name) {
                    Some(&existing) => existing,
                    None => {
                        let fs_folder = Folder::new(FolderKind::Filesystem, Some(handle), Some(root_id), name.clone());
                        let fs_handle = arena.insert(|_| Item::Folder(fs_folder));
                        parent.children.insert(name.clone(), fs_handle);
                        fs_handle
                    }
                };

                let root_items = Self::parse_listing(&rdata)?;
                Self::apply_listing(arena, fs_handle, page_size, read_ahead, root_items)?;
            }

            parent.children.retain(|name, _| incoming_names.contains(name));
            parent.mark_loaded();
            Ok(())
        })();
        arena.put_back(handle, item);
        result
    }

    /// Builds the two permanent synthetic children of a `SuperRoot` folder
    /// — `Filesystems` and `Adopted by others` — and marks it loaded.
    /// Mirrors `SuperRoot::LoadItems`'s one-time population; since
    /// [`FolderKind::refreshes_after_first_load`] excludes `SuperRoot`,
    /// this never runs a second time.
    fn populate_super_root(&mut self, arena: &mut ItemArena, this_handle: ItemHandle) {
        if self.have_items {
            return;
        }
        let adopted = Folder::new(FolderKind::Adopted, Some(this_handle), None, "Adopted by others".to_string());
        let adopted_handle = arena.insert(|_| Item::Folder(adopted));
        self.children.insert("Adopted by others".to_string(), adopted_handle);

        let filesystems = Folder::new(FolderKind::Filesystems, Some(this_handle), None, "Filesystems".to_string());
        let filesystems_handle = arena.insert(|_| Item::Folder(filesystems));
        self.children.insert("Filesystems".to_string(), filesystems_handle);

        self.mark_loaded();
    }

    /// Iteratively descends a `/`-separated relative path from `root`,
    /// refreshing each folder it passes through along the way — the arena
    /// equivalent of `Folder::GetItemByPath`'s loop over live `Folder&`
    /// pointers, since handles here never alias a borrow the way the
    /// original's references did.
    pub async fn resolve_path(
        arena: &mut ItemArena,
        backend: &BackendSession,
        root: ItemHandle,
        path: &str,
        page_size: u64,
        read_ahead: ReadAheadConfig,
        refresh_time: Duration,
        is_memory_mode: bool,
    ) -> Result<ItemHandle, AndromedaError> {
        let mut current = root;
        for component in crate::stringutil::split_path(path) {
            Self::ensure_loaded(arena, backend, current, page_size, read_ahead, refresh_time, is_memory_mode).await?;
            let folder = arena.get(current).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?;
            current = folder.child(component).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        }
        Ok(current)
    }

    pub async fn create_file(
        &mut self,
        arena: &mut ItemArena,
        this_handle: ItemHandle,
        backend: &BackendSession,
        name: &str,
        page_size: u64,
        read_ahead: ReadAheadConfig,
        server_read_only: bool,
    ) -> Result<ItemHandle, AndromedaError> {
        if self.is_read_only(server_read_only) {
            return Err(AndromedaError::Access(crate::error::AccessError::ReadOnly(self.name.clone())));
        }
        if name.is_empty() || self.children.contains_key(name) {
            return Err(AndromedaError::Fs(FsError::DuplicateItem));
        }
        let parent_id = self.id.as_deref().ok_or(AndromedaError::Fs(FsError::Modify))?;
        let created = backend.create_file(parent_id, name).await?;
        let file = File::from_backend_with_read_ahead(this_handle, &created, page_size, read_ahead)?;
        let handle = arena.insert(|_| Item::File(file));
        self.children.insert(name.to_string(), handle);
        Ok(handle)
    }

    pub async fn create_folder(&mut self, arena: &mut ItemArena, this_handle: ItemHandle, backend: &BackendSession, name: &str, server_read_only: bool) -> Result<ItemHandle, AndromedaError> {
        if self.is_read_only(server_read_only) {
            return Err(AndromedaError::Access(crate::error::AccessError::ReadOnly(self.name.clone())));
        }
        if name.is_empty() || self.children.contains_key(name) {
            return Err(AndromedaError::Fs(FsError::DuplicateItem));
        }
        let parent_id = self.id.as_deref().ok_or(AndromedaError::Fs(FsError::Modify))?;
        let created = backend.create_folder(parent_id, name).await?;
        let folder = Folder::from_backend_plain(this_handle, &created)?;
        let handle = arena.insert(|_| Item::Folder(folder));
        self.children.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Removes `name` from this folder's child map and the backend.
    /// The caller is responsible for first confirming (via the tree's
    /// [`crate::lock::LockManager`]) that no scope lock is held on the
    /// target; that check happens above this method, not inside it, since
    /// `Folder` has no access to the lock registry.
    pub async fn delete_item(&mut self, arena: &mut ItemArena, backend: &BackendSession, name: &str, server_read_only: bool) -> Result<(), AndromedaError> {
        if self.is_read_only(server_read_only) {
            return Err(AndromedaError::Access(crate::error::AccessError::ReadOnly(self.name.clone())));
        }
        let handle = self.children.get(name).copied().ok_or(AndromedaError::Fs(FsError::NotFound))?;
        let item = arena.get_mut(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        match item {
            Item::File(f) => f.delete(backend).await?,
            Item::Folder(fo) => {
                let id = fo.id.clone();
                if let Some(id) = id {
                    backend.delete_folder(&id).await.or_else(swallow_not_found)?;
                }
            }
        }
        self.children.remove(name);
        arena.remove(handle);
        Ok(())
    }

    pub async fn rename_item(&mut self, arena: &mut ItemArena, backend: &BackendSession, old_name: &str, new_name: &str, overwrite: bool, server_read_only: bool) -> Result<(), AndromedaError> {
        if self.is_read_only(server_read_only) {
            return Err(AndromedaError::Access(crate::error::AccessError::ReadOnly(self.name.clone())));
        }
        let handle = self.children.get(old_name).copied().ok_or(AndromedaError::Fs(FsError::NotFound))?;
        let duplicate = self.children.get(new_name).copied();
        if new_name.is_empty() || (!overwrite && duplicate.is_some()) {
            return Err(AndromedaError::Fs(FsError::DuplicateItem));
        }

        let item = arena.get_mut(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        match item {
            Item::File(f) => f.rename(backend, new_name, overwrite).await?,
            Item::Folder(fo) => {
                if let Some(id) = fo.id.clone() {
                    backend.rename_folder(&id, new_name, overwrite).await?;
                }
                fo.name = new_name.to_string();
            }
        }

        if let Some(dup) = duplicate {
            self.children.remove(new_name);
            arena.remove(dup);
        }
        self.children.remove(old_name);
        self.children.insert(new_name.to_string(), handle);
        Ok(())
    }

    pub async fn move_item(&mut self, arena: &mut ItemArena, backend: &BackendSession, name: &str, new_parent_handle: ItemHandle, server_read_only: bool, new_parent_read_only: bool, overwrite: bool) -> Result<(), AndromedaError> {
        if self.is_read_only(server_read_only) {
            return Err(AndromedaError::Access(crate::error::AccessError::ReadOnly(self.name.clone())));
        }
        if new_parent_read_only {
            return Err(AndromedaError::Access(crate::error::AccessError::ReadOnly("destination".to_string())));
        }
        let handle = self.children.get(name).copied().ok_or(AndromedaError::Fs(FsError::NotFound))?;

        // Caller resolves the new parent's id and duplicate check via a
        // second `Folder` borrow (two folders can't be borrowed mutably
        // at once from the arena, so the orchestrating caller — typically
        // the mount bridge — resolves both handles and drives this as a
        // two-step operation); this method performs only the half it can
        // see: the backend `Move*` call and removing the entry here.
        let new_parent_id = arena
            .get(new_parent_handle)
            .and_then(|it| it.as_folder().ok())
            .and_then(|f| f.backend_id())
            .ok_or(AndromedaError::Fs(FsError::Modify))?
            .to_string();

        let item = arena.get_mut(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        match item {
            Item::File(f) => f.move_to(backend, new_parent_handle, &new_parent_id, overwrite).await?,
            Item::Folder(fo) => {
                if let Some(id) = fo.id.clone() {
                    backend.move_folder(&id, &new_parent_id, overwrite).await?;
                }
                fo.parent = Some(new_parent_handle);
            }
        }

        self.children.remove(name);
        Ok(())
    }

    /// Inserts an already-moved item's handle into this folder's child
    /// map under `name`, evicting any existing duplicate first. Called by
    /// the orchestrator on the destination folder right after
    /// [`Self::move_item`] succeeds on the source folder.
    pub fn adopt_moved(&mut self, arena: &mut ItemArena, name: &str, handle: ItemHandle, overwrite: bool) -> Result<(), AndromedaError> {
        if let Some(&existing) = self.children.get(name) {
            if !overwrite {
                return Err(AndromedaError::Fs(FsError::DuplicateItem));
            }
            arena.remove(existing);
        }
        self.children.insert(name.to_string(), handle);
        Ok(())
    }
}

fn swallow_not_found(err: AndromedaError) -> Result<(), AndromedaError> {
    match err {
        AndromedaError::Fs(FsError::NotFound) => Ok(()),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_root() -> Folder {
        Folder::new(FolderKind::Plain, None, Some("root".to_string()), String::new())
    }

    #[test]
    fn superroot_never_refreshes_after_first_load() {
        let mut folder = Folder::new(FolderKind::SuperRoot, None, None, "super".to_string());
        assert!(folder.needs_refresh(Duration::from_secs(0), false));
        folder.mark_loaded();
        assert!(!folder.needs_refresh(Duration::from_secs(0), false));
    }

    #[test]
    fn special_folders_reject_mutation() {
        let folder = Folder::new(FolderKind::Adopted, None, None, "adopted".to_string());
        assert!(folder.is_read_only(false));
    }

    #[test]
    fn adopted_never_refreshes_after_first_load() {
        let mut folder = Folder::new(FolderKind::Adopted, None, None, "adopted".to_string());
        assert!(folder.needs_refresh(Duration::from_secs(0), false));
        folder.mark_loaded();
        assert!(!folder.needs_refresh(Duration::from_secs(0), false));
    }

    #[tokio::test]
    async fn sync_contents_inserts_updates_and_removes() {
        let mut arena = ItemArena::new();
        let mut folder = new_root();
        let root_handle = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Plain, None, Some("root".to_string()), String::new())));

        folder
            .sync_contents(
                &mut arena,
                root_handle,
                4096,
                ReadAheadConfig::default(),
                vec![("a.txt".to_string(), NewChild::File(json!({"id": "f1", "name": "a.txt", "size": 10})))],
            )
            .unwrap();
        assert_eq!(folder.children().len(), 1);

        // Second sync: a.txt's size changes, and it's the only entry, so
        // nothing gets removed.
        folder
            .sync_contents(
                &mut arena,
                root_handle,
                4096,
                ReadAheadConfig::default(),
                vec![("a.txt".to_string(), NewChild::File(json!({"id": "f1", "name": "a.txt", "size": 20})))],
            )
            .unwrap();
        let handle = *folder.children().get("a.txt").unwrap();
        let size = arena.get(handle).unwrap().as_file().unwrap().size().await;
        assert_eq!(size, 20);

        // Third sync: empty listing removes a.txt since it exists on the
        // backend and wasn't reported again.
        folder.sync_contents(&mut arena, root_handle, 4096, ReadAheadConfig::default(), vec![]).unwrap();
        assert!(folder.children().is_empty());
    }

    #[test]
    fn sync_contents_keeps_a_file_not_yet_confirmed_on_the_backend() {
        let mut arena = ItemArena::new();
        let root_handle = arena.insert(|_| Item::Folder(Folder::new(FolderKind::Plain, None, Some("root".to_string()), String::new())));
        let mut folder = new_root();

        let local_only = arena.insert(|_| Item::File(File::new_local(root_handle, "draft.txt".to_string(), 4096)));
        folder.children.insert("draft.txt".to_string(), local_only);

        // A listing that doesn't mention draft.txt at all — it hasn't been
        // flushed to the backend yet, so there's nothing for the server to
        // report.
        folder.sync_contents(&mut arena, root_handle, 4096, ReadAheadConfig::default(), vec![]).unwrap();

        assert!(folder.child("draft.txt").is_some(), "an unflushed local file must survive a refresh that races ahead of its own upload");
    }
}
