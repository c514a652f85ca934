//! Thin FUSE host bridge.
//!
//! Translates kernel filesystem calls into calls against the
//! `andromedafs_core` engine and maps [`AndromedaError`] to a POSIX errno.
//! `impl Filesystem for FsWrapper` delegates each kernel callback to
//! per-operation logic on a dedicated `tokio::runtime::Runtime` driven with
//! `block_on`, then hands off to `fuser::mount2`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use clap::Parser;
use fuser::{FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyWrite, Request};
use tokio::sync::Semaphore;

use andromedafs_core::backend::BackendSession;
use andromedafs_core::config::options::{FileOptions, Options, load_file_options};
use andromedafs_core::config::{CacheMode, Config, FSConfig};
use andromedafs_core::debug;
use andromedafs_core::error::{AndromedaError, ConfigError, FsError};
use andromedafs_core::filedata::{PageBackend, ReadAheadConfig};
use andromedafs_core::item::{Folder, FolderKind, Item, ItemArena, ItemHandle};
use andromedafs_core::lock::{LockManager, ScopeLock};
use andromedafs_core::platformutil::current_uid_gid;
use andromedafs_core::runner::http::{HttpRunner, HttpRunnerConfig};
use andromedafs_core::runner::subprocess::SubprocessRunner;
use andromedafs_core::runner::Runner;

const TTL: Duration = Duration::from_secs(1);
const APP_NAME: &str = "fuse";

/// The mounted filesystem's state: the item arena, its locks, and the two
/// backend-facing helpers (`BackendSession` for metadata, `PageBackend` for
/// file bytes).
struct Mount {
    arena: ItemArena,
    root: ItemHandle,
    lock_manager: LockManager,
    backend: Arc<BackendSession>,
    page_backend: Arc<PageBackend>,
    server_config: Config,
    fs_config: FSConfig,
    cache_mode: CacheMode,
    refresh_time: Duration,
    read_ahead: ReadAheadConfig,
    uid: u32,
    gid: u32,
    open_handles: HashMap<u64, (ItemHandle, ScopeLock)>,
    next_fh: u64,
}

impl Mount {
    async fn new(options: Options) -> Result<Self, AndromedaError> {
        let runner: Arc<dyn Runner> = if let Some(url) = &options.api_url {
            let mut config = HttpRunnerConfig {
                base_url: url.clone(),
                max_retries: options.max_retries,
                retry_delay: Duration::from_secs(options.retry_time_secs),
                ..Default::default()
            };
            if let (Some(user), Some(pass)) = (&options.http_user, &options.http_pass) {
                config.basic_auth = Some((user.clone(), pass.clone()));
            }
            if let Some(host) = &options.proxy_host {
                let port = options.proxy_port.unwrap_or(8080);
                config.proxy = Some(format!("http://{host}:{port}"));
            }
            Arc::new(HttpRunner::new(config)?)
        } else if let Some(path) = &options.api_path {
            Arc::new(SubprocessRunner::new(path.clone(), Duration::from_secs(30)))
        } else {
            return Err(AndromedaError::Config(ConfigError::MissingOption("apiurl or apipath".to_string())));
        };

        let cache_mode: CacheMode = options.cache_mode.into();
        let backend = Arc::new(BackendSession::new(runner, APP_NAME, cache_mode));

        if let (Some(id), Some(key)) = (&options.session_id, &options.session_key) {
            backend.pre_authenticate(id.clone(), key.clone()).await?;
        } else if let Some(username) = &options.username {
            let password = options
                .password
                .clone()
                .ok_or_else(|| AndromedaError::Config(ConfigError::MissingOption("password".to_string())))?;
            backend.authenticate(username, &password, None).await?;
        }

        let server_config_json = backend.get_config().await?;
        let server_config: Config = serde_json::from_value(server_config_json).unwrap_or_default();

        let fsid = options.filesystem.clone().flatten();
        let fs_data = backend.get_filesystem(fsid.as_deref()).await?;
        let lims = backend.get_account_limits().await?;
        let fs_config = FSConfig::from_json(&fs_data, &lims)?;

        let root_folder_id = options.folder.clone().flatten();
        let mut root_folder = Folder::new(FolderKind::Filesystem, None, root_folder_id, String::new());
        root_folder.set_fs_read_only(fs_config.is_read_only() || options.read_only || server_config.read_only);

        let mut arena = ItemArena::new();
        let root = arena.insert(|_| Item::Folder(root_folder));

        let semaphore = Arc::new(Semaphore::new(options.backend_runners.max(1)));
        let page_backend = Arc::new(PageBackend::new(backend.clone(), semaphore, options.page_size.max(4096)));

        let (uid, gid) = current_uid_gid();

        let defaults = ReadAheadConfig::default();
        let read_ahead = ReadAheadConfig {
            buffer_pages: options.read_ahead_buffer.unwrap_or(defaults.buffer_pages),
            max_wait: options.read_ahead_ms.map(Duration::from_millis).unwrap_or(defaults.max_wait),
            max_cache_frac: options.read_max_cache_frac.unwrap_or(defaults.max_cache_frac),
        };

        Ok(Self {
            arena,
            root,
            lock_manager: LockManager::new(),
            backend,
            page_backend,
            server_config,
            fs_config,
            cache_mode,
            refresh_time: Duration::from_secs(options.dir_refresh_secs),
            read_ahead,
            uid,
            gid,
            open_handles: HashMap::new(),
            next_fh: 1,
        })
    }

    fn to_fuse_ino(handle: ItemHandle) -> u64 {
        handle.0 + 1
    }

    fn from_fuse_ino(ino: u64) -> ItemHandle {
        ItemHandle(ino.saturating_sub(1))
    }

    fn take_folder(&mut self, handle: ItemHandle) -> Result<Folder, AndromedaError> {
        let item = self.arena.remove(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        match item {
            Item::Folder(folder) => Ok(folder),
            other => {
                self.arena.put_back(handle, other);
                Err(AndromedaError::Fs(FsError::NotFolder))
            }
        }
    }

    fn put_folder(&mut self, handle: ItemHandle, folder: Folder) {
        self.arena.put_back(handle, Item::Folder(folder));
    }

    async fn ensure_loaded(&mut self, handle: ItemHandle) -> Result<(), AndromedaError> {
        let page_size = self.fs_config.chunk_size().max(4096);
        let is_memory_mode = self.cache_mode == CacheMode::Memory;
        Folder::ensure_loaded(&mut self.arena, &self.backend, handle, page_size, self.read_ahead, self.refresh_time, is_memory_mode).await
    }

    async fn attr_for(&self, handle: ItemHandle) -> Result<FileAttr, AndromedaError> {
        let item = self.arena.get(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        let now = SystemTime::now();
        let (size, kind, perm) = match item {
            Item::File(f) => (f.size().await, FileType::RegularFile, 0o644),
            Item::Folder(_) => (0u64, FileType::Directory, 0o755),
        };
        Ok(FileAttr {
            ino: Self::to_fuse_ino(handle),
            size,
            blocks: size.div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm,
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        })
    }

    async fn lookup(&mut self, parent: ItemHandle, name: &str) -> Result<FileAttr, AndromedaError> {
        self.ensure_loaded(parent).await?;
        let handle = self
            .arena
            .get(parent)
            .ok_or(AndromedaError::Fs(FsError::NotFound))?
            .as_folder()?
            .child(name)
            .ok_or(AndromedaError::Fs(FsError::NotFound))?;
        self.attr_for(handle).await
    }

    async fn readdir_entries(&mut self, handle: ItemHandle) -> Result<Vec<(u64, FileType, String)>, AndromedaError> {
        self.ensure_loaded(handle).await?;
        let folder = self.arena.get(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?;
        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(folder.children().len());
        for (name, &child) in folder.children() {
            let kind = match self.arena.get(child) {
                Some(Item::File(_)) => FileType::RegularFile,
                _ => FileType::Directory,
            };
            entries.push((Self::to_fuse_ino(child), kind, name.clone()));
        }
        entries.sort_by(|a, b| a.2.cmp(&b.2));
        Ok(entries)
    }

    /// Rejects a mutation targeting `handle` while some open file handle
    /// still holds a scope lock on it (design invariant: no deletion or
    /// rename of an item while a scope lock is outstanding). Also retires
    /// the token on success, same as `LockManager::try_retire_scope`.
    fn check_unlocked(&self, handle: ItemHandle) -> Result<(), AndromedaError> {
        if self.lock_manager.try_retire_scope(handle) {
            Ok(())
        } else {
            Err(AndromedaError::Fs(FsError::ItemBusy))
        }
    }

    fn parent_backend_id(&self, handle: ItemHandle) -> Result<String, AndromedaError> {
        let item = self.arena.get(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
        let parent = item.parent().ok_or(AndromedaError::Fs(FsError::Modify))?;
        let parent_folder = self.arena.get(parent).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?;
        Ok(parent_folder.backend_id().unwrap_or_default().to_string())
    }

    async fn create_file(&mut self, parent: ItemHandle, name: &str) -> Result<ItemHandle, AndromedaError> {
        self.ensure_loaded(parent).await?;
        let server_ro = self.server_config.read_only;
        let page_size = self.fs_config.chunk_size().max(4096);
        let mut folder = self.take_folder(parent)?;
        let result = folder.create_file(&mut self.arena, parent, &self.backend, name, page_size, self.read_ahead, server_ro).await;
        self.put_folder(parent, folder);
        result
    }

    async fn create_folder(&mut self, parent: ItemHandle, name: &str) -> Result<ItemHandle, AndromedaError> {
        self.ensure_loaded(parent).await?;
        let server_ro = self.server_config.read_only;
        let mut folder = self.take_folder(parent)?;
        let result = folder.create_folder(&mut self.arena, parent, &self.backend, name, server_ro).await;
        self.put_folder(parent, folder);
        result
    }

    async fn remove_item(&mut self, parent: ItemHandle, name: &str) -> Result<(), AndromedaError> {
        self.ensure_loaded(parent).await?;
        let server_ro = self.server_config.read_only;
        let _delete_guard = self.lock_manager.lock_delete();

        let target = self
            .arena
            .get(parent)
            .ok_or(AndromedaError::Fs(FsError::NotFound))?
            .as_folder()?
            .child(name)
            .ok_or(AndromedaError::Fs(FsError::NotFound))?;
        if target == self.root {
            return Err(AndromedaError::Fs(FsError::DeleteRoot));
        }
        self.check_unlocked(target)?;

        let mut folder = self.take_folder(parent)?;
        let result = folder.delete_item(&mut self.arena, &self.backend, name, server_ro).await;
        self.put_folder(parent, folder);
        if result.is_ok() {
            self.lock_manager.forget_folder(target);
        }
        result
    }

    async fn rename(&mut self, old_parent: ItemHandle, old_name: &str, new_parent: ItemHandle, new_name: &str, overwrite: bool) -> Result<(), AndromedaError> {
        self.ensure_loaded(old_parent).await?;
        self.ensure_loaded(new_parent).await?;
        let server_ro = self.server_config.read_only;
        let _delete_guard = self.lock_manager.lock_delete();

        let moved_handle = self
            .arena
            .get(old_parent)
            .ok_or(AndromedaError::Fs(FsError::NotFound))?
            .as_folder()?
            .child(old_name)
            .ok_or(AndromedaError::Fs(FsError::NotFound))?;
        if moved_handle == self.root {
            return Err(AndromedaError::Fs(FsError::DeleteRoot));
        }
        self.check_unlocked(moved_handle)?;

        if old_parent == new_parent {
            if overwrite {
                if let Some(existing) = self.arena.get(new_parent).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?.child(new_name) {
                    self.check_unlocked(existing)?;
                }
            }
            let mut folder = self.take_folder(old_parent)?;
            let result = folder.rename_item(&mut self.arena, &self.backend, old_name, new_name, overwrite, server_ro).await;
            self.put_folder(old_parent, folder);
            return result;
        }

        let new_parent_folder = self.arena.get(new_parent).ok_or(AndromedaError::Fs(FsError::NotFound))?.as_folder()?;
        let new_parent_ro = new_parent_folder.is_read_only(server_ro);
        if overwrite {
            if let Some(existing) = new_parent_folder.child(new_name) {
                self.check_unlocked(existing)?;
            }
        }

        let mut old_folder = self.take_folder(old_parent)?;
        let moved_handle = old_folder.child(old_name).ok_or(AndromedaError::Fs(FsError::NotFound));
        let result = match moved_handle {
            Ok(handle) => old_folder.move_item(&mut self.arena, &self.backend, old_name, new_parent, server_ro, new_parent_ro, overwrite).await.map(|_| handle),
            Err(e) => Err(e),
        };
        self.put_folder(old_parent, old_folder);
        let moved_handle = result?;

        let mut new_folder = self.take_folder(new_parent)?;
        let result = new_folder.adopt_moved(&mut self.arena, new_name, moved_handle, overwrite);
        self.put_folder(new_parent, new_folder);
        result
    }
}

/// Adapts [`Mount`] to `fuser::Filesystem`, driving the async engine from
/// each synchronous kernel callback via a dedicated multi-thread runtime,
/// one `block_on` call per operation.
#[derive(Clone)]
struct FsWrapper {
    mount: Arc<Mutex<Mount>>,
    runtime: Arc<tokio::runtime::Runtime>,
}

fn reply_err(err: AndromedaError) -> i32 {
    err.to_errno()
}

impl Filesystem for FsWrapper {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut mount = self.mount.lock().unwrap();
        let parent_handle = Mount::from_fuse_ino(parent);
        match self.runtime.block_on(mount.lookup(parent_handle, name)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let mount = self.mount.lock().unwrap();
        let handle = Mount::from_fuse_ino(ino);
        match self.runtime.block_on(mount.attr_for(handle)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let mut mount = self.mount.lock().unwrap();
        let handle = Mount::from_fuse_ino(ino);
        let result: Result<FileAttr, AndromedaError> = self.runtime.block_on(async {
            if let Some(new_size) = size {
                let parent_id = mount.parent_backend_id(handle)?;
                let page_backend = mount.page_backend.clone();
                let item = mount.arena.get_mut(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
                item.as_file_mut()?.truncate(&page_backend, &parent_id, new_size).await?;
            }
            mount.attr_for(handle).await
        });
        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let mut mount = self.mount.lock().unwrap();
        let handle = Mount::from_fuse_ino(ino);
        let mut entries = vec![(ino, FileType::Directory, ".".to_string()), (ino, FileType::Directory, "..".to_string())];
        match self.runtime.block_on(mount.readdir_entries(handle)) {
            Ok(children) => entries.extend(children),
            Err(e) => {
                reply.error(reply_err(e));
                return;
            }
        }
        for (index, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (index + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        let mut mount = self.mount.lock().unwrap();
        let handle = Mount::from_fuse_ino(ino);
        if mount.arena.get(handle).and_then(|i| i.as_file().ok()).is_none() {
            reply.error(libc::ENOENT);
            return;
        }
        let scope = mount.lock_manager.lock_scope(handle);
        let fh = mount.next_fh;
        mount.next_fh += 1;
        mount.open_handles.insert(fh, (handle, scope));
        reply.opened(fh, 0);
    }

    // `read`/`write` only need the mount-wide lock long enough to pull a
    // self-contained `FileIoHandle` (design: `PageCache` already
    // serializes itself per file) out of the arena; the actual I/O —
    // including any backend round trip — runs with that lock released, so
    // concurrent operations on unrelated files aren't serialized behind it.
    #[allow(clippy::too_many_arguments)]
    fn read(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        let handle = Mount::from_fuse_ino(ino);
        let (page_backend, io_handle) = {
            let mount = self.mount.lock().unwrap();
            let page_backend = mount.page_backend.clone();
            let io_handle = match mount.arena.get(handle).and_then(|i| i.as_file().ok()) {
                Some(f) => f.io_handle(),
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };
            (page_backend, io_handle)
        };
        let result = self.runtime.block_on(io_handle.read(&page_backend, offset.max(0) as u64, size as u64));
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, data: &[u8], _write_flags: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyWrite) {
        let handle = Mount::from_fuse_ino(ino);
        let (page_backend, write_mode, io_handle) = {
            let mount = self.mount.lock().unwrap();
            let page_backend = mount.page_backend.clone();
            let write_mode = mount.fs_config.write_mode();
            let io_handle = match mount.arena.get(handle).and_then(|i| i.as_file().ok()) {
                Some(f) => f.io_handle(),
                None => {
                    reply.error(libc::ENOENT);
                    return;
                }
            };
            (page_backend, write_mode, io_handle)
        };
        let result = self.runtime.block_on(io_handle.write(&page_backend, write_mode, offset.max(0) as u64, data));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let mut mount = self.mount.lock().unwrap();
        let handle = Mount::from_fuse_ino(ino);
        let page_backend = mount.page_backend.clone();
        let result = self.runtime.block_on(async {
            let parent_id = mount.parent_backend_id(handle).unwrap_or_default();
            let item = mount.arena.get_mut(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
            item.as_file_mut()?.flush(&page_backend, &parent_id).await
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn release(&mut self, _req: &Request, ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        let mut mount = self.mount.lock().unwrap();
        let handle = Mount::from_fuse_ino(ino);
        let page_backend = mount.page_backend.clone();
        let result = self.runtime.block_on(async {
            let parent_id = mount.parent_backend_id(handle).unwrap_or_default();
            let item = mount.arena.get_mut(handle).ok_or(AndromedaError::Fs(FsError::NotFound))?;
            item.as_file_mut()?.flush(&page_backend, &parent_id).await
        });
        mount.open_handles.remove(&fh);
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn create(&mut self, _req: &Request, parent: u64, name: &OsStr, _mode: u32, _umask: u32, _flags: i32, reply: ReplyCreate) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut mount = self.mount.lock().unwrap();
        let parent_handle = Mount::from_fuse_ino(parent);
        let result: Result<(FileAttr, u64), AndromedaError> = self.runtime.block_on(async {
            let handle = mount.create_file(parent_handle, name).await?;
            let attr = mount.attr_for(handle).await?;
            Ok((attr, handle.0))
        });
        match result {
            Ok((attr, handle_id)) => {
                let handle = ItemHandle(handle_id);
                let scope = mount.lock_manager.lock_scope(handle);
                let fh = mount.next_fh;
                mount.next_fh += 1;
                mount.open_handles.insert(fh, (handle, scope));
                reply.created(&TTL, &attr, 0, fh, 0);
            }
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut mount = self.mount.lock().unwrap();
        let parent_handle = Mount::from_fuse_ino(parent);
        let result: Result<FileAttr, AndromedaError> = self.runtime.block_on(async {
            let handle = mount.create_folder(parent_handle, name).await?;
            mount.attr_for(handle).await
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut mount = self.mount.lock().unwrap();
        let parent_handle = Mount::from_fuse_ino(parent);
        match self.runtime.block_on(mount.remove_item(parent_handle, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let mut mount = self.mount.lock().unwrap();
        let parent_handle = Mount::from_fuse_ino(parent);
        match self.runtime.block_on(mount.remove_item(parent_handle, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_err(e)),
        }
    }

    fn rename(&mut self, _req: &Request, parent: u64, name: &OsStr, new_parent: u64, new_name: &OsStr, flags: u32, reply: ReplyEmpty) {
        let (Some(name), Some(new_name)) = (name.to_str(), new_name.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        // POSIX rename(2) replaces an existing destination by default;
        // RENAME_NOREPLACE is the kernel's opt-out of that.
        let overwrite = flags & (libc::RENAME_NOREPLACE as u32) == 0;
        let mut mount = self.mount.lock().unwrap();
        let old_parent = Mount::from_fuse_ino(parent);
        let new_parent = Mount::from_fuse_ino(new_parent);
        match self.runtime.block_on(mount.rename(old_parent, name, new_parent, new_name, overwrite)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(reply_err(e)),
        }
    }
}

fn main() {
    let mut options = Options::parse();

    if let Some(config_path) = options.config_file.clone() {
        match load_file_options(&config_path) {
            Ok(file_options) => merge_file_options(&mut options, file_options),
            Err(e) => {
                eprintln!("failed to load config file: {e}");
                std::process::exit(1);
            }
        }
    }

    debug::init(debug::Level::from_numeric(options.debug_level));

    let Some(mountpoint) = options.mount.clone() else {
        eprintln!("a mount point is required (-m/--mount)");
        std::process::exit(2);
    };

    let runtime = Arc::new(tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to start the async runtime"));

    let mount = match runtime.block_on(Mount::new(options.clone())) {
        Ok(mount) => mount,
        Err(e) => {
            eprintln!("mount setup failed: {e}");
            std::process::exit(1);
        }
    };

    let mut mount_options = vec![MountOption::FSName("andromeda".to_string())];
    if options.read_only {
        mount_options.push(MountOption::RO);
    }
    for raw in &options.bridge_options {
        mount_options.push(MountOption::CUSTOM(raw.clone()));
    }

    let wrapper = FsWrapper {
        mount: Arc::new(Mutex::new(mount)),
        runtime,
    };

    if let Err(e) = fuser::mount2(wrapper, &mountpoint, &mount_options) {
        eprintln!("failed to mount filesystem: {e}");
        std::process::exit(1);
    }
}

fn merge_file_options(options: &mut Options, file: FileOptions) {
    // CLI flags always win; a file-provided value only fills in a gap left
    // at its CLI default.
    if options.api_url.is_none() {
        options.api_url = file.api_url;
    }
    if options.api_path.is_none() {
        options.api_path = file.api_path;
    }
    if options.username.is_none() {
        options.username = file.username;
    }
    if options.mount.is_none() {
        options.mount = file.mount;
    }
    if let Some(v) = file.debug_level {
        if options.debug_level == 0 {
            options.debug_level = v;
        }
    }
    if let Some(v) = file.page_size {
        options.page_size = v;
    }
    if let Some(v) = file.dir_refresh_secs {
        options.dir_refresh_secs = v;
    }
    if let Some(v) = file.cache_mode {
        options.cache_mode = v;
    }
    if let Some(v) = file.backend_runners {
        options.backend_runners = v;
    }
    if let Some(v) = file.max_retries {
        options.max_retries = v;
    }
    if let Some(v) = file.retry_time_secs {
        options.retry_time_secs = v;
    }
}
