//! A file item: backend identity plus a [`PageCache`] of its contents.
//!
//! Grounded in `original_source/andromeda/filesystem/File.{hpp,cpp}`: the
//! `pageSize`/`backendSize`/`deleted` fields carry over directly, while the
//! `PageMap`/`GetPage`/`ReadPage`/`WritePage` machinery moves out into
//! [`crate::filedata::page_cache::PageCache`] so it can be unit-tested apart
//! from the tree.

use std::sync::Arc;

use serde_json::Value;

use crate::backend::BackendSession;
use crate::config::WriteMode;
use crate::error::{AndromedaError, FsError, ProtocolError};
use crate::filedata::{FileBackendRef, PageBackend, PageCache, ReadAheadConfig};
use crate::item::ItemHandle;

pub struct File {
    parent: ItemHandle,
    name: String,
    id: Option<String>,
    backend_exists: bool,
    backend_size: u64,
    cache: Arc<PageCache>,
    deleted: bool,
}

/// A cheap, cloneable snapshot of the fields a read or write actually
/// needs: the page cache (already internally synchronized, design
/// §5/`PageCache`) plus the backend id and last-known size. Lets a host
/// bridge release its own tree-wide lock before awaiting the I/O itself,
/// so two reads against different files (or the same file — `PageCache`
/// serializes those on its own) aren't serialized against each other.
#[derive(Clone)]
pub struct FileIoHandle {
    id: Option<String>,
    backend_exists: bool,
    backend_size: u64,
    cache: Arc<PageCache>,
}

impl FileIoHandle {
    pub async fn read(&self, pb: &PageBackend, offset: u64, length: u64) -> Result<Vec<u8>, AndromedaError> {
        let Some(id) = self.id.as_deref() else {
            return Ok(Vec::new());
        };
        self.cache.read(pb, id, self.backend_size, offset, length).await
    }

    pub async fn write(&self, pb: &PageBackend, write_mode: WriteMode, offset: u64, data: &[u8]) -> Result<usize, AndromedaError> {
        if data.is_empty() {
            return Ok(0);
        }
        match write_mode {
            WriteMode::None if self.backend_exists => return Err(AndromedaError::Fs(FsError::WriteType)),
            WriteMode::Append => {
                let current = self.cache.size().await.max(self.backend_size);
                if offset != current {
                    return Err(AndromedaError::Fs(FsError::WriteType));
                }
            }
            _ => {}
        }

        let id = self.id.clone().unwrap_or_default();
        self.cache.write(pb, &id, self.backend_size, offset, data).await
    }
}

impl File {
    /// Builds a file that exists only locally (just created, not yet
    /// flushed to the backend).
    pub fn new_local(parent: ItemHandle, name: String, page_size: u64) -> Self {
        Self::new_local_with_read_ahead(parent, name, page_size, ReadAheadConfig::default())
    }

    pub fn new_local_with_read_ahead(parent: ItemHandle, name: String, page_size: u64, read_ahead: ReadAheadConfig) -> Self {
        Self {
            parent,
            name,
            id: None,
            backend_exists: false,
            backend_size: 0,
            cache: Arc::new(PageCache::with_read_ahead(page_size, 0, read_ahead)),
            deleted: false,
        }
    }

    /// Builds a file from a backend-provided JSON record (a `getfolder`
    /// listing entry or a `createfile`/`uploadfile` response).
    pub fn from_backend(parent: ItemHandle, data: &Value, page_size: u64) -> Result<Self, AndromedaError> {
        Self::from_backend_with_read_ahead(parent, data, page_size, ReadAheadConfig::default())
    }

    /// As [`Self::from_backend`], with explicit read-ahead tuning (threaded
    /// down from the CLI's `--read-ahead`/`--read-max-cache-frac`/
    /// `--read-ahead-buffer` flags).
    pub fn from_backend_with_read_ahead(parent: ItemHandle, data: &Value, page_size: u64, read_ahead: ReadAheadConfig) -> Result<Self, AndromedaError> {
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
        let size = data.get("size").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(Self {
            parent,
            name,
            id: Some(id),
            backend_exists: true,
            backend_size: size,
            cache: Arc::new(PageCache::with_read_ahead(page_size, size, read_ahead)),
            deleted: false,
        })
    }

    /// A cloneable handle to this file's page cache plus the metadata a
    /// read or write needs, usable after releasing whatever lock guards
    /// the arena this `File` lives in.
    pub fn io_handle(&self) -> FileIoHandle {
        FileIoHandle {
            id: self.id.clone(),
            backend_exists: self.backend_exists,
            backend_size: self.backend_size,
            cache: self.cache.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ItemHandle> {
        Some(self.parent)
    }

    pub fn backend_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn backend_exists(&self) -> bool {
        self.backend_exists
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// The file's current size: whichever is larger of the last known
    /// backend size and whatever local, possibly-unflushed writes have
    /// grown it to.
    pub async fn size(&self) -> u64 {
        self.cache.size().await.max(self.backend_size)
    }

    pub async fn has_unflushed_writes(&self) -> bool {
        self.cache.has_dirty().await
    }

    /// Applies an updated listing record over this file's metadata, as
    /// `SyncContents` does for existing children: refresh timestamps/size
    /// without disturbing the resident page cache.
    pub fn refresh(&mut self, data: &Value) -> Result<(), AndromedaError> {
        if let Some(size) = data.get("size").and_then(|v| v.as_u64()) {
            self.backend_size = size;
        }
        Ok(())
    }

    pub async fn read(&self, pb: &PageBackend, offset: u64, length: u64) -> Result<Vec<u8>, AndromedaError> {
        self.io_handle().read(pb, offset, length).await
    }

    /// Writes `data` at `offset`, enforcing the filesystem's write mode
    /// (`FSConfig::write_mode`, design §3/§4.2's `FSConfig` derivation).
    pub async fn write(&mut self, pb: &PageBackend, write_mode: WriteMode, offset: u64, data: &[u8]) -> Result<usize, AndromedaError> {
        self.io_handle().write(pb, write_mode, offset, data).await
    }

    pub async fn truncate(&mut self, pb: &PageBackend, parent_id: &str, new_size: u64) -> Result<(), AndromedaError> {
        let mut file_ref = FileBackendRef {
            id: &mut self.id,
            parent_id,
            name: &self.name,
            backend_exists: &mut self.backend_exists,
            backend_size: &mut self.backend_size,
        };
        self.cache.truncate(&mut file_ref, pb, new_size).await
    }

    /// Flushes every dirty page to the backend. A brand new file with no
    /// dirty pages at all (e.g. created then immediately released with no
    /// writes) is still materialized as an empty backend file.
    pub async fn flush(&mut self, pb: &PageBackend, parent_id: &str) -> Result<(), AndromedaError> {
        let needs_create_only = !self.backend_exists && !self.cache.has_dirty().await;
        let mut file_ref = FileBackendRef {
            id: &mut self.id,
            parent_id,
            name: &self.name,
            backend_exists: &mut self.backend_exists,
            backend_size: &mut self.backend_size,
        };
        if needs_create_only {
            pb.flush_create(&mut file_ref).await
        } else {
            self.cache.flush(&mut file_ref, pb).await
        }
    }

    pub async fn delete(&mut self, backend: &BackendSession) -> Result<(), AndromedaError> {
        if let Some(id) = &self.id {
            match backend.delete_file(id).await {
                Ok(()) | Err(AndromedaError::Fs(FsError::NotFound)) => {}
                Err(e) => return Err(e),
            }
        }
        self.deleted = true;
        Ok(())
    }

    pub async fn rename(&mut self, backend: &BackendSession, new_name: &str, overwrite: bool) -> Result<(), AndromedaError> {
        if let Some(id) = &self.id {
            backend.rename_file(id, new_name, overwrite).await?;
        }
        self.name = new_name.to_string();
        Ok(())
    }

    pub async fn move_to(&mut self, backend: &BackendSession, new_parent: ItemHandle, new_parent_backend_id: &str, overwrite: bool) -> Result<(), AndromedaError> {
        if let Some(id) = &self.id {
            backend.move_file(id, new_parent_backend_id, overwrite).await?;
        }
        self.parent = new_parent;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSession;
    use crate::config::CacheMode;
    use crate::runner::{Input, Runner};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct NoCallRunner;
    #[async_trait]
    impl Runner for NoCallRunner {
        async fn run(&self, _input: Input) -> Result<Vec<u8>, crate::error::TransportError> {
            panic!("backend should not be called")
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn page_backend(page_size: u64) -> PageBackend {
        let backend = Arc::new(BackendSession::new(Arc::new(NoCallRunner), "app", CacheMode::Normal));
        PageBackend::new(backend, Arc::new(Semaphore::new(4)), page_size)
    }

    #[tokio::test]
    async fn new_local_file_write_then_read_round_trips() {
        let pb = page_backend(4);
        let mut file = File::new_local(ItemHandle(0), "new.txt".to_string(), 4);
        file.write(&pb, WriteMode::Random, 0, b"hello").await.unwrap();
        assert_eq!(file.read(&pb, 0, 5).await.unwrap(), b"hello");
        assert_eq!(file.size().await, 5);
        assert!(file.has_unflushed_writes().await);
    }

    #[tokio::test]
    async fn write_mode_none_rejects_overwrite_of_a_backend_file() {
        let pb = page_backend(4);
        let data = serde_json::json!({"id": "f1", "name": "a.txt", "size": 4});
        let mut file = File::from_backend(ItemHandle(0), &data, 4).unwrap();

        let err = file.write(&pb, WriteMode::None, 0, b"xx").await.unwrap_err();
        assert!(matches!(err, AndromedaError::Fs(FsError::WriteType)));
    }

    #[tokio::test]
    async fn write_mode_append_rejects_non_end_offset() {
        let pb = page_backend(4);
        let mut file = File::new_local(ItemHandle(0), "a.txt".to_string(), 4);
        file.write(&pb, WriteMode::Append, 0, b"abcd").await.unwrap();

        let err = file.write(&pb, WriteMode::Append, 0, b"x").await.unwrap_err();
        assert!(matches!(err, AndromedaError::Fs(FsError::WriteType)));

        // Writing exactly at the current end is allowed.
        file.write(&pb, WriteMode::Append, 4, b"e").await.unwrap();
        assert_eq!(file.size().await, 5);
    }

    #[tokio::test]
    async fn write_of_empty_data_is_a_no_op() {
        let pb = page_backend(4);
        let mut file = File::new_local(ItemHandle(0), "a.txt".to_string(), 4);
        let written = file.write(&pb, WriteMode::Random, 0, b"").await.unwrap();
        assert_eq!(written, 0);
        assert!(!file.has_unflushed_writes().await);
    }

    #[test]
    fn io_handle_snapshots_backend_identity() {
        let file = File::new_local(ItemHandle(0), "a.txt".to_string(), 4);
        let handle = file.io_handle();
        assert_eq!(handle.backend_exists, false);
        assert_eq!(handle.backend_size, 0);
    }
}
