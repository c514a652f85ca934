//! Bridges the in-memory page cache to [`crate::backend::BackendSession`].
//!
//! Grounded in
//! `original_source/src/lib/andromeda/filesystem/filedata/PageBackend.cpp`.
//! The original holds a `File&` back-reference so it can read/update the
//! file's `backendExists`/`backendSize` fields directly; here that coupling
//! is replaced by [`FileBackendRef`], a short-lived borrow the caller (an
//! item's `File`) builds fresh for each call instead of a long-lived
//! reference stored inside `PageBackend` itself (design §9's arena-of-handles
//! redesign applies the same "no back-pointers" principle to this seam).

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::backend::BackendSession;
use crate::error::AndromedaError;
use crate::filedata::page::Page;

/// A short-lived, per-call view of the identity fields of a file that
/// [`PageBackend`] needs to read or mutate. Constructed by the caller
/// (typically `item::file::File::flush`/`read`) immediately before each
/// call and dropped immediately after.
pub struct FileBackendRef<'a> {
    pub id: &'a mut Option<String>,
    pub parent_id: &'a str,
    pub name: &'a str,
    pub backend_exists: &'a mut bool,
    pub backend_size: &'a mut u64,
}

/// Fetches pages from, and flushes pages to, the backend for one file,
/// gated by a shared semaphore so the number of concurrent in-flight backend
/// I/O operations across the whole mount is bounded (replaces the original's
/// `static Semaphor sBackendSem{4}` global with an explicitly owned and
/// passed-in one, per design §9).
pub struct PageBackend {
    backend: Arc<BackendSession>,
    io_limit: Arc<Semaphore>,
    page_size: u64,
}

impl PageBackend {
    pub fn new(backend: Arc<BackendSession>, io_limit: Arc<Semaphore>, page_size: u64) -> Self {
        Self { backend, io_limit, page_size }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Fetches `count` pages starting at `index` (each `page_size` bytes,
    /// except possibly the last, which may be short if it is the file's
    /// final page). Calls `handler` once per completed page with
    /// `(page_index, page_offset, page)`. Returns the number of pages
    /// produced.
    ///
    /// Mirrors `PageBackend::FetchPages`: computes the byte range spanning
    /// the requested pages, clamped to `backend_size`, issues one
    /// `ReadFile`, and reassembles the (possibly differently-chunked)
    /// response fragments into page-aligned buffers.
    pub async fn fetch_pages<H>(&self, file_id: &str, backend_size: u64, index: u64, count: u64, mut handler: H) -> Result<usize, AndromedaError>
    where
        H: FnMut(u64, Page),
    {
        if count == 0 || backend_size == 0 {
            return Ok(0);
        }
        let page_start = index * self.page_size;
        if page_start >= backend_size {
            return Ok(0);
        }
        let read_size = std::cmp::min(backend_size - page_start, self.page_size * count);

        let _permit = self.io_limit.acquire().await.expect("semaphore not closed");

        let page_size = self.page_size;
        let mut assembling: Vec<u8> = Vec::with_capacity(page_size as usize);
        let mut next_page_index = index;
        let mut pages_produced = 0usize;

        self.backend
            .read_file(file_id, page_start, read_size, |_fragment_offset, fragment| {
                let mut remaining = fragment;
                while !remaining.is_empty() {
                    let room = (page_size as usize).saturating_sub(assembling.len());
                    let take = room.min(remaining.len());
                    assembling.extend_from_slice(&remaining[..take]);
                    remaining = &remaining[take..];

                    let page_byte_start = next_page_index * page_size;
                    let is_last_byte_of_file = page_byte_start + assembling.len() as u64 >= backend_size;
                    let page_full = assembling.len() as u64 == page_size;

                    if page_full || (is_last_byte_of_file && remaining.is_empty()) {
                        let page = Page::from_bytes(std::mem::take(&mut assembling));
                        handler(next_page_index, page);
                        pages_produced += 1;
                        next_page_index += 1;
                    }
                }
            })
            .await?;

        if !assembling.is_empty() {
            let page = Page::from_bytes(assembling);
            handler(next_page_index, page);
            pages_produced += 1;
        }

        Ok(pages_produced)
    }

    /// Flushes a contiguous run of dirty pages starting at `index`.
    ///
    /// Mirrors `PageBackend::FlushPageList`'s three-way dispatch: a file
    /// with no backend presence yet either gets `UploadFile`d whole (if the
    /// run starts at page 0) or `CreateFile`d empty first so a subsequent
    /// non-zero-offset `WriteFile` has something to target; an existing
    /// file always goes straight to `WriteFile`.
    pub async fn flush_page_list(&self, file_ref: &mut FileBackendRef<'_>, index: u64, pages: &[&Page]) -> Result<u64, AndromedaError> {
        if pages.is_empty() {
            return Ok(0);
        }
        let write_start = index * self.page_size;
        let mut buffer = Vec::new();
        for page in pages {
            buffer.extend_from_slice(page.data());
        }
        let total_size = buffer.len() as u64;

        let _permit = self.io_limit.acquire().await.expect("semaphore not closed");

        if !*file_ref.backend_exists {
            if write_start == 0 {
                let result = self.backend.upload_file(file_ref.parent_id, file_ref.name, buffer).await?;
                if let Some(id) = result.get("id").and_then(|v| v.as_str()) {
                    *file_ref.id = Some(id.to_string());
                }
            } else {
                let created = self.backend.create_file(file_ref.parent_id, file_ref.name).await?;
                let id = created
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AndromedaError::Protocol(crate::error::ProtocolError::MissingField("id".to_string())))?
                    .to_string();
                *file_ref.id = Some(id.clone());
                self.backend.write_file(&id, write_start, buffer).await?;
            }
        } else {
            let id = file_ref.id.as_deref().expect("backend_exists implies id is set");
            self.backend.write_file(id, write_start, buffer).await?;
        }

        *file_ref.backend_exists = true;
        *file_ref.backend_size = (*file_ref.backend_size).max(write_start + total_size);
        Ok(total_size)
    }

    /// Forces an empty file to exist on the backend, used when a file is
    /// flushed (e.g. on release) with no dirty pages at all.
    pub async fn flush_create(&self, file_ref: &mut FileBackendRef<'_>) -> Result<(), AndromedaError> {
        if *file_ref.backend_exists {
            return Ok(());
        }
        let _permit = self.io_limit.acquire().await.expect("semaphore not closed");
        let created = self.backend.create_file(file_ref.parent_id, file_ref.name).await?;
        let id = created
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AndromedaError::Protocol(crate::error::ProtocolError::MissingField("id".to_string())))?
            .to_string();
        *file_ref.id = Some(id);
        *file_ref.backend_exists = true;
        Ok(())
    }

    /// Truncates the backend file to `new_size`. A no-op if the file does
    /// not exist on the backend yet (the local page cache alone tracks that
    /// case until the next flush).
    pub async fn truncate(&self, file_ref: &mut FileBackendRef<'_>, new_size: u64) -> Result<(), AndromedaError> {
        if !*file_ref.backend_exists {
            return Ok(());
        }
        let id = file_ref.id.as_deref().expect("backend_exists implies id is set");
        let _permit = self.io_limit.acquire().await.expect("semaphore not closed");
        self.backend.truncate_file(id, new_size).await?;
        *file_ref.backend_size = new_size;
        Ok(())
    }
}
