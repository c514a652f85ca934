//! In-memory page cache for one file's contents.
//!
//! Grounded in
//! `original_source/src/lib/andromeda/filesystem/filedata/PageManager.cpp`
//! (bulk read/write path) and the page-eviction discipline described
//! alongside it. Concurrency control is reworked for Rust: the original's
//! per-file mutex plus condition variable becomes a [`tokio::sync::Mutex`]
//! guarding the resident page map plus a per-page [`tokio::sync::Notify`]
//! so that two overlapping reads for a page currently being fetched await
//! the same fetch instead of issuing two.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::{Mutex, Notify};

use crate::error::AndromedaError;
use crate::filedata::page::Page;
use crate::filedata::page_backend::{FileBackendRef, PageBackend};

/// Read-ahead tuning, sourced from the `--read-ahead`/
/// `--read-max-cache-frac`/`--read-ahead-buffer` CLI flags
/// (`original_source/andromeda/ConfigOptions.hpp`'s `readAheadTime`/
/// `readMaxCacheFrac`/`readAheadBuffer`). The original converts
/// `read_ahead_time` into a page count via live bandwidth measurement; that
/// measurement isn't reproduced here; `read_ahead_time` instead bounds how
/// long a single read-ahead fetch is awaited before giving up on the rest
/// of the buffer for this read.
#[derive(Debug, Clone, Copy)]
pub struct ReadAheadConfig {
    /// Pages past the one just read to try to pre-populate.
    pub buffer_pages: u64,
    /// Per-page deadline for a read-ahead fetch.
    pub max_wait: Duration,
    /// Caps the read-ahead to `buffer_pages / max_cache_frac` pages (at
    /// least one), so a single read can't flood the cache with pages
    /// nothing has asked for yet.
    pub max_cache_frac: u64,
}

impl Default for ReadAheadConfig {
    fn default() -> Self {
        Self {
            buffer_pages: 2,
            max_wait: Duration::from_millis(1000),
            max_cache_frac: 4,
        }
    }
}

impl ReadAheadConfig {
    /// Disables read-ahead entirely.
    pub fn disabled() -> Self {
        Self {
            buffer_pages: 0,
            ..Self::default()
        }
    }

    fn pages_to_try(&self) -> u64 {
        (self.buffer_pages / self.max_cache_frac.max(1)).max(if self.buffer_pages == 0 { 0 } else { 1 })
    }
}

struct Inner {
    pages: BTreeMap<u64, Page>,
    in_flight: HashMap<u64, Arc<Notify>>,
    local_size: u64,
    /// Recency order for eviction, kept separate from `pages` so the latter
    /// stays a `BTreeMap` ordered by page index (needed to find contiguous
    /// dirty runs in `flush`). Touched on every access; consulted, not
    /// iterated by hand, in `evict_clean`.
    recency: LruCache<u64, ()>,
}

impl Inner {
    fn touch(&mut self, idx: u64) {
        self.recency.put(idx, ());
    }

    fn forget(&mut self, idx: u64) {
        self.recency.pop(&idx);
    }
}

/// The resident page set for one file, plus enough bookkeeping to fetch
/// missing pages and flush dirty ones through a [`PageBackend`].
pub struct PageCache {
    page_size: u64,
    read_ahead: ReadAheadConfig,
    inner: Mutex<Inner>,
}

impl PageCache {
    pub fn new(page_size: u64, initial_size: u64) -> Self {
        Self::with_read_ahead(page_size, initial_size, ReadAheadConfig::default())
    }

    pub fn with_read_ahead(page_size: u64, initial_size: u64, read_ahead: ReadAheadConfig) -> Self {
        Self {
            page_size,
            read_ahead,
            inner: Mutex::new(Inner {
                pages: BTreeMap::new(),
                in_flight: HashMap::new(),
                local_size: initial_size,
                recency: LruCache::unbounded(),
            }),
        }
    }

    pub async fn size(&self) -> u64 {
        self.inner.lock().await.local_size
    }

    pub async fn has_dirty(&self) -> bool {
        self.inner.lock().await.pages.values().any(Page::is_dirty)
    }

    fn page_len_at(&self, idx: u64, local_size: u64) -> usize {
        let start = idx * self.page_size;
        if start >= local_size {
            0
        } else {
            std::cmp::min(self.page_size, local_size - start) as usize
        }
    }

    /// Ensures page `idx` is resident, fetching it from the backend if
    /// necessary. If a fetch for the same page is already underway, waits
    /// on that fetch instead of starting a second one — this is what makes
    /// two overlapping concurrent reads of a missing page cost one backend
    /// call rather than two.
    async fn ensure_resident(&self, pb: &PageBackend, file_id: &str, backend_size: u64, idx: u64) -> Result<(), AndromedaError> {
        loop {
            enum Next {
                Ready,
                WaitFor(Arc<Notify>),
                Fetch(Arc<Notify>),
            }
            let next = {
                let mut inner = self.inner.lock().await;
                if inner.pages.contains_key(&idx) {
                    Next::Ready
                } else if let Some(notify) = inner.in_flight.get(&idx) {
                    Next::WaitFor(notify.clone())
                } else {
                    let notify = Arc::new(Notify::new());
                    inner.in_flight.insert(idx, notify.clone());
                    Next::Fetch(notify)
                }
            };

            match next {
                Next::Ready => return Ok(()),
                Next::WaitFor(notify) => {
                    notify.notified().await;
                    continue;
                }
                Next::Fetch(notify) => {
                    let mut fetched: Vec<(u64, Page)> = Vec::new();
                    let result = pb.fetch_pages(file_id, backend_size, idx, 1, |i, p| fetched.push((i, p))).await;

                    let mut inner = self.inner.lock().await;
                    inner.in_flight.remove(&idx);
                    match result {
                        Ok(_) => {
                            for (i, p) in fetched {
                                inner.pages.insert(i, p);
                                inner.touch(i);
                            }
                            let local_size = inner.local_size;
                            inner.pages.entry(idx).or_insert_with(|| Page::zeroed(self.page_len_at(idx, local_size)));
                            inner.touch(idx);
                            notify.notify_waiters();
                            return Ok(());
                        }
                        Err(e) => {
                            notify.notify_waiters();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Reads `length` bytes starting at `offset`, clamped to the file's
    /// current local size. Missing pages are fetched from the backend;
    /// pages entirely past `backend_size` (local-only, unflushed growth)
    /// are synthesized as zero without a backend round trip.
    pub async fn read(&self, pb: &PageBackend, file_id: &str, backend_size: u64, offset: u64, length: u64) -> Result<Vec<u8>, AndromedaError> {
        let local_size = self.inner.lock().await.local_size;
        if offset >= local_size || length == 0 {
            return Ok(Vec::new());
        }
        let length = length.min(local_size - offset);
        let end = offset + length;
        let start_idx = offset / self.page_size;
        let end_idx = (end - 1) / self.page_size;

        let mut out = Vec::with_capacity(length as usize);
        for idx in start_idx..=end_idx {
            if idx * self.page_size < backend_size {
                self.ensure_resident(pb, file_id, backend_size, idx).await?;
            }

            let mut inner = self.inner.lock().await;
            let page_len = self.page_len_at(idx, inner.local_size);
            inner.pages.entry(idx).or_insert_with(|| Page::zeroed(page_len)).touch();
            inner.touch(idx);
            let page = inner.pages.get(&idx).expect("just inserted or already present");

            let page_offset = idx * self.page_size;
            let in_page_start = (offset.max(page_offset) - page_offset) as usize;
            let in_page_end = (end.min(page_offset + self.page_size) - page_offset) as usize;
            let data = page.data();
            let hi = in_page_end.min(data.len());
            if in_page_start < hi {
                out.extend_from_slice(&data[in_page_start..hi]);
            }
            // Any shortfall (page shorter than the file's recorded size
            // implies a bug upstream) is left unfilled rather than padded,
            // so callers see a short read instead of silently-wrong zeros.
        }
        self.schedule_read_ahead(pb, file_id, backend_size, end_idx).await;
        Ok(out)
    }

    /// Best-effort pre-fetch of the pages just past the one a read just
    /// finished at, up to `ReadAheadConfig::pages_to_try`. Stops at the
    /// first page already resident, past `backend_size`, or that blows the
    /// per-page wait budget — a slow backend degrades read-ahead to a
    /// no-op rather than stalling the read that triggered it.
    async fn schedule_read_ahead(&self, pb: &PageBackend, file_id: &str, backend_size: u64, from_idx: u64) {
        let ahead = self.read_ahead.pages_to_try();
        for step in 1..=ahead {
            let idx = from_idx + step;
            if idx * self.page_size >= backend_size {
                break;
            }
            {
                let inner = self.inner.lock().await;
                if inner.pages.contains_key(&idx) {
                    continue;
                }
            }
            let fetch = self.ensure_resident(pb, file_id, backend_size, idx);
            match tokio::time::timeout(self.read_ahead.max_wait, fetch).await {
                Ok(Ok(())) => {}
                // Timed out, or the backend errored outright: stop trying
                // further pages rather than let a struggling backend turn
                // read-ahead into unbounded retries.
                _ => break,
            }
        }
    }

    /// Writes `data` at `offset`, growing the file's local size if the
    /// write extends past it. Pages only partially covered by the write
    /// are read-modify-written: the existing page content is fetched first
    /// (unless it lies entirely past `backend_size`, in which case it is
    /// zero by definition).
    pub async fn write(&self, pb: &PageBackend, file_id: &str, backend_size: u64, offset: u64, data: &[u8]) -> Result<usize, AndromedaError> {
        if data.is_empty() {
            return Ok(0);
        }
        let end = offset + data.len() as u64;
        {
            let mut inner = self.inner.lock().await;
            if end > inner.local_size {
                inner.local_size = end;
            }
        }

        let start_idx = offset / self.page_size;
        let end_idx = (end - 1) / self.page_size;

        for idx in start_idx..=end_idx {
            let page_offset = idx * self.page_size;
            let in_page_start = (offset.max(page_offset) - page_offset) as u64;
            let in_page_end = (end.min(page_offset + self.page_size) - page_offset) as u64;
            let fully_covers = in_page_start == 0 && in_page_end == self.page_size;

            if !fully_covers && page_offset < backend_size {
                self.ensure_resident(pb, file_id, backend_size, idx).await?;
            }

            let mut inner = self.inner.lock().await;
            let local_size = inner.local_size;
            let page_len = self.page_len_at(idx, local_size);
            let page = inner.pages.entry(idx).or_insert_with(|| Page::zeroed(page_len));
            if (page.size() as u64) < in_page_end {
                page.resize(in_page_end as usize);
            }
            let src_start = (page_offset + in_page_start - offset) as usize;
            let lo = in_page_start as usize;
            let hi = in_page_end as usize;
            page.data_mut()[lo..hi].copy_from_slice(&data[src_start..src_start + (hi - lo)]);
            page.mark_dirty();
            inner.touch(idx);
        }
        Ok(data.len())
    }

    /// Flushes contiguous runs of dirty pages to the backend in ascending
    /// order. If a run fails to flush, that run and every later run stay
    /// dirty (untouched) so the next flush retries them; earlier runs that
    /// already succeeded stay flushed.
    pub async fn flush(&self, file_ref: &mut FileBackendRef<'_>, pb: &PageBackend) -> Result<(), AndromedaError> {
        let dirty_indices: Vec<u64> = {
            let inner = self.inner.lock().await;
            inner.pages.iter().filter(|(_, p)| p.is_dirty()).map(|(i, _)| *i).collect()
        };
        if dirty_indices.is_empty() {
            return Ok(());
        }

        let mut runs: Vec<Vec<u64>> = Vec::new();
        for idx in dirty_indices {
            match runs.last_mut() {
                Some(run) if *run.last().expect("run is never empty") + 1 == idx => run.push(idx),
                _ => runs.push(vec![idx]),
            }
        }

        for run in runs {
            let mut inner = self.inner.lock().await;
            let pages: Vec<&Page> = run.iter().map(|i| inner.pages.get(i).expect("dirty index was just listed")).collect();
            let result = pb.flush_page_list(file_ref, run[0], &pages).await;
            match result {
                Ok(_) => {
                    for idx in &run {
                        if let Some(p) = inner.pages.get_mut(idx) {
                            p.mark_clean();
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Truncates the file to `new_size`, dropping pages entirely beyond it
    /// and shrinking the new last page in place.
    pub async fn truncate(&self, file_ref: &mut FileBackendRef<'_>, pb: &PageBackend, new_size: u64) -> Result<(), AndromedaError> {
        pb.truncate(file_ref, new_size).await?;

        let mut inner = self.inner.lock().await;
        inner.local_size = new_size;
        let dropped: Vec<u64> = inner.pages.keys().copied().filter(|&idx| idx * self.page_size >= new_size).collect();
        inner.pages.retain(|&idx, _| idx * self.page_size < new_size);
        for idx in dropped {
            inner.forget(idx);
        }
        if new_size > 0 {
            let last_idx = (new_size - 1) / self.page_size;
            let new_len = self.page_len_at(last_idx, new_size);
            if let Some(page) = inner.pages.get_mut(&last_idx) {
                if page.size() != new_len {
                    page.resize(new_len);
                }
            }
        }
        Ok(())
    }

    /// Evicts clean (non-dirty) pages, least-recently-accessed first, until
    /// at most `max_resident_pages` remain. Dirty pages are never evicted;
    /// if every resident page is dirty this is a no-op. Victim order comes
    /// from `recency`, not from re-deriving it off `Page::accessed_at` each
    /// call.
    pub async fn evict_clean(&self, max_resident_pages: usize) {
        let mut inner = self.inner.lock().await;
        if inner.pages.len() <= max_resident_pages {
            return;
        }
        let to_remove = inner.pages.len() - max_resident_pages;
        let victims: Vec<u64> = inner.recency.iter().rev().map(|(idx, _)| *idx).filter(|idx| !inner.pages[idx].is_dirty()).take(to_remove).collect();

        for idx in victims {
            inner.pages.remove(&idx);
            inner.forget(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSession;
    use crate::config::CacheMode;
    use crate::runner::{Input, Runner};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn page_backend(runner: Arc<dyn Runner>, page_size: u64) -> PageBackend {
        let backend = Arc::new(BackendSession::new(runner, "app", CacheMode::Normal));
        PageBackend::new(backend, Arc::new(Semaphore::new(4)), page_size)
    }

    struct NoCallRunner;
    #[async_trait]
    impl Runner for NoCallRunner {
        async fn run(&self, _input: Input) -> Result<Vec<u8>, crate::error::TransportError> {
            panic!("backend should not be called for a brand new file");
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trip_on_new_file() {
        let pb = page_backend(Arc::new(NoCallRunner), 4);
        let cache = PageCache::new(4, 0);

        cache.write(&pb, "f", 0, 0, b"hello world").await.unwrap();
        let read_back = cache.read(&pb, "f", 0, 0, 11).await.unwrap();
        assert_eq!(read_back, b"hello world");
    }

    struct FixedBodyRunner {
        body: Vec<u8>,
    }
    #[async_trait]
    impl Runner for FixedBodyRunner {
        async fn run(&self, _input: Input) -> Result<Vec<u8>, crate::error::TransportError> {
            Ok(self.body.clone())
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    #[tokio::test]
    async fn partial_page_write_preserves_existing_tail_bytes() {
        // Backend already holds 8 bytes: "AAAABBBB", page_size 4.
        let pb = page_backend(Arc::new(FixedBodyRunner { body: b"BBBB".to_vec() }), 4);
        let cache = PageCache::new(4, 8);

        // Overwrite only the first byte of the second page.
        cache.write(&pb, "f", 8, 4, b"X").await.unwrap();
        let result = cache.read(&pb, "f", 8, 4, 4).await.unwrap();
        assert_eq!(result, b"XBBB");
    }

    struct CountingRunner {
        calls: AtomicUsize,
        body: Vec<u8>,
    }
    #[async_trait]
    impl Runner for CountingRunner {
        async fn run(&self, _input: Input) -> Result<Vec<u8>, crate::error::TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            Ok(self.body.clone())
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    #[tokio::test]
    async fn concurrent_reads_of_same_missing_page_collapse_into_one_fetch() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            body: b"abcd".to_vec(),
        });
        let pb = page_backend(runner.clone(), 4);
        let cache = PageCache::new(4, 4);

        let (a, b) = tokio::join!(cache.read(&pb, "f", 4, 0, 2), cache.read(&pb, "f", 4, 2, 2));
        assert_eq!(a.unwrap(), b"ab");
        assert_eq!(b.unwrap(), b"cd");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_ahead_prefetches_the_next_page_eagerly() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            body: b"aaaa".to_vec(),
        });
        let pb = page_backend(runner.clone(), 4);
        let cache = PageCache::new(4, 16);

        let data = cache.read(&pb, "f", 16, 0, 2).await.unwrap();
        assert_eq!(data, b"aa");
        // One fetch for the requested page, one more for the page
        // read-ahead pre-populates before the next read asks for it.
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_read_ahead_fetches_only_the_requested_page() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            body: b"aaaa".to_vec(),
        });
        let pb = page_backend(runner.clone(), 4);
        let cache = PageCache::with_read_ahead(4, 16, ReadAheadConfig::disabled());

        cache.read(&pb, "f", 16, 0, 2).await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evict_clean_drops_least_recently_touched_page_first() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            body: b"BBBB".to_vec(),
        });
        let pb = page_backend(runner.clone(), 4);
        let cache = PageCache::with_read_ahead(4, 0, ReadAheadConfig::disabled());
        cache.write(&pb, "f", 0, 0, b"AAAABBBBCCCC").await.unwrap(); // pages 0,1,2

        // Flush so all three pages are clean (eviction candidates).
        let mut dummy = (None::<String>, String::new(), String::new(), false, 0u64);
        let mut file_ref = FileBackendRef {
            id: &mut dummy.0,
            parent_id: &dummy.1,
            name: &dummy.2,
            backend_exists: &mut dummy.3,
            backend_size: &mut dummy.4,
        };
        cache.flush(&mut file_ref, &pb).await.unwrap();
        let calls_after_flush = runner.calls.load(Ordering::SeqCst);

        // Re-touch page 0 so page 1 becomes the least recently used.
        cache.read(&pb, "f", 12, 0, 4).await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls_after_flush);

        cache.evict_clean(2).await;

        // Page 0 is still resident: re-reading it triggers no backend call.
        cache.read(&pb, "f", 12, 0, 4).await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls_after_flush);

        // Page 1 was evicted: reading it again needs a fresh fetch.
        cache.read(&pb, "f", 12, 4, 4).await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), calls_after_flush + 1);
    }

    #[tokio::test]
    async fn evict_clean_never_drops_dirty_pages() {
        let pb = page_backend(Arc::new(NoCallRunner), 4);
        let cache = PageCache::with_read_ahead(4, 0, ReadAheadConfig::disabled());
        cache.write(&pb, "f", 0, 0, b"AAAABBBB").await.unwrap();

        cache.evict_clean(0).await;
        // Both pages are dirty (never flushed), so eviction is a no-op.
        assert_eq!(cache.read(&pb, "f", 0, 0, 8).await.unwrap(), b"AAAABBBB");
    }

    #[tokio::test]
    async fn truncate_drops_pages_past_new_size_and_shrinks_last_page() {
        let pb = page_backend(Arc::new(NoCallRunner), 4);
        let cache = PageCache::new(4, 0);
        cache.write(&pb, "f", 0, 0, b"0123456789").await.unwrap();

        let mut dummy = (None::<String>, String::new(), String::new(), false, 0u64);
        let mut file_ref = FileBackendRef {
            id: &mut dummy.0,
            parent_id: &dummy.1,
            name: &dummy.2,
            backend_exists: &mut dummy.3,
            backend_size: &mut dummy.4,
        };
        cache.truncate(&mut file_ref, &pb, 5).await.unwrap();

        assert_eq!(cache.size().await, 5);
        let result = cache.read(&pb, "f", 0, 0, 5).await.unwrap();
        assert_eq!(result, b"01234");
    }
}
