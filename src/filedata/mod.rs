//! Cached file contents: pages, the resident-page cache, and the bridge to
//! the backend that fills and flushes it.

pub mod page;
pub mod page_backend;
pub mod page_cache;

pub use page::Page;
pub use page_backend::{FileBackendRef, PageBackend};
pub use page_cache::{PageCache, ReadAheadConfig};
