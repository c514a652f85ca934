//! A single fixed-size cached byte range of a file.

use std::time::Instant;

/// One page of file data: up to `page_size` bytes, a dirty flag, and an
/// access timestamp used for LRU eviction of clean pages.
#[derive(Debug)]
pub struct Page {
    data: Vec<u8>,
    dirty: bool,
    accessed_at: Instant,
}

impl Page {
    /// Builds a page of `size` zero bytes (used to extend a file past its
    /// last resident page without a backend fetch).
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
            dirty: false,
            accessed_at: Instant::now(),
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            dirty: false,
            accessed_at: Instant::now(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.touch();
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn touch(&mut self) {
        self.accessed_at = Instant::now();
    }

    pub fn accessed_at(&self) -> Instant {
        self.accessed_at
    }

    /// Resizes the page in place, zero-filling any new bytes. Used when a
    /// write or truncate extends the last page of a file.
    pub fn resize(&mut self, new_size: usize) {
        self.data.resize(new_size, 0);
    }
}
