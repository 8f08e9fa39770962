// src/engine/io.rs
//
// Upload sources: in-memory bytes or a memory-mapped file.

use crate::engine::common::EngineResult;
use crate::error::LayeredImageError;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Raw bytes of an uploaded image.
#[derive(Clone, Debug)]
pub enum Source {
    /// In-memory image data.
    Memory(Arc<Vec<u8>>),
    /// Memory-mapped file (zero-copy access).
    Mapped(Arc<Mmap>),
}

impl Source {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Source::Memory(Arc::new(bytes.into()))
    }

    /// Map a file read-only. Empty files are read as an empty buffer since
    /// they cannot be mapped on every platform.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let display = path.to_string_lossy().to_string();
        let file = File::open(path)
            .map_err(|e| LayeredImageError::file_read_failed(display.clone(), e))?;
        let len = file
            .metadata()
            .map_err(|e| LayeredImageError::file_read_failed(display.clone(), e))?
            .len();
        if len == 0 {
            return Ok(Source::Memory(Arc::new(Vec::new())));
        }
        // SAFETY: the map is read-only and only lives as long as the decode
        // of this upload; concurrent truncation by another process is not
        // supported.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| LayeredImageError::mmap_failed(display, e))?;
        Ok(Source::Mapped(Arc::new(mmap)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Memory(data) => data.as_slice(),
            Source::Mapped(mmap) => mmap.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Display name for a path upload: the final component, lossily decoded.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
