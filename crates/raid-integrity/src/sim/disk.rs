use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

#[derive(Debug)]
pub struct PvImage {
    path: PathBuf,
    _file: File,
    map: MmapMut,
    len: u64,
}

impl PvImage {
    /// `open_prealloc` opens (creating if needed) an image of exactly `len` bytes.
    ///
    /// # Errors
    /// Returns an error if the image cannot be created/opened or mapped.
    pub fn open_prealloc(path: &Path, len: u64) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(len)?;

        let map_len = usize::try_from(len)
            .map_err(|_| anyhow::anyhow!("image length {len} exceeds addressable size"))?;
        // SAFETY: the file is owned by this value for the lifetime of the mapping.
        let map = unsafe { MmapOptions::new().len(map_len).map_mut(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
            map,
            len,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> usize {
        let Some((start, end)) = self.clamp(off, buf.len()) else {
            return 0;
        };
        let src = &self.map[start..end];
        buf[..src.len()].copy_from_slice(src);
        src.len()
    }

    pub fn write_at(&mut self, off: u64, data: &[u8]) -> usize {
        let Some((start, end)) = self.clamp(off, data.len()) else {
            return 0;
        };
        let dst = &mut self.map[start..end];
        let n = dst.len();
        dst.copy_from_slice(&data[..n]);
        n
    }

    /// `zero_range` clears `len` bytes at `off` and flushes them. Returns the bytes cleared.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn zero_range(&mut self, off: u64, len: usize) -> anyhow::Result<usize> {
        let Some((start, end)) = self.clamp(off, len) else {
            return Ok(0);
        };
        self.map[start..end].fill(0);
        self.map.flush_range(start, end - start)?;
        Ok(end - start)
    }

    fn clamp(&self, off: u64, len: usize) -> Option<(usize, usize)> {
        let off = usize::try_from(off).ok()?;
        let image_len = usize::try_from(self.len).ok()?;
        if off >= image_len {
            return None;
        }
        Some((off, off.saturating_add(len).min(image_len)))
    }
}
