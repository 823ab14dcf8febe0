// Sector buffer: a write-back cache of one aligned window of the wrapped
// stream. Small FAT and directory updates land here and reach the device in
// whole sectors.

use crate::force_io::{force_read, force_write};
use crate::stream::{Stream, StreamKind};
use fatkit_core::{DosConvert, FatError, Result};
use log::{trace, warn};
use std::rc::Rc;

pub struct BufferFilter {
    next: Box<dyn Stream>,
    cache: Vec<u8>,
    /// Device offset of `cache[0]`, `None` when nothing is loaded.
    window: Option<u64>,
    /// Bytes of the window backed by the device or written by us.
    valid: usize,
    /// Dirty byte range inside the window.
    dirty: Option<(usize, usize)>,
}

impl BufferFilter {
    /// `cache_size` is rounded up to a whole number of sectors.
    pub fn new(next: Box<dyn Stream>, cache_size: usize, sector_size: usize) -> Result<Self> {
        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(FatError::InvalidInput(format!("bad sector size {}", sector_size)));
        }
        let sectors = ((cache_size + sector_size - 1) / sector_size).max(1);
        Ok(Self {
            next,
            cache: vec![0; sectors * sector_size],
            window: None,
            valid: 0,
            dirty: None,
        })
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    fn write_back(&mut self) -> Result<()> {
        let (Some(window), Some((lo, hi))) = (self.window, self.dirty) else {
            return Ok(());
        };
        trace!("Writing back {} bytes at {:#x}", hi - lo, window + lo as u64);
        let written = force_write(self.next.as_mut(), &self.cache[lo..hi], window + lo as u64)?;
        if written < hi - lo {
            return Err(FatError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write back: {} of {} bytes", written, hi - lo),
            )));
        }
        self.dirty = None;
        Ok(())
    }

    /// Make the window holding `offset` current. With `overwrite` the caller
    /// replaces the whole window, so nothing is read.
    fn load(&mut self, offset: u64, overwrite: bool) -> Result<usize> {
        let size = self.cache.len() as u64;
        let window = offset - offset % size;
        if self.window != Some(window) {
            self.write_back()?;
            self.window = None;
            if overwrite {
                self.valid = 0;
            } else {
                trace!("Loading buffer window at {:#x}", window);
                self.cache.fill(0);
                self.valid = force_read(self.next.as_mut(), &mut self.cache, window)?;
            }
            self.window = Some(window);
        }
        Ok((offset - window) as usize)
    }
}

impl Stream for BufferFilter {
    fn kind(&self) -> StreamKind {
        StreamKind::Buffer
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let at = self.load(offset, false)?;
        if at >= self.valid {
            return Ok(0);
        }
        let n = buf.len().min(self.valid - at);
        buf[..n].copy_from_slice(&self.cache[at..at + n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.cache.len();
        let whole = offset % size as u64 == 0 && buf.len() >= size;
        let at = self.load(offset, whole)?;
        let n = buf.len().min(size - at);
        self.cache[at..at + n].copy_from_slice(&buf[..n]);
        self.valid = self.valid.max(at + n);
        self.dirty = Some(match self.dirty {
            Some((lo, hi)) => (lo.min(at), hi.max(at + n)),
            None => (at, at + n),
        });
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.write_back()?;
        self.next.flush()
    }

    fn discard(&mut self) -> Result<()> {
        self.write_back()?;
        self.window = None;
        self.valid = 0;
        self.next.discard()
    }

    fn dos_convert(&self) -> Option<Rc<dyn DosConvert>> {
        self.next.dos_convert()
    }

    fn next(&self) -> Option<&dyn Stream> {
        Some(self.next.as_ref())
    }

    fn next_mut(&mut self) -> Option<&mut dyn Stream> {
        Some(self.next.as_mut())
    }
}

impl Drop for BufferFilter {
    fn drop(&mut self) {
        if let Err(e) = self.write_back() {
            warn!("Lost buffered data on close: {}", e);
        }
    }
}
