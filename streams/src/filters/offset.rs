// Fixed byte offset into the wrapped stream, e.g. a filesystem that starts
// some way into an image.

use crate::stream::{Stream, StreamKind};
use fatkit_core::{DosConvert, FatError, Result};
use log::debug;
use std::rc::Rc;

pub struct OffsetFilter {
    next: Box<dyn Stream>,
    offset: u64,
}

impl OffsetFilter {
    /// Wrap `next`, shrinking `max_size` by `offset`.
    pub fn open(next: Box<dyn Stream>, offset: u64, max_size: &mut u64) -> Result<Self> {
        if offset > *max_size {
            return Err(FatError::SizeTooLarge {
                requested: offset,
                max: *max_size,
            });
        }
        *max_size -= offset;
        debug!("Offset layer at {:#x}, {} bytes addressable", offset, *max_size);
        Ok(Self { next, offset })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn translate(&self, offset: u64) -> Result<u64> {
        offset.checked_add(self.offset).ok_or_else(|| {
            FatError::InvalidInput(format!("offset {:#x} overflows the device", offset))
        })
    }
}

impl Stream for OffsetFilter {
    fn kind(&self) -> StreamKind {
        StreamKind::Offset
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let at = self.translate(offset)?;
        self.next.read(buf, at)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let at = self.translate(offset)?;
        self.next.write(buf, at)
    }

    fn pass_through(&self) -> Option<&[u8]> {
        let data = self.next.pass_through()?;
        let start = usize::try_from(self.offset).ok()?;
        Some(data.get(start..).unwrap_or(&[]))
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
