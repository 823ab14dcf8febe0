// Byte swap inside every 16-bit word, for images written by big-endian
// controllers.

use crate::stream::{Stream, StreamKind};
use fatkit_core::{DosConvert, FatError, Result};
use std::rc::Rc;

pub struct SwapFilter {
    next: Box<dyn Stream>,
    scratch: Vec<u8>,
}

fn swap_words(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

fn check_aligned(len: usize, offset: u64) -> Result<()> {
    if len % 2 != 0 || offset % 2 != 0 {
        return Err(FatError::InvalidInput(format!(
            "swapped access of {} bytes at {:#x} is not word aligned",
            len, offset
        )));
    }
    Ok(())
}

impl SwapFilter {
    pub fn new(next: Box<dyn Stream>) -> Self {
        Self {
            next,
            scratch: Vec::new(),
        }
    }
}

impl Stream for SwapFilter {
    fn kind(&self) -> StreamKind {
        StreamKind::Swap
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        check_aligned(buf.len(), offset)?;
        let n = self.next.read(buf, offset)?;
        swap_words(&mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        check_aligned(buf.len(), offset)?;
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        swap_words(&mut self.scratch);
        self.next.write(&self.scratch, offset)
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
