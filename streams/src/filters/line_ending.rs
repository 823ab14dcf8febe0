// Read-side conversion of DOS text: CRs are dropped and a SUB (0x1A) byte
// ends the text. Only sequential reads are supported.

use crate::stream::{Stream, StreamKind};
use fatkit_core::{DosConvert, FatError, Result};
use log::trace;
use std::rc::Rc;

const CR: u8 = 0x0d;
const SUB: u8 = 0x1a;

pub struct LineEndingFilter {
    next: Box<dyn Stream>,
    /// Position in the converted text.
    norm_pos: u64,
    /// Position in the raw DOS bytes.
    raw_pos: u64,
    eof: bool,
}

impl LineEndingFilter {
    pub fn new(next: Box<dyn Stream>) -> Self {
        Self {
            next,
            norm_pos: 0,
            raw_pos: 0,
            eof: false,
        }
    }

    pub fn norm_pos(&self) -> u64 {
        self.norm_pos
    }

    pub fn raw_pos(&self) -> u64 {
        self.raw_pos
    }

    pub fn into_inner(self) -> Box<dyn Stream> {
        self.next
    }
}

impl Stream for LineEndingFilter {
    fn kind(&self) -> StreamKind {
        StreamKind::LineEnding
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset != self.norm_pos {
            return Err(FatError::NonSequentialRead {
                expected: self.norm_pos,
                requested: offset,
            });
        }
        if self.eof || buf.is_empty() {
            return Ok(0);
        }

        // The raw chunk is never shorter than the text it yields, so one
        // read of `buf.len()` bytes is compacted in place.
        loop {
            let got = self.next.read(buf, self.raw_pos)?;
            if got == 0 {
                return Ok(0);
            }

            let mut out = 0;
            let mut consumed = 0;
            for i in 0..got {
                let b = buf[i];
                consumed += 1;
                match b {
                    CR => {}
                    SUB => {
                        trace!("End of text marker at raw offset {:#x}", self.raw_pos + i as u64);
                        self.eof = true;
                        break;
                    }
                    _ => {
                        buf[out] = b;
                        out += 1;
                    }
                }
            }

            self.raw_pos += consumed as u64;
            self.norm_pos += out as u64;
            if out > 0 || self.eof {
                return Ok(out);
            }
        }
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
