// Full-length transfers on top of streams that may return short counts.

use crate::stream::Stream;
use fatkit_core::Result;
use log::{debug, trace};

/// Repeat `io` until `len` bytes moved or no progress is made.
///
/// `io` receives the number of bytes already transferred and the absolute
/// offset to continue at. An error or a zero count ends the loop; it is only
/// reported when nothing was transferred yet, otherwise the partial count wins.
pub fn force_io<F>(len: usize, start: u64, mut io: F) -> Result<usize>
where
    F: FnMut(usize, u64) -> Result<usize>,
{
    let mut done = 0usize;
    while done < len {
        match io(done, start + done as u64) {
            Ok(0) => {
                trace!("No progress at {:#x} after {} of {} bytes", start + done as u64, done, len);
                break;
            }
            Ok(n) => done += n.min(len - done),
            Err(e) if done == 0 => return Err(e),
            Err(e) => {
                debug!("Short transfer at {:#x}: {} of {} bytes ({})", start, done, len, e);
                break;
            }
        }
    }
    Ok(done)
}

pub fn force_read(stream: &mut dyn Stream, buf: &mut [u8], offset: u64) -> Result<usize> {
    let len = buf.len();
    force_io(len, offset, |done, at| stream.read(&mut buf[done..], at))
}

pub fn force_write(stream: &mut dyn Stream, buf: &[u8], offset: u64) -> Result<usize> {
    force_io(buf.len(), offset, |done, at| stream.write(&buf[done..], at))
}
