// Plain file or block device backend.
// Images are addressed directly; geometry is taken from the descriptor or
// derived from the size of the backing store.

use fatkit_core::{
    AsciiConvert, DeviceDescriptor, DosConvert, FatError, Geometry, GeometryMode, LockMode,
    Result,
};
use fatkit_streams::{Backend, BackendKind, BackendRequest, BackendStream, Stream, StreamKind};
use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

/// Largest offset a regular file can grow to.
const MAX_FILE_OFFSET: u64 = i64::MAX as u64;

pub struct PlainFile {
    file: File,
    writable: bool,
    geometry: Geometry,
    convert: Rc<dyn DosConvert>,
}

impl PlainFile {
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Stream for PlainFile {
    fn kind(&self) -> StreamKind {
        StreamKind::PlainFile
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        if !self.writable {
            return Err(FatError::Unsupported("image opened read-only".to_string()));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(self.file.write(buf)?)
    }

    fn flush(&mut self) -> Result<()> {
        if self.writable {
            self.file.flush()?;
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn set_geometry(&mut self, dev: &DeviceDescriptor) -> Result<()> {
        self.geometry = dev.geometry();
        Ok(())
    }

    fn geometry(&self) -> Option<Geometry> {
        Some(self.geometry)
    }

    fn dos_convert(&self) -> Option<Rc<dyn DosConvert>> {
        Some(self.convert.clone())
    }
}

#[cfg(target_os = "linux")]
fn lock(file: &File, mode: LockMode, name: &str) -> Result<()> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    let arg = match mode {
        LockMode::None => return Ok(()),
        LockMode::Shared => FlockArg::LockSharedNonblock,
        LockMode::Exclusive => FlockArg::LockExclusiveNonblock,
    };
    flock(file.as_raw_fd(), arg)
        .map_err(|e| FatError::BackendOpen(format!("{} is busy: {}", name, e)))
}

#[cfg(not(target_os = "linux"))]
fn lock(_file: &File, mode: LockMode, name: &str) -> Result<()> {
    if mode != LockMode::None {
        debug!("No advisory locking for {} on this platform", name);
    }
    Ok(())
}

#[cfg(unix)]
fn is_block_device(file: &File) -> Result<bool> {
    use std::os::unix::fs::FileTypeExt;
    Ok(file.metadata()?.file_type().is_block_device())
}

#[cfg(not(unix))]
fn is_block_device(_file: &File) -> Result<bool> {
    Ok(false)
}

/// Backend for regular image files and raw block devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainFileBackend;

impl PlainFileBackend {
    pub fn new() -> Self {
        Self
    }

    fn probe(file: &mut File, block_device: bool, out_dev: &mut DeviceDescriptor) -> Result<u64> {
        let size = file.seek(SeekFrom::End(0))?;
        let sector_size = u64::from(out_dev.sector_size());
        if out_dev.tot_sectors == 0 && !out_dev.geometry().is_known() && size >= sector_size {
            out_dev.tot_sectors = u32::try_from(size / sector_size).map_err(|_| {
                FatError::TooManySectors(size / sector_size)
            })?;
            out_dev.fill_lba_geometry();
            debug!(
                "Probed {} sectors, geometry {}/{}/{}",
                out_dev.tot_sectors, out_dev.tracks, out_dev.heads, out_dev.sectors
            );
        }

        if block_device {
            let wanted = u64::from(out_dev.tot_sectors) * sector_size;
            if wanted > size {
                return Err(FatError::GeometryMismatch(format!(
                    "{} sectors requested, device holds {}",
                    out_dev.tot_sectors,
                    size / sector_size
                )));
            }
            Ok(size)
        } else {
            Ok(MAX_FILE_OFFSET)
        }
    }
}

impl Backend for PlainFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Plain
    }

    fn open(
        &self,
        req: &BackendRequest<'_>,
        out_dev: &mut DeviceDescriptor,
    ) -> Result<Option<BackendStream>> {
        if req.name.is_empty() {
            return Ok(None);
        }
        let path = Path::new(req.name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(req.mode.write)
            .create(req.mode.create)
            .open(path)
            .map_err(|e| FatError::BackendOpen(format!("{}: {}", path.display(), e)))?;

        lock(&file, req.lock, req.name)?;

        let block_device = is_block_device(&file)?;
        let max_size = if req.geometry_mode == GeometryMode::AlwaysProbe {
            Self::probe(&mut file, block_device, out_dev)?
        } else if block_device {
            file.seek(SeekFrom::End(0))?
        } else {
            MAX_FILE_OFFSET
        };

        if req.mode.create && block_device {
            warn!("{} is a device, nothing to create", path.display());
        }
        info!(
            "Opened {} ({}){}",
            path.display(),
            if block_device { "device" } else { "image" },
            if req.mode.write { "" } else { " read-only" }
        );

        Ok(Some(BackendStream {
            stream: Box::new(PlainFile {
                file,
                writable: req.mode.write,
                geometry: out_dev.geometry(),
                convert: Rc::new(AsciiConvert),
            }),
            max_size,
        }))
    }
}
