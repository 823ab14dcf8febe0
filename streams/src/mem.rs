// In-memory image: the simplest backend, and the one the tests build on.

use crate::backend::{Backend, BackendKind, BackendRequest, BackendStream};
use crate::stream::{Stream, StreamKind};
use fatkit_core::{DeviceDescriptor, DosConvert, Geometry, GeometryMode, Result};
use log::trace;
use std::rc::Rc;

/// Growable byte buffer addressed like a disk.
#[derive(Default)]
pub struct MemStream {
    data: Vec<u8>,
    geometry: Option<Geometry>,
    convert: Option<Rc<dyn DosConvert>>,
}

impl MemStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            geometry: None,
            convert: None,
        }
    }

    pub fn with_dos_convert(mut self, convert: Rc<dyn DosConvert>) -> Self {
        self.convert = Some(convert);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Stream for MemStream {
    fn kind(&self) -> StreamKind {
        StreamKind::Memory
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.data.len() => start,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let start = usize::try_from(offset).map_err(|_| {
            fatkit_core::FatError::InvalidInput(format!("offset {:#x} beyond memory", offset))
        })?;
        let end = start + buf.len();
        if end > self.data.len() {
            trace!("Growing memory image to {} bytes", end);
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_geometry(&mut self, dev: &DeviceDescriptor) -> Result<()> {
        self.geometry = Some(dev.geometry());
        Ok(())
    }

    fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    fn pass_through(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn dos_convert(&self) -> Option<Rc<dyn DosConvert>> {
        self.convert.clone()
    }
}

/// Backend serving a copy of a fixed image, whatever name is asked for.
pub struct MemoryBackend {
    image: Vec<u8>,
    max_size: Option<u64>,
}

impl MemoryBackend {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            max_size: None,
        }
    }

    /// Report `max_size` instead of the image length.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Plain
    }

    fn open(
        &self,
        req: &BackendRequest<'_>,
        out_dev: &mut DeviceDescriptor,
    ) -> Result<Option<BackendStream>> {
        let len = self.image.len() as u64;
        if req.geometry_mode == GeometryMode::AlwaysProbe && out_dev.tot_sectors == 0 {
            out_dev.tot_sectors = u32::try_from(len / u64::from(out_dev.sector_size()))
                .unwrap_or(u32::MAX);
        }
        let mut stream = MemStream::new(self.image.clone());
        stream.set_geometry(out_dev)?;
        Ok(Some(BackendStream {
            stream: Box::new(stream),
            max_size: self.max_size.unwrap_or(len),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_past_end_is_short() {
        let mut s = MemStream::new(b"hello".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(s.read(&mut buf, 3).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(s.read(&mut buf, 5).unwrap(), 0);
        assert_eq!(s.read(&mut buf, u64::MAX).unwrap(), 0);
    }

    #[test]
    fn test_write_grows() {
        let mut s = MemStream::default();
        assert_eq!(s.write(b"xy", 4).unwrap(), 2);
        assert_eq!(s.data(), b"\0\0\0\0xy");
        assert_eq!(s.pass_through().map(|d| d.len()), Some(6));
    }

    #[test]
    fn test_backend_probes_size() {
        let backend = MemoryBackend::new(vec![0; 4096]);
        let dev = DeviceDescriptor::image("mem");
        let mut out_dev = dev.clone();
        let req = BackendRequest {
            dev: &dev,
            name: "mem",
            mode: fatkit_core::OpenMode::READ_ONLY,
            geometry_mode: GeometryMode::AlwaysProbe,
            lock: fatkit_core::LockMode::None,
        };
        let opened = backend.open(&req, &mut out_dev).unwrap().unwrap();
        assert_eq!(opened.max_size, 4096);
        assert_eq!(out_dev.tot_sectors, 8);
    }
}
