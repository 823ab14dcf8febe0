// Device backends: the bottom layer of every pipeline.

use crate::stream::Stream;
use fatkit_core::{DeviceDescriptor, GeometryMode, LockMode, OpenMode, Result};
use std::fmt;

/// Backend families, in the order the pipeline builder probes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    Floppyd,
    Xdf,
    Scsi,
    Plain,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Floppyd => "floppyd",
            BackendKind::Xdf => "xdf",
            BackendKind::Scsi => "scsi",
            BackendKind::Plain => "plain",
        };
        f.write_str(name)
    }
}

/// Everything a backend needs to open its device.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    /// Descriptor as configured, before any probing.
    pub dev: &'a DeviceDescriptor,
    pub name: &'a str,
    pub mode: OpenMode,
    pub geometry_mode: GeometryMode,
    pub lock: LockMode,
}

pub struct BackendStream {
    pub stream: Box<dyn Stream>,
    /// Largest byte offset the device can address.
    pub max_size: u64,
}

impl fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendStream")
            .field("stream", &self.stream)
            .field("max_size", &self.max_size)
            .finish()
    }
}

pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Try to open the device. `Ok(None)` means this backend does not handle
    /// it and the next one should be tried. Probed geometry goes into `out_dev`.
    /// A `GeometryMismatch` error stops the search.
    fn open(
        &self,
        req: &BackendRequest<'_>,
        out_dev: &mut DeviceDescriptor,
    ) -> Result<Option<BackendStream>>;
}
