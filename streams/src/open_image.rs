// Pipeline builder: open a backend for a device and stack the filter layers
// the descriptor asks for.

use crate::backend::{Backend, BackendKind, BackendRequest};
use crate::filters::{OffsetFilter, PartitionFilter, RemapFilter, SwapFilter};
use crate::stream::Stream;
use fatkit_core::{
    DeviceDescriptor, FatError, GeometryMode, LockMode, OpenMode, Result, SkipLayers,
};
use log::{debug, info};
use std::fmt;

/// An opened pipeline and the largest byte size it can address.
pub struct OpenedImage {
    pub stream: Box<dyn Stream>,
    pub max_size: u64,
}

impl fmt::Debug for OpenedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedImage")
            .field("stream", &self.stream)
            .field("max_size", &self.max_size)
            .finish()
    }
}

pub struct ImageOpener {
    backends: Vec<Box<dyn Backend>>,
}

impl ImageOpener {
    pub fn new(mut backends: Vec<Box<dyn Backend>>) -> Self {
        // Stable: backends of the same family keep their registration order.
        backends.sort_by_key(|b| b.kind());
        Self { backends }
    }

    pub fn backend_kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Open `name` as described by `dev`.
    ///
    /// `out_dev` receives whatever the backend and partition layer learn
    /// about the device (probed geometry, partition offset and size).
    /// Layers are stacked remap, offset, swap, partition; a failure in any of
    /// them drops everything opened so far.
    #[allow(clippy::too_many_arguments)]
    pub fn open_image(
        &self,
        out_dev: &mut DeviceDescriptor,
        dev: &DeviceDescriptor,
        name: &str,
        mode: OpenMode,
        geometry_mode: GeometryMode,
        lock: LockMode,
        skip: SkipLayers,
    ) -> Result<OpenedImage> {
        let req = BackendRequest {
            dev,
            name,
            mode,
            geometry_mode,
            lock,
        };

        let mut last_error: Option<FatError> = None;
        let mut opened = None;
        for backend in &self.backends {
            if out_dev.floppyd && backend.kind() != BackendKind::Floppyd {
                continue;
            }
            match backend.open(&req, out_dev) {
                Ok(Some(stream)) => {
                    debug!("Opened {} with the {} backend", name, backend.kind());
                    opened = Some(stream);
                    break;
                }
                Ok(None) => {}
                Err(e) if e.is_geometry_failure() => return Err(e),
                Err(e) => {
                    debug!("{} backend could not open {}: {}", backend.kind(), name, e);
                    last_error = Some(e);
                }
            }
        }

        let opened = match opened {
            Some(opened) => opened,
            None => {
                return Err(last_error.unwrap_or_else(|| {
                    FatError::BackendOpen(format!("no backend can open {}", name))
                }))
            }
        };
        let mut stream = opened.stream;
        let mut max_size = opened.max_size;

        if let Some(map) = dev.data_map.as_deref() {
            stream = Box::new(RemapFilter::open(stream, map, &mut max_size)?);
        }
        if dev.offset != 0 {
            stream = Box::new(OffsetFilter::open(stream, dev.offset, &mut max_size)?);
        }
        if dev.swap {
            stream = Box::new(SwapFilter::new(stream));
        }
        if dev.partition != 0 && !skip.contains(SkipLayers::PARTITION) {
            out_dev.partition = dev.partition;
            stream = Box::new(PartitionFilter::open(stream, out_dev, &mut max_size)?);
        }

        info!("Opened {} as {:?}, {} bytes addressable", name, stream, max_size);
        Ok(OpenedImage { stream, max_size })
    }
}
