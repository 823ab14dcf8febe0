// Common contract for every layer of an image pipeline.
// Unimplemented capabilities fall back to the wrapped stream or to a neutral value.

use fatkit_core::{DeviceDescriptor, DosConvert, FatError, Geometry, Result};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Memory,
    PlainFile,
    Floppyd,
    Xdf,
    Scsi,
    Remap,
    Offset,
    Swap,
    Partition,
    Buffer,
    LineEnding,
    Shared,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Memory => "memory",
            StreamKind::PlainFile => "plain file",
            StreamKind::Floppyd => "floppyd",
            StreamKind::Xdf => "xdf",
            StreamKind::Scsi => "scsi",
            StreamKind::Remap => "remap",
            StreamKind::Offset => "offset",
            StreamKind::Swap => "swap",
            StreamKind::Partition => "partition",
            StreamKind::Buffer => "buffer",
            StreamKind::LineEnding => "line ending",
            StreamKind::Shared => "shared",
        };
        f.write_str(name)
    }
}

/// A byte-addressed layer. Filters own the stream they wrap (`next`);
/// backends have none.
pub trait Stream {
    fn kind(&self) -> StreamKind;

    /// Read up to `buf.len()` bytes at `offset`. `Ok(0)` means no more data.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write up to `buf.len()` bytes at `offset`; short writes are allowed.
    fn write(&mut self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(FatError::Unsupported(format!("{} stream is read-only", self.kind())))
    }

    fn flush(&mut self) -> Result<()> {
        match self.next_mut() {
            Some(next) => next.flush(),
            None => Ok(()),
        }
    }

    /// Push geometry down to the layer that can apply it.
    fn set_geometry(&mut self, dev: &DeviceDescriptor) -> Result<()> {
        match self.next_mut() {
            Some(next) => next.set_geometry(dev),
            None => Ok(()),
        }
    }

    fn geometry(&self) -> Option<Geometry> {
        self.next().and_then(|next| next.geometry())
    }

    /// In-memory bytes of this layer when it is a plain view over a buffer.
    fn pass_through(&self) -> Option<&[u8]> {
        None
    }

    fn dos_convert(&self) -> Option<Rc<dyn DosConvert>> {
        None
    }

    /// Forget cached state, e.g. after the image changed behind our back.
    fn discard(&mut self) -> Result<()> {
        match self.next_mut() {
            Some(next) => next.discard(),
            None => Ok(()),
        }
    }

    fn next(&self) -> Option<&dyn Stream> {
        None
    }

    fn next_mut(&mut self) -> Option<&mut dyn Stream> {
        None
    }
}

impl fmt::Debug for dyn Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        let mut layer: Option<&dyn Stream> = Some(self);
        while let Some(s) = layer {
            list.entry(&s.kind());
            layer = s.next();
        }
        list.finish()
    }
}

/// Kinds of every layer, outermost first.
pub fn layers(stream: &dyn Stream) -> Vec<StreamKind> {
    let mut kinds = Vec::new();
    let mut layer = Some(stream);
    while let Some(s) = layer {
        kinds.push(s.kind());
        layer = s.next();
    }
    kinds
}

/// Shared, reference-counted handle for streams with several owners
/// (directory entries, open files). Not thread-safe: callers serialize access.
#[derive(Clone)]
pub struct StreamHandle(Rc<RefCell<Box<dyn Stream>>>);

impl StreamHandle {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self(Rc::new(RefCell::new(stream)))
    }

    /// Number of live handles.
    pub fn refs(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn same(&self, other: &StreamHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn borrow(&self) -> Ref<'_, Box<dyn Stream>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Box<dyn Stream>> {
        self.0.borrow_mut()
    }

    /// Kinds of the wrapped pipeline, outermost first.
    pub fn layers(&self) -> Vec<StreamKind> {
        layers(&**self.0.borrow())
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("refs", &self.refs())
            .field("layers", &self.layers())
            .finish()
    }
}

impl Stream for StreamHandle {
    fn kind(&self) -> StreamKind {
        StreamKind::Shared
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.0.borrow_mut().read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.0.borrow_mut().write(buf, offset)
    }

    fn flush(&mut self) -> Result<()> {
        self.0.borrow_mut().flush()
    }

    fn set_geometry(&mut self, dev: &DeviceDescriptor) -> Result<()> {
        self.0.borrow_mut().set_geometry(dev)
    }

    fn geometry(&self) -> Option<Geometry> {
        self.0.borrow().geometry()
    }

    fn dos_convert(&self) -> Option<Rc<dyn DosConvert>> {
        self.0.borrow().dos_convert()
    }

    fn discard(&mut self) -> Result<()> {
        self.0.borrow_mut().discard()
    }
}
