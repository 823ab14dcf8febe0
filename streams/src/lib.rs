// Stackable byte streams over disk images: the stream contract, the filter
// layers and the builder that assembles them for a device.

pub mod backend;
pub mod direntry;
pub mod filters;
pub mod force_io;
pub mod mem;
pub mod open_image;
pub mod stream;

pub use backend::{Backend, BackendKind, BackendRequest, BackendStream};
pub use direntry::{DirEntry, DirId, DirTree, Slot, MAX_VNAMELEN};
pub use force_io::{force_io, force_read, force_write};
pub use mem::{MemStream, MemoryBackend};
pub use open_image::{ImageOpener, OpenedImage};
pub use stream::{layers, Stream, StreamHandle, StreamKind};
