// Host backends for the image pipeline.

pub mod plain_io;

pub use plain_io::{PlainFile, PlainFileBackend};

use fatkit_streams::{Backend, ImageOpener};

/// Backends available on this host, in probing order.
pub fn default_backends() -> Vec<Box<dyn Backend>> {
    vec![Box::new(PlainFileBackend::new())]
}

/// Pipeline builder over `default_backends`.
pub fn default_opener() -> ImageOpener {
    ImageOpener::new(default_backends())
}
