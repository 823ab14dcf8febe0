pub mod codepage;
pub mod config;
pub mod device;
pub mod error;

pub use codepage::{AsciiConvert, DosConvert};
pub use config::{FatkitConfig, SolverConfig};
pub use device::{
    DeviceDescriptor, Geometry, GeometryMode, LockMode, OpenMode, SkipLayers, IMAGE_DRIVE,
};
pub use error::{FatError, Result};
