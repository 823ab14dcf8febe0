// FAT filesystem creation: layout solving, boot sector codec and the
// format operation that writes through an image pipeline.

pub mod boot_sector;
pub mod format;
pub mod layout;
pub mod old_dos;

pub use boot_sector::{encode_label, BootSector, Extension, FsInfo, LabelBlock};
pub use format::{DeviceOverrides, FormatReport, FormatRequest, Formatter, Plan};
pub use layout::{
    sectors_from_geometry, FsLayout, LayoutSolver, Solution, SolverRequest, FAT12_LIMIT,
    FAT16_LIMIT, FAT32_LIMIT,
};
