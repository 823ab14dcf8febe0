use serde::{Deserialize, Serialize};
use std::ops::BitOr;

/// Drive letter used for images opened by path rather than via the device table.
pub const IMAGE_DRIVE: char = ':';

/// Description of one drive: where it lives, its geometry and which
/// transformation layers must be stacked on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDescriptor {
    pub drive: char,
    /// Path of the image file or device node.
    pub name: String,
    pub tracks: u32,
    pub heads: u16,
    pub sectors: u16,
    pub hidden: u32,
    /// Total sectors, 0 when unknown.
    pub tot_sectors: u32,
    /// Requested FAT width, 0 = pick automatically.
    pub fat_bits: u8,
    /// Requested sectors per cluster, 0 = pick automatically.
    pub cluster_size: u8,
    /// Sector size override, 0 = 512.
    pub sector_size: u16,
    /// Transfer block size, 0 = sector size.
    pub blocksize: u32,
    /// Byte offset of the filesystem inside the backing store.
    pub offset: u64,
    /// Primary partition number (1..=4), 0 = whole device.
    pub partition: u8,
    pub data_map: Option<String>,
    pub swap: bool,
    pub floppyd: bool,
    pub codepage: u16,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            drive: IMAGE_DRIVE,
            name: String::new(),
            tracks: 0,
            heads: 0,
            sectors: 0,
            hidden: 0,
            tot_sectors: 0,
            fat_bits: 0,
            cluster_size: 0,
            sector_size: 0,
            blocksize: 0,
            offset: 0,
            partition: 0,
            data_map: None,
            swap: false,
            floppyd: false,
            codepage: 0,
        }
    }
}

impl DeviceDescriptor {
    /// Descriptor for a plain image file with no geometry known yet.
    pub fn image(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            tracks: self.tracks,
            heads: self.heads,
            sectors: self.sectors,
            hidden: self.hidden,
        }
    }

    pub fn sector_size(&self) -> u32 {
        if self.sector_size == 0 {
            512
        } else {
            u32::from(self.sector_size)
        }
    }

    /// Invent a disk-style geometry for a device whose only known property is
    /// its size: 63 sectors per track and as few heads as keep the cylinder
    /// count within 1024.
    pub fn fill_lba_geometry(&mut self) {
        if self.tot_sectors == 0 {
            return;
        }
        if self.sectors == 0 {
            self.sectors = 63;
        }
        if self.heads == 0 {
            let sectors = u64::from(self.sectors);
            let tot = u64::from(self.tot_sectors);
            self.heads = [16u16, 32, 64, 128]
                .into_iter()
                .find(|&h| tot <= u64::from(h) * sectors * 1024)
                .unwrap_or(255);
        }
        if self.tracks == 0 {
            let per_cyl = u64::from(self.geometry().sectors_per_cylinder());
            let tracks = (u64::from(self.tot_sectors) + per_cyl - 1) / per_cyl;
            self.tracks = u32::try_from(tracks).unwrap_or(u32::MAX);
        }
    }

    pub fn blocksize(&self) -> u32 {
        let sector_size = self.sector_size();
        if self.blocksize < sector_size {
            sector_size
        } else {
            self.blocksize
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub tracks: u32,
    pub heads: u16,
    pub sectors: u16,
    pub hidden: u32,
}

impl Geometry {
    pub fn sectors_per_cylinder(&self) -> u32 {
        u32::from(self.heads) * u32::from(self.sectors)
    }

    pub fn is_known(&self) -> bool {
        self.tracks != 0 && self.heads != 0 && self.sectors != 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub write: bool,
    pub create: bool,
}

impl OpenMode {
    pub const READ_ONLY: OpenMode = OpenMode { write: false, create: false };
    pub const READ_WRITE: OpenMode = OpenMode { write: true, create: false };
    pub const CREATE: OpenMode = OpenMode { write: true, create: true };
}

/// Whether the backend should fill unknown geometry from the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeometryMode {
    #[default]
    Keep,
    AlwaysProbe,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    #[default]
    None,
    Shared,
    Exclusive,
}

/// Bitmask of pipeline layers the caller wants left out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipLayers(u8);

impl SkipLayers {
    pub const NONE: SkipLayers = SkipLayers(0);
    pub const PARTITION: SkipLayers = SkipLayers(0x01);

    pub fn contains(self, other: SkipLayers) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for SkipLayers {
    type Output = SkipLayers;

    fn bitor(self, rhs: SkipLayers) -> SkipLayers {
        SkipLayers(self.0 | rhs.0)
    }
}
