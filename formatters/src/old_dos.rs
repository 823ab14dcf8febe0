// Historical DOS floppy formats. These predate the BPB being trusted, so a
// disk with one of these geometries must use exactly these parameters.

use fatkit_core::{FatError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldDos {
    pub tracks: u32,
    pub sectors: u16,
    pub heads: u16,
    pub dir_len: u16,
    pub cluster_size: u8,
    pub fat_len: u32,
    pub media: u8,
}

impl OldDos {
    /// Capacity in KiB, assuming 512-byte sectors.
    pub fn size_kib(&self) -> u32 {
        self.tracks * u32::from(self.heads) * u32::from(self.sectors) / 2
    }
}

static TABLE: Lazy<std::result::Result<Vec<OldDos>, String>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../data/old_dos.json")).map_err(|e| e.to_string())
});

pub fn table() -> Result<&'static [OldDos]> {
    TABLE
        .as_ref()
        .map(|t| t.as_slice())
        .map_err(|e| FatError::Configuration(format!("old DOS format table: {}", e)))
}

/// Match a geometry; a zero `dir_len` or `cluster_size` matches anything.
pub fn by_params(
    tracks: u32,
    heads: u16,
    sectors: u16,
    dir_len: u16,
    cluster_size: u8,
) -> Result<Option<&'static OldDos>> {
    Ok(table()?.iter().find(|p| {
        p.tracks == tracks
            && p.heads == heads
            && p.sectors == sectors
            && (dir_len == 0 || p.dir_len == dir_len)
            && (cluster_size == 0 || p.cluster_size == cluster_size)
    }))
}

pub fn by_size(kib: u32) -> Result<Option<&'static OldDos>> {
    Ok(table()?.iter().find(|p| p.size_kib() == kib))
}
