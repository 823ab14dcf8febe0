// FAT boot sector and FSInfo sector codecs.
// Everything on disk is little-endian; field offsets follow the BPB layout
// used since DOS 4 (label block at 0x24, or at 0x40 behind the FAT32 fields).

use crate::layout::FsLayout;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fatkit_core::{DosConvert, FatError, Geometry, Result};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub const BOOT_SIGNATURE_OFFSET: usize = 510;
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
/// End of the legacy label block, where the boot program starts.
pub const LEGACY_BOOT_PROGRAM_OFFSET: usize = 0x3E;
/// End of the FAT32 label block.
pub const FAT32_BOOT_PROGRAM_OFFSET: usize = 0x5A;
pub const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
pub const DEFAULT_LABEL: [u8; 11] = *b"NO NAME    ";
pub const BANNER: [u8; 8] = *b"FATKIT10";

const FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FSINFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FSINFO_STRUCT_OFFSET: u64 = 484;
const FSINFO_TRAIL_OFFSET: usize = 508;
const FSINFO_TRAIL_SIGNATURE: [u8; 4] = [0x00, 0x00, 0x55, 0xAA];

/// Copies itself to 0x8000, loads the first hard disk's MBR and jumps to it.
/// The word at offset 20 is the copy target of the far jump and gets patched
/// to the program's final position.
const BOOT_PROGRAM: [u8; 47] = [
    0xfa, 0x31, 0xc0, 0x8e, 0xd8, 0x8e, 0xc0, 0xfc, 0xb9, 0x00, 0x01, 0xbe, 0x00, 0x7c, 0xbf, 0x00,
    0x80, 0xf3, 0xa5, 0xea, 0x00, 0x00, 0x00, 0x08, 0xb8, 0x01, 0x02, 0xbb, 0x00, 0x7c, 0xba, 0x80,
    0x00, 0xb9, 0x01, 0x00, 0xcd, 0x13, 0x72, 0x05, 0xea, 0x00, 0x7c, 0x00, 0x00, 0xcd, 0x19,
];
const BOOT_PROGRAM_PATCH: usize = 20;
const BOOT_PROGRAM_ENTRY: u16 = 24;

const_assert!(FAT32_BOOT_PROGRAM_OFFSET + BOOT_PROGRAM.len() <= BOOT_SIGNATURE_OFFSET);
const_assert!(BOOT_PROGRAM_PATCH + 2 <= BOOT_PROGRAM.len());
const_assert!(FSINFO_STRUCT_OFFSET as usize + 12 <= FSINFO_TRAIL_OFFSET);

/// DOS 4 extended parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelBlock {
    pub physdrive: u8,
    pub reserved: u8,
    /// 0x29 (or 0x28 on some old disks).
    pub signature: u8,
    pub serial: u32,
    pub label: [u8; 11],
    pub fs_type: [u8; 8],
}

impl LabelBlock {
    pub fn new(fat_bits: u8, serial: u32, label: [u8; 11]) -> Self {
        let mut fs_type = *b"FAT     ";
        fs_type[3..5].copy_from_slice(format!("{:02}", fat_bits).as_bytes());
        Self {
            physdrive: 0,
            reserved: 0,
            signature: EXTENDED_BOOT_SIGNATURE,
            serial,
            label,
            fs_type,
        }
    }

    pub fn label_text(&self) -> String {
        String::from_utf8_lossy(&self.label).trim_end().to_string()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.physdrive)?;
        w.write_u8(self.reserved)?;
        w.write_u8(self.signature)?;
        w.write_u32::<LittleEndian>(self.serial)?;
        w.write_all(&self.label)?;
        w.write_all(&self.fs_type)?;
        Ok(())
    }

    fn read_from(r: &mut Cursor<&[u8]>) -> Result<Option<Self>> {
        let physdrive = r.read_u8()?;
        let reserved = r.read_u8()?;
        let signature = r.read_u8()?;
        if signature != 0x28 && signature != EXTENDED_BOOT_SIGNATURE {
            return Ok(None);
        }
        let serial = r.read_u32::<LittleEndian>()?;
        let mut label = [0u8; 11];
        r.read_exact(&mut label)?;
        let mut fs_type = [0u8; 8];
        r.read_exact(&mut fs_type)?;
        Ok(Some(Self {
            physdrive,
            reserved,
            signature,
            serial,
            label,
            fs_type,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extension {
    Legacy {
        label: Option<LabelBlock>,
    },
    Fat32 {
        fat_len: u32,
        ext_flags: u16,
        fs_version: u16,
        root_cluster: u32,
        info_sector: u16,
        backup_boot: u16,
        label: Option<LabelBlock>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub banner: [u8; 8],
    pub sector_size: u16,
    pub cluster_size: u8,
    pub reserved_sectors: u16,
    pub num_fat: u8,
    pub dir_entries: u16,
    /// 16-bit total, 0 when `big_sectors` holds it.
    pub small_sectors: u16,
    pub media: u8,
    /// 16-bit FAT length, 0 on FAT32.
    pub fat_len: u16,
    pub sectors: u16,
    pub heads: u16,
    pub hidden: u32,
    pub big_sectors: u32,
    pub ext: Extension,
}

impl BootSector {
    /// Boot sector describing `layout` on a disk of `tot_sectors`.
    pub fn from_layout(
        layout: &FsLayout,
        media: u8,
        geometry: Geometry,
        tot_sectors: u32,
        serial: u32,
        label: [u8; 11],
    ) -> Result<Self> {
        let label_block = Some(LabelBlock::new(layout.fat_bits, serial, label));
        let (fat_len, ext, boot_offset) = if layout.fat_bits == 32 {
            let ext_flags = if layout.write_all_fats {
                0
            } else {
                0x80 | u16::from(layout.primary_fat & 0x0f)
            };
            (
                0,
                Extension::Fat32 {
                    fat_len: layout.fat_len,
                    ext_flags,
                    fs_version: 0,
                    root_cluster: layout.root_cluster,
                    info_sector: layout.info_sector,
                    backup_boot: layout.backup_boot,
                    label: label_block,
                },
                FAT32_BOOT_PROGRAM_OFFSET,
            )
        } else {
            let fat_len = u16::try_from(layout.fat_len).map_err(|_| {
                FatError::Internal(format!("FAT length {} does not fit 16 bits", layout.fat_len))
            })?;
            (
                fat_len,
                Extension::Legacy { label: label_block },
                LEGACY_BOOT_PROGRAM_OFFSET,
            )
        };

        let hidden = geometry.hidden;
        let (small_sectors, big_sectors) = match u16::try_from(tot_sectors) {
            Ok(small) if hidden <= u32::from(u16::MAX) => (small, 0),
            _ => (0, tot_sectors),
        };

        Ok(Self {
            jump: jump_to(boot_offset),
            banner: BANNER,
            sector_size: layout.sector_size,
            cluster_size: layout.cluster_size,
            reserved_sectors: layout.fat_start,
            num_fat: layout.num_fat,
            dir_entries: layout.root_entries(),
            small_sectors,
            media,
            fat_len,
            sectors: geometry.sectors,
            heads: geometry.heads,
            hidden,
            big_sectors,
            ext,
        })
    }

    pub fn total_sectors(&self) -> u32 {
        if self.small_sectors != 0 {
            u32::from(self.small_sectors)
        } else {
            self.big_sectors
        }
    }

    pub fn fat_len(&self) -> u32 {
        match self.ext {
            Extension::Fat32 { fat_len, .. } => fat_len,
            Extension::Legacy { .. } => u32::from(self.fat_len),
        }
    }

    pub fn label_block(&self) -> Option<&LabelBlock> {
        match &self.ext {
            Extension::Legacy { label } | Extension::Fat32 { label, .. } => label.as_ref(),
        }
    }

    fn boot_program_offset(&self) -> usize {
        match self.ext {
            Extension::Legacy { .. } => LEGACY_BOOT_PROGRAM_OFFSET,
            Extension::Fat32 { .. } => FAT32_BOOT_PROGRAM_OFFSET,
        }
    }

    /// Serialize into a sector of `sector_size` bytes, boot program included.
    pub fn to_bytes(&self, sector_size: usize) -> Result<Vec<u8>> {
        if sector_size < BOOT_SIGNATURE_OFFSET + 2 {
            return Err(FatError::InvalidInput(format!(
                "cannot write a boot sector into {} byte sectors",
                sector_size
            )));
        }
        let mut buf = vec![0u8; sector_size];
        let mut w = Cursor::new(&mut buf[..]);
        w.write_all(&self.jump)?;
        w.write_all(&self.banner)?;
        w.write_u16::<LittleEndian>(self.sector_size)?;
        w.write_u8(self.cluster_size)?;
        w.write_u16::<LittleEndian>(self.reserved_sectors)?;
        w.write_u8(self.num_fat)?;
        w.write_u16::<LittleEndian>(self.dir_entries)?;
        w.write_u16::<LittleEndian>(self.small_sectors)?;
        w.write_u8(self.media)?;
        w.write_u16::<LittleEndian>(self.fat_len)?;
        w.write_u16::<LittleEndian>(self.sectors)?;
        w.write_u16::<LittleEndian>(self.heads)?;
        w.write_u32::<LittleEndian>(self.hidden)?;
        w.write_u32::<LittleEndian>(self.big_sectors)?;

        let label = match &self.ext {
            Extension::Legacy { label } => label,
            Extension::Fat32 {
                fat_len,
                ext_flags,
                fs_version,
                root_cluster,
                info_sector,
                backup_boot,
                label,
            } => {
                w.write_u32::<LittleEndian>(*fat_len)?;
                w.write_u16::<LittleEndian>(*ext_flags)?;
                w.write_u16::<LittleEndian>(*fs_version)?;
                w.write_u32::<LittleEndian>(*root_cluster)?;
                w.write_u16::<LittleEndian>(*info_sector)?;
                w.write_u16::<LittleEndian>(*backup_boot)?;
                w.write_all(&[0u8; 12])?;
                label
            }
        };
        if let Some(label) = label {
            label.write_to(&mut w)?;
        }

        let offset = self.boot_program_offset();
        buf[offset..offset + BOOT_PROGRAM.len()].copy_from_slice(&BOOT_PROGRAM);
        let entry = offset as u16 + BOOT_PROGRAM_ENTRY;
        buf[offset + BOOT_PROGRAM_PATCH..offset + BOOT_PROGRAM_PATCH + 2]
            .copy_from_slice(&entry.to_le_bytes());
        buf[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2].copy_from_slice(&BOOT_SIGNATURE);
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SIGNATURE_OFFSET + 2 {
            return Err(FatError::BootSector(format!("only {} bytes", data.len())));
        }
        if data[BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2] != BOOT_SIGNATURE {
            return Err(FatError::BootSector("missing 0x55AA signature".to_string()));
        }

        let mut r = Cursor::new(data);
        let mut jump = [0u8; 3];
        r.read_exact(&mut jump)?;
        let mut banner = [0u8; 8];
        r.read_exact(&mut banner)?;
        let sector_size = r.read_u16::<LittleEndian>()?;
        if !sector_size.is_power_of_two() || !(128..=4096).contains(&sector_size) {
            return Err(FatError::BootSector(format!("bad sector size {}", sector_size)));
        }
        let cluster_size = r.read_u8()?;
        if !cluster_size.is_power_of_two() {
            return Err(FatError::BootSector(format!("bad cluster size {}", cluster_size)));
        }
        let reserved_sectors = r.read_u16::<LittleEndian>()?;
        let num_fat = r.read_u8()?;
        let dir_entries = r.read_u16::<LittleEndian>()?;
        let small_sectors = r.read_u16::<LittleEndian>()?;
        let media = r.read_u8()?;
        let fat_len = r.read_u16::<LittleEndian>()?;
        let sectors = r.read_u16::<LittleEndian>()?;
        let heads = r.read_u16::<LittleEndian>()?;
        let hidden = r.read_u32::<LittleEndian>()?;
        let big_sectors = r.read_u32::<LittleEndian>()?;

        let ext = if fat_len == 0 {
            let fat_len = r.read_u32::<LittleEndian>()?;
            let ext_flags = r.read_u16::<LittleEndian>()?;
            let fs_version = r.read_u16::<LittleEndian>()?;
            let root_cluster = r.read_u32::<LittleEndian>()?;
            let info_sector = r.read_u16::<LittleEndian>()?;
            let backup_boot = r.read_u16::<LittleEndian>()?;
            r.seek(SeekFrom::Current(12))?;
            Extension::Fat32 {
                fat_len,
                ext_flags,
                fs_version,
                root_cluster,
                info_sector,
                backup_boot,
                label: LabelBlock::read_from(&mut r)?,
            }
        } else {
            Extension::Legacy {
                label: LabelBlock::read_from(&mut r)?,
            }
        };

        Ok(Self {
            jump,
            banner,
            sector_size,
            cluster_size,
            reserved_sectors,
            num_fat,
            dir_entries,
            small_sectors,
            media,
            fat_len,
            sectors,
            heads,
            hidden,
            big_sectors,
            ext,
        })
    }

    /// Recompute the filesystem layout this boot sector describes.
    pub fn layout(&self) -> Result<FsLayout> {
        if self.num_fat == 0 {
            return Err(FatError::BootSector("no FAT copies".to_string()));
        }
        let sector_size = u32::from(self.sector_size);
        let dir_len = ((u32::from(self.dir_entries) * 32 + sector_size - 1) / sector_size) as u16;
        let mut layout = FsLayout {
            cluster_size: self.cluster_size,
            num_fat: self.num_fat,
            fat_len: self.fat_len(),
            dir_len,
            fat_start: self.reserved_sectors,
            sector_size: self.sector_size,
            ..FsLayout::default()
        };
        layout.dir_start = u32::from(layout.fat_start) + u32::from(layout.num_fat) * layout.fat_len;
        layout.clus_start = layout.dir_start + u32::from(layout.dir_len);
        let tot = self.total_sectors();
        if layout.clus_start > tot {
            return Err(FatError::BootSector(format!(
                "system area of {} sectors exceeds the {} sector volume",
                layout.clus_start, tot
            )));
        }
        layout.num_clus = (tot - layout.clus_start) / u32::from(self.cluster_size);

        if let Extension::Fat32 {
            ext_flags,
            root_cluster,
            info_sector,
            backup_boot,
            ..
        } = self.ext
        {
            layout.fat_bits = 32;
            layout.root_cluster = root_cluster;
            layout.info_sector = info_sector;
            layout.backup_boot = backup_boot;
            layout.write_all_fats = ext_flags & 0x80 == 0;
            layout.primary_fat = (ext_flags & 0x0f) as u8;
        } else {
            layout.fat_bits = crate::layout::fat_bits_for(layout.num_clus).min(16);
        }
        Ok(layout)
    }
}

/// Short jump when the target is in reach, near jump otherwise.
fn jump_to(offset: usize) -> [u8; 3] {
    if offset - 2 < 0x80 {
        [0xEB, (offset - 2) as u8, 0x90]
    } else {
        let rel = ((offset - 3) as u16).to_le_bytes();
        [0xE9, rel[0], rel[1]]
    }
}

/// Encode a volume label through `convert`, upper-cased and space padded.
pub fn encode_label(label: &str, convert: &dyn DosConvert) -> Result<[u8; 11]> {
    let mut out = [b' '; 11];
    let mut len = 0;
    for c in label.chars().flat_map(char::to_uppercase) {
        if len == out.len() {
            return Err(FatError::InvalidInput(format!(
                "label \"{}\" is longer than 11 characters",
                label
            )));
        }
        out[len] = convert.to_dos(c).ok_or_else(|| {
            FatError::InvalidInput(format!("'{}' cannot be stored in a volume label", c))
        })?;
        len += 1;
    }
    Ok(out)
}

/// FAT32 free space hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsInfo {
    pub free_clusters: u32,
    pub next_free: u32,
}

impl FsInfo {
    pub fn to_bytes(&self, sector_size: usize) -> Result<Vec<u8>> {
        if sector_size < FSINFO_TRAIL_OFFSET + FSINFO_TRAIL_SIGNATURE.len() {
            return Err(FatError::InvalidInput(format!(
                "cannot write FSInfo into {} byte sectors",
                sector_size
            )));
        }
        let mut buf = vec![0u8; sector_size];
        let mut w = Cursor::new(&mut buf[..]);
        w.write_u32::<LittleEndian>(FSINFO_LEAD_SIGNATURE)?;
        w.set_position(FSINFO_STRUCT_OFFSET);
        w.write_u32::<LittleEndian>(FSINFO_STRUCT_SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.free_clusters)?;
        w.write_u32::<LittleEndian>(self.next_free)?;
        buf[FSINFO_TRAIL_OFFSET..FSINFO_TRAIL_OFFSET + 4].copy_from_slice(&FSINFO_TRAIL_SIGNATURE);
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FSINFO_TRAIL_OFFSET + 4 {
            return Err(FatError::BootSector(format!("FSInfo of only {} bytes", data.len())));
        }
        let mut r = Cursor::new(data);
        let lead = r.read_u32::<LittleEndian>()?;
        r.set_position(FSINFO_STRUCT_OFFSET);
        let signature = r.read_u32::<LittleEndian>()?;
        if lead != FSINFO_LEAD_SIGNATURE
            || signature != FSINFO_STRUCT_SIGNATURE
            || data[FSINFO_TRAIL_OFFSET..FSINFO_TRAIL_OFFSET + 4] != FSINFO_TRAIL_SIGNATURE
        {
            return Err(FatError::BootSector("bad FSInfo signatures".to_string()));
        }
        Ok(Self {
            free_clusters: r.read_u32::<LittleEndian>()?,
            next_free: r.read_u32::<LittleEndian>()?,
        })
    }
}
