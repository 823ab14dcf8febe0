// Window onto one primary partition of a classic MBR-partitioned disk.

use crate::force_io::force_read;
use crate::stream::{Stream, StreamKind};
use byteorder::{ByteOrder, LittleEndian};
use fatkit_core::{DeviceDescriptor, DosConvert, FatError, Geometry, Result};
use log::{debug, info};
use std::rc::Rc;

pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;
pub const PARTITION_ENTRY_SIZE: usize = 16;
const MBR_SIGNATURE_OFFSET: usize = 510;

/// One decoded primary partition table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub boot_flag: u8,
    pub sys_ind: u8,
    pub start_lba: u32,
    pub size: u32,
}

impl PartitionEntry {
    /// Decode entry `number` (1..=4) from a 512-byte MBR.
    pub fn parse(mbr: &[u8], number: u8) -> Result<Self> {
        if !(1..=4).contains(&number) {
            return Err(FatError::Partition(format!(
                "partition {} is not a primary partition",
                number
            )));
        }
        if mbr.len() < 512 || mbr[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 2] != [0x55, 0xAA] {
            return Err(FatError::Partition("no partition table signature".to_string()));
        }
        let at = PARTITION_TABLE_OFFSET + usize::from(number - 1) * PARTITION_ENTRY_SIZE;
        let entry = &mbr[at..at + PARTITION_ENTRY_SIZE];
        Ok(Self {
            boot_flag: entry[0],
            sys_ind: entry[4],
            start_lba: LittleEndian::read_u32(&entry[8..12]),
            size: LittleEndian::read_u32(&entry[12..16]),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sys_ind == 0 || self.size == 0
    }
}

pub struct PartitionFilter {
    next: Box<dyn Stream>,
    entry: PartitionEntry,
    /// Byte range of the partition inside `next`.
    start: u64,
    len: u64,
}

impl PartitionFilter {
    /// Read the partition table from `next` and open the partition selected
    /// by `out_dev.partition`. On success `out_dev` describes the partition
    /// and `max_size` is its length in bytes.
    pub fn open(
        mut next: Box<dyn Stream>,
        out_dev: &mut DeviceDescriptor,
        max_size: &mut u64,
    ) -> Result<Self> {
        let mut mbr = [0u8; 512];
        let got = force_read(next.as_mut(), &mut mbr, 0)?;
        if got < mbr.len() {
            return Err(FatError::Partition(format!(
                "short read of partition table ({} bytes)",
                got
            )));
        }

        let number = out_dev.partition;
        let entry = PartitionEntry::parse(&mbr, number)?;
        if entry.is_empty() {
            return Err(FatError::Partition(format!("partition {} does not exist", number)));
        }

        let sector_size = u64::from(out_dev.sector_size());
        let start = u64::from(entry.start_lba) * sector_size;
        let len = u64::from(entry.size) * sector_size;
        if start + len > *max_size {
            return Err(FatError::Partition(format!(
                "partition {} extends beyond end of disk ({} > {} bytes)",
                number,
                start + len,
                *max_size
            )));
        }

        info!(
            "Partition {}: type {:#04x}, start sector {}, {} sectors",
            number, entry.sys_ind, entry.start_lba, entry.size
        );
        out_dev.hidden = entry.start_lba;
        out_dev.tot_sectors = entry.size;
        *max_size = len;

        Ok(Self {
            next,
            entry,
            start,
            len,
        })
    }

    pub fn entry(&self) -> PartitionEntry {
        self.entry
    }
}

impl Stream for PartitionFilter {
    fn kind(&self) -> StreamKind {
        StreamKind::Partition
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let room = self.len - offset;
        let n = usize::try_from(room).map_or(buf.len(), |room| buf.len().min(room));
        self.next.read(&mut buf[..n], self.start + offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let end = offset.saturating_add(buf.len() as u64);
        if end > self.len {
            debug!("Rejecting write of {} bytes at {:#x} past partition end", buf.len(), offset);
            return Err(FatError::Partition(format!(
                "write ending at {:#x} is beyond partition end {:#x}",
                end, self.len
            )));
        }
        self.next.write(buf, self.start + offset)
    }

    fn geometry(&self) -> Option<Geometry> {
        let mut geometry = self.next.geometry().unwrap_or_default();
        geometry.hidden = self.entry.start_lba;
        Some(geometry)
    }

    fn pass_through(&self) -> Option<&[u8]> {
        let data = self.next.pass_through()?;
        let start = usize::try_from(self.start).ok()?;
        let end = usize::try_from(self.start + self.len).ok()?;
        data.get(start..end.min(data.len()))
    }

    fn dos_convert(&self) -> Option<Rc<dyn DosConvert>> {
        self.next.dos_convert()
    }

    fn next(&self) -> Option<&dyn Stream> {
        Some(self.next.as_ref())
    }

    fn next_mut(&mut self) -> Option<&mut dyn Stream> {
        Some(self.next.as_mut())
    }
}

#[cfg(test)]
pub(crate) fn mbr_image(entries: &[(u8, u32, u32)], total: usize) -> Vec<u8> {
    let mut image = vec![0u8; total];
    for (i, &(sys_ind, start, size)) in entries.iter().enumerate() {
        let at = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
        image[at + 4] = sys_ind;
        LittleEndian::write_u32(&mut image[at + 8..at + 12], start);
        LittleEndian::write_u32(&mut image[at + 12..at + 16], size);
    }
    image[510] = 0x55;
    image[511] = 0xAA;
    image
}
