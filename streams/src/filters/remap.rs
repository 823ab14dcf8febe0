// Address remapping driven by a data map such as "skip 1s,zero 31s,2m".
//
// Data regions are laid out back to back in the visible address space and
// taken from consecutive bytes of the wrapped stream. `skip` regions eat
// underlying bytes without being visible; `zero` regions are visible, read as
// zeroes and have no backing.

use crate::stream::{Stream, StreamKind};
use fatkit_core::{DosConvert, FatError, Result};
use log::debug;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Data,
    Skip,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    pub kind: RegionKind,
    /// Byte length, `None` for a final data region running to the end.
    pub len: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    kind: RegionKind,
    /// Start in the visible address space.
    start: u64,
    /// Exclusive end in the visible address space.
    end: u64,
    /// Start in the wrapped stream (data regions only).
    phys: u64,
}

fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, unit) = match text.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => text.split_at(i),
        None => (text, ""),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| FatError::DataMap(format!("bad size \"{}\"", text)))?;
    let scale = match unit.trim().to_ascii_lowercase().as_str() {
        "" => 1,
        "s" => 512,
        "k" => 1024,
        "m" => 1024 * 1024,
        other => return Err(FatError::DataMap(format!("unknown unit \"{}\"", other))),
    };
    value
        .checked_mul(scale)
        .ok_or_else(|| FatError::DataMap(format!("size \"{}\" too large", text)))
}

/// Parse a comma separated data map.
pub fn parse_data_map(map: &str) -> Result<Vec<MapItem>> {
    let parts: Vec<&str> = map.split(',').map(str::trim).collect();
    if parts.iter().all(|p| p.is_empty()) {
        return Err(FatError::DataMap("empty data map".to_string()));
    }

    let last = parts.len() - 1;
    let mut items = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let mut words = part.split_whitespace();
        let first = words.next().unwrap_or("");
        let (kind, size) = match first.to_ascii_lowercase().as_str() {
            "skip" => (RegionKind::Skip, words.next()),
            "zero" => (RegionKind::Zero, words.next()),
            "" => (RegionKind::Data, None),
            _ => (RegionKind::Data, Some(first)),
        };
        if words.next().is_some() {
            return Err(FatError::DataMap(format!("trailing text in \"{}\"", part)));
        }
        let len = match size {
            Some(size) => Some(parse_size(size)?),
            None if kind == RegionKind::Data && i == last => None,
            None => return Err(FatError::DataMap(format!("missing size in \"{}\"", part))),
        };
        items.push(MapItem { kind, len });
    }
    Ok(items)
}

pub struct RemapFilter {
    next: Box<dyn Stream>,
    regions: Vec<Region>,
}

impl RemapFilter {
    pub fn open(next: Box<dyn Stream>, map: &str, max_size: &mut u64) -> Result<Self> {
        let items = parse_data_map(map)?;
        let mut regions = Vec::with_capacity(items.len());
        let mut virt = 0u64;
        let mut phys = 0u64;
        for item in items {
            match (item.kind, item.len) {
                (RegionKind::Skip, Some(len)) => phys = phys.saturating_add(len),
                (kind, len) => {
                    let len = match len {
                        Some(len) => len,
                        None => max_size.saturating_sub(phys),
                    };
                    let end = virt.saturating_add(len);
                    regions.push(Region {
                        kind,
                        start: virt,
                        end,
                        phys,
                    });
                    if kind == RegionKind::Data {
                        phys = phys.saturating_add(len);
                    }
                    virt = end;
                }
            }
        }
        if phys > *max_size {
            return Err(FatError::SizeTooLarge {
                requested: phys,
                max: *max_size,
            });
        }
        debug!("Remap layer: {} regions, {} visible bytes", regions.len(), virt);
        *max_size = virt;
        Ok(Self { next, regions })
    }

    fn region(&self, offset: u64) -> Option<Region> {
        self.regions
            .iter()
            .find(|r| offset >= r.start && offset < r.end)
            .copied()
    }
}

fn clamp(len: usize, offset: u64, region: &Region) -> usize {
    let room = region.end - offset;
    usize::try_from(room).map_or(len, |room| len.min(room))
}

impl Stream for RemapFilter {
    fn kind(&self) -> StreamKind {
        StreamKind::Remap
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let region = match self.region(offset) {
            Some(region) => region,
            None => return Ok(0),
        };
        let len = clamp(buf.len(), offset, &region);
        match region.kind {
            RegionKind::Zero => {
                buf[..len].fill(0);
                Ok(len)
            }
            _ => self.next.read(&mut buf[..len], region.phys + (offset - region.start)),
        }
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let region = self.region(offset).ok_or_else(|| {
            FatError::DataMap(format!("write at {:#x} beyond mapped data", offset))
        })?;
        let len = clamp(buf.len(), offset, &region);
        match region.kind {
            RegionKind::Zero if buf[..len].iter().any(|&b| b != 0) => Err(FatError::DataMap(
                format!("non-zero write into zero region at {:#x}", offset),
            )),
            RegionKind::Zero => Ok(len),
            _ => self.next.write(&buf[..len], region.phys + (offset - region.start)),
        }
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
