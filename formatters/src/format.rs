// Format operation: pick a device, open its pipeline, solve the layout and
// write an empty FAT filesystem through a sector buffer.

use crate::boot_sector::{encode_label, BootSector, FsInfo, DEFAULT_LABEL};
use crate::layout::{sectors_from_geometry, FsLayout, LayoutSolver, Solution, SolverRequest};
use crate::old_dos;
use fatkit_core::{
    AsciiConvert, DeviceDescriptor, DosConvert, FatError, FatkitConfig, GeometryMode, LockMode,
    OpenMode, Result, SkipLayers, IMAGE_DRIVE,
};
use fatkit_platform::default_opener;
use fatkit_streams::filters::BufferFilter;
use fatkit_streams::{force_read, force_write, ImageOpener, Stream};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub const ATTR_VOLUME_ID: u8 = 0x08;
/// Sectors zeroed per write when clearing FATs and directories.
const ZERO_CHUNK_SECTORS: usize = 64;
/// Smallest sector that can hold a boot sector.
const MIN_FORMAT_SECTOR: u32 = 512;

/// Geometry and layering the command line puts over a configured device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceOverrides {
    /// Historical floppy size in KiB, expanded to its DOS geometry.
    pub size_kib: Option<u32>,
    pub tracks: Option<u32>,
    pub heads: Option<u16>,
    pub sectors: Option<u16>,
    pub hidden: Option<u32>,
    pub sector_size: Option<u16>,
    pub offset: Option<u64>,
    pub partition: Option<u8>,
    pub swap: bool,
    pub data_map: Option<String>,
}

impl DeviceOverrides {
    pub fn apply(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        if let Some(kib) = self.size_kib {
            let format = old_dos::by_size(kib)?.ok_or_else(|| {
                FatError::InvalidInput(format!("no DOS floppy format of {} KiB", kib))
            })?;
            dev.tracks = format.tracks;
            dev.heads = format.heads;
            dev.sectors = format.sectors;
        }
        if let Some(tracks) = self.tracks {
            dev.tracks = tracks;
        }
        if let Some(heads) = self.heads {
            dev.heads = heads;
        }
        if let Some(sectors) = self.sectors {
            dev.sectors = sectors;
        }
        if let Some(hidden) = self.hidden {
            dev.hidden = hidden;
        }
        if let Some(sector_size) = self.sector_size {
            dev.sector_size = sector_size;
        }
        if let Some(offset) = self.offset {
            dev.offset = offset;
        }
        if let Some(partition) = self.partition {
            dev.partition = partition;
        }
        if self.swap {
            dev.swap = true;
        }
        if let Some(map) = &self.data_map {
            dev.data_map = Some(map.clone());
        }
        // Explicit geometry invalidates a configured size.
        if self.size_kib.is_some()
            || self.tracks.is_some()
            || self.heads.is_some()
            || self.sectors.is_some()
        {
            dev.tot_sectors = 0;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FormatRequest {
    /// Drive letter, `IMAGE_DRIVE` for an image named by `image`.
    pub drive: Option<char>,
    pub image: Option<String>,
    pub overrides: DeviceOverrides,
    pub tot_sectors: Option<u64>,
    pub want_fat32: bool,
    /// Layout constraints; zero fields are solved.
    pub layout: FsLayout,
    pub media: Option<u8>,
    pub label: Option<String>,
    pub serial: Option<u32>,
    /// Create (or extend) the image instead of requiring an existing one.
    pub create: bool,
}

impl FormatRequest {
    fn drive(&self) -> char {
        self.drive.unwrap_or(IMAGE_DRIVE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatReport {
    pub device: String,
    pub layout: FsLayout,
    pub media: u8,
    pub serial: u32,
    pub label: String,
    pub tot_sectors: u32,
}

/// A solved layout for a device, nothing written.
#[derive(Debug, Clone)]
pub struct Plan {
    pub dev: DeviceDescriptor,
    pub tot_sectors: u32,
    pub solution: Solution,
}

pub struct Formatter {
    config: FatkitConfig,
    opener: ImageOpener,
}

impl Formatter {
    pub fn new(config: FatkitConfig) -> Self {
        Self::with_opener(config, default_opener())
    }

    pub fn with_opener(config: FatkitConfig, opener: ImageOpener) -> Self {
        Self { config, opener }
    }

    /// Configured descriptors for the drive, overrides applied. An image
    /// drive with no table entry gets an implicit descriptor.
    pub fn candidates(&self, req: &FormatRequest) -> Result<Vec<DeviceDescriptor>> {
        let drive = req.drive();
        let mut devices = self.config.devices_for(drive);
        if devices.is_empty() {
            if drive != IMAGE_DRIVE {
                return Err(FatError::Configuration(format!("drive {}: not configured", drive)));
            }
            devices.push(DeviceDescriptor::image(String::new()));
        }
        for dev in &mut devices {
            if let Some(image) = &req.image {
                dev.name = image.clone();
            }
            req.overrides.apply(dev)?;
        }
        Ok(devices)
    }

    fn total_sectors(req: &FormatRequest, dev: &DeviceDescriptor) -> Result<u64> {
        if let Some(tot) = req.tot_sectors {
            Ok(tot)
        } else if dev.tot_sectors != 0 {
            Ok(u64::from(dev.tot_sectors))
        } else {
            sectors_from_geometry(dev).map(u64::from)
        }
    }

    fn partial_layout(&self, req: &FormatRequest, dev: &DeviceDescriptor) -> FsLayout {
        let mut partial = req.layout;
        if partial.dir_len == 0 {
            partial.dir_len = self.config.dir_len.unwrap_or(0);
        }
        if partial.num_fat == 0 {
            partial.num_fat = self.config.num_fats.unwrap_or(0);
        }
        if partial.cluster_size == 0 {
            partial.cluster_size = dev.cluster_size;
        }
        if partial.sector_size == 0 {
            partial.sector_size = dev.sector_size;
        }
        partial
    }

    fn solve(&self, req: &FormatRequest, dev: &mut DeviceDescriptor, tot_sectors: u64) -> Result<Solution> {
        if !dev.geometry().is_known() {
            if let Ok(tot) = u32::try_from(tot_sectors) {
                dev.tot_sectors = tot;
                dev.fill_lba_geometry();
            }
        }
        let dev: &DeviceDescriptor = dev;
        LayoutSolver::new(self.config.solver).solve(&SolverRequest {
            dev,
            want_fat32: req.want_fat32,
            tot_sectors,
            partial: self.partial_layout(req, dev),
        })
    }

    /// Solve the layout without writing. Named images are probed read-only.
    pub fn plan(&self, req: &FormatRequest) -> Result<Plan> {
        let mut last_error = None;
        for dev in self.candidates(req)? {
            let mut out_dev = dev.clone();
            if !dev.name.is_empty() {
                if let Err(e) = self.opener.open_image(
                    &mut out_dev,
                    &dev,
                    &dev.name,
                    OpenMode::READ_ONLY,
                    GeometryMode::AlwaysProbe,
                    LockMode::Shared,
                    SkipLayers::NONE,
                ) {
                    debug!("Skipping {}: {}", dev.name, e);
                    last_error = Some(e);
                    continue;
                }
            }
            let solved = Self::total_sectors(req, &out_dev).and_then(|tot| {
                let solution = self.solve(req, &mut out_dev, tot)?;
                Ok((tot, solution))
            });
            match solved {
                Ok((tot, solution)) => {
                    return Ok(Plan {
                        dev: out_dev,
                        tot_sectors: tot as u32,
                        solution,
                    })
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| FatError::Configuration("no usable device".to_string())))
    }

    /// Open the first candidate that passes the size and readability checks.
    fn open_target(&self, req: &FormatRequest) -> Result<(DeviceDescriptor, Box<dyn Stream>, u64)> {
        let mode = if req.create { OpenMode::CREATE } else { OpenMode::READ_WRITE };
        let mut last_error = None;

        for dev in self.candidates(req)? {
            if dev.name.is_empty() {
                last_error = Some(FatError::InvalidInput(format!(
                    "no image or device given for drive {}:",
                    dev.drive
                )));
                continue;
            }
            let requested_sector = match req.layout.sector_size {
                0 => dev.sector_size(),
                n => u32::from(n),
            };
            if let Err(e) = check_sector_size(requested_sector) {
                last_error = Some(e);
                continue;
            }
            let mut out_dev = dev.clone();
            let check = self
                .opener
                .open_image(
                    &mut out_dev,
                    &dev,
                    &dev.name,
                    mode,
                    GeometryMode::AlwaysProbe,
                    LockMode::Exclusive,
                    SkipLayers::NONE,
                )
                .and_then(|mut image| {
                    let tot = Self::total_sectors(req, &out_dev)?;
                    let requested = tot * u64::from(out_dev.blocksize());
                    if requested > image.max_size {
                        return Err(FatError::SizeTooLarge {
                            requested,
                            max: image.max_size,
                        });
                    }
                    if !req.create {
                        let mut sector = vec![0u8; out_dev.sector_size() as usize];
                        let got = force_read(image.stream.as_mut(), &mut sector, 0)?;
                        if got < sector.len() {
                            return Err(FatError::BackendOpen(format!(
                                "cannot read the first sector of {}",
                                dev.name
                            )));
                        }
                    }
                    Ok((image.stream, tot))
                });

            match check {
                Ok((stream, tot)) => {
                    info!("Formatting {} ({} sectors)", dev.name, tot);
                    return Ok((out_dev, stream, tot));
                }
                Err(e) => {
                    debug!("Skipping {}: {}", dev.name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| FatError::Configuration("no usable device".to_string())))
    }

    pub fn format(&self, req: &FormatRequest) -> Result<FormatReport> {
        let (mut dev, mut stream, tot) = self.open_target(req)?;
        let sector_size = u64::from(dev.sector_size());

        // Nothing is written until the layout is known to be writable.
        let solution = self.solve(req, &mut dev, tot)?;
        let layout = solution.layout;
        check_sector_size(u32::from(layout.sector_size))?;

        if req.create && tot > 0 {
            let last = vec![0u8; sector_size as usize];
            write_fully(stream.as_mut(), &last, (tot - 1) * sector_size)?;
        }

        let tot_sectors = tot as u32;
        stream.set_geometry(&dev)?;

        let cylinder = dev.geometry().sectors_per_cylinder().max(1) as usize;
        let mut stream: Box<dyn Stream> = Box::new(BufferFilter::new(
            stream,
            cylinder * usize::from(layout.sector_size),
            usize::from(layout.sector_size),
        )?);

        let convert: Rc<dyn DosConvert> = stream.dos_convert().unwrap_or_else(|| Rc::new(AsciiConvert));
        let label = match &req.label {
            Some(text) => Some(encode_label(text, convert.as_ref())?),
            None => None,
        };
        let serial = req.serial.unwrap_or_else(rand::random::<u32>);
        let media = match req.media {
            Some(media) => {
                if media < 0xf0 {
                    warn!("Unusual media descriptor {:#04x}", media);
                }
                media
            }
            None => solution.media,
        };

        let mut writer = SectorWriter::new(stream.as_mut(), layout.sector_size);
        writer.zero(0, u32::from(layout.fat_start))?;
        write_fats(&mut writer, &layout, media)?;
        let root_start = root_dir_start(&layout);
        let root_len = if layout.fat_bits == 32 {
            u32::from(layout.cluster_size)
        } else {
            u32::from(layout.dir_len)
        };
        writer.zero(root_start, root_len)?;
        if let Some(label) = &label {
            let mut sector = writer.blank();
            sector[..11].copy_from_slice(label);
            sector[11] = ATTR_VOLUME_ID;
            writer.write(root_start, &sector)?;
        }

        let boot = BootSector::from_layout(
            &layout,
            media,
            dev.geometry(),
            tot_sectors,
            serial,
            label.unwrap_or(DEFAULT_LABEL),
        )?;
        let boot_bytes = boot.to_bytes(usize::from(layout.sector_size))?;
        writer.write(0, &boot_bytes)?;
        if layout.fat_bits == 32 {
            let info = FsInfo {
                free_clusters: layout.num_clus - 1,
                next_free: 3,
            }
            .to_bytes(usize::from(layout.sector_size))?;
            writer.write(u32::from(layout.info_sector), &info)?;
            if layout.backup_boot != 0 {
                let backup = u32::from(layout.backup_boot);
                writer.write(backup, &boot_bytes)?;
                writer.write(backup + u32::from(layout.info_sector), &info)?;
            }
        }
        stream.flush()?;

        info!(
            "Formatted {}: FAT{}, {} clusters of {} sectors",
            dev.name, layout.fat_bits, layout.num_clus, layout.cluster_size
        );
        Ok(FormatReport {
            device: dev.name.clone(),
            layout,
            media,
            serial,
            label: req.label.clone().unwrap_or_default().to_uppercase(),
            tot_sectors,
        })
    }
}

fn check_sector_size(sector_size: u32) -> Result<()> {
    if sector_size < MIN_FORMAT_SECTOR {
        return Err(FatError::InvalidInput(format!(
            "cannot write a boot sector into {} byte sectors",
            sector_size
        )));
    }
    Ok(())
}

fn root_dir_start(layout: &FsLayout) -> u32 {
    if layout.fat_bits == 32 {
        layout.clus_start + (layout.root_cluster - 2) * u32::from(layout.cluster_size)
    } else {
        layout.dir_start
    }
}

fn write_fully(stream: &mut dyn Stream, buf: &[u8], offset: u64) -> Result<()> {
    let written = force_write(stream, buf, offset)?;
    if written < buf.len() {
        return Err(FatError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short write at {:#x}: {} of {} bytes", offset, written, buf.len()),
        )));
    }
    Ok(())
}

/// Sector-addressed writes.
struct SectorWriter<'a> {
    stream: &'a mut dyn Stream,
    sector_size: usize,
}

impl<'a> SectorWriter<'a> {
    fn new(stream: &'a mut dyn Stream, sector_size: u16) -> Self {
        Self {
            stream,
            sector_size: usize::from(sector_size),
        }
    }

    fn blank(&self) -> Vec<u8> {
        vec![0; self.sector_size]
    }

    fn write(&mut self, sector: u32, data: &[u8]) -> Result<()> {
        write_fully(self.stream, data, u64::from(sector) * self.sector_size as u64)
    }

    fn zero(&mut self, start: u32, count: u32) -> Result<()> {
        let zeros = vec![0u8; self.sector_size * ZERO_CHUNK_SECTORS];
        let mut done = 0u32;
        while done < count {
            let n = (count - done).min(ZERO_CHUNK_SECTORS as u32);
            self.write(start + done, &zeros[..n as usize * self.sector_size])?;
            done += n;
        }
        Ok(())
    }
}

/// Store `value` as FAT entry `index` of a table starting at `fat[0]`.
pub fn set_fat_entry(fat: &mut [u8], fat_bits: u8, index: usize, value: u32) {
    match fat_bits {
        12 => {
            let at = index * 3 / 2;
            if index % 2 == 0 {
                fat[at] = value as u8;
                fat[at + 1] = (fat[at + 1] & 0xf0) | ((value >> 8) as u8 & 0x0f);
            } else {
                fat[at] = (fat[at] & 0x0f) | ((value << 4) as u8 & 0xf0);
                fat[at + 1] = (value >> 4) as u8;
            }
        }
        16 => fat[index * 2..index * 2 + 2].copy_from_slice(&(value as u16).to_le_bytes()),
        _ => fat[index * 4..index * 4 + 4].copy_from_slice(&(value & 0x0fff_ffff).to_le_bytes()),
    }
}

fn write_fats(writer: &mut SectorWriter<'_>, layout: &FsLayout, media: u8) -> Result<()> {
    let eoc = layout.end_of_chain();
    let mut first = writer.blank();
    set_fat_entry(&mut first, layout.fat_bits, 0, (eoc & !0xff) | u32::from(media));
    set_fat_entry(&mut first, layout.fat_bits, 1, eoc);
    if layout.fat_bits == 32 {
        set_fat_entry(&mut first, layout.fat_bits, layout.root_cluster as usize, eoc);
    }

    for copy in 0..u32::from(layout.num_fat) {
        let start = u32::from(layout.fat_start) + copy * layout.fat_len;
        writer.write(start, &first)?;
        writer.zero(start + 1, layout.fat_len.saturating_sub(1))?;
    }
    Ok(())
}
