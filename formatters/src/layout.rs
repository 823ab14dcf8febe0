// FAT layout solver.
// Searches (FAT width, cluster size) for a layout whose clusters cover the
// disk and fit both the FAT width and the FAT length. All sector arithmetic
// is 32-bit unsigned, wrapping where the FAT length formula relies on it.

use crate::old_dos;
use fatkit_core::{DeviceDescriptor, FatError, Result, SolverConfig};
use log::{debug, log, warn, Level};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster count limits (exclusive) per FAT width.
pub const FAT12_LIMIT: u32 = 4085;
pub const FAT16_LIMIT: u32 = 65525;
pub const FAT32_LIMIT: u32 = 0x0FFF_FFF5;

pub const FAT16_MIN_CLUSTERS: u32 = 4086;
pub const FAT32_MIN_CLUSTERS: u32 = 65526;

pub const MAX_CLUSTER_SIZE: u8 = 128;
/// Root directory sectors padding may grow to before the FAT grows instead.
const MAX_PADDED_DIR_LEN: u16 = 32;
const MAX_ITERATIONS: usize = 256;

/// Filesystem geometry. As solver input a zero field means "choose".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLayout {
    pub fat_bits: u8,
    /// Sectors per cluster.
    pub cluster_size: u8,
    pub num_fat: u8,
    /// Sectors per FAT copy.
    pub fat_len: u32,
    /// Root directory sectors, 0 on FAT32.
    pub dir_len: u16,
    /// Reserved sectors before the first FAT.
    pub fat_start: u16,
    pub dir_start: u32,
    pub clus_start: u32,
    pub num_clus: u32,
    pub sector_size: u16,
    pub backup_boot: u16,
    pub info_sector: u16,
    pub root_cluster: u32,
    pub primary_fat: u8,
    pub write_all_fats: bool,
}

/// Cluster count bounds `(min, limit)` for a FAT width; `limit` is exclusive.
pub fn cluster_bounds(fat_bits: u8) -> Result<(u32, u32)> {
    match fat_bits {
        12 => Ok((1, FAT12_LIMIT)),
        16 => Ok((FAT16_MIN_CLUSTERS, FAT16_LIMIT)),
        32 => Ok((FAT32_MIN_CLUSTERS, FAT32_LIMIT)),
        other => Err(FatError::Internal(format!("bad number of FAT bits {}", other))),
    }
}

/// FAT width implied by a cluster count.
pub fn fat_bits_for(num_clus: u32) -> u8 {
    if num_clus < FAT12_LIMIT {
        12
    } else if num_clus < FAT16_LIMIT {
        16
    } else {
        32
    }
}

/// Sector count described by a geometry, less the part of the first
/// cylinder taken by hidden sectors.
pub fn sectors_from_geometry(dev: &DeviceDescriptor) -> Result<u32> {
    let per_cyl = u64::from(dev.geometry().sectors_per_cylinder());
    if per_cyl == 0 || dev.tracks == 0 {
        return Err(FatError::InvalidInput("Number of sectors not known".to_string()));
    }
    let mut tot = u64::from(dev.tracks) * per_cyl;
    let slack = u64::from(dev.hidden) % per_cyl;
    if tot > slack {
        tot -= slack;
    }
    u32::try_from(tot).map_err(|_| FatError::TooManySectors(tot))
}

/// Outcome of one layout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
    Fits,
    /// Too many clusters for the FAT width: raise it or the cluster size.
    TooManyForBits,
    /// Too many clusters for a fixed FAT length: raise the cluster size only.
    TooManyForFatLen,
    /// Too few clusters for the FAT width: lower it or the cluster size.
    TooFew,
}

impl fmt::Display for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Fit::Fits => 0,
            Fit::TooManyForBits => 1,
            Fit::TooManyForFatLen => 2,
            Fit::TooFew => -1,
        };
        write!(f, "{}", code)
    }
}

impl FsLayout {
    fn update_clus_start(&mut self) -> u32 {
        self.dir_start = u32::from(self.fat_start)
            .wrapping_add(u32::from(self.num_fat).wrapping_mul(self.fat_len));
        self.clus_start = self.dir_start.wrapping_add(u32::from(self.dir_len));
        self.clus_start
    }

    fn calc_num_clus(&mut self, tot_sectors: u32) {
        let clus_start = self.update_clus_start();
        self.num_clus = tot_sectors.saturating_sub(clus_start) / u32::from(self.cluster_size);
    }

    fn sector_size_u32(&self) -> u32 {
        u32::from(self.sector_size)
    }

    /// FAT length for the remaining sectors.
    fn calc_fat_len(&mut self, tot_sectors: u32) -> Fit {
        self.fat_len = 0;
        let clus_start = self.update_clus_start();
        if clus_start >= tot_sectors {
            return Fit::TooFew;
        }
        let mut rem_sect = tot_sectors - clus_start;

        // An odd remainder cannot be used up by an even number of FATs and
        // even-sized clusters.
        if rem_sect % 2 == 1 && self.num_fat % 2 == 0 && self.cluster_size % 2 == 0 {
            rem_sect -= 1;
        }

        let cluster_size = u32::from(self.cluster_size);
        let fat_nybbles = u32::from(self.fat_bits / 4);
        let mut numerator = rem_sect.wrapping_add(2 * cluster_size);
        let mut denominator =
            cluster_size * self.sector_size_u32() * 2 + u32::from(self.num_fat) * fat_nybbles;

        if fat_nybbles == 3 {
            if rem_sect > 256 * FAT12_LIMIT {
                return Fit::TooManyForBits;
            }
            numerator = numerator.wrapping_mul(fat_nybbles);
        } else {
            denominator /= fat_nybbles;
        }

        // The numerator may have wrapped for sector counts close to 2^32.
        // Taking one denominator off and adding one to the quotient cancels
        // the wrap.
        let mut corr = 0;
        if rem_sect > denominator {
            numerator = numerator.wrapping_sub(denominator);
            corr = 1;
        }

        self.fat_len = numerator.wrapping_sub(1) / denominator + 1 + corr;
        Fit::Fits
    }

    /// Cluster count for the current FAT width, cluster size and FAT length.
    /// With `allow_pad`, too many clusters are fixed by growing the root
    /// directory (if allowed) and then the FAT until the excess is wasted.
    fn calc_other(&mut self, tot_sectors: u32, allow_dir_change: bool, allow_pad: bool) -> Result<Fit> {
        let (min_clus, max_clus) = cluster_bounds(self.fat_bits)?;
        let nybbles = u64::from(self.fat_bits / 4);

        loop {
            if self.update_clus_start() >= tot_sectors {
                return Ok(Fit::TooFew);
            }
            self.calc_num_clus(tot_sectors);

            let capacity = u64::from(self.fat_len) * u64::from(self.sector_size) * 2 / nybbles;
            if capacity >= 2 && u64::from(self.num_clus) > capacity - 2 {
                return Ok(Fit::TooManyForFatLen);
            }
            if self.num_clus < min_clus {
                return Ok(Fit::TooFew);
            }
            if self.num_clus < max_clus {
                break;
            }
            if !allow_pad {
                return Ok(Fit::TooManyForBits);
            }

            // Nothing on disk records the cluster count; it is whatever is
            // left after the system area. Make the system area bigger.
            let bwaste = tot_sectors
                .wrapping_sub(self.clus_start)
                .wrapping_sub(max_clus.wrapping_mul(u32::from(self.cluster_size)))
                .wrapping_add(1);
            let mut waste = u16::try_from(bwaste).map_err(|_| {
                FatError::Internal(format!("{} sectors to pad is too many", bwaste))
            })?;

            let mut dir_grow = 0u16;
            if allow_dir_change {
                dir_grow = MAX_PADDED_DIR_LEN.saturating_sub(self.dir_len).min(waste);
                waste -= dir_grow;
            }
            let num_fat = u16::from(self.num_fat);
            let fat_grow = ((u32::from(waste) + u32::from(num_fat) - 1) / u32::from(num_fat)) as u16;
            self.fat_len += u32::from(fat_grow);
            waste = waste.wrapping_sub(fat_grow.wrapping_mul(num_fat));

            // Give back directory growth the FAT growth made unnecessary.
            let dir_shrink = waste.wrapping_sub(fat_grow.wrapping_mul(num_fat)).min(dir_grow);
            self.dir_len += dir_grow - dir_shrink;
        }

        if fat_bits_for(self.num_clus) != self.fat_bits {
            return Err(FatError::Internal(format!(
                "{} clusters do not make a {} bit FAT",
                self.num_clus, self.fat_bits
            )));
        }

        if self.fat_bits == 32 {
            self.primary_fat = 0;
            self.write_all_fats = true;
            self.root_cluster = 2;
            self.info_sector = 1;
            if self.backup_boot == 0 {
                self.backup_boot = if self.fat_start <= 6 {
                    self.fat_start.saturating_sub(1)
                } else {
                    6
                };
            }
            if self.fat_start < 3 {
                return Err(FatError::ReservedSectors(
                    "For FAT 32, reserved sectors need to be at least 3".to_string(),
                ));
            }
            if self.fat_start <= self.backup_boot {
                warn!(
                    "Reserved sectors ({}) must be more than backupBoot ({})",
                    self.fat_start, self.backup_boot
                );
                self.backup_boot = 0;
            }
        }
        Ok(Fit::Fits)
    }

    /// Verify the coverage, width and capacity invariants for `tot_sectors`.
    pub fn check(&self, tot_sectors: u32) -> Result<()> {
        let fail = |what: &str| Err(FatError::Internal(format!("layout {:?}: {}", self, what)));
        let (min_clus, max_clus) = cluster_bounds(self.fat_bits)?;
        if self.num_clus < min_clus || self.num_clus >= max_clus {
            return fail("cluster count out of range for FAT width");
        }
        if (self.fat_bits == 32) != (self.dir_len == 0) {
            return fail("root directory length does not match FAT width");
        }
        if !self.cluster_size.is_power_of_two() {
            return fail("cluster size is not a power of two");
        }
        let used = u64::from(self.clus_start)
            + u64::from(self.num_clus) * u64::from(self.cluster_size);
        let tot = u64::from(tot_sectors);
        if used > tot || tot >= used + u64::from(self.cluster_size) {
            return fail("clusters do not cover the disk");
        }
        let needed = (u64::from(self.num_clus) + 2) * u64::from(self.fat_bits) / 4;
        if needed > u64::from(self.fat_len) * u64::from(self.sector_size) * 2 {
            return fail("FAT too small for cluster count");
        }
        Ok(())
    }

    /// Entries the root directory holds (0 on FAT32).
    pub fn root_entries(&self) -> u16 {
        if self.fat_bits == 32 {
            0
        } else {
            (u32::from(self.dir_len) * self.sector_size_u32() / 32) as u16
        }
    }

    /// End-of-chain marker for this FAT width.
    pub fn end_of_chain(&self) -> u32 {
        match self.fat_bits {
            12 => 0xfff,
            16 => 0xffff,
            _ => 0x0fff_ffff,
        }
    }
}

/// What the solver is asked to lay out.
#[derive(Debug, Clone)]
pub struct SolverRequest<'a> {
    pub dev: &'a DeviceDescriptor,
    pub want_fat32: bool,
    pub tot_sectors: u64,
    /// Caller constraints; zero fields are left to the solver.
    pub partial: FsLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub layout: FsLayout,
    /// Media descriptor byte.
    pub media: u8,
}

/// Deterministic layout search; holds nothing between calls but its config.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutSolver {
    config: SolverConfig,
}

impl LayoutSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    fn step_level(&self) -> Level {
        if self.config.trace_steps {
            Level::Info
        } else {
            Level::Trace
        }
    }

    fn summary_level(&self) -> Level {
        if self.config.trace_steps || self.config.summary {
            Level::Info
        } else {
            Level::Debug
        }
    }

    pub fn solve(&self, req: &SolverRequest<'_>) -> Result<Solution> {
        let tot_sectors =
            u32::try_from(req.tot_sectors).map_err(|_| FatError::TooManySectors(req.tot_sectors))?;
        if tot_sectors == 0 {
            return Err(FatError::InvalidInput("Number of sectors not known".to_string()));
        }

        let dev = req.dev;
        let mut fs = req.partial;
        if fs.num_fat == 0 {
            fs.num_fat = 2;
        }
        if fs.sector_size == 0 {
            fs.sector_size = dev.sector_size() as u16;
        }
        if !fs.sector_size.is_power_of_two() || !(128..=4096).contains(&fs.sector_size) {
            return Err(FatError::InvalidInput(format!("bad sector size {}", fs.sector_size)));
        }
        if fs.cluster_size != 0 && !fs.cluster_size.is_power_of_two() {
            return Err(FatError::InvalidInput(format!(
                "cluster size {} is not a power of two",
                fs.cluster_size
            )));
        }
        if !matches!(dev.fat_bits, 0 | 12 | 16 | 32) {
            return Err(FatError::InvalidInput(format!("bad FAT width {}", dev.fat_bits)));
        }
        fs.info_sector = 0;

        let may_change_boot_size = fs.fat_start == 0;
        let may_change_fat_bits = dev.fat_bits == 0 && !req.want_fat32;
        let may_change_cluster_size = fs.cluster_size == 0;
        let may_change_root_size = fs.dir_len == 0;
        let may_change_fat_len = fs.fat_len == 0;
        let mut may_pad = false;

        if (may_change_fat_bits || dev.fat_bits == 12) && (may_change_boot_size || fs.fat_start == 1) {
            if let Some(solution) = self.try_old_dos(dev, &fs, tot_sectors)? {
                return Ok(solution);
            }
        }

        let per_cyl = dev.geometry().sectors_per_cylinder();
        let media = if dev.hidden != 0 || per_cyl == 0 || tot_sectors % per_cyl != 0 {
            0xf8
        } else {
            0xf0
        };

        fs.fat_bits = match dev.fat_bits {
            0 if req.want_fat32 => 32,
            0 => 12,
            bits => bits,
        };
        if fs.cluster_size == 0 {
            fs.cluster_size = if tot_sectors < 2400 && dev.heads == 2 {
                2
            } else if may_change_fat_len && fs.fat_bits == 32 {
                8
            } else {
                1
            };
        }
        if fs.dir_len == 0 {
            fs.dir_len = match tot_sectors {
                t if t < 1200 && dev.heads == 1 => 4,
                t if t < 1200 => 7,
                t if t <= 3840 => 14,
                t if t <= 7680 => 15,
                _ => 32,
            };
        }
        let saved_dir_len = fs.dir_len;

        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(FatError::Internal(format!(
                    "no layout found after {} attempts",
                    MAX_ITERATIONS
                )));
            }

            if may_change_boot_size {
                fs.fat_start = if fs.fat_bits == 32 { 32 } else { 1 };
            }
            if fs.fat_bits == 32 {
                fs.dir_len = 0;
            } else if fs.dir_len == 0 {
                fs.dir_len = saved_dir_len;
            }

            log!(
                self.step_level(),
                "FAT={} Cluster={}{}",
                fs.fat_bits,
                fs.cluster_size,
                if may_pad { " may_pad" } else { "" }
            );

            let mut fit = Fit::Fits;
            if may_change_fat_len {
                fit = fs.calc_fat_len(tot_sectors);
            }
            if fit == Fit::Fits {
                fit = fs.calc_other(tot_sectors, may_change_root_size, may_pad)?;
            }
            log!(self.step_level(), " fit={}", fit);

            match fit {
                Fit::Fits => break,
                Fit::TooManyForBits | Fit::TooManyForFatLen if may_pad => {
                    return Err(FatError::Internal(format!(
                        "padded {} bit layout still has too many clusters",
                        fs.fat_bits
                    )));
                }
                _ => {}
            }

            if fit == Fit::TooFew {
                if may_change_cluster_size && may_change_fat_len && fs.cluster_size > 1 {
                    fs.cluster_size /= 2;
                    continue;
                }

                // Raising the FAT width made the FAT big enough to push the
                // cluster count under the new minimum: go back and pad.
                if !may_change_fat_bits || req.want_fat32 {
                    warn!("Too few clusters for {} bit fat", fs.fat_bits);
                }
                fs.fat_bits = match fs.fat_bits {
                    32 => 16,
                    16 => 12,
                    _ => {
                        let needed = fs.update_clus_start().saturating_add(u32::from(fs.cluster_size));
                        return Err(FatError::DiskTooSmall { tot_sectors, needed });
                    }
                };
                may_pad = true;
                continue;
            }

            if fit == Fit::TooManyForBits && may_change_fat_bits {
                if fs.fat_bits == 12 && (!may_change_cluster_size || fs.cluster_size >= 8) {
                    fs.fat_bits = 16;
                    if may_change_cluster_size {
                        fs.cluster_size = 1;
                    }
                    continue;
                }
                if fs.fat_bits == 16 && (!may_change_cluster_size || fs.cluster_size >= 64) {
                    fs.fat_bits = 32;
                    if may_change_cluster_size {
                        fs.cluster_size = if may_change_fat_len { 8 } else { 1 };
                    }
                    continue;
                }
            }

            if may_change_cluster_size && fs.cluster_size < MAX_CLUSTER_SIZE {
                fs.cluster_size *= 2;
                continue;
            }

            return Err(match fit {
                Fit::TooManyForFatLen => FatError::TooManyClustersForFatLen(fs.fat_len),
                _ => FatError::TooManyClustersForBits(fs.fat_bits),
            });
        }

        fs.check(tot_sectors)?;
        log!(
            self.summary_level(),
            " FAT{} Cluster_size={} {} clusters FAT_LEN={}",
            fs.fat_bits,
            fs.cluster_size,
            fs.num_clus,
            fs.fat_len
        );
        Ok(Solution { layout: fs, media })
    }

    /// Fixed parameters for historical floppy geometries, if one matches and
    /// its layout holds on this many sectors.
    fn try_old_dos(
        &self,
        dev: &DeviceDescriptor,
        partial: &FsLayout,
        tot_sectors: u32,
    ) -> Result<Option<Solution>> {
        let params = match old_dos::by_params(
            dev.tracks,
            dev.heads,
            dev.sectors,
            partial.dir_len,
            partial.cluster_size,
        )? {
            Some(params) => params,
            None => return Ok(None),
        };

        let mut fs = *partial;
        fs.fat_start = 1;
        fs.cluster_size = params.cluster_size;
        fs.dir_len = params.dir_len;
        fs.fat_len = params.fat_len;
        fs.fat_bits = 12;
        let fit = fs.calc_other(tot_sectors, false, false)?;
        if fit != Fit::Fits || fs.check(tot_sectors).is_err() {
            debug!(
                "{}K DOS format does not fit {} sectors (fit={}), solving instead",
                params.size_kib(),
                tot_sectors,
                fit
            );
            return Ok(None);
        }

        log!(
            self.summary_level(),
            " FAT12 Cluster_size={} {} clusters FAT_LEN={} ({}K DOS format)",
            fs.cluster_size,
            fs.num_clus,
            fs.fat_len,
            params.size_kib()
        );
        Ok(Some(Solution {
            layout: fs,
            media: params.media,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(heads: u16, sectors: u16) -> DeviceDescriptor {
        let mut dev = DeviceDescriptor::image("test.img");
        dev.heads = heads;
        dev.sectors = sectors;
        dev
    }

    fn solve(dev: &DeviceDescriptor, tot: u64, partial: FsLayout) -> Result<Solution> {
        LayoutSolver::default().solve(&SolverRequest {
            dev,
            want_fat32: false,
            tot_sectors: tot,
            partial,
        })
    }

    #[test]
    fn test_fat_len_formula() {
        let mut fs = FsLayout {
            fat_bits: 12,
            cluster_size: 1,
            num_fat: 2,
            dir_len: 15,
            fat_start: 1,
            sector_size: 512,
            ..FsLayout::default()
        };
        assert_eq!(fs.calc_fat_len(4124), Fit::Fits);
        assert_eq!(fs.fat_len, 12);

        fs.cluster_size = 2;
        assert_eq!(fs.calc_fat_len(4125), Fit::Fits);
        assert_eq!(fs.fat_len, 7);

        assert_eq!(fs.calc_fat_len(2_000_000), Fit::TooManyForBits);
    }

    #[test]
    fn test_fat12_ceiling_is_kept() {
        let s = solve(&dev(4, 32), 4124, FsLayout::default()).unwrap();
        let l = s.layout;
        assert_eq!((l.fat_bits, l.cluster_size, l.num_clus), (12, 1, 4084));
        assert_eq!((l.fat_len, l.dir_len, l.clus_start), (12, 15, 40));
        assert_eq!(s.media, 0xf8);
    }

    #[test]
    fn test_one_cluster_over_escalates() {
        let l = solve(&dev(4, 32), 4125, FsLayout::default()).unwrap().layout;
        assert_eq!((l.fat_bits, l.cluster_size, l.num_clus), (12, 2, 2047));
        assert_eq!((l.fat_len, l.clus_start), (7, 30));
    }

    #[test]
    fn test_fixed_cluster_pads_root_directory() {
        let partial = FsLayout {
            cluster_size: 1,
            ..FsLayout::default()
        };
        let l = solve(&dev(4, 32), 4125, partial).unwrap().layout;
        assert_eq!((l.fat_bits, l.num_clus, l.fat_len), (12, 4084, 12));
        assert_eq!((l.dir_len, l.clus_start), (16, 41));
    }

    #[test]
    fn test_old_dos_format() {
        let mut d = dev(2, 18);
        d.tracks = 80;
        let s = solve(&d, 2880, FsLayout::default()).unwrap();
        assert_eq!(s.media, 0xf0);
        assert_eq!((s.layout.fat_len, s.layout.dir_len, s.layout.num_clus), (9, 14, 2847));

        let mut d = dev(2, 9);
        d.tracks = 40;
        let s = solve(&d, 720, FsLayout::default()).unwrap();
        assert_eq!((s.media, s.layout.cluster_size, s.layout.num_clus), (0xfd, 2, 354));
    }

    #[test]
    fn test_media_byte() {
        assert_eq!(solve(&dev(2, 18), 2880, FsLayout::default()).unwrap().media, 0xf0);
        assert_eq!(solve(&dev(2, 18), 2881, FsLayout::default()).unwrap().media, 0xf8);
        let mut hidden = dev(2, 18);
        hidden.hidden = 1;
        assert_eq!(solve(&hidden, 2880, FsLayout::default()).unwrap().media, 0xf8);
    }

    #[test]
    fn test_fixed_fat_len_too_small() {
        let partial = FsLayout {
            fat_len: 1,
            ..FsLayout::default()
        };
        assert!(matches!(
            solve(&dev(16, 63), 100_000, partial),
            Err(FatError::TooManyClustersForFatLen(1))
        ));
    }

    #[test]
    fn test_fat32_reserved_sectors() {
        let req = |fat_start, backup_boot| {
            LayoutSolver::default().solve(&SolverRequest {
                dev: &dev(16, 63),
                want_fat32: true,
                tot_sectors: 500_000,
                partial: FsLayout {
                    fat_start,
                    backup_boot,
                    ..FsLayout::default()
                },
            })
        };
        assert!(matches!(req(2, 0), Err(FatError::ReservedSectors(_))));
        let l = req(4, 0).unwrap().layout;
        assert_eq!((l.fat_bits, l.backup_boot, l.cluster_size, l.num_clus), (32, 3, 4, 124_512));
        assert_eq!(req(4, 5).unwrap().layout.backup_boot, 0);
    }

    #[test]
    fn test_too_many_sectors() {
        assert!(matches!(
            solve(&dev(255, 63), u64::from(u32::MAX) + 1, FsLayout::default()),
            Err(FatError::TooManySectors(_))
        ));
    }

    #[test]
    fn test_tiny_disk() {
        assert!(matches!(
            solve(&dev(2, 32), 10, FsLayout::default()),
            Err(FatError::DiskTooSmall { tot_sectors: 10, .. })
        ));
    }

    #[test]
    fn test_fat16_disk() {
        let l = solve(&dev(16, 63), 262_144, FsLayout::default()).unwrap().layout;
        assert_eq!((l.fat_bits, l.cluster_size, l.fat_len), (16, 4, 256));
        assert_eq!((l.dir_len, l.clus_start, l.num_clus), (32, 545, 65_399));
    }

    #[test]
    fn test_fat_len_near_u32_limit() {
        let s = LayoutSolver::default()
            .solve(&SolverRequest {
                dev: &dev(255, 63),
                want_fat32: true,
                tot_sectors: u64::from(u32::MAX),
                partial: FsLayout::default(),
            })
            .unwrap();
        let l = s.layout;
        assert_eq!((l.fat_bits, l.cluster_size, l.fat_start), (32, 16, 32));
        assert_eq!((l.fat_len, l.clus_start, l.num_clus), (2_095_106, 4_190_244, 268_173_565));
        assert_eq!(l.backup_boot, 6);
    }

    #[test]
    fn test_every_solution_holds_invariants() {
        let solver = LayoutSolver::default();
        for (heads, sectors) in [(2, 18), (16, 63), (255, 63), (1, 8)] {
            let d = dev(heads, sectors);
            for want_fat32 in [false, true] {
                let totals = (1..300_000u64).step_by(389).chain((300_000..5_000_000).step_by(49_991));
                for tot in totals {
                    let req = SolverRequest {
                        dev: &d,
                        want_fat32,
                        tot_sectors: tot,
                        partial: FsLayout::default(),
                    };
                    match solver.solve(&req) {
                        Ok(first) => {
                            first.layout.check(tot as u32).unwrap();
                            assert_eq!(solver.solve(&req).unwrap(), first);
                        }
                        Err(FatError::DiskTooSmall { .. }) => assert!(tot < 64),
                        Err(e) => panic!("{} sectors on {}/{}: {}", tot, heads, sectors, e),
                    }
                }
            }
        }
    }

    #[test]
    fn test_sectors_from_geometry() {
        let mut d = dev(2, 18);
        d.tracks = 80;
        assert_eq!(sectors_from_geometry(&d).unwrap(), 2880);
        d.hidden = 40;
        assert_eq!(sectors_from_geometry(&d).unwrap(), 2876);
        d.tracks = u32::MAX;
        assert!(matches!(sectors_from_geometry(&d), Err(FatError::TooManySectors(_))));
        assert!(sectors_from_geometry(&dev(0, 0)).is_err());
    }
}
