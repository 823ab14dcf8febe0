use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use fatkit_core::{
    DeviceDescriptor, FatkitConfig, GeometryMode, LockMode, OpenMode, SkipLayers,
};
use fatkit_formatters::{
    BootSector, DeviceOverrides, Extension, FormatRequest, Formatter, FsInfo, FsLayout,
};
use fatkit_platform::default_opener;
use fatkit_streams::force_read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fatkit")]
#[command(about = "Create and inspect FAT filesystems on images and devices", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/fatkit/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an empty FAT filesystem
    #[command(disable_help_flag = true)]
    Format {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Media descriptor byte (0x.. for hex)
        #[arg(short = 'm', value_parser = parse_byte)]
        media: Option<u8>,
        /// Volume label
        #[arg(short = 'v')]
        label: Option<String>,
        /// Volume serial number in hex
        #[arg(short = 'N', value_parser = parse_serial)]
        serial: Option<u32>,
        /// Create the image file
        #[arg(short = 'C')]
        create: bool,
    },
    /// Print the layout a format would use, without writing
    #[command(disable_help_flag = true)]
    Layout {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        layout: LayoutArgs,
        #[arg(long)]
        json: bool,
    },
    /// Decode the boot sector of an image
    Info {
        image: String,
        #[arg(long)]
        offset: Option<u64>,
        #[arg(long)]
        partition: Option<u8>,
        /// Hex dump of the boot sector
        #[arg(long)]
        dump: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Image file or device, instead of a configured drive
    #[arg(short = 'i')]
    image: Option<String>,
    /// DOS floppy size in KiB (160, 180, 320, 360, 720, 1200, 1440, 2880)
    #[arg(short = 'f')]
    size: Option<u32>,
    #[arg(short = 't')]
    tracks: Option<u32>,
    #[arg(short = 'h')]
    heads: Option<u16>,
    #[arg(short = 's')]
    sectors: Option<u16>,
    /// Total sectors
    #[arg(short = 'T')]
    total: Option<u64>,
    /// Hidden sectors
    #[arg(short = 'H')]
    hidden: Option<u32>,
    /// Sector size in bytes
    #[arg(short = 'M')]
    sector_size: Option<u16>,
    /// Byte offset of the filesystem
    #[arg(long)]
    offset: Option<u64>,
    /// Primary partition to format (1-4)
    #[arg(long)]
    partition: Option<u8>,
    /// Swap bytes within 16-bit words
    #[arg(long)]
    swap: bool,
    /// Data map, e.g. "skip 1s,zero 2k,1m"
    #[arg(long)]
    data_map: Option<String>,
    /// Drive letter, e.g. A:
    #[arg(value_parser = parse_drive)]
    drive: Option<char>,
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Args)]
struct LayoutArgs {
    /// Force FAT32
    #[arg(short = 'F')]
    fat32: bool,
    /// Sectors per cluster
    #[arg(short = 'c')]
    cluster_size: Option<u8>,
    /// Root directory sectors
    #[arg(short = 'r')]
    dir_len: Option<u16>,
    /// Sectors per FAT
    #[arg(short = 'L')]
    fat_len: Option<u32>,
    /// Reserved sectors
    #[arg(short = 'R')]
    reserved: Option<u16>,
    /// Number of FAT copies
    #[arg(short = 'd')]
    num_fat: Option<u8>,
    /// Backup boot sector (FAT32)
    #[arg(short = 'K')]
    backup_boot: Option<u16>,
}

fn parse_drive(s: &str) -> Result<char, String> {
    let mut chars = s.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(c), None, None) | (Some(c), Some(':'), None) if c.is_ascii_alphabetic() => {
            Ok(c.to_ascii_uppercase())
        }
        _ => Err(format!("'{}' is not a drive letter", s)),
    }
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("bad byte '{}': {}", s, e))
}

fn parse_serial(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").replace('-', "");
    u32::from_str_radix(&digits, 16).map_err(|e| format!("bad serial '{}': {}", s, e))
}

fn build_request(target: TargetArgs, layout: LayoutArgs) -> FormatRequest {
    FormatRequest {
        drive: target.drive,
        image: target.image,
        overrides: DeviceOverrides {
            size_kib: target.size,
            tracks: target.tracks,
            heads: target.heads,
            sectors: target.sectors,
            hidden: target.hidden,
            sector_size: target.sector_size,
            offset: target.offset,
            partition: target.partition,
            swap: target.swap,
            data_map: target.data_map,
        },
        tot_sectors: target.total,
        want_fat32: layout.fat32,
        layout: FsLayout {
            cluster_size: layout.cluster_size.unwrap_or(0),
            dir_len: layout.dir_len.unwrap_or(0),
            fat_len: layout.fat_len.unwrap_or(0),
            fat_start: layout.reserved.unwrap_or(0),
            num_fat: layout.num_fat.unwrap_or(0),
            backup_boot: layout.backup_boot.unwrap_or(0),
            sector_size: target.sector_size.unwrap_or(0),
            ..FsLayout::default()
        },
        ..FormatRequest::default()
    }
}

fn print_layout(layout: &FsLayout, media: u8, tot_sectors: u32) {
    println!("  Total sectors:    {}", tot_sectors);
    println!("  FAT type:         FAT{}", layout.fat_bits);
    println!("  Media descriptor: {:#04x}", media);
    println!("  Sector size:      {}", layout.sector_size);
    println!("  Cluster size:     {} sectors", layout.cluster_size);
    println!("  Reserved sectors: {}", layout.fat_start);
    println!("  FATs:             {} x {} sectors", layout.num_fat, layout.fat_len);
    if layout.fat_bits == 32 {
        println!("  Root cluster:     {}", layout.root_cluster);
        println!("  FSInfo sector:    {}", layout.info_sector);
        println!("  Backup boot:      {}", layout.backup_boot);
    } else {
        println!(
            "  Root directory:   {} sectors ({} entries)",
            layout.dir_len,
            layout.root_entries()
        );
    }
    println!("  Data start:       {}", layout.clus_start);
    println!("  Clusters:         {}", layout.num_clus);
}

fn info(image: String, offset: Option<u64>, partition: Option<u8>, dump: bool, json: bool) -> anyhow::Result<()> {
    let mut dev = DeviceDescriptor::image(image.clone());
    dev.offset = offset.unwrap_or(0);
    dev.partition = partition.unwrap_or(0);
    let mut out_dev = dev.clone();
    let mut opened = default_opener()
        .open_image(
            &mut out_dev,
            &dev,
            &image,
            OpenMode::READ_ONLY,
            GeometryMode::Keep,
            LockMode::Shared,
            SkipLayers::NONE,
        )
        .with_context(|| format!("opening {}", image))?;

    let mut sector = vec![0u8; 512];
    if force_read(opened.stream.as_mut(), &mut sector, 0)? < sector.len() {
        bail!("{} is shorter than one sector", image);
    }
    let boot = BootSector::parse(&sector)?;
    let layout = boot.layout()?;

    let fs_info = match boot.ext {
        Extension::Fat32 { info_sector, .. } if info_sector != 0 => {
            let mut buf = vec![0u8; usize::from(boot.sector_size)];
            let at = u64::from(info_sector) * u64::from(boot.sector_size);
            force_read(opened.stream.as_mut(), &mut buf, at)?;
            FsInfo::parse(&buf).ok()
        }
        _ => None,
    };

    if json {
        let out = serde_json::json!({
            "boot_sector": boot,
            "layout": layout,
            "fs_info": fs_info,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}:", image);
        println!("  Banner:           {}", String::from_utf8_lossy(&boot.banner));
        println!("  Geometry:         {} heads, {} sectors/track, {} hidden", boot.heads, boot.sectors, boot.hidden);
        if let Some(label) = boot.label_block() {
            println!("  Label:            {}", label.label_text());
            println!("  Serial:           {:04X}-{:04X}", label.serial >> 16, label.serial & 0xffff);
        }
        print_layout(&layout, boot.media, boot.total_sectors());
        if let Some(fs_info) = fs_info {
            println!("  Free clusters:    {}", fs_info.free_clusters);
            println!("  Next free:        {}", fs_info.next_free);
        }
    }

    if dump {
        for (i, line) in sector.chunks(32).enumerate() {
            println!("{:04x}: {}", i * 32, hex::encode(line));
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let config = FatkitConfig::load(cli.config.as_deref()).context("loading configuration")?;
    log::debug!("{} configured devices", config.devices.len());

    match cli.command {
        Commands::Format {
            target,
            layout,
            media,
            label,
            serial,
            create,
        } => {
            let req = FormatRequest {
                media,
                label,
                serial,
                create,
                ..build_request(target, layout)
            };
            let report = Formatter::new(config).format(&req)?;
            println!("Formatted {}", report.device);
            println!("  Serial:           {:04X}-{:04X}", report.serial >> 16, report.serial & 0xffff);
            if !report.label.is_empty() {
                println!("  Label:            {}", report.label);
            }
            print_layout(&report.layout, report.media, report.tot_sectors);
        }
        Commands::Layout { target, layout, json } => {
            let plan = Formatter::new(config).plan(&build_request(target, layout))?;
            if json {
                let out = serde_json::json!({
                    "device": plan.dev.name,
                    "tot_sectors": plan.tot_sectors,
                    "media": plan.solution.media,
                    "layout": plan.solution.layout,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_layout(&plan.solution.layout, plan.solution.media, plan.tot_sectors);
            }
        }
        Commands::Info {
            image,
            offset,
            partition,
            dump,
            json,
        } => info(image, offset, partition, dump, json)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floppy_size_flag() {
        let cli = Cli::try_parse_from(["fatkit", "layout", "-f", "720", "-i", "disk.img"]).unwrap();
        let Commands::Layout { target, layout, .. } = cli.command else {
            panic!("expected the layout command");
        };
        let req = build_request(target, layout);
        assert_eq!(req.overrides.size_kib, Some(720));

        let mut dev = DeviceDescriptor::image("disk.img");
        req.overrides.apply(&mut dev).unwrap();
        assert_eq!((dev.tracks, dev.heads, dev.sectors), (80, 2, 9));
    }

    #[test]
    fn test_label_and_verbose_flags_differ() {
        let cli = Cli::try_parse_from(["fatkit", "--verbose", "format", "-v", "DATA", "A:"]).unwrap();
        assert!(cli.verbose);
        let Commands::Format { label, target, .. } = cli.command else {
            panic!("expected the format command");
        };
        assert_eq!(label.as_deref(), Some("DATA"));
        assert_eq!(target.drive, Some('A'));
    }
}
