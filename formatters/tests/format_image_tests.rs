/// End-to-end formatting of image files
/// Each test builds its image in a temporary directory and inspects the raw bytes

#[cfg(test)]
mod format_image_tests {
    use fatkit_core::{FatError, FatkitConfig};
    use fatkit_formatters::{BootSector, DeviceOverrides, FormatRequest, Formatter, FsInfo};
    use fatkit_streams::{ImageOpener, MemoryBackend};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn sector(data: &[u8], n: usize) -> &[u8] {
        &data[n * 512..(n + 1) * 512]
    }

    #[test]
    fn test_create_floppy_image() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("floppy.img");

        let req = FormatRequest {
            image: Some(path.to_string_lossy().into_owned()),
            overrides: DeviceOverrides {
                tracks: Some(80),
                heads: Some(2),
                sectors: Some(18),
                ..DeviceOverrides::default()
            },
            label: Some("test".to_string()),
            serial: Some(0xCAFE_BABE),
            create: true,
            ..FormatRequest::default()
        };
        let report = Formatter::new(FatkitConfig::default()).format(&req).unwrap();
        assert_eq!(report.tot_sectors, 2880);
        assert_eq!(report.media, 0xf0);
        assert_eq!(report.layout.num_clus, 2847);
        assert_eq!(report.label, "TEST");

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 1_474_560);

        let boot = BootSector::parse(sector(&data, 0)).unwrap();
        assert_eq!(boot.total_sectors(), 2880);
        assert_eq!((boot.heads, boot.sectors), (2, 18));
        let label = boot.label_block().unwrap();
        assert_eq!(label.serial, 0xCAFE_BABE);
        assert_eq!(label.label_text(), "TEST");
        assert_eq!(&label.fs_type, b"FAT12   ");

        // Both FAT copies start with the media byte and an end-of-chain entry.
        assert_eq!(&sector(&data, 1)[..4], &[0xf0, 0xff, 0xff, 0x00]);
        assert_eq!(&sector(&data, 10)[..4], &[0xf0, 0xff, 0xff, 0x00]);

        let root = sector(&data, 19);
        assert_eq!(&root[..11], b"TEST       ");
        assert_eq!(root[11], 0x08);
        assert!(root[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fat32_on_existing_image() {
        init_logging();
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(600_000 * 512).unwrap();

        let req = FormatRequest {
            image: Some(file.path().to_string_lossy().into_owned()),
            want_fat32: true,
            serial: Some(1),
            ..FormatRequest::default()
        };
        let report = Formatter::new(FatkitConfig::default()).format(&req).unwrap();
        let layout = report.layout;
        assert_eq!(report.tot_sectors, 600_000);
        assert_eq!((layout.fat_bits, layout.cluster_size, layout.fat_start), (32, 8, 32));
        assert_eq!((layout.fat_len, layout.num_clus, layout.backup_boot), (585, 74_849, 6));

        let data = std::fs::read(file.path()).unwrap();
        let boot = sector(&data, 0);
        assert_eq!(&boot[82..90], b"FAT32   ");
        assert_eq!(sector(&data, 6), boot);

        let info = FsInfo::parse(sector(&data, 1)).unwrap();
        assert_eq!((info.free_clusters, info.next_free), (74_848, 3));
        assert_eq!(FsInfo::parse(sector(&data, 7)).unwrap(), info);

        let fat = sector(&data, 32);
        assert_eq!(&fat[..4], &[0xf8, 0xff, 0xff, 0x0f]);
        assert_eq!(&fat[8..12], &[0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(&sector(&data, 32 + 585)[..12], &fat[..12]);

        let parsed = BootSector::parse(boot).unwrap().layout().unwrap();
        assert_eq!(parsed.clus_start, 1202);
        assert_eq!(parsed.num_clus, 74_849);
    }

    #[test]
    fn test_format_inside_partition() {
        init_logging();
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut image = vec![0u8; 8192 * 512];
        let entry = &mut image[0x1BE..0x1CE];
        entry[0] = 0x80;
        entry[4] = 0x01;
        entry[8..12].copy_from_slice(&63u32.to_le_bytes());
        entry[12..16].copy_from_slice(&8000u32.to_le_bytes());
        image[510] = 0x55;
        image[511] = 0xAA;
        std::fs::write(file.path(), &image).unwrap();

        let req = FormatRequest {
            image: Some(file.path().to_string_lossy().into_owned()),
            overrides: DeviceOverrides {
                partition: Some(1),
                ..DeviceOverrides::default()
            },
            ..FormatRequest::default()
        };
        let report = Formatter::new(FatkitConfig::default()).format(&req).unwrap();
        assert_eq!(report.tot_sectors, 8000);
        assert_eq!(report.media, 0xf8);
        assert_eq!((report.layout.fat_bits, report.layout.cluster_size), (12, 2));

        let data = std::fs::read(file.path()).unwrap();
        assert_eq!(data.len(), image.len());
        assert_eq!(&data[..512], &image[..512]);
        let boot = BootSector::parse(sector(&data, 63)).unwrap();
        assert_eq!((boot.hidden, boot.total_sectors()), (63, 8000));
    }

    #[test]
    fn test_requested_size_beyond_device() {
        let opener = ImageOpener::new(vec![Box::new(MemoryBackend::new(vec![0; 64 * 1024]))]);
        let formatter = Formatter::with_opener(FatkitConfig::default(), opener);
        let req = FormatRequest {
            image: Some("mem".to_string()),
            tot_sectors: Some(1000),
            ..FormatRequest::default()
        };
        assert!(matches!(
            formatter.format(&req),
            Err(FatError::SizeTooLarge { requested: 512_000, max: 65_536 })
        ));
    }

    #[test]
    fn test_missing_image_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let req = FormatRequest {
            image: Some(dir.path().join("absent.img").to_string_lossy().into_owned()),
            tot_sectors: Some(2880),
            ..FormatRequest::default()
        };
        let err = Formatter::new(FatkitConfig::default()).format(&req).unwrap_err();
        assert!(matches!(err, FatError::BackendOpen(_)));
        assert!(!dir.path().join("absent.img").exists());
    }

    #[test]
    fn test_small_sectors_leave_no_image() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.img");
        let req = FormatRequest {
            image: Some(path.to_string_lossy().into_owned()),
            overrides: DeviceOverrides {
                tracks: Some(80),
                heads: Some(2),
                sectors: Some(18),
                sector_size: Some(256),
                ..DeviceOverrides::default()
            },
            create: true,
            ..FormatRequest::default()
        };
        let err = Formatter::new(FatkitConfig::default()).format(&req).unwrap_err();
        assert!(matches!(err, FatError::InvalidInput(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_small_sectors_keep_existing_image_intact() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(2880 * 512).unwrap();
        let req = FormatRequest {
            image: Some(file.path().to_string_lossy().into_owned()),
            layout: fatkit_formatters::FsLayout {
                sector_size: 128,
                ..Default::default()
            },
            ..FormatRequest::default()
        };
        assert!(Formatter::new(FatkitConfig::default()).format(&req).is_err());
        let data = std::fs::read(file.path()).unwrap();
        assert_eq!(data.len(), 2880 * 512);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_configured_drive_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.img");
        let config: FatkitConfig = serde_json::from_str(&format!(
            r#"{{"devices":[{{"drive":"A","name":{:?},"tracks":40,"heads":2,"sectors":9}}]}}"#,
            path.to_string_lossy()
        ))
        .unwrap();

        let req = FormatRequest {
            drive: Some('a'),
            create: true,
            ..FormatRequest::default()
        };
        let report = Formatter::new(config).format(&req).unwrap();
        assert_eq!(report.media, 0xfd);
        assert_eq!(report.layout.num_clus, 354);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 720 * 512);
    }
}
