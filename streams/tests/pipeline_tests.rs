// Pipeline builder tests: backend probing order and layer stacking.

use fatkit_core::{DeviceDescriptor, FatError, GeometryMode, LockMode, OpenMode, Result, SkipLayers};
use fatkit_streams::{
    force_read, Backend, BackendKind, BackendRequest, BackendStream, ImageOpener, MemStream,
    MemoryBackend, OpenedImage, StreamKind,
};
use std::cell::RefCell;
use std::rc::Rc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

enum Outcome {
    Decline,
    Fail,
    GeometryFail,
    Open,
}

struct MockBackend {
    kind: BackendKind,
    outcome: Outcome,
    tried: Rc<RefCell<Vec<BackendKind>>>,
}

impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn open(
        &self,
        _req: &BackendRequest<'_>,
        _out_dev: &mut DeviceDescriptor,
    ) -> Result<Option<BackendStream>> {
        self.tried.borrow_mut().push(self.kind);
        match self.outcome {
            Outcome::Decline => Ok(None),
            Outcome::Fail => Err(FatError::BackendOpen(format!("{} offline", self.kind))),
            Outcome::GeometryFail => Err(FatError::GeometryMismatch("18 sectors".to_string())),
            Outcome::Open => Ok(Some(BackendStream {
                stream: Box::new(MemStream::new(vec![0; 4096])),
                max_size: 4096,
            })),
        }
    }
}

fn mock_opener(outcomes: Vec<(BackendKind, Outcome)>) -> (ImageOpener, Rc<RefCell<Vec<BackendKind>>>) {
    let tried = Rc::new(RefCell::new(Vec::new()));
    let backends: Vec<Box<dyn Backend>> = outcomes
        .into_iter()
        .map(|(kind, outcome)| {
            Box::new(MockBackend {
                kind,
                outcome,
                tried: tried.clone(),
            }) as Box<dyn Backend>
        })
        .collect();
    (ImageOpener::new(backends), tried)
}

fn open(opener: &ImageOpener, dev: &DeviceDescriptor, skip: SkipLayers) -> Result<OpenedImage> {
    let mut out_dev = dev.clone();
    opener.open_image(
        &mut out_dev,
        dev,
        &dev.name,
        OpenMode::READ_WRITE,
        GeometryMode::Keep,
        LockMode::None,
        skip,
    )
}

fn mem_opener(image: Vec<u8>) -> ImageOpener {
    ImageOpener::new(vec![Box::new(MemoryBackend::new(image)) as Box<dyn Backend>])
}

/// Two-sector partition 1 starting at sector 4 of an 8 KiB disk.
fn partitioned_disk(lead: usize) -> Vec<u8> {
    let mut disk = vec![0u8; lead + 8192];
    let mbr = &mut disk[lead..lead + 512];
    mbr[0x1BE + 4] = 0x01;
    mbr[0x1BE + 8..0x1BE + 12].copy_from_slice(&4u32.to_le_bytes());
    mbr[0x1BE + 12..0x1BE + 16].copy_from_slice(&2u32.to_le_bytes());
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    disk[lead + 4 * 512] = 0x99;
    disk
}

#[test]
fn test_backends_probed_in_fixed_order() {
    init_logging();
    let (opener, tried) = mock_opener(vec![
        (BackendKind::Plain, Outcome::Open),
        (BackendKind::Scsi, Outcome::Decline),
        (BackendKind::Xdf, Outcome::Fail),
    ]);
    assert_eq!(
        opener.backend_kinds(),
        vec![BackendKind::Xdf, BackendKind::Scsi, BackendKind::Plain]
    );

    let image = open(&opener, &DeviceDescriptor::image("a.img"), SkipLayers::NONE).unwrap();
    assert_eq!(image.max_size, 4096);
    assert_eq!(
        *tried.borrow(),
        vec![BackendKind::Xdf, BackendKind::Scsi, BackendKind::Plain]
    );
}

#[test]
fn test_first_success_wins() {
    let (opener, tried) = mock_opener(vec![
        (BackendKind::Scsi, Outcome::Open),
        (BackendKind::Plain, Outcome::Open),
    ]);
    open(&opener, &DeviceDescriptor::image("sg0"), SkipLayers::NONE).unwrap();
    assert_eq!(*tried.borrow(), vec![BackendKind::Scsi]);
}

#[test]
fn test_geometry_failure_stops_probing() {
    let (opener, tried) = mock_opener(vec![
        (BackendKind::Scsi, Outcome::GeometryFail),
        (BackendKind::Plain, Outcome::Open),
    ]);
    let err = open(&opener, &DeviceDescriptor::image("fd0"), SkipLayers::NONE).unwrap_err();
    assert!(err.is_geometry_failure());
    assert_eq!(*tried.borrow(), vec![BackendKind::Scsi]);
}

#[test]
fn test_last_error_reported_when_nothing_opens() {
    let (opener, _) = mock_opener(vec![
        (BackendKind::Scsi, Outcome::Decline),
        (BackendKind::Plain, Outcome::Fail),
    ]);
    let err = open(&opener, &DeviceDescriptor::image("nowhere"), SkipLayers::NONE).unwrap_err();
    assert!(matches!(err, FatError::BackendOpen(ref msg) if msg.contains("plain")));

    let (opener, _) = mock_opener(vec![(BackendKind::Plain, Outcome::Decline)]);
    assert!(matches!(
        open(&opener, &DeviceDescriptor::image("nowhere"), SkipLayers::NONE),
        Err(FatError::BackendOpen(_))
    ));
}

#[test]
fn test_floppyd_devices_only_use_floppyd() {
    let (opener, tried) = mock_opener(vec![
        (BackendKind::Plain, Outcome::Open),
        (BackendKind::Floppyd, Outcome::Fail),
    ]);
    let mut dev = DeviceDescriptor::image("remote:0");
    dev.floppyd = true;
    assert!(open(&opener, &dev, SkipLayers::NONE).is_err());
    assert_eq!(*tried.borrow(), vec![BackendKind::Floppyd]);
}

#[test]
fn test_partition_sits_on_offset() {
    init_logging();
    let opener = mem_opener(partitioned_disk(1024));
    let mut dev = DeviceDescriptor::image("disk.img");
    dev.offset = 1024;
    dev.partition = 1;

    let mut out_dev = dev.clone();
    let mut image = opener
        .open_image(
            &mut out_dev,
            &dev,
            "disk.img",
            OpenMode::READ_ONLY,
            GeometryMode::Keep,
            LockMode::None,
            SkipLayers::NONE,
        )
        .unwrap();
    assert_eq!(
        fatkit_streams::layers(image.stream.as_ref()),
        vec![StreamKind::Partition, StreamKind::Offset, StreamKind::Memory]
    );
    assert_eq!(image.max_size, 1024);
    assert_eq!(out_dev.hidden, 4);
    assert_eq!(out_dev.tot_sectors, 2);

    let mut sector = [0u8; 512];
    assert_eq!(force_read(image.stream.as_mut(), &mut sector, 0).unwrap(), 512);
    assert_eq!(sector[0], 0x99);
}

#[test]
fn test_skip_mask_exposes_whole_disk() {
    let opener = mem_opener(partitioned_disk(1024));
    let mut dev = DeviceDescriptor::image("disk.img");
    dev.offset = 1024;
    dev.partition = 1;

    let mut image = open(&opener, &dev, SkipLayers::PARTITION).unwrap();
    assert_eq!(
        fatkit_streams::layers(image.stream.as_ref()),
        vec![StreamKind::Offset, StreamKind::Memory]
    );
    assert_eq!(image.max_size, 8192);

    let mut mbr = [0u8; 512];
    force_read(image.stream.as_mut(), &mut mbr, 0).unwrap();
    assert_eq!(&mbr[510..], &[0x55, 0xAA]);
}

#[test]
fn test_all_layers_in_order() {
    let opener = mem_opener(partitioned_disk(1024));
    let mut dev = DeviceDescriptor::image("disk.img");
    dev.data_map = Some("skip 512,".to_string());
    dev.offset = 512;
    dev.swap = true;

    let image = open(&opener, &dev, SkipLayers::NONE).unwrap();
    assert_eq!(
        fatkit_streams::layers(image.stream.as_ref()),
        vec![StreamKind::Swap, StreamKind::Offset, StreamKind::Remap, StreamKind::Memory]
    );
    assert_eq!(image.max_size, 8192);
}

#[test]
fn test_layer_failure_fails_the_open() {
    let opener = mem_opener(vec![0; 1024]);
    let mut dev = DeviceDescriptor::image("blank.img");
    dev.partition = 1;
    assert!(matches!(
        open(&opener, &dev, SkipLayers::NONE),
        Err(FatError::Partition(_))
    ));

    dev.partition = 0;
    dev.data_map = Some("skip".to_string());
    assert!(matches!(open(&opener, &dev, SkipLayers::NONE), Err(FatError::DataMap(_))));
}
