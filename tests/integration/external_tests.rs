//! External channel integration tests.
//!
//! Tests verify:
//! - Channels sharing an external file share one handle, even when they
//!   first touch it concurrently
//! - Cropped views compose blocks from the source image
//! - Writes reach the external image and invalidate cached blocks

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use chanstore::error::IoError;
use chanstore::{
    Access, Channel, ChannelCore, ChannelError, ExternalChannel, ExternalDatabases,
    ExternalMapping, PixelType, Window,
};

use super::test_utils::{MockImage, MockOpener};

fn registry(opener: MockOpener) -> (Arc<ExternalDatabases>, Arc<MockOpener>) {
    let opener = Arc::new(opener);
    (Arc::new(ExternalDatabases::new(opener.clone())), opener)
}

fn try_external(
    dbs: &Arc<ExternalDatabases>,
    mapping: ExternalMapping,
    access: Access,
) -> Result<ExternalChannel, ChannelError> {
    let core = ChannelCore::new(1, 1, 1, PixelType::U8).with_access(access);
    ExternalChannel::open(core, dbs.clone(), mapping)
}

fn external(dbs: &Arc<ExternalDatabases>, mapping: ExternalMapping, access: Access) -> ExternalChannel {
    try_external(dbs, mapping, access).unwrap()
}

#[test]
fn test_concurrent_first_access_opens_once() {
    let (dbs, opener) = registry(MockOpener::new(64, 64, 16));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let dbs = dbs.clone();
            thread::spawn(move || {
                let mapping = ExternalMapping::new("shared.pix", 1);
                let mut channel = external(&dbs, mapping, Access::ReadOnly);
                let mut out = vec![0u8; 16 * 16];
                channel.read_block(i, &mut out, None).unwrap();
                out[0]
            })
        })
        .collect();

    for (i, worker) in workers.into_iter().enumerate() {
        let first = worker.join().unwrap();
        let (bx, by) = (i as u32 % 4, i as u32 / 4);
        assert_eq!(first, MockImage::pixel(bx * 16, by * 16));
    }

    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    assert_eq!(dbs.open_count(), 1);
    assert_eq!(dbs.len(), 1);
}

#[test]
fn test_cropped_view() {
    let (dbs, opener) = registry(MockOpener::new(100, 80, 32));
    let mapping = ExternalMapping::new("scene.pix", 1).with_window(10, 20, 50, 40);
    let mut channel = external(&dbs, mapping, Access::ReadOnly);

    assert_eq!((channel.width(), channel.height()), (50, 40));
    assert_eq!(channel.block_count(), 2 * 2);

    let mut out = vec![0u8; 32 * 32];
    channel.read_block(3, &mut out, None).unwrap();

    // Block 3 starts at crop (32, 32) = source (42, 52); crop ends at (50, 40)
    assert_eq!(out[0], MockImage::pixel(42, 52));
    assert_eq!(out[7 * 32 + 17], MockImage::pixel(59, 59));
    assert_eq!(out[8 * 32], 0);
    assert_eq!(out[18], 0);

    assert_eq!(opener.reads.load(Ordering::SeqCst), 1);

    // Block 0 spans source columns 10..42 and rows 20..52: four source
    // blocks, one of them already cached
    channel.read_block(0, &mut out, None).unwrap();
    assert_eq!(out[0], MockImage::pixel(10, 20));
    assert_eq!(out[31 * 32 + 31], MockImage::pixel(41, 51));
    assert_eq!(opener.reads.load(Ordering::SeqCst), 4);
    assert_eq!(channel.cached_blocks(), 4);

    // Block 2 only touches source blocks already cached
    channel.read_block(2, &mut out, None).unwrap();
    assert_eq!(out[0], MockImage::pixel(10, 52));
    assert_eq!(opener.reads.load(Ordering::SeqCst), 4);
}

#[test]
fn test_write_reaches_image_and_other_channels() {
    let (dbs, opener) = registry(MockOpener::new(64, 64, 16));
    let mut writer = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::Update);
    let mut reader = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::ReadOnly);

    let mut out = vec![0u8; 16 * 16];
    writer.read_block(5, &mut out, None).unwrap();
    writer.write_block(5, &vec![77u8; 16 * 16]).unwrap();
    assert_eq!(opener.writes.load(Ordering::SeqCst), 1);

    writer.read_block(5, &mut out, None).unwrap();
    assert!(out.iter().all(|v| *v == 77));

    reader.read_block(5, &mut out, None).unwrap();
    assert!(out.iter().all(|v| *v == 77));
}

#[test]
fn test_update_access_upgrades_shared_handle() {
    let (dbs, opener) = registry(MockOpener::new(64, 64, 16));
    let mut reader = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::ReadOnly);
    let handle = reader.access_db();
    assert!(!handle.access().is_writable());

    let mut writer = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::Update);
    assert!(Arc::ptr_eq(&handle, &writer.access_db()));
    assert!(handle.access().is_writable());
    assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    assert_eq!(dbs.len(), 1);

    // The existing reader sees writes made through the upgraded image
    writer.write_block(0, &vec![5u8; 16 * 16]).unwrap();
    let mut out = vec![0u8; 16 * 16];
    reader.read_block(0, &mut out, None).unwrap();
    assert!(out.iter().all(|v| *v == 5));

    // Later read-only users share the upgraded handle
    let late = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::ReadOnly);
    assert!(late.access_db().access().is_writable());
    assert_eq!(dbs.open_count(), 2);
}

#[test]
fn test_read_only_channel_rejects_writes() {
    let (dbs, opener) = registry(MockOpener::new(64, 64, 16));
    let mut channel = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::ReadOnly);

    assert!(matches!(
        channel.write_block(0, &vec![0u8; 16 * 16]),
        Err(ChannelError::ReadOnlyViolation { .. })
    ));
    assert_eq!(opener.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unaligned_crop_write() {
    let (dbs, opener) = registry(MockOpener::new(64, 64, 16));
    let mapping = ExternalMapping::new("scene.pix", 1).with_window(8, 0, 32, 16);
    let mut channel = external(&dbs, mapping, Access::Update);

    channel.write_block(0, &vec![1u8; 16 * 16]).unwrap();
    // Straddles source blocks 0 and 1
    assert_eq!(opener.writes.load(Ordering::SeqCst), 2);

    let mut whole = external(&dbs, ExternalMapping::new("scene.pix", 1), Access::ReadOnly);
    let mut out = vec![0u8; 16 * 16];
    whole.read_block(0, &mut out, None).unwrap();
    assert_eq!(out[7], MockImage::pixel(7, 0));
    assert_eq!(out[8], 1);

    whole.read_block(1, &mut out, None).unwrap();
    assert_eq!(out[7], 1);
    assert_eq!(out[8], MockImage::pixel(24, 0));
}

#[test]
fn test_missing_image_fails_open() {
    let (dbs, _) = registry(MockOpener::new(64, 64, 16));
    let result = try_external(&dbs, ExternalMapping::new("scene.tif", 1), Access::ReadOnly);
    assert!(matches!(result, Err(ChannelError::Io(IoError::NotFound(_)))));
    assert!(dbs.is_empty());
}

#[test]
fn test_external_read_failure_clears_buffer() {
    let (dbs, opener) = registry(MockOpener::new(64, 64, 16).with_failing_reads());
    let mapping = ExternalMapping::new("scene.pix", 1).with_window(8, 8, 32, 32);
    let mut channel = external(&dbs, mapping, Access::ReadOnly);

    let mut out = vec![0xFFu8; 16 * 16];
    assert!(matches!(
        channel.read_block(0, &mut out, None),
        Err(ChannelError::Io(IoError::External(_)))
    ));
    assert!(out.iter().all(|v| *v == 0));
    assert_eq!(opener.reads.load(Ordering::SeqCst), 1);
    assert_eq!(channel.cached_blocks(), 0);

    let mut out = vec![0xFFu8; 8];
    assert!(channel.read_block(3, &mut out, Some(Window::new(4, 4, 2, 4))).is_err());
    assert_eq!(out, vec![0; 8]);
}
