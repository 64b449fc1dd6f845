//! Overview integration tests.
//!
//! Tests verify:
//! - Overviews are discovered from metadata and ordered by decimation
//! - Overview channels are opened once and cached
//! - Invalidation forces a rescan that sees rewritten metadata
//! - Validity flags persist in metadata

use std::sync::Arc;

use chanstore::{
    Access, Channel, ChannelCore, ChannelError, Compression, IoError, MemorySegmentSource,
    PixelType, SegmentParams, TiledChannel,
};

use super::test_utils::{create_memory_segment, striped_block};

/// Base 1000x1000 channel in segment 1 with overviews at 2 (segment 2) and 4 (segment 3).
fn pyramid(access: Access) -> (Arc<MemorySegmentSource>, TiledChannel) {
    let source = Arc::new(MemorySegmentSource::new());
    source.insert(1, create_memory_segment(&SegmentParams::new(1000, 1000, 256, 256)));
    source.insert(
        2,
        create_memory_segment(&SegmentParams::new(500, 500, 256, 256).with_compression(Compression::Rle)),
    );
    source.insert(3, create_memory_segment(&SegmentParams::new(250, 250, 256, 256)));

    let store = source.get(1).unwrap();
    let core = ChannelCore::new(1, 1000, 1000, PixelType::U8)
        .with_access(access)
        .with_segment_source(source.clone());
    let mut channel = TiledChannel::open(core, store).unwrap();

    channel.set_metadata_value("_Overview_4", "3 0 NEAREST");
    channel.set_metadata_value("_Overview_2", "2 1 AVERAGE");
    (source, channel)
}

#[test]
fn test_overviews_discovered_in_decimation_order() {
    let (_, mut channel) = pyramid(Access::ReadOnly);

    assert_eq!(channel.overview_count(), 2);
    assert_eq!(channel.overview_decimations(), vec!["2", "4"]);
    assert_eq!(channel.overview_resampling(0).unwrap(), "AVERAGE");
    assert!(channel.is_overview_valid(0).unwrap());
    assert!(!channel.is_overview_valid(1).unwrap());

    let half = channel.overview(0).unwrap();
    assert_eq!((half.width(), half.height()), (500, 500));
    assert_eq!(half.block_count(), 4);

    let quarter = channel.overview(1).unwrap();
    assert_eq!((quarter.width(), quarter.height()), (250, 250));
    assert_eq!(quarter.block_count(), 1);
}

#[test]
fn test_overview_channel_is_cached() {
    let (source, mut channel) = pyramid(Access::ReadOnly);
    let store = source.get(2).unwrap();

    channel.overview(0).unwrap();
    store.reset_counts();

    // A second lookup reuses the open channel: no header read
    let overview = channel.overview(0).unwrap();
    assert_eq!(overview.width(), 500);
    assert_eq!(store.read_count(), 0);
    assert_eq!(channel.overview_scan_count(), 1);
}

#[test]
fn test_invalidate_rescans_metadata() {
    let (source, mut channel) = pyramid(Access::ReadOnly);
    source.insert(4, create_memory_segment(&SegmentParams::new(125, 125, 128, 128)));

    assert_eq!(channel.overview_count(), 2);
    assert_eq!(channel.overview_scan_count(), 1);

    // Regeneration rewrites metadata under the live channel
    channel.set_metadata_value("_Overview_8", "4 1 NEAREST");
    assert_eq!(channel.overview_count(), 2);

    channel.invalidate_overview_info();
    assert_eq!(channel.overview_count(), 3);
    assert_eq!(channel.overview_scan_count(), 2);
    assert_eq!(channel.overview(2).unwrap().width(), 125);
}

#[test]
fn test_invalidate_reopens_overview_channel() {
    let (source, mut channel) = pyramid(Access::ReadOnly);
    let store = source.get(2).unwrap();

    channel.overview(0).unwrap();
    channel.invalidate_overview_info();
    store.reset_counts();

    // A fresh channel object must read the segment header again
    channel.overview(0).unwrap();
    assert!(store.read_count() >= 1);
}

#[test]
fn test_overview_validity_persisted_in_metadata() {
    let (_, mut channel) = pyramid(Access::Update);

    channel.set_overview_validity(1, true).unwrap();
    assert!(channel.is_overview_valid(1).unwrap());
    assert_eq!(
        channel.metadata_value("_Overview_4").as_deref(),
        Some("3 1 NEAREST")
    );

    // Survives a rescan
    channel.invalidate_overview_info();
    assert!(channel.is_overview_valid(1).unwrap());

    assert!(matches!(
        channel.set_overview_validity(5, true),
        Err(ChannelError::InvalidArgument(_))
    ));
}

#[test]
fn test_overview_write_through() {
    let (source, mut channel) = pyramid(Access::Update);

    {
        let overview = channel.overview(0).unwrap();
        overview.write_block(3, &striped_block(256, 256)).unwrap();
        overview.synchronize().unwrap();
    }

    let store = source.get(2).unwrap();
    let mut reader = TiledChannel::open(ChannelCore::new(1, 0, 0, PixelType::U8), store).unwrap();
    let mut out = vec![0u8; 256 * 256];
    reader.read_block(3, &mut out, None).unwrap();
    assert_eq!(out, striped_block(256, 256));
}

#[test]
fn test_overview_read_only_inherited() {
    let (_, mut channel) = pyramid(Access::ReadOnly);
    let overview = channel.overview(1).unwrap();
    assert!(matches!(
        overview.write_block(0, &vec![0u8; 256 * 256]),
        Err(ChannelError::ReadOnlyViolation { .. })
    ));
}

#[test]
fn test_missing_overview_segment() {
    let (_, mut channel) = pyramid(Access::ReadOnly);
    channel.set_metadata_value("_Overview_16", "99 1 NEAREST");
    channel.invalidate_overview_info();

    assert_eq!(channel.overview_count(), 3);
    assert!(matches!(
        channel.overview(2),
        Err(ChannelError::Io(IoError::NotFound(_)))
    ));
    assert!(matches!(
        channel.overview(3),
        Err(ChannelError::InvalidArgument(_))
    ));
}

#[test]
fn test_no_segment_source() {
    let store = create_memory_segment(&SegmentParams::new(64, 64, 64, 64));
    let mut channel = TiledChannel::open(ChannelCore::new(1, 0, 0, PixelType::U8), store).unwrap();
    channel.set_metadata_value("_Overview_2", "2");

    assert_eq!(channel.overview_count(), 1);
    assert!(!channel.is_overview_valid(0).unwrap());
    assert!(channel.overview(0).is_err());
}
