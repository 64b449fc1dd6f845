//! Band-interleaved channel integration tests.
//!
//! Tests verify:
//! - Line-interleaved files on disk are read band by band
//! - Writes to one band leave the other bands untouched
//! - Channels can be repointed between the container and a raw file

use std::sync::Arc;

use chanstore::{
    Access, BandInterleavedChannel, ByteStore, Channel, ChannelCore, FileStore, MemoryStore,
    PixelType, RawLayout, Window,
};

const WIDTH: u32 = 10;
const HEIGHT: u32 = 4;
const BANDS: u64 = 3;

/// Value of band `b` at `(x, y)` in the fixture files.
fn value(b: u64, x: u32, y: u32) -> u16 {
    (b as u16 + 1) * 1000 + y as u16 * 100 + x as u16
}

/// Big-endian, line-interleaved u16 raster of `BANDS` bands.
fn bil_bytes() -> Vec<u8> {
    let mut out = Vec::new();
    for y in 0..HEIGHT {
        for b in 0..BANDS {
            for x in 0..WIDTH {
                out.extend_from_slice(&value(b, x, y).to_be_bytes());
            }
        }
    }
    out
}

fn bil_layout(path: &str, band: u64) -> RawLayout {
    let row = WIDTH as u64 * 2;
    RawLayout::new(band * row, 2, row * BANDS).with_filename(path)
}

fn u16s(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|c| u16::from_ne_bytes([c[0], c[1]]))
        .collect()
}

fn open_band(
    container: Arc<dyn ByteStore>,
    layout: RawLayout,
    access: Access,
) -> BandInterleavedChannel {
    let core = ChannelCore::new(2, WIDTH, HEIGHT, PixelType::U16).with_access(access);
    BandInterleavedChannel::new(core, container, layout).unwrap()
}

#[test]
fn test_read_bil_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bil");
    std::fs::write(&path, bil_bytes()).unwrap();
    let path = path.to_string_lossy().to_string();

    let container: Arc<dyn ByteStore> = Arc::new(MemoryStore::new("container"));
    let mut band = open_band(container, bil_layout(&path, 1), Access::ReadOnly);
    assert_eq!(band.block_count(), HEIGHT as u64);

    let mut out = vec![0u8; WIDTH as usize * 2];
    band.read_block(3, &mut out, None).unwrap();
    let expected: Vec<u16> = (0..WIDTH).map(|x| value(1, x, 3)).collect();
    assert_eq!(u16s(&out), expected);

    let mut out = vec![0u8; 3 * 2];
    band.read_block(2, &mut out, Some(Window::new(4, 0, 3, 1))).unwrap();
    assert_eq!(u16s(&out), vec![value(1, 4, 2), value(1, 5, 2), value(1, 6, 2)]);
}

#[test]
fn test_write_bil_file_keeps_other_bands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bil");
    std::fs::write(&path, bil_bytes()).unwrap();
    let path = path.to_string_lossy().to_string();

    let container: Arc<dyn ByteStore> = Arc::new(MemoryStore::new("container"));
    {
        let mut band = open_band(container.clone(), bil_layout(&path, 2), Access::Update);
        let line: Vec<u8> = (0..WIDTH).flat_map(|x| (x as u16).to_ne_bytes()).collect();
        band.write_block(1, &line).unwrap();
        band.synchronize().unwrap();
    }

    let file = FileStore::open(&path, Access::ReadOnly).unwrap();
    assert_eq!(file.size(), bil_bytes().len() as u64);

    let mut band0 = open_band(container.clone(), bil_layout(&path, 0), Access::ReadOnly);
    let mut band2 = open_band(container, bil_layout(&path, 2), Access::ReadOnly);
    let mut out = vec![0u8; WIDTH as usize * 2];

    band0.read_block(1, &mut out, None).unwrap();
    assert_eq!(u16s(&out)[0], value(0, 0, 1));

    band2.read_block(1, &mut out, None).unwrap();
    assert_eq!(u16s(&out), (0..WIDTH as u16).collect::<Vec<_>>());

    band2.read_block(2, &mut out, None).unwrap();
    assert_eq!(u16s(&out)[9], value(2, 9, 2));
}

#[test]
fn test_pixel_interleaved_in_container() {
    // RGB-style u8 container: 3 bytes per pixel after a 64 byte header
    let mut data = vec![0u8; 64];
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            data.extend_from_slice(&[x as u8, y as u8, 0xFF]);
        }
    }
    let container: Arc<dyn ByteStore> = Arc::new(MemoryStore::with_data("container", data));

    let core = ChannelCore::new(1, WIDTH, HEIGHT, PixelType::U8).with_access(Access::Update);
    let layout = RawLayout::new(65, 3, WIDTH as u64 * 3);
    let mut green = BandInterleavedChannel::new(core, container, layout).unwrap();

    let mut out = vec![0u8; WIDTH as usize];
    green.read_block(2, &mut out, None).unwrap();
    assert_eq!(out, vec![2u8; WIDTH as usize]);

    green.write_block(2, &[9u8; WIDTH as usize]).unwrap();
    green.read_block(2, &mut out, None).unwrap();
    assert_eq!(out, vec![9u8; WIDTH as usize]);
}

#[test]
fn test_repoint_container_to_file_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bil");
    std::fs::write(&path, bil_bytes()).unwrap();
    let path = path.to_string_lossy().to_string();

    let words: Vec<u8> = (0..WIDTH * HEIGHT)
        .flat_map(|i| (i as u16).to_le_bytes())
        .collect();
    let container: Arc<dyn ByteStore> = Arc::new(MemoryStore::with_data("container", words));
    let local = RawLayout::new(0, 2, WIDTH as u64 * 2).with_little_endian(true);
    let mut band = open_band(container, local.clone(), Access::Update);

    let mut out = vec![0u8; WIDTH as usize * 2];
    band.read_block(1, &mut out, None).unwrap();
    assert_eq!(u16s(&out)[0], WIDTH as u16);

    band.set_chan_info(bil_layout(&path, 0)).unwrap();
    assert_eq!(band.chan_info().filename, path);
    band.read_block(1, &mut out, None).unwrap();
    assert_eq!(u16s(&out)[0], value(0, 0, 1));

    band.set_chan_info(local.clone()).unwrap();
    assert_eq!(band.chan_info(), &local);
    band.read_block(1, &mut out, None).unwrap();
    assert_eq!(u16s(&out)[0], WIDTH as u16);
}

#[test]
fn test_repoint_requires_update_access() {
    let container: Arc<dyn ByteStore> = Arc::new(MemoryStore::with_data("c", vec![0; 80]));
    let mut band = open_band(
        container,
        RawLayout::new(0, 2, WIDTH as u64 * 2),
        Access::ReadOnly,
    );
    assert!(band.set_chan_info(RawLayout::new(2, 2, WIDTH as u64 * 2)).is_err());
    assert_eq!(band.chan_info().start_byte, 0);
}
