//! chanstore - inspect tiled raster channel segments.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chanstore::{
    config::{Cli, Command, DumpConfig, InfoConfig, OutputFormat, HEX_LINE_BYTES},
    Access, Channel, ChannelCore, ChannelError, FileStore, PixelType, TiledChannel,
    NO_DATA_VALUE_KEY, PAGE_SIZE,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Info(config) => run_info(config),
        Command::Dump(config) => run_dump(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "chanstore=debug"
    } else {
        "chanstore=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Open a segment file read-only as a tiled channel.
fn open_segment(path: &Path) -> Result<TiledChannel, ChannelError> {
    let store = Arc::new(FileStore::open(path, Access::ReadOnly)?);
    TiledChannel::open(ChannelCore::new(0, 0, 0, PixelType::U8), store)
}

// =============================================================================
// Info Command
// =============================================================================

/// Header and occupancy summary of a segment.
#[derive(Debug, Serialize)]
struct SegmentReport {
    path: String,
    width: u32,
    height: u32,
    block_width: u32,
    block_height: u32,
    pixel_type: String,
    compression: String,
    byte_order: String,
    tile_count: u64,
    tiles_written: u64,
    directory_pages: usize,
    data_start: u64,
    data_end: u64,
    stored_bytes: u64,
    /// Bytes in the data region no tile points at
    unused_bytes: u64,
}

fn build_report(path: &Path, channel: &mut TiledChannel) -> Result<SegmentReport, ChannelError> {
    let tile_count = channel.block_count();

    let mut tiles_written = 0;
    let mut stored_bytes = 0u64;
    for tile in 0..tile_count {
        let entry = channel.tile_info(tile)?;
        if !entry.is_empty() {
            tiles_written += 1;
            stored_bytes += entry.size.max(0) as u64;
        }
    }

    let header = channel
        .segment_header()
        .ok_or_else(|| ChannelError::CorruptDirectory("segment not established".to_string()))?;
    let data_region = header.data_end.saturating_sub(header.data_start());

    Ok(SegmentReport {
        path: path.display().to_string(),
        width: header.width,
        height: header.height,
        block_width: header.block_width,
        block_height: header.block_height,
        pixel_type: header.pixel_type.to_string(),
        compression: header.compression_tag.clone(),
        byte_order: format!("{:?}", header.byte_order),
        tile_count,
        tiles_written,
        directory_pages: (tile_count as usize).div_ceil(PAGE_SIZE),
        data_start: header.data_start(),
        data_end: header.data_end,
        stored_bytes,
        unused_bytes: data_region.saturating_sub(stored_bytes),
    })
}

fn run_info(config: InfoConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let report = match open_segment(&config.segment)
        .and_then(|mut channel| build_report(&config.segment, &mut channel))
    {
        Ok(report) => report,
        Err(e) => {
            error!("Failed to read {}: {}", config.segment.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match config.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        },
        OutputFormat::Text => print_report(&report),
    }

    ExitCode::SUCCESS
}

fn print_report(report: &SegmentReport) {
    println!("Segment: {}", report.path);
    println!("─────────────────────────────────");
    println!("  Size:        {} x {}", report.width, report.height);
    println!("  Block:       {} x {}", report.block_width, report.block_height);
    println!("  Pixel type:  {}", report.pixel_type);
    println!("  Compression: {}", report.compression);
    println!("  Byte order:  {}", report.byte_order);
    println!();
    println!(
        "  Tiles:       {} of {} written ({} directory page(s))",
        report.tiles_written, report.tile_count, report.directory_pages
    );
    println!(
        "  Data region: {}..{} ({} bytes stored, {} unused)",
        report.data_start, report.data_end, report.stored_bytes, report.unused_bytes
    );
}

// =============================================================================
// Dump Command
// =============================================================================

fn run_dump(config: DumpConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let mut channel = match open_segment(&config.segment) {
        Ok(channel) => channel,
        Err(e) => {
            error!("Failed to open {}: {}", config.segment.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(value) = config.no_data {
        channel.set_metadata_value(NO_DATA_VALUE_KEY, &value.to_string());
    }

    let entry = match channel.tile_info(config.tile) {
        Ok(entry) => entry,
        Err(e) => {
            error!("Tile {}: {}", config.tile, e);
            return ExitCode::FAILURE;
        }
    };
    debug!(tile = config.tile, offset = entry.offset, size = entry.size, "Dumping tile");

    let mut block = vec![0u8; channel.core().block_byte_len()];
    if let Err(e) = channel.read_block(config.tile, &mut block, None) {
        error!("Failed to decode tile {}: {}", config.tile, e);
        return ExitCode::FAILURE;
    }

    if entry.is_empty() {
        info!("Tile {} was never written; showing the empty value", config.tile);
        println!("Tile {} (unwritten)", config.tile);
    } else {
        println!(
            "Tile {} ({} bytes at offset {}, {} bytes decoded)",
            config.tile,
            entry.size,
            entry.offset,
            block.len()
        );
    }

    let shown = &block[..config.bytes.min(block.len())];
    for (i, line) in shown.chunks(HEX_LINE_BYTES).enumerate() {
        println!("{:08x}  {}", i * HEX_LINE_BYTES, hex::encode(line));
    }

    ExitCode::SUCCESS
}
