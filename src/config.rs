//! Command-line configuration for the `chanstore` tool.
//!
//! The tool inspects tiled segments on disk:
//!
//! - `chanstore info <segment>` prints the header, directory and occupancy
//! - `chanstore dump <segment> --tile N` decodes one tile and prints a hex preview
//!
//! # Environment Variables
//!
//! - `CHANSTORE_FORMAT` - Output format of `info` (text or json)
//! - `CHANSTORE_DUMP_BYTES` - Bytes shown by `dump` (default: 256)
//! - `CHANSTORE_NO_DATA` - Empty value reported for unwritten tiles by `dump`

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of decoded bytes shown by `dump`.
pub const DEFAULT_DUMP_BYTES: usize = 256;

/// Largest preview `dump` will print.
pub const MAX_DUMP_BYTES: usize = 1024 * 1024;

/// Bytes per line of the hex preview.
pub const HEX_LINE_BYTES: usize = 16;

// =============================================================================
// CLI Arguments
// =============================================================================

/// chanstore - Inspect tiled raster channel segments.
#[derive(Parser, Debug, Clone)]
#[command(name = "chanstore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Consume the CLI and return the selected command.
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print header, directory and occupancy statistics of a segment.
    Info(InfoConfig),

    /// Decode one tile and print a hex preview.
    Dump(DumpConfig),
}

/// Output format of the `info` command.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Path to the segment file.
    pub segment: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, env = "CHANSTORE_FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InfoConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        validate_segment_path(&self.segment)
    }
}

// =============================================================================
// Dump Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct DumpConfig {
    /// Path to the segment file.
    pub segment: PathBuf,

    /// Index of the tile to decode.
    #[arg(long)]
    pub tile: u64,

    /// Number of decoded bytes to show.
    #[arg(long, default_value_t = DEFAULT_DUMP_BYTES, env = "CHANSTORE_DUMP_BYTES")]
    pub bytes: usize,

    /// Empty value used for tiles that were never written.
    #[arg(long, env = "CHANSTORE_NO_DATA")]
    pub no_data: Option<f64>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DumpConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        validate_segment_path(&self.segment)?;

        if self.bytes == 0 || self.bytes > MAX_DUMP_BYTES {
            return Err(format!("bytes must be between 1 and {}", MAX_DUMP_BYTES));
        }

        if let Some(value) = self.no_data {
            if !value.is_finite() {
                return Err("no_data must be a finite number".to_string());
            }
        }

        Ok(())
    }
}

fn validate_segment_path(path: &std::path::Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("segment path is required".to_string());
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
