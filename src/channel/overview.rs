//! Overview discovery from channel metadata.
//!
//! An overview is referenced by a metadata entry:
//!
//! ```text
//! _Overview_<decimation> = "<segment> <valid 0|1> <resampling>"
//! ```
//!
//! Validity and resampling are optional and default to `0` and `NEAREST`.
//! The list is built by scanning metadata on first use and kept until
//! [`OverviewList::invalidate`]; overview channels are opened lazily and
//! cached in their reference.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use super::core::ChannelCore;
use super::tiled::TiledChannel;
use super::Channel;
use crate::error::ChannelError;

/// Metadata key prefix of overview references.
pub const OVERVIEW_KEY_PREFIX: &str = "_Overview_";

/// Resampling recorded when a reference names none.
pub const DEFAULT_RESAMPLING: &str = "NEAREST";

/// One overview reference and its lazily opened channel.
pub struct OverviewRef {
    /// Decimation descriptor, the key suffix after `_Overview_`.
    pub decimation: String,
    /// Segment holding the overview tiles.
    pub segment: u32,
    pub resampling: String,
    pub valid: bool,
    cached: Option<Box<dyn Channel>>,
}

impl OverviewRef {
    /// Whether the overview channel has been opened.
    pub fn is_open(&self) -> bool {
        self.cached.is_some()
    }

    fn metadata_entry(&self) -> (String, String) {
        (
            format!("{OVERVIEW_KEY_PREFIX}{}", self.decimation),
            format_reference(self.segment, self.valid, &self.resampling),
        )
    }
}

impl std::fmt::Debug for OverviewRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverviewRef")
            .field("decimation", &self.decimation)
            .field("segment", &self.segment)
            .field("resampling", &self.resampling)
            .field("valid", &self.valid)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Format the metadata value of an overview reference.
pub fn format_reference(segment: u32, valid: bool, resampling: &str) -> String {
    format!("{} {} {}", segment, u8::from(valid), resampling)
}

/// Parse the metadata value of an overview reference.
///
/// Returns `None` when the segment number is missing or malformed.
pub fn parse_reference(value: &str) -> Option<(u32, bool, String)> {
    let mut parts = value.split_whitespace();
    let segment = parts.next()?.parse::<u32>().ok()?;
    let valid = matches!(parts.next(), Some("1"));
    let resampling = parts
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_RESAMPLING.to_string());
    Some((segment, valid, resampling))
}

/// Order decimations numerically, non-numeric descriptors last.
fn compare_decimations(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

// =============================================================================
// OverviewList
// =============================================================================

/// Cached overview references of one channel.
#[derive(Default)]
pub struct OverviewList {
    entries: Vec<OverviewRef>,
    scanned: bool,
    scan_count: usize,
}

impl OverviewList {
    /// Build the list from metadata unless it is already current.
    pub fn ensure_scanned(&mut self, metadata: &BTreeMap<String, String>) {
        if self.scanned {
            return;
        }

        let mut entries: Vec<OverviewRef> = metadata
            .iter()
            .filter_map(|(key, value)| {
                let decimation = key.strip_prefix(OVERVIEW_KEY_PREFIX)?;
                let Some((segment, valid, resampling)) = parse_reference(value) else {
                    debug!(key = %key, value = %value, "Ignoring malformed overview reference");
                    return None;
                };
                Some(OverviewRef {
                    decimation: decimation.to_string(),
                    segment,
                    resampling,
                    valid,
                    cached: None,
                })
            })
            .collect();
        entries.sort_by(|a, b| compare_decimations(&a.decimation, &b.decimation));

        debug!(count = entries.len(), "Scanned overview references");

        self.entries = entries;
        self.scanned = true;
        self.scan_count += 1;
    }

    /// Drop all references and cached channels.
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.scanned = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of metadata scans performed.
    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    pub fn get(&self, index: usize) -> Result<&OverviewRef, ChannelError> {
        let len = self.entries.len();
        self.entries
            .get(index)
            .ok_or_else(|| out_of_range(index, len))
    }

    pub fn decimations(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.decimation.clone()).collect()
    }

    /// Update validity and return the metadata entry to persist.
    pub fn set_valid(&mut self, index: usize, valid: bool) -> Result<(String, String), ChannelError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, len))?;
        entry.valid = valid;
        Ok(entry.metadata_entry())
    }

    /// The overview channel at `index`, opening it on first use.
    ///
    /// `template` supplies access mode and the segment source.
    pub fn channel(
        &mut self,
        index: usize,
        template: ChannelCore,
    ) -> Result<&mut dyn Channel, ChannelError> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| out_of_range(index, len))?;

        let channel = match entry.cached.take() {
            Some(channel) => channel,
            None => {
                let source = template.segment_source().cloned().ok_or_else(|| {
                    ChannelError::InvalidArgument(
                        "channel has no segment source for overviews".to_string(),
                    )
                })?;
                let store = source.open_segment(entry.segment, template.access())?;

                debug!(
                    decimation = %entry.decimation,
                    segment = entry.segment,
                    "Opening overview channel"
                );

                Box::new(TiledChannel::open(template, store)?) as Box<dyn Channel>
            }
        };

        Ok(&mut **entry.cached.insert(channel))
    }
}

fn out_of_range(index: usize, len: usize) -> ChannelError {
    ChannelError::InvalidArgument(format!(
        "overview {} out of range (overview count {})",
        index, len
    ))
}
