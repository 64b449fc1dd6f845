//! Run-length codec.
//!
//! A tile is a sequence of `(run_length - 1, value)` byte pairs, so one
//! pair covers between 1 and 256 repetitions of `value`. The codec works
//! on the block's bytes as stored (after any byte swapping), not on
//! pixels.

use super::{BlockShape, TileCodec};
use crate::error::ChannelError;

/// Longest run a single pair can express.
pub const MAX_RUN: usize = 256;

/// Byte-oriented run-length codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RleCodec;

impl TileCodec for RleCodec {
    fn compress(&self, block: &[u8], _shape: &BlockShape) -> Result<Vec<u8>, ChannelError> {
        let mut out = Vec::new();
        let mut pos = 0;

        while pos < block.len() {
            let value = block[pos];
            let mut run = 1;
            while run < MAX_RUN && pos + run < block.len() && block[pos + run] == value {
                run += 1;
            }
            out.push((run - 1) as u8);
            out.push(value);
            pos += run;
        }

        Ok(out)
    }

    fn decompress(
        &self,
        tile: u64,
        data: &[u8],
        out: &mut [u8],
        _shape: &BlockShape,
    ) -> Result<(), ChannelError> {
        let corrupt = |reason: String| ChannelError::CorruptTile { tile, reason };

        let mut filled = 0;
        let mut pairs = data.chunks(2);

        while filled < out.len() {
            let pair = pairs.next().ok_or_else(|| {
                corrupt(format!(
                    "RLE stream exhausted after {} of {} bytes",
                    filled,
                    out.len()
                ))
            })?;

            if pair.len() != 2 {
                return Err(corrupt("RLE stream ends with a partial pair".to_string()));
            }

            let run = pair[0] as usize + 1;
            if filled + run > out.len() {
                return Err(corrupt(format!(
                    "RLE run of {} at byte {} overflows the {} byte block",
                    run,
                    filled,
                    out.len()
                )));
            }

            out[filled..filled + run].fill(pair[1]);
            filled += run;
        }

        Ok(())
    }
}
