use super::{BlockShape, TileCodec};
use crate::error::ChannelError;

/// Pass-through codec for uncompressed tiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl TileCodec for RawCodec {
    fn compress(&self, block: &[u8], _shape: &BlockShape) -> Result<Vec<u8>, ChannelError> {
        Ok(block.to_vec())
    }

    fn decompress(
        &self,
        tile: u64,
        data: &[u8],
        out: &mut [u8],
        shape: &BlockShape,
    ) -> Result<(), ChannelError> {
        let expected = shape.byte_len();
        if data.len() != expected {
            return Err(ChannelError::CorruptTile {
                tile,
                reason: format!(
                    "uncompressed tile is {} bytes, expected {}",
                    data.len(),
                    expected
                ),
            });
        }
        out.copy_from_slice(data);
        Ok(())
    }
}
