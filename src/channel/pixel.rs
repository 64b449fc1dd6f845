//! Pixel data types stored in channels.

use std::fmt;
use std::str::FromStr;

use crate::error::LayoutError;
use crate::io::ByteOrder;

/// Data type of the pixels held by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    /// Unsigned 8-bit integer
    U8,
    /// Signed 8-bit integer
    S8,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 16-bit integer
    S16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 32-bit integer
    S32,
    /// 32-bit IEEE float
    F32,
    /// 64-bit IEEE float
    F64,
    /// Complex, two unsigned 16-bit integers
    C16U,
    /// Complex, two signed 16-bit integers
    C16S,
    /// Complex, two 32-bit floats
    C32F,
}

impl PixelType {
    /// Size of one pixel in bytes.
    pub const fn size(self) -> usize {
        match self {
            PixelType::U8 | PixelType::S8 => 1,
            PixelType::U16 | PixelType::S16 => 2,
            PixelType::U32 | PixelType::S32 | PixelType::F32 => 4,
            PixelType::C16U | PixelType::C16S => 4,
            PixelType::F64 | PixelType::C32F => 8,
        }
    }

    /// Size of the words that are byte-swapped between byte orders.
    ///
    /// Complex types swap each component separately.
    pub const fn word_size(self) -> usize {
        match self {
            PixelType::C16U | PixelType::C16S | PixelType::C32F => self.size() / 2,
            _ => self.size(),
        }
    }

    /// Whether this is a complex type.
    pub const fn is_complex(self) -> bool {
        matches!(self, PixelType::C16U | PixelType::C16S | PixelType::C32F)
    }

    /// Canonical tag stored in segment headers.
    pub const fn tag(self) -> &'static str {
        match self {
            PixelType::U8 => "8U",
            PixelType::S8 => "8S",
            PixelType::U16 => "16U",
            PixelType::S16 => "16S",
            PixelType::U32 => "32U",
            PixelType::S32 => "32S",
            PixelType::F32 => "32R",
            PixelType::F64 => "64R",
            PixelType::C16U => "C16U",
            PixelType::C16S => "C16S",
            PixelType::C32F => "C32R",
        }
    }

    /// Encode `value` as one pixel of this type in the given byte order.
    ///
    /// Integer types saturate at their range. Complex types carry the
    /// value in the real component and zero in the imaginary one.
    pub fn encode_value(self, value: f64, order: ByteOrder) -> Vec<u8> {
        let mut out = match self {
            PixelType::U8 => vec![value.clamp(0.0, u8::MAX as f64) as u8],
            PixelType::S8 => vec![value.clamp(i8::MIN as f64, i8::MAX as f64) as i8 as u8],
            PixelType::U16 => (value.clamp(0.0, u16::MAX as f64) as u16)
                .to_ne_bytes()
                .to_vec(),
            PixelType::S16 => (value.clamp(i16::MIN as f64, i16::MAX as f64) as i16)
                .to_ne_bytes()
                .to_vec(),
            PixelType::U32 => (value.clamp(0.0, u32::MAX as f64) as u32)
                .to_ne_bytes()
                .to_vec(),
            PixelType::S32 => (value.clamp(i32::MIN as f64, i32::MAX as f64) as i32)
                .to_ne_bytes()
                .to_vec(),
            PixelType::F32 => (value as f32).to_ne_bytes().to_vec(),
            PixelType::F64 => value.to_ne_bytes().to_vec(),
            PixelType::C16U => {
                let mut v = (value.clamp(0.0, u16::MAX as f64) as u16)
                    .to_ne_bytes()
                    .to_vec();
                v.extend_from_slice(&[0, 0]);
                v
            }
            PixelType::C16S => {
                let mut v = (value.clamp(i16::MIN as f64, i16::MAX as f64) as i16)
                    .to_ne_bytes()
                    .to_vec();
                v.extend_from_slice(&[0, 0]);
                v
            }
            PixelType::C32F => {
                let mut v = (value as f32).to_ne_bytes().to_vec();
                v.extend_from_slice(&0f32.to_ne_bytes());
                v
            }
        };

        if order.needs_swap() {
            crate::io::swap_words(&mut out, self.word_size());
        }
        out
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PixelType {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "8U" => Ok(PixelType::U8),
            "8S" => Ok(PixelType::S8),
            "16U" => Ok(PixelType::U16),
            "16S" => Ok(PixelType::S16),
            "32U" => Ok(PixelType::U32),
            "32S" => Ok(PixelType::S32),
            "32R" => Ok(PixelType::F32),
            "64R" => Ok(PixelType::F64),
            "C16U" => Ok(PixelType::C16U),
            "C16S" => Ok(PixelType::C16S),
            "C32R" => Ok(PixelType::C32F),
            other => Err(LayoutError::UnknownPixelType(other.to_string())),
        }
    }
}
