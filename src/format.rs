// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel and media bus format helpers.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Four character code identifying a V4L2 pixel format.
///
/// Stored in the kernel byte order, so `FourCc(*b"NV12").as_u32()` is the
/// value expected in `v4l2_pix_format::pixelformat`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCc(pub [u8; 4]);

/// RGB888 24-bit packed
pub const RGB3: FourCc = FourCc(*b"RGB3");

/// RGBX 32-bit (unused alpha)
pub const RGBX: FourCc = FourCc(*b"RGBX");

/// RGBA 32-bit
pub const RGBA: FourCc = FourCc(*b"RGBA");

/// YUYV 4:2:2 packed
pub const YUYV: FourCc = FourCc(*b"YUYV");

/// UYVY 4:2:2 packed
pub const UYVY: FourCc = FourCc(*b"UYVY");

/// NV12 4:2:0 semi-planar
pub const NV12: FourCc = FourCc(*b"NV12");

/// NV16 4:2:2 semi-planar
pub const NV16: FourCc = FourCc(*b"NV16");

/// 8-bit greyscale
pub const GREY: FourCc = FourCc(*b"GREY");

/// 8-bit Bayer GRBG
pub const SGRBG8: FourCc = FourCc(*b"GRBG");

/// 10-bit Bayer GRBG in a 16-bit container
pub const SGRBG10: FourCc = FourCc(*b"BA10");

/// 10-bit Bayer RGGB in a 16-bit container
pub const SRGGB10: FourCc = FourCc(*b"RG10");

/// 12-bit Bayer GRBG in a 16-bit container
pub const SGRBG12: FourCc = FourCc(*b"BA12");

/// Media bus codes used on sub-device pads.
pub mod mbus {
    pub const UYVY8_1X16: u32 = 0x200f;
    pub const YUYV8_1X16: u32 = 0x2011;
    pub const SBGGR10_1X10: u32 = 0x3007;
    pub const SGRBG10_1X10: u32 = 0x300a;
    pub const SRGGB10_1X10: u32 = 0x300f;
    pub const SGRBG12_1X12: u32 = 0x3011;
}

impl FourCc {
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub const fn from_u32(value: u32) -> Self {
        FourCc(value.to_le_bytes())
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        FourCc::from_u32(value)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0 {
            let c = if c.is_ascii_graphic() { c as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

impl std::str::FromStr for FourCc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("fourcc {s:?} must be exactly 4 bytes"))?;
        Ok(FourCc(bytes))
    }
}

impl Serialize for FourCc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FourCc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Bytes per row for a packed format, or the luma row for a planar one.
/// Returns `None` for formats this crate does not know the layout of, and
/// when the stride does not fit in a `u32`.
pub const fn format_row_stride(format: FourCc, width: u32) -> Option<u32> {
    let bpp = match format.0 {
        [b'R', b'G', b'B', b'3'] => 3,
        [b'R', b'G', b'B', b'X'] | [b'R', b'G', b'B', b'A'] => 4,
        [b'Y', b'U', b'Y', b'V'] | [b'U', b'Y', b'V', b'Y'] => 2,
        [b'N', b'V', b'1', b'2'] | [b'N', b'V', b'1', b'6'] => 1,
        [b'G', b'R', b'E', b'Y'] | [b'G', b'R', b'B', b'G'] => 1,
        [b'B', b'A', b'1', b'0'] | [b'R', b'G', b'1', b'0'] | [b'B', b'A', b'1', b'2'] => 2,
        _ => return None,
    };
    width.checked_mul(bpp)
}

/// Size in bytes of one frame of `format`.
///
/// Semi-planar formats add the interleaved chroma plane: half height for
/// NV12 and full height for NV16. Returns `None` for unknown formats and
/// for sizes that overflow a `u32`.
pub const fn frame_size(width: u32, height: u32, format: FourCc) -> Option<u32> {
    let luma = match format_row_stride(format, width) {
        Some(stride) => match stride.checked_mul(height) {
            Some(luma) => luma,
            None => return None,
        },
        None => return None,
    };
    match format.0 {
        [b'N', b'V', b'1', b'2'] => luma.checked_add(luma / 2),
        [b'N', b'V', b'1', b'6'] => luma.checked_mul(2),
        _ => Some(luma),
    }
}
