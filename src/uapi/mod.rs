// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Kernel userspace ABI for the media controller, V4L2 sub-device and V4L2
//! video node interfaces.
//!
//! The structures in this module mirror `linux/media.h`,
//! `linux/v4l2-subdev.h` and `linux/videodev2.h` field for field and must not
//! be reordered. Request codes are generated with the `nix` ioctl macros from
//! the structure sizes, so a layout mistake shows up as `ENOTTY` rather than
//! memory corruption.

pub mod media;
pub mod subdev;
pub mod videodev2;

/// Convert a NUL-terminated fixed size C string into an owned `String`.
pub fn c_str(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).to_string()
}

/// Copy `src` into a fixed size C string buffer, always leaving room for the
/// terminating NUL.
pub fn to_c_str<const N: usize>(src: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let len = src.len().min(N.saturating_sub(1));
    out[..len].copy_from_slice(&src.as_bytes()[..len]);
    out
}
