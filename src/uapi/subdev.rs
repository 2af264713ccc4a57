// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! `linux/v4l2-subdev.h` and the control bits of `linux/videodev2.h` used on
//! sub-devices.

#![allow(dead_code)]

pub const V4L2_SUBDEV_FORMAT_TRY: u32 = 0;
pub const V4L2_SUBDEV_FORMAT_ACTIVE: u32 = 1;

pub const V4L2_SUBDEV_ROUTE_FL_ACTIVE: u32 = 1 << 0;

pub const V4L2_SEL_TGT_CROP: u32 = 0x0000;
pub const V4L2_SEL_TGT_CROP_DEFAULT: u32 = 0x0001;
pub const V4L2_SEL_TGT_CROP_BOUNDS: u32 = 0x0002;
pub const V4L2_SEL_TGT_NATIVE_SIZE: u32 = 0x0003;
pub const V4L2_SEL_TGT_COMPOSE: u32 = 0x0100;
pub const V4L2_SEL_TGT_COMPOSE_DEFAULT: u32 = 0x0101;
pub const V4L2_SEL_TGT_COMPOSE_BOUNDS: u32 = 0x0102;

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct V4l2MbusFramefmt {
    pub width: u32,
    pub height: u32,
    pub code: u32,
    pub field: u32,
    pub colorspace: u32,
    pub ycbcr_enc: u16,
    pub quantization: u16,
    pub xfer_func: u16,
    pub flags: u16,
    pub reserved: [u16; 10],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct V4l2SubdevFormat {
    pub which: u32,
    pub pad: u32,
    pub format: V4l2MbusFramefmt,
    pub stream: u32,
    pub reserved: [u32; 7],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct V4l2Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct V4l2SubdevSelection {
    pub which: u32,
    pub pad: u32,
    pub target: u32,
    pub flags: u32,
    pub r: V4l2Rect,
    pub stream: u32,
    pub reserved: [u32; 7],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct V4l2SubdevRoute {
    pub sink_pad: u32,
    pub sink_stream: u32,
    pub source_pad: u32,
    pub source_stream: u32,
    pub flags: u32,
    pub reserved: [u32; 5],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct V4l2SubdevRouting {
    pub which: u32,
    pub len_routes: u32,
    pub routes: u64,
    pub num_routes: u32,
    pub reserved: [u32; 11],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct V4l2Control {
    pub id: u32,
    pub value: i32,
}

nix::ioctl_readwrite!(vidioc_subdev_g_fmt, b'V', 4, V4l2SubdevFormat);
nix::ioctl_readwrite!(vidioc_subdev_s_fmt, b'V', 5, V4l2SubdevFormat);
nix::ioctl_readwrite!(vidioc_g_ctrl, b'V', 27, V4l2Control);
nix::ioctl_readwrite!(vidioc_s_ctrl, b'V', 28, V4l2Control);
nix::ioctl_readwrite!(vidioc_subdev_g_routing, b'V', 38, V4l2SubdevRouting);
nix::ioctl_readwrite!(vidioc_subdev_s_routing, b'V', 39, V4l2SubdevRouting);
nix::ioctl_readwrite!(vidioc_subdev_g_selection, b'V', 61, V4l2SubdevSelection);
nix::ioctl_readwrite!(vidioc_subdev_s_selection, b'V', 62, V4l2SubdevSelection);
