// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! `linux/media.h`

#![allow(dead_code)]

pub const MEDIA_ENT_ID_FLAG_NEXT: u32 = 1 << 31;

pub const MEDIA_ENT_TYPE_SHIFT: u32 = 16;
pub const MEDIA_ENT_TYPE_MASK: u32 = 0x00ff_0000;
pub const MEDIA_ENT_SUBTYPE_MASK: u32 = 0x0000_ffff;

pub const MEDIA_ENT_T_DEVNODE: u32 = 1 << MEDIA_ENT_TYPE_SHIFT;
pub const MEDIA_ENT_T_DEVNODE_V4L: u32 = MEDIA_ENT_T_DEVNODE + 1;
pub const MEDIA_ENT_T_DEVNODE_FB: u32 = MEDIA_ENT_T_DEVNODE + 2;
pub const MEDIA_ENT_T_DEVNODE_ALSA: u32 = MEDIA_ENT_T_DEVNODE + 3;
pub const MEDIA_ENT_T_DEVNODE_DVB: u32 = MEDIA_ENT_T_DEVNODE + 4;

pub const MEDIA_ENT_T_V4L2_SUBDEV: u32 = 2 << MEDIA_ENT_TYPE_SHIFT;
pub const MEDIA_ENT_T_V4L2_SUBDEV_SENSOR: u32 = MEDIA_ENT_T_V4L2_SUBDEV + 1;
pub const MEDIA_ENT_T_V4L2_SUBDEV_FLASH: u32 = MEDIA_ENT_T_V4L2_SUBDEV + 2;
pub const MEDIA_ENT_T_V4L2_SUBDEV_LENS: u32 = MEDIA_ENT_T_V4L2_SUBDEV + 3;

pub const MEDIA_PAD_FL_SINK: u32 = 1 << 0;
pub const MEDIA_PAD_FL_SOURCE: u32 = 1 << 1;
pub const MEDIA_PAD_FL_MUST_CONNECT: u32 = 1 << 2;

pub const MEDIA_LNK_FL_ENABLED: u32 = 1 << 0;
pub const MEDIA_LNK_FL_IMMUTABLE: u32 = 1 << 1;
pub const MEDIA_LNK_FL_DYNAMIC: u32 = 1 << 2;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct MediaDeviceInfo {
    pub driver: [u8; 16],
    pub model: [u8; 32],
    pub serial: [u8; 40],
    pub bus_info: [u8; 32],
    pub media_version: u32,
    pub hw_revision: u32,
    pub driver_version: u32,
    pub reserved: [u32; 31],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct MediaEntityDev {
    pub major: u32,
    pub minor: u32,
}

/// `struct media_entity_desc`. The trailing union is 184 bytes, of which only
/// the `dev` member is used here.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MediaEntityDesc {
    pub id: u32,
    pub name: [u8; 32],
    pub type_: u32,
    pub revision: u32,
    pub flags: u32,
    pub group_id: u32,
    pub pads: u16,
    pub links: u16,
    pub reserved: [u32; 4],
    pub dev: MediaEntityDev,
    pub raw: [u8; 176],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct MediaPadDesc {
    pub entity: u32,
    pub index: u16,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct MediaLinkDesc {
    pub source: MediaPadDesc,
    pub sink: MediaPadDesc,
    pub flags: u32,
    pub reserved: [u32; 2],
}

#[repr(C)]
pub struct MediaLinksEnum {
    pub entity: u32,
    pub pads: *mut MediaPadDesc,
    pub links: *mut MediaLinkDesc,
    pub reserved: [u32; 4],
}

impl Default for MediaDeviceInfo {
    fn default() -> Self {
        // SAFETY: plain old data, all-zero is a valid value.
        unsafe { std::mem::zeroed() }
    }
}

impl Default for MediaEntityDesc {
    fn default() -> Self {
        // SAFETY: plain old data, all-zero is a valid value.
        unsafe { std::mem::zeroed() }
    }
}

nix::ioctl_readwrite!(media_ioc_device_info, b'|', 0x00, MediaDeviceInfo);
nix::ioctl_readwrite!(media_ioc_enum_entities, b'|', 0x01, MediaEntityDesc);
nix::ioctl_readwrite!(media_ioc_enum_links, b'|', 0x02, MediaLinksEnum);
nix::ioctl_readwrite!(media_ioc_setup_link, b'|', 0x03, MediaLinkDesc);
