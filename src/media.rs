// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Kernel media controller device access.
//!
//! [`MediaDevice`] is the seam between the topology engine and the kernel:
//! [`MediaNode`] implements it with `MEDIA_IOC_*` requests on `/dev/mediaN`,
//! tests implement it in memory.

use crate::{
    error::{Error, Result},
    uapi::{self, media::*},
};
use nix::errno::Errno;
use std::{
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::Path,
    ptr,
};
use tracing::{debug, trace};

/// Upper bound of `/dev/mediaN` nodes probed by [`find_media_device`].
pub const MEDIA_DEVICE_MAX_NUM: u32 = 256;

/// Media device identification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub driver: String,
    pub model: String,
    pub serial: String,
    pub bus_info: String,
    pub media_version: u32,
    pub hw_revision: u32,
    pub driver_version: u32,
}

/// Entity as reported by the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityDesc {
    pub id: u32,
    pub name: String,
    pub type_: u32,
    pub revision: u32,
    pub flags: u32,
    pub group_id: u32,
    pub pads: u16,
    /// Outbound links
    pub links: u16,
    pub major: u32,
    pub minor: u32,
}

impl EntityDesc {
    pub const fn kind(&self) -> u32 {
        self.type_ & MEDIA_ENT_TYPE_MASK
    }

    pub const fn is_subdev(&self) -> bool {
        self.kind() == MEDIA_ENT_T_V4L2_SUBDEV
    }

    pub const fn is_devnode(&self) -> bool {
        self.kind() == MEDIA_ENT_T_DEVNODE
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind() {
            MEDIA_ENT_T_DEVNODE => "Node",
            MEDIA_ENT_T_V4L2_SUBDEV => "V4L2 subdev",
            _ => "Unknown",
        }
    }

    pub fn subtype_name(&self) -> &'static str {
        const NODE_TYPES: [&str; 5] = ["Unknown", "V4L", "FB", "ALSA", "DVB"];
        const SUBDEV_TYPES: [&str; 4] = ["Unknown", "Sensor", "Flash", "Lens"];

        let subtype = (self.type_ & MEDIA_ENT_SUBTYPE_MASK) as usize;
        match self.kind() {
            MEDIA_ENT_T_DEVNODE => NODE_TYPES.get(subtype).copied().unwrap_or("Unknown"),
            MEDIA_ENT_T_V4L2_SUBDEV => SUBDEV_TYPES.get(subtype).copied().unwrap_or("Unknown"),
            _ => "Unknown",
        }
    }
}

/// Pad endpoint of a link, by kernel entity id and pad index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PadDesc {
    pub entity: u32,
    pub index: u16,
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkDesc {
    pub source: PadDesc,
    pub sink: PadDesc,
    pub flags: u32,
}

/// Requests understood by a media controller device.
pub trait MediaDevice: Send {
    /// Device path, used in log and error messages.
    fn path(&self) -> &str;

    fn device_info(&self) -> Result<DeviceInfo>;

    /// Enumerate the entity `id`, which may carry [`MEDIA_ENT_ID_FLAG_NEXT`].
    /// Returns `None` once the kernel reports no further entities.
    fn enum_entity(&self, id: u32) -> Result<Option<EntityDesc>>;

    /// Pads of `entity` and its outbound links.
    fn enum_links(&self, entity: &EntityDesc) -> Result<(Vec<PadDesc>, Vec<LinkDesc>)>;

    /// Apply the flags of `link`.
    fn setup_link(&self, link: &LinkDesc) -> Result<()>;
}

impl<T: MediaDevice + ?Sized> MediaDevice for Box<T> {
    fn path(&self) -> &str {
        (**self).path()
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        (**self).device_info()
    }

    fn enum_entity(&self, id: u32) -> Result<Option<EntityDesc>> {
        (**self).enum_entity(id)
    }

    fn enum_links(&self, entity: &EntityDesc) -> Result<(Vec<PadDesc>, Vec<LinkDesc>)> {
        (**self).enum_links(entity)
    }

    fn setup_link(&self, link: &LinkDesc) -> Result<()> {
        (**self).setup_link(link)
    }
}

/// An open `/dev/mediaN` node.
#[derive(Debug)]
pub struct MediaNode {
    path: String,
    file: File,
}

impl MediaNode {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(MediaNode {
            path: path.display().to_string(),
            file,
        })
    }
}

impl From<&MediaPadDesc> for PadDesc {
    fn from(pad: &MediaPadDesc) -> Self {
        PadDesc {
            entity: pad.entity,
            index: pad.index,
            flags: pad.flags,
        }
    }
}

impl From<&PadDesc> for MediaPadDesc {
    fn from(pad: &PadDesc) -> Self {
        MediaPadDesc {
            entity: pad.entity,
            index: pad.index,
            flags: pad.flags,
            reserved: [0; 2],
        }
    }
}

impl MediaDevice for MediaNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        let mut info = MediaDeviceInfo::default();
        // SAFETY: info is a valid media_device_info for the duration of the call.
        unsafe { media_ioc_device_info(self.file.as_raw_fd(), &mut info) }
            .map_err(Error::ioctl("MEDIA_IOC_DEVICE_INFO", &self.path))?;

        Ok(DeviceInfo {
            driver: uapi::c_str(&info.driver),
            model: uapi::c_str(&info.model),
            serial: uapi::c_str(&info.serial),
            bus_info: uapi::c_str(&info.bus_info),
            media_version: info.media_version,
            hw_revision: info.hw_revision,
            driver_version: info.driver_version,
        })
    }

    fn enum_entity(&self, id: u32) -> Result<Option<EntityDesc>> {
        let mut desc = MediaEntityDesc {
            id,
            ..Default::default()
        };
        // SAFETY: desc is a valid media_entity_desc for the duration of the call.
        match unsafe { media_ioc_enum_entities(self.file.as_raw_fd(), &mut desc) } {
            Ok(_) => {}
            Err(Errno::EINVAL) => return Ok(None),
            Err(err) => return Err(Error::ioctl("MEDIA_IOC_ENUM_ENTITIES", &self.path)(err)),
        }

        Ok(Some(EntityDesc {
            id: desc.id,
            name: uapi::c_str(&desc.name),
            type_: desc.type_,
            revision: desc.revision,
            flags: desc.flags,
            group_id: desc.group_id,
            pads: desc.pads,
            links: desc.links,
            major: desc.dev.major,
            minor: desc.dev.minor,
        }))
    }

    fn enum_links(&self, entity: &EntityDesc) -> Result<(Vec<PadDesc>, Vec<LinkDesc>)> {
        let mut pads = vec![MediaPadDesc::default(); entity.pads as usize];
        let mut links = vec![MediaLinkDesc::default(); entity.links as usize];
        let mut req = MediaLinksEnum {
            entity: entity.id,
            pads: if pads.is_empty() {
                ptr::null_mut()
            } else {
                pads.as_mut_ptr()
            },
            links: if links.is_empty() {
                ptr::null_mut()
            } else {
                links.as_mut_ptr()
            },
            reserved: [0; 4],
        };
        // SAFETY: the pad and link arrays are sized from the entity descriptor
        // and outlive the call.
        unsafe { media_ioc_enum_links(self.file.as_raw_fd(), &mut req) }
            .map_err(Error::ioctl("MEDIA_IOC_ENUM_LINKS", &self.path))?;

        let pads = pads.iter().map(PadDesc::from).collect();
        let links = links
            .iter()
            .map(|l| LinkDesc {
                source: PadDesc::from(&l.source),
                sink: PadDesc::from(&l.sink),
                flags: l.flags,
            })
            .collect();
        Ok((pads, links))
    }

    fn setup_link(&self, link: &LinkDesc) -> Result<()> {
        let mut desc = MediaLinkDesc {
            source: MediaPadDesc::from(&link.source),
            sink: MediaPadDesc::from(&link.sink),
            flags: link.flags,
            reserved: [0; 2],
        };
        trace!(
            source = link.source.entity,
            source_pad = link.source.index,
            sink = link.sink.entity,
            sink_pad = link.sink.index,
            flags = link.flags,
            "MEDIA_IOC_SETUP_LINK"
        );
        // SAFETY: desc is a valid media_link_desc for the duration of the call.
        unsafe { media_ioc_setup_link(self.file.as_raw_fd(), &mut desc) }
            .map_err(Error::ioctl("MEDIA_IOC_SETUP_LINK", &self.path))?;
        Ok(())
    }
}

/// Find the first `/dev/mediaN` whose driver name starts with `driver`.
///
/// # Errors
///
/// Returns [`Error::NoMediaDevice`] if no node matches, or the open error of
/// a node that exists but cannot be opened.
pub fn find_media_device(driver: &str) -> Result<MediaNode> {
    for i in 0..MEDIA_DEVICE_MAX_NUM {
        let path = format!("/dev/media{i}");
        if !Path::new(&path).exists() {
            trace!("no media device {}", path);
            continue;
        }

        let node = MediaNode::open(&path)?;
        match node.device_info() {
            Ok(info) if info.driver.starts_with(driver) => {
                debug!(
                    path = %path,
                    driver = %info.driver,
                    model = %info.model,
                    bus_info = %info.bus_info,
                    "found media device"
                );
                return Ok(node);
            }
            Ok(info) => trace!(path = %path, driver = %info.driver, "driver mismatch"),
            Err(err) => trace!(path = %path, "device info failed: {}", err),
        }
    }

    Err(Error::NoMediaDevice(driver.to_string()))
}
