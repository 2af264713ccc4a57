// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! V4L2 sub-device access: pad formats, selections, routing and controls.

use crate::{
    config::Rect,
    error::{Error, Result},
    uapi::subdev::*,
};
use nix::errno::Errno;
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
};
use tracing::trace;

/// Media bus format of a sub-device pad.
pub type MbusFormat = V4l2MbusFramefmt;

/// Stream route between a sink and a source pad of a sub-device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub sink_pad: u32,
    pub sink_stream: u32,
    pub source_pad: u32,
    pub source_stream: u32,
    pub flags: u32,
}

impl Route {
    pub const fn is_active(&self) -> bool {
        self.flags & V4L2_SUBDEV_ROUTE_FL_ACTIVE != 0
    }
}

/// Requests understood by a sub-device. All state is the active state.
pub trait Subdev: Send {
    fn devname(&self) -> &str;

    /// Set the format of `pad`, returning the format the driver applied.
    fn set_format(&self, pad: u32, stream: u32, format: &MbusFormat) -> Result<MbusFormat>;

    fn get_format(&self, pad: u32, stream: u32) -> Result<MbusFormat>;

    /// Set a crop or compose rectangle, returning the applied rectangle.
    fn set_selection(&self, pad: u32, stream: u32, target: u32, rect: Rect) -> Result<Rect>;

    fn get_routing(&self) -> Result<Vec<Route>>;

    fn set_routing(&self, routes: &[Route]) -> Result<()>;

    fn set_control(&self, id: u32, value: i32) -> Result<()>;

    fn get_control(&self, id: u32) -> Result<i32>;
}

/// Opens sub-devices by device node path.
pub trait SubdevProvider: Send {
    fn open(&self, devname: &str) -> Result<Box<dyn Subdev>>;
}

/// Sub-devices opened so far, one handle per device node.
pub struct SubdevCache {
    provider: Box<dyn SubdevProvider>,
    open: HashMap<String, Box<dyn Subdev>>,
}

impl SubdevCache {
    pub fn new(provider: Box<dyn SubdevProvider>) -> Self {
        SubdevCache {
            provider,
            open: HashMap::new(),
        }
    }

    /// Handle of `devname`, opened on first use.
    pub fn get(&mut self, devname: &str) -> Result<&dyn Subdev> {
        if !self.open.contains_key(devname) {
            let subdev = self.provider.open(devname)?;
            self.open.insert(devname.to_string(), subdev);
        }
        self.open
            .get(devname)
            .map(|s| &**s)
            .ok_or_else(|| Error::NoDevnode(devname.to_string()))
    }

    pub fn close_all(&mut self) {
        self.open.clear();
    }
}

/// An open `/dev/v4l-subdevN` node.
#[derive(Debug)]
pub struct V4l2Subdevice {
    devname: String,
    file: File,
}

impl V4l2Subdevice {
    pub fn open(devname: &str) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(devname)?;
        Ok(V4l2Subdevice {
            devname: devname.to_string(),
            file,
        })
    }

    /// Read the routing table, growing `routes` when the kernel reports a
    /// larger table.
    fn routing(&self, routes: &mut Vec<V4l2SubdevRoute>) -> nix::Result<u32> {
        let mut req = V4l2SubdevRouting {
            which: V4L2_SUBDEV_FORMAT_ACTIVE,
            len_routes: routes.len() as u32,
            routes: routes.as_mut_ptr() as u64,
            num_routes: 0,
            reserved: [0; 11],
        };
        // SAFETY: routes holds len_routes entries and outlives the call.
        match unsafe { vidioc_subdev_g_routing(self.file.as_raw_fd(), &mut req) } {
            Ok(_) => Ok(req.num_routes),
            Err(Errno::ENOSPC) if req.num_routes as usize > routes.len() => {
                routes.resize(req.num_routes as usize, V4l2SubdevRoute::default());
                self.routing(routes)
            }
            Err(err) => Err(err),
        }
    }
}

impl Subdev for V4l2Subdevice {
    fn devname(&self) -> &str {
        &self.devname
    }

    fn set_format(&self, pad: u32, stream: u32, format: &MbusFormat) -> Result<MbusFormat> {
        let mut fmt = V4l2SubdevFormat {
            which: V4L2_SUBDEV_FORMAT_ACTIVE,
            pad,
            format: *format,
            stream,
            reserved: [0; 7],
        };
        trace!(
            devname = %self.devname,
            pad,
            width = format.width,
            height = format.height,
            code = format.code,
            "VIDIOC_SUBDEV_S_FMT"
        );
        // SAFETY: fmt is a valid v4l2_subdev_format for the duration of the call.
        unsafe { vidioc_subdev_s_fmt(self.file.as_raw_fd(), &mut fmt) }
            .map_err(Error::ioctl("VIDIOC_SUBDEV_S_FMT", &self.devname))?;
        Ok(fmt.format)
    }

    fn get_format(&self, pad: u32, stream: u32) -> Result<MbusFormat> {
        let mut fmt = V4l2SubdevFormat {
            which: V4L2_SUBDEV_FORMAT_ACTIVE,
            pad,
            stream,
            ..Default::default()
        };
        // SAFETY: fmt is a valid v4l2_subdev_format for the duration of the call.
        unsafe { vidioc_subdev_g_fmt(self.file.as_raw_fd(), &mut fmt) }
            .map_err(Error::ioctl("VIDIOC_SUBDEV_G_FMT", &self.devname))?;
        Ok(fmt.format)
    }

    fn set_selection(&self, pad: u32, stream: u32, target: u32, rect: Rect) -> Result<Rect> {
        let mut sel = V4l2SubdevSelection {
            which: V4L2_SUBDEV_FORMAT_ACTIVE,
            pad,
            target,
            flags: 0,
            r: V4l2Rect {
                left: rect.left,
                top: rect.top,
                width: rect.width,
                height: rect.height,
            },
            stream,
            reserved: [0; 7],
        };
        // SAFETY: sel is a valid v4l2_subdev_selection for the duration of the call.
        unsafe { vidioc_subdev_s_selection(self.file.as_raw_fd(), &mut sel) }
            .map_err(Error::ioctl("VIDIOC_SUBDEV_S_SELECTION", &self.devname))?;
        Ok(Rect {
            left: sel.r.left,
            top: sel.r.top,
            width: sel.r.width,
            height: sel.r.height,
        })
    }

    fn get_routing(&self) -> Result<Vec<Route>> {
        let mut routes = vec![V4l2SubdevRoute::default(); 16];
        let num = self
            .routing(&mut routes)
            .map_err(Error::ioctl("VIDIOC_SUBDEV_G_ROUTING", &self.devname))?;

        routes.truncate(num as usize);
        Ok(routes
            .iter()
            .map(|r| Route {
                sink_pad: r.sink_pad,
                sink_stream: r.sink_stream,
                source_pad: r.source_pad,
                source_stream: r.source_stream,
                flags: r.flags,
            })
            .collect())
    }

    fn set_routing(&self, routes: &[Route]) -> Result<()> {
        let mut table: Vec<V4l2SubdevRoute> = routes
            .iter()
            .map(|r| V4l2SubdevRoute {
                sink_pad: r.sink_pad,
                sink_stream: r.sink_stream,
                source_pad: r.source_pad,
                source_stream: r.source_stream,
                flags: r.flags,
                reserved: [0; 5],
            })
            .collect();
        let mut req = V4l2SubdevRouting {
            which: V4L2_SUBDEV_FORMAT_ACTIVE,
            len_routes: table.len() as u32,
            routes: table.as_mut_ptr() as u64,
            num_routes: table.len() as u32,
            reserved: [0; 11],
        };
        // SAFETY: table holds num_routes entries and outlives the call.
        unsafe { vidioc_subdev_s_routing(self.file.as_raw_fd(), &mut req) }
            .map_err(Error::ioctl("VIDIOC_SUBDEV_S_ROUTING", &self.devname))?;
        Ok(())
    }

    fn set_control(&self, id: u32, value: i32) -> Result<()> {
        let mut ctrl = V4l2Control { id, value };
        // SAFETY: ctrl is a valid v4l2_control for the duration of the call.
        unsafe { vidioc_s_ctrl(self.file.as_raw_fd(), &mut ctrl) }
            .map_err(Error::ioctl("VIDIOC_S_CTRL", &self.devname))?;
        Ok(())
    }

    fn get_control(&self, id: u32) -> Result<i32> {
        let mut ctrl = V4l2Control { id, value: 0 };
        // SAFETY: ctrl is a valid v4l2_control for the duration of the call.
        unsafe { vidioc_g_ctrl(self.file.as_raw_fd(), &mut ctrl) }
            .map_err(Error::ioctl("VIDIOC_G_CTRL", &self.devname))?;
        Ok(ctrl.value)
    }
}

/// Opens real sub-device nodes.
#[derive(Clone, Copy, Debug, Default)]
pub struct V4l2SubdevProvider;

impl SubdevProvider for V4l2SubdevProvider {
    fn open(&self, devname: &str) -> Result<Box<dyn Subdev>> {
        Ok(Box::new(V4l2Subdevice::open(devname)?))
    }
}
