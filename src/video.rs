// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture video nodes.
//!
//! [`CaptureDevice`] is the streaming protocol the orchestrator drives.
//! [`VideoNode`] implements it for `/dev/videoN` nodes with single or
//! multi-planar capture queues.

use crate::{
    buffer::{Backing, CameraBuffer, MappedMemory},
    config::{MemoryType, StreamConfig},
    error::{Error, Result},
    format::{format_row_stride, FourCc},
    uapi::{c_str, videodev2::*},
};
use libc::c_int;
use std::{
    fs::{File, OpenOptions},
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    time::Duration,
};
use tracing::{debug, trace};

/// Format accepted by the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub format: FourCc,
    pub field: u32,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

/// Location of a kernel allocated buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: u32,
    pub offset: u32,
}

/// A completed frame as reported by the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DequeuedFrame {
    pub index: u32,
    pub sequence: u32,
    pub timestamp: Duration,
    pub bytes_used: u32,
    pub flags: u32,
    pub field: u32,
}

impl DequeuedFrame {
    pub const fn is_error(&self) -> bool {
        self.flags & V4L2_BUF_FLAG_ERROR != 0
    }
}

/// Streaming capture queue of one video node.
pub trait CaptureDevice: Send {
    fn devname(&self) -> &str;

    /// Descriptor signalled when a frame can be dequeued.
    fn poll_fd(&self) -> RawFd;

    fn set_format(&mut self, stream: &StreamConfig) -> Result<NegotiatedFormat>;

    /// Request `count` buffers, returning the number the driver allocated.
    fn request_buffers(&mut self, count: u32, memory: MemoryType) -> Result<u32>;

    fn query_buffer(&self, index: u32) -> Result<BufferInfo>;

    /// Back an MMAP `buffer` with a mapping of its kernel memory.
    fn map_buffer(&self, buffer: &CameraBuffer) -> Result<()>;

    /// Export an MMAP buffer as a DMA-BUF descriptor.
    fn export_buffer(&self, index: u32) -> Result<OwnedFd>;

    fn queue(&mut self, buffer: &CameraBuffer) -> Result<()>;

    fn dequeue(&mut self) -> Result<DequeuedFrame>;

    fn stream_on(&mut self) -> Result<()>;

    fn stream_off(&mut self) -> Result<()>;
}

/// Opens capture devices by device node path.
pub trait CaptureDeviceFactory: Send + Sync {
    fn open(&self, devname: &str) -> Result<Box<dyn CaptureDevice>>;
}

/// An open `/dev/videoN` capture node.
#[derive(Debug)]
pub struct VideoNode {
    devname: String,
    file: File,
    buf_type: u32,
    memory: MemoryType,
}

impl VideoNode {
    pub fn open(devname: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(devname)?;

        let mut cap = V4l2Capability::default();
        // SAFETY: cap is a valid v4l2_capability for the duration of the call.
        unsafe { vidioc_querycap(file.as_raw_fd(), &mut cap) }
            .map_err(Error::ioctl("VIDIOC_QUERYCAP", devname))?;

        let caps = match cap.capabilities & V4L2_CAP_DEVICE_CAPS {
            0 => cap.capabilities,
            _ => cap.device_caps,
        };
        let buf_type = if caps & V4L2_CAP_VIDEO_CAPTURE_MPLANE != 0 {
            V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE
        } else if caps & V4L2_CAP_VIDEO_CAPTURE != 0 {
            V4L2_BUF_TYPE_VIDEO_CAPTURE
        } else {
            return Err(Error::Config(format!("{devname} is not a capture device")));
        };

        debug!(
            devname,
            driver = %c_str(&cap.driver),
            card = %c_str(&cap.card),
            mplane = buf_type == V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE,
            "opened video node"
        );
        Ok(VideoNode {
            devname: devname.to_string(),
            file,
            buf_type,
            memory: MemoryType::Mmap,
        })
    }

    fn is_mplane(&self) -> bool {
        self.buf_type == V4L2_BUF_TYPE_VIDEO_CAPTURE_MPLANE
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn new_buffer(&self, index: u32) -> V4l2Buffer {
        V4l2Buffer {
            index,
            type_: self.buf_type,
            memory: self.memory.as_v4l2(),
            ..Default::default()
        }
    }
}

fn timestamp(tv: &libc::timeval) -> Duration {
    Duration::new(tv.tv_sec.max(0) as u64, (tv.tv_usec.max(0) as u32) * 1000)
}

impl CaptureDevice for VideoNode {
    fn devname(&self) -> &str {
        &self.devname
    }

    fn poll_fd(&self) -> RawFd {
        self.fd()
    }

    fn set_format(&mut self, stream: &StreamConfig) -> Result<NegotiatedFormat> {
        let stride = format_row_stride(stream.format, stream.width).unwrap_or(0);
        let mut fmt = V4l2Format {
            type_: self.buf_type,
            ..Default::default()
        };
        if self.is_mplane() {
            let mut pix = V4l2PixFormatMplane {
                width: stream.width,
                height: stream.height,
                pixelformat: stream.format.as_u32(),
                field: stream.field,
                num_planes: 1,
                ..Default::default()
            };
            pix.plane_fmt[0].bytesperline = stride;
            fmt.fmt.pix_mp = pix;
        } else {
            fmt.fmt.pix = V4l2PixFormat {
                width: stream.width,
                height: stream.height,
                pixelformat: stream.format.as_u32(),
                field: stream.field,
                bytesperline: stride,
                ..Default::default()
            };
        }

        // SAFETY: fmt is a valid v4l2_format for the duration of the call.
        unsafe { vidioc_s_fmt(self.fd(), &mut fmt) }
            .map_err(Error::ioctl("VIDIOC_S_FMT", &self.devname))?;

        // SAFETY: the driver filled the union member selected by type_.
        let negotiated = unsafe {
            if self.is_mplane() {
                let pix = fmt.fmt.pix_mp;
                NegotiatedFormat {
                    width: pix.width,
                    height: pix.height,
                    format: FourCc::from_u32(pix.pixelformat),
                    field: pix.field,
                    bytes_per_line: pix.plane_fmt[0].bytesperline,
                    size_image: pix.plane_fmt[0].sizeimage,
                }
            } else {
                let pix = fmt.fmt.pix;
                NegotiatedFormat {
                    width: pix.width,
                    height: pix.height,
                    format: FourCc::from_u32(pix.pixelformat),
                    field: pix.field,
                    bytes_per_line: pix.bytesperline,
                    size_image: pix.sizeimage,
                }
            }
        };
        debug!(
            devname = %self.devname,
            width = negotiated.width,
            height = negotiated.height,
            format = %negotiated.format,
            size_image = negotiated.size_image,
            "VIDIOC_S_FMT"
        );
        Ok(negotiated)
    }

    fn request_buffers(&mut self, count: u32, memory: MemoryType) -> Result<u32> {
        if memory == MemoryType::Overlay {
            return Err(Error::UnsupportedMemory(memory));
        }
        let mut req = V4l2RequestBuffers {
            count,
            type_: self.buf_type,
            memory: memory.as_v4l2(),
            ..Default::default()
        };
        // SAFETY: req is a valid v4l2_requestbuffers for the duration of the call.
        unsafe { vidioc_reqbufs(self.fd(), &mut req) }
            .map_err(Error::ioctl("VIDIOC_REQBUFS", &self.devname))?;
        self.memory = memory;
        debug!(devname = %self.devname, requested = count, allocated = req.count, "VIDIOC_REQBUFS");
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo> {
        let mut buf = self.new_buffer(index);
        let mut planes = [V4l2Plane::default(); VIDEO_MAX_PLANES];
        if self.is_mplane() {
            buf.m.planes = planes.as_mut_ptr();
            buf.length = VIDEO_MAX_PLANES as u32;
        }
        // SAFETY: buf and planes are valid for the duration of the call.
        unsafe { vidioc_querybuf(self.fd(), &mut buf) }
            .map_err(Error::ioctl("VIDIOC_QUERYBUF", &self.devname))?;

        // SAFETY: for MMAP buffers the driver fills the offset members.
        let (length, offset) = unsafe {
            match self.is_mplane() {
                true => (planes[0].length, planes[0].m.mem_offset),
                false => (buf.length, buf.m.offset),
            }
        };
        Ok(BufferInfo {
            index,
            length,
            offset,
        })
    }

    fn map_buffer(&self, buffer: &CameraBuffer) -> Result<()> {
        if buffer.memory() != MemoryType::Mmap {
            return Err(Error::UnsupportedMemory(buffer.memory()));
        }
        let info = self.query_buffer(buffer.index())?;
        let map = MappedMemory::map(self.fd(), info.offset, info.length as usize)?;
        trace!(devname = %self.devname, index = info.index, length = info.length, "mapped buffer");
        buffer.set_backing(Backing::Mmap(map));
        Ok(())
    }

    fn export_buffer(&self, index: u32) -> Result<OwnedFd> {
        let mut exp = V4l2ExportBuffer {
            type_: self.buf_type,
            index,
            flags: (libc::O_CLOEXEC | libc::O_RDWR) as u32,
            ..Default::default()
        };
        // SAFETY: exp is a valid v4l2_exportbuffer for the duration of the call.
        unsafe { vidioc_expbuf(self.fd(), &mut exp) }
            .map_err(Error::ioctl("VIDIOC_EXPBUF", &self.devname))?;
        // SAFETY: the driver returned a new descriptor owned by the caller.
        Ok(unsafe { OwnedFd::from_raw_fd(exp.fd) })
    }

    fn queue(&mut self, buffer: &CameraBuffer) -> Result<()> {
        if buffer.memory() != self.memory {
            return Err(Error::UnsupportedMemory(buffer.memory()));
        }
        let mut buf = self.new_buffer(buffer.index());
        let mut planes = [V4l2Plane::default(); VIDEO_MAX_PLANES];

        match self.memory {
            MemoryType::UserPtr => {
                let (addr, len) = buffer.user_ptr_addr().ok_or_else(|| {
                    Error::Config(format!("buffer {} has no user memory", buffer.index()))
                })?;
                planes[0].m.userptr = addr as libc::c_ulong;
                planes[0].length = len;
                buf.m.userptr = addr as libc::c_ulong;
                buf.length = len;
            }
            MemoryType::DmaBuf => {
                let (fd, len) = buffer.dma_buf_fd().ok_or_else(|| {
                    Error::Config(format!("buffer {} has no dma-buf", buffer.index()))
                })?;
                planes[0].m.fd = fd;
                planes[0].length = len;
                buf.m.fd = fd;
                buf.length = len;
            }
            MemoryType::Mmap => {}
            MemoryType::Overlay => return Err(Error::UnsupportedMemory(self.memory)),
        }
        if self.is_mplane() {
            buf.m.planes = planes.as_mut_ptr();
            buf.length = 1;
        }

        // SAFETY: buf and planes are valid for the duration of the call.
        unsafe { vidioc_qbuf(self.fd(), &mut buf) }
            .map_err(Error::ioctl("VIDIOC_QBUF", &self.devname))?;
        trace!(devname = %self.devname, index = buffer.index(), "VIDIOC_QBUF");
        Ok(())
    }

    fn dequeue(&mut self) -> Result<DequeuedFrame> {
        let mut buf = self.new_buffer(0);
        let mut planes = [V4l2Plane::default(); VIDEO_MAX_PLANES];
        if self.is_mplane() {
            buf.m.planes = planes.as_mut_ptr();
            buf.length = VIDEO_MAX_PLANES as u32;
        }

        // SAFETY: buf and planes are valid for the duration of the call.
        unsafe { vidioc_dqbuf(self.fd(), &mut buf) }
            .map_err(Error::ioctl("VIDIOC_DQBUF", &self.devname))?;

        let bytes_used = match self.is_mplane() {
            true => planes[0].bytesused,
            false => buf.bytesused,
        };
        let frame = DequeuedFrame {
            index: buf.index,
            sequence: buf.sequence,
            timestamp: timestamp(&buf.timestamp),
            bytes_used,
            flags: buf.flags,
            field: buf.field,
        };
        trace!(
            devname = %self.devname,
            index = frame.index,
            sequence = frame.sequence,
            "VIDIOC_DQBUF"
        );
        Ok(frame)
    }

    fn stream_on(&mut self) -> Result<()> {
        let buf_type = self.buf_type as c_int;
        // SAFETY: buf_type outlives the call.
        unsafe { vidioc_streamon(self.fd(), &buf_type) }
            .map_err(Error::ioctl("VIDIOC_STREAMON", &self.devname))?;
        debug!(devname = %self.devname, "stream on");
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let buf_type = self.buf_type as c_int;
        // SAFETY: buf_type outlives the call.
        unsafe { vidioc_streamoff(self.fd(), &buf_type) }
            .map_err(Error::ioctl("VIDIOC_STREAMOFF", &self.devname))?;
        debug!(devname = %self.devname, "stream off");
        Ok(())
    }
}

/// Opens real video nodes.
#[derive(Clone, Copy, Debug, Default)]
pub struct VideoNodeFactory;

impl CaptureDeviceFactory for VideoNodeFactory {
    fn open(&self, devname: &str) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(VideoNode::open(devname)?))
    }
}
