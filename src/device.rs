// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture device handles and their buffer bookkeeping.
//!
//! A [`DeviceHandle`] binds one [`CaptureDevice`] to a [`Port`] and tracks
//! three buffer collections: buffers allocated internally, buffers pending
//! from the client and buffers queued to the device. A buffer is never both
//! pending and in the device.

use crate::{
    buffer::CameraBuffer,
    config::{MemoryType, PlatformSettings, Port, StreamConfig, VideoNodeType},
    error::{Error, Result},
    format::frame_size,
    video::{CaptureDevice, NegotiatedFormat},
};
use std::{collections::VecDeque, os::fd::OwnedFd, os::fd::RawFd, sync::Arc};
use tracing::{debug, trace, warn};

/// Outcome of a dequeue.
#[derive(Debug)]
pub struct Dequeued {
    pub buffer: Arc<CameraBuffer>,
    /// The frame is dropped and its buffer was put back into pending
    pub skipped: bool,
    /// Index the driver returned when it differs from the expected buffer
    pub index_mismatch: Option<u32>,
}

pub struct DeviceHandle {
    node_type: VideoNodeType,
    port: Port,
    device: Box<dyn CaptureDevice>,
    format: Option<NegotiatedFormat>,
    memory: MemoryType,
    max_buffers: u32,
    allocated: Vec<Arc<CameraBuffer>>,
    pending: VecDeque<Arc<CameraBuffer>>,
    in_device: VecDeque<Arc<CameraBuffer>>,
    latest_sequence: i64,
    frame_skip: u32,
    initial_skip: u32,
    skip_on_error: bool,
}

impl DeviceHandle {
    pub fn new(
        node_type: VideoNodeType,
        device: Box<dyn CaptureDevice>,
        settings: &PlatformSettings,
    ) -> Self {
        DeviceHandle {
            node_type,
            port: Port::Invalid,
            device,
            format: None,
            memory: MemoryType::Mmap,
            max_buffers: settings.max_raw_buffers,
            allocated: Vec::new(),
            pending: VecDeque::new(),
            in_device: VecDeque::new(),
            latest_sequence: -1,
            frame_skip: settings.initial_skip_frames,
            initial_skip: settings.initial_skip_frames,
            skip_on_error: settings.skip_frame_on_buffer_error,
        }
    }

    pub fn name(&self) -> &str {
        self.device.devname()
    }

    pub fn node_type(&self) -> VideoNodeType {
        self.node_type
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn format(&self) -> Option<&NegotiatedFormat> {
        self.format.as_ref()
    }

    pub fn max_buffers(&self) -> u32 {
        self.max_buffers
    }

    pub fn poll_fd(&self) -> RawFd {
        self.device.poll_fd()
    }

    /// Set the format and request buffers for `stream` on `port`.
    ///
    /// Devices bound to [`Port::Invalid`] have no client and allocate their
    /// own buffers, which are recycled through pending on every reset.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the stream's frame size overflows, [`Error::FrameSize`]
    /// when the driver's image size exceeds the size of the stream's pixel
    /// format, and any failed device request.
    pub fn configure(&mut self, port: Port, stream: &StreamConfig, buffers: u32) -> Result<()> {
        debug!(
            device = %self.name(),
            port = %port,
            width = stream.width,
            height = stream.height,
            format = %stream.format,
            field = stream.field,
            "configure device"
        );
        if stream.memory == MemoryType::Overlay {
            return Err(Error::UnsupportedMemory(stream.memory));
        }
        if stream.size_overflows() {
            return Err(Error::Config(format!(
                "port {port}: {}x{} {} frame size overflows",
                stream.width, stream.height, stream.format
            )));
        }
        self.port = port;
        self.max_buffers = buffers;

        let negotiated = self.device.set_format(stream)?;
        match frame_size(stream.width, stream.height, stream.format) {
            Some(expected) if negotiated.size_image > expected => {
                return Err(Error::FrameSize {
                    port,
                    expected,
                    actual: negotiated.size_image,
                });
            }
            Some(_) => {}
            None => trace!(format = %stream.format, "no frame size check for format"),
        }
        self.format = Some(negotiated);

        let count = self.device.request_buffers(buffers, stream.memory)?;
        if count < buffers {
            warn!(device = %self.name(), requested = buffers, count, "driver allocated fewer buffers");
        }
        self.memory = stream.memory;

        self.allocated.clear();
        if port == Port::Invalid {
            self.allocate_internal(count, negotiated.size_image as usize)?;
        }
        self.reset_buffers();
        Ok(())
    }

    fn allocate_internal(&mut self, count: u32, size: usize) -> Result<()> {
        for index in 0..count {
            let buffer = match self.memory {
                MemoryType::Mmap => {
                    let buffer = CameraBuffer::new(index, MemoryType::Mmap);
                    self.device.map_buffer(&buffer)?;
                    buffer
                }
                MemoryType::UserPtr => CameraBuffer::user_ptr(index, size),
                memory => return Err(Error::UnsupportedMemory(memory)),
            };
            self.allocated.push(Arc::new(buffer));
        }
        debug!(device = %self.name(), count, "allocated internal buffers");
        Ok(())
    }

    /// Back an MMAP client buffer with device memory.
    pub fn allocate_memory(&self, buffer: &CameraBuffer) -> Result<()> {
        self.device.map_buffer(buffer)
    }

    pub fn export_buffer(&self, index: u32) -> Result<OwnedFd> {
        self.device.export_buffer(index)
    }

    pub fn stream_on(&mut self) -> Result<()> {
        self.frame_skip = self.initial_skip;
        self.device.stream_on()
    }

    /// Stream off, logging failures.
    pub fn stream_off(&mut self) {
        if let Err(err) = self.device.stream_off() {
            warn!(device = %self.name(), "stream off failed: {}", err);
        }
    }

    /// Drop queued and pending buffers, then re-seed pending with the
    /// internally allocated ones.
    pub fn reset_buffers(&mut self) {
        self.in_device.clear();
        self.pending.clear();
        self.pending.extend(self.allocated.iter().cloned());
    }

    pub fn add_pending(&mut self, buffer: Arc<CameraBuffer>) {
        trace!(device = %self.name(), index = buffer.index(), "pending buffer");
        self.pending.push_back(buffer);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_device(&self) -> usize {
        self.in_device.len()
    }

    pub fn latest_sequence(&self) -> i64 {
        self.latest_sequence
    }

    /// Sequence the next queued buffer is expected to carry.
    pub fn predict_sequence(&self) -> i64 {
        self.latest_sequence + self.frame_skip as i64 + self.in_device.len() as i64
    }

    /// Queue the oldest pending buffer tagged with `sequence`. Returns false
    /// when nothing is pending.
    pub fn queue_buffer(&mut self, sequence: i64) -> Result<bool> {
        let Some(buffer) = self.pending.front().cloned() else {
            trace!(device = %self.name(), "no pending buffer to queue");
            return Ok(false);
        };
        buffer.update_meta(|meta| meta.predicted_sequence = sequence);
        self.device.queue(&buffer)?;

        self.pending.pop_front();
        self.in_device.push_back(buffer);
        Ok(true)
    }

    /// Tag the most recently queued buffer with `sequence`.
    pub fn tag_last_queued(&self, sequence: i64) {
        if let Some(buffer) = self.in_device.back() {
            buffer.update_meta(|meta| meta.predicted_sequence = sequence);
        }
    }

    /// Dequeue the oldest buffer in the device.
    ///
    /// Skipped frames, either within the initial skip count or flagged as
    /// errors when error skipping is enabled, are put back into pending, as
    /// is every buffer of a device bound to [`Port::Invalid`].
    pub fn dequeue_buffer(&mut self) -> Result<Dequeued> {
        let buffer = self
            .in_device
            .front()
            .cloned()
            .ok_or(Error::QueueEmpty(self.port))?;

        let frame = self.device.dequeue()?;
        buffer.update_meta(|meta| {
            meta.sequence = frame.sequence as i64;
            meta.timestamp = frame.timestamp;
            meta.bytes_used = frame.bytes_used;
            meta.flags = frame.flags;
            meta.field = frame.field;
        });

        let index_mismatch = (frame.index != buffer.index()).then_some(frame.index);
        let skipped = self.frame_skip > 0 || (frame.is_error() && self.skip_on_error);

        self.in_device.pop_front();
        self.latest_sequence = frame.sequence as i64;
        // Internal buffers have no client to hand them back.
        if skipped || self.port == Port::Invalid {
            self.pending.push_back(buffer.clone());
        }
        if self.frame_skip > 0 {
            self.frame_skip -= 1;
        }

        trace!(
            device = %self.name(),
            index = frame.index,
            sequence = frame.sequence,
            skipped,
            "dequeued"
        );
        Ok(Dequeued {
            buffer,
            skipped,
            index_mismatch,
        })
    }
}
