// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the media pipeline and capture orchestrator.

use crate::{
    capture::State,
    config::{MemoryType, Port},
};
use nix::errno::Errno;
use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by topology discovery, link routing and capture.
///
/// A stopped poll loop is not an error; it is reported in-band as
/// [`PollOutcome::Cancelled`](crate::capture::PollOutcome::Cancelled).
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while opening or reading a device or sysfs node.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A kernel request was rejected by the device.
    #[error("{request} failed on {device}: {source}")]
    Ioctl {
        request: &'static str,
        device: String,
        source: Errno,
    },

    /// No media controller device matched the requested driver.
    #[error("no media device found for driver {0:?}")]
    NoMediaDevice(String),

    /// The operation is not allowed in the current session state.
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState { operation: &'static str, state: State },

    /// No capture device is bound to the requested port.
    #[error("no capture device for port {0}")]
    NoDeviceForPort(Port),

    /// The memory type cannot be used for streaming capture.
    #[error("unsupported memory type {0:?}")]
    UnsupportedMemory(MemoryType),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// No entity with the given name exists in the media graph.
    #[error("entity {0:?} not found")]
    EntityNotFound(String),

    /// The entity has no pad with the given index.
    #[error("entity {entity:?} has no pad {pad}")]
    PadOutOfRange { entity: String, pad: u32 },

    /// The entity has no resolved device node.
    #[error("entity {0:?} has no device node")]
    NoDevnode(String),

    /// The negotiated image size exceeds what the pixel format allows.
    #[error("port {port}: kernel image size {actual} exceeds expected {expected}")]
    FrameSize { port: Port, expected: u32, actual: u32 },

    /// No link connects the two pads.
    #[error("no link {from} -> {to}")]
    LinkNotFound { from: String, to: String },

    /// Attempt to disable an immutable link.
    #[error("link {from} -> {to} is immutable")]
    ImmutableLink { from: String, to: String },

    /// More than one enabled mutable link would feed the same sink pad.
    #[error("sink pad {0} would have more than one enabled link")]
    ConflictingRoute(String),

    /// The device returned a different buffer than the oldest queued one.
    #[error("port {port}: dequeued buffer {actual}, expected {expected}")]
    BufferIndex { port: Port, expected: u32, actual: u32 },

    /// Dequeue was requested with no buffer queued to the device.
    #[error("port {0}: no buffer queued to device")]
    QueueEmpty(Port),
}

impl Error {
    /// Map an errno from `request` on `device` into an [`Error::Ioctl`].
    pub fn ioctl(request: &'static str, device: impl Into<String>) -> impl FnOnce(Errno) -> Error {
        let device = device.into();
        move |source| Error::Ioctl {
            request,
            device,
            source,
        }
    }

    /// The kernel errno carried by this error, if any.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Ioctl { source, .. } => Some(*source),
            Error::Io(err) => err.raw_os_error().map(Errno::from_i32),
            _ => None,
        }
    }
}
