// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Cancellable polling over capture device descriptors.
//!
//! An [`EventPipe`] is a non-blocking self-pipe. Writing a byte to it wakes
//! any [`DevicePoller::poll`] call that includes the read end, which is how a
//! stop request interrupts a blocked poll.

use crate::error::{Error, Result};
use nix::errno::Errno;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::{trace, warn};

/// Non-blocking self-pipe used to cancel a poll.
#[derive(Debug)]
pub struct EventPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl EventPipe {
    pub fn new() -> Result<Self> {
        let mut fds = [-1; 2];
        // SAFETY: fds has room for the two descriptors pipe2 returns.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // SAFETY: pipe2 succeeded so both descriptors are open and owned here.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(EventPipe { read, write })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Wake pollers. A full pipe already holds a wake-up and is not an error.
    pub fn notify(&self) -> Result<()> {
        let byte = 0xfu8;
        // SAFETY: writes one byte from a valid stack location.
        let ret = unsafe { libc::write(self.write.as_raw_fd(), (&byte as *const u8).cast(), 1) };
        if ret < 0 {
            let err = Errno::last();
            if err != Errno::EAGAIN {
                return Err(Error::Io(err.into()));
            }
        }
        trace!("event pipe notified");
        Ok(())
    }

    /// Discard pending wake-ups, returning how many bytes were read.
    pub fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            // SAFETY: reads into a stack buffer of the given length.
            let ret = unsafe {
                libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
            };
            if ret <= 0 {
                break;
            }
            total += ret as usize;
        }
        if total > 0 {
            trace!(bytes = total, "event pipe drained");
        }
        total
    }
}

/// Result of one poll call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollEvent {
    /// Indices of devices with a frame ready
    Ready(Vec<usize>),
    /// The event pipe was written
    Cancelled,
    Timeout,
}

/// Polls a set of device descriptors together with an [`EventPipe`].
pub struct DevicePoller<'a> {
    fds: Vec<libc::pollfd>,
    pipe: &'a EventPipe,
}

impl<'a> DevicePoller<'a> {
    /// Build a poll set. Device `i` of the returned [`PollEvent::Ready`]
    /// refers to `devices[i]`.
    pub fn new(devices: &[RawFd], pipe: &'a EventPipe) -> Self {
        let mut fds: Vec<libc::pollfd> = devices
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLPRI | libc::POLLIN | libc::POLLERR,
                revents: 0,
            })
            .collect();
        fds.push(libc::pollfd {
            fd: pipe.read_fd(),
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        });
        DevicePoller { fds, pipe }
    }

    /// Wait up to `timeout_ms` for a device or the pipe to become ready.
    /// An interrupted wait is reported as a timeout.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<PollEvent> {
        for fd in &mut self.fds {
            fd.revents = 0;
        }
        // SAFETY: fds is a valid array of pollfd of the given length.
        let ret = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ret < 0 {
            return match Errno::last() {
                Errno::EINTR => Ok(PollEvent::Timeout),
                err => Err(Error::Io(err.into())),
            };
        }
        if ret == 0 {
            return Ok(PollEvent::Timeout);
        }

        let Some((pipe, devices)) = self.fds.split_last() else {
            return Ok(PollEvent::Timeout);
        };
        if pipe.revents != 0 {
            self.pipe.drain();
            return Ok(PollEvent::Cancelled);
        }

        let mut ready = Vec::new();
        for (index, fd) in devices.iter().enumerate() {
            if fd.revents & (libc::POLLIN | libc::POLLPRI) != 0 {
                ready.push(index);
            } else if fd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                warn!(fd = fd.fd, revents = fd.revents, "device poll error");
            }
        }

        match ready.is_empty() {
            true => Ok(PollEvent::Timeout),
            false => Ok(PollEvent::Ready(ready)),
        }
    }
}
