// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capture buffers shared between the orchestrator and its consumers.

use crate::config::MemoryType;
use std::{
    fmt,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    ptr::NonNull,
    slice::from_raw_parts,
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tracing::warn;

/// Frame metadata filled in when a buffer is queued and dequeued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameMeta {
    /// Sequence predicted when the buffer was queued, -1 if none
    pub predicted_sequence: i64,
    /// Sequence reported by the kernel, -1 before the first dequeue
    pub sequence: i64,
    pub timestamp: Duration,
    pub bytes_used: u32,
    pub flags: u32,
    pub field: u32,
}

/// Memory-mapped view of a kernel allocated buffer, unmapped on drop.
pub struct MappedMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively and only read through &self.
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

impl MappedMemory {
    /// Map `len` bytes of `fd` at `offset`.
    pub fn map(fd: RawFd, offset: u32, len: usize) -> std::io::Result<Self> {
        // SAFETY: a fresh shared mapping is requested, the kernel validates fd
        // and the range.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        NonNull::new(ptr.cast::<u8>())
            .map(|ptr| MappedMemory { ptr, len })
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable))
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is a live mapping of len bytes.
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedMemory {
    fn drop(&mut self) {
        // SAFETY: ptr and len describe a mapping created by MappedMemory::map.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } < 0 {
            warn!("munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

/// Storage behind a capture buffer.
pub enum Backing {
    /// Not yet backed; MMAP buffers get a mapping from
    /// [`CaptureOrchestrator::allocate_memory`](crate::capture::CaptureOrchestrator::allocate_memory)
    None,
    Mmap(MappedMemory),
    /// Process memory handed to the driver by address
    UserPtr(Box<[u8]>),
    DmaBuf { fd: OwnedFd, len: usize },
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::None => f.write_str("None"),
            Backing::Mmap(map) => write!(f, "Mmap({} bytes)", map.len()),
            Backing::UserPtr(data) => write!(f, "UserPtr({} bytes)", data.len()),
            Backing::DmaBuf { fd, len } => write!(f, "DmaBuf(fd {}, {} bytes)", fd.as_raw_fd(), len),
        }
    }
}

struct Inner {
    backing: Backing,
    meta: FrameMeta,
}

/// A frame buffer exchanged with a capture device.
pub struct CameraBuffer {
    index: u32,
    memory: MemoryType,
    inner: Mutex<Inner>,
}

impl CameraBuffer {
    fn with_backing(index: u32, memory: MemoryType, backing: Backing) -> Self {
        CameraBuffer {
            index,
            memory,
            inner: Mutex::new(Inner {
                backing,
                meta: FrameMeta {
                    predicted_sequence: -1,
                    sequence: -1,
                    ..Default::default()
                },
            }),
        }
    }

    /// An unbacked buffer of the given memory type.
    pub fn new(index: u32, memory: MemoryType) -> Self {
        Self::with_backing(index, memory, Backing::None)
    }

    /// A user pointer buffer owning `len` zeroed bytes.
    pub fn user_ptr(index: u32, len: usize) -> Self {
        Self::with_backing(
            index,
            MemoryType::UserPtr,
            Backing::UserPtr(vec![0u8; len].into_boxed_slice()),
        )
    }

    /// A buffer importing the DMA-BUF `fd` of `len` bytes.
    pub fn dma_buf(index: u32, fd: OwnedFd, len: usize) -> Self {
        Self::with_backing(index, MemoryType::DmaBuf, Backing::DmaBuf { fd, len })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn memory(&self) -> MemoryType {
        self.memory
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn meta(&self) -> FrameMeta {
        self.lock().meta
    }

    pub fn update_meta(&self, f: impl FnOnce(&mut FrameMeta)) {
        f(&mut self.lock().meta)
    }

    /// Length of the backing storage in bytes, 0 when unbacked.
    pub fn len(&self) -> usize {
        match &self.lock().backing {
            Backing::None => 0,
            Backing::Mmap(map) => map.len(),
            Backing::UserPtr(data) => data.len(),
            Backing::DmaBuf { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_backed(&self) -> bool {
        !matches!(self.lock().backing, Backing::None)
    }

    pub fn set_backing(&self, backing: Backing) {
        self.lock().backing = backing;
    }

    /// Run `f` over the CPU visible bytes of the buffer. `None` for
    /// DMA-BUF and unbacked buffers.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        match &self.lock().backing {
            Backing::Mmap(map) => Some(f(map.as_slice())),
            Backing::UserPtr(data) => Some(f(data)),
            Backing::None | Backing::DmaBuf { .. } => None,
        }
    }

    /// Address and length to hand to the driver for user pointer buffers.
    pub(crate) fn user_ptr_addr(&self) -> Option<(u64, u32)> {
        match &self.lock().backing {
            Backing::UserPtr(data) => Some((data.as_ptr() as u64, data.len() as u32)),
            _ => None,
        }
    }

    pub(crate) fn dma_buf_fd(&self) -> Option<(RawFd, u32)> {
        match &self.lock().backing {
            Backing::DmaBuf { fd, len } => Some((fd.as_raw_fd(), *len as u32)),
            _ => None,
        }
    }
}

impl fmt::Debug for CameraBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CameraBuffer")
            .field("index", &self.index)
            .field("memory", &self.memory)
            .field("backing", &inner.backing)
            .field("meta", &inner.meta)
            .finish()
    }
}
