// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame and event listener registries.

use crate::{buffer::CameraBuffer, config::Port};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{trace, warn};

/// Receives every delivered frame.
pub trait FrameListener: Send + Sync {
    fn on_frame_available(&self, port: Port, buffer: Arc<CameraBuffer>);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A frame was delivered
    Frame,
    /// The capture system stopped producing frames
    IsysError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventData {
    Frame { sequence: i64, timestamp: Duration },
    IsysError,
}

impl EventData {
    pub const fn event_type(&self) -> EventType {
        match self {
            EventData::Frame { .. } => EventType::Frame,
            EventData::IsysError => EventType::IsysError,
        }
    }
}

/// Receives events of the types it is registered for.
pub trait EventListener: Send + Sync {
    fn notify(&self, event: &EventData);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Frame listener registry. Listeners are compared by identity.
#[derive(Default)]
pub struct FrameListeners {
    listeners: Mutex<Vec<Arc<dyn FrameListener>>>,
}

impl FrameListeners {
    pub fn add(&self, listener: Arc<dyn FrameListener>) {
        let mut listeners = lock(&self.listeners);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &Arc<dyn FrameListener>) {
        lock(&self.listeners).retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn remove_all(&self) {
        lock(&self.listeners).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `buffer` to every listener. The registry is not locked while
    /// listeners run, so they may register or remove listeners.
    pub fn notify(&self, port: Port, buffer: &Arc<CameraBuffer>) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_frame_available(port, buffer.clone());
        }
    }
}

/// Event listener registry keyed by event type.
#[derive(Default)]
pub struct EventSource {
    listeners: Mutex<Vec<(EventType, Arc<dyn EventListener>)>>,
}

impl EventSource {
    pub fn register(&self, event_type: EventType, listener: Arc<dyn EventListener>) {
        let mut listeners = lock(&self.listeners);
        if !listeners
            .iter()
            .any(|(t, l)| *t == event_type && Arc::ptr_eq(l, &listener))
        {
            listeners.push((event_type, listener));
        }
    }

    pub fn remove(&self, event_type: EventType, listener: &Arc<dyn EventListener>) {
        lock(&self.listeners).retain(|(t, l)| !(*t == event_type && Arc::ptr_eq(l, listener)));
    }

    pub fn remove_all(&self) {
        lock(&self.listeners).clear();
    }

    pub fn notify(&self, event: &EventData) {
        let event_type = event.event_type();
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .filter(|(t, _)| *t == event_type)
            .map(|(_, l)| l.clone())
            .collect();
        trace!(?event_type, listeners = listeners.len(), "notify event");
        for listener in listeners {
            listener.notify(event);
        }
    }
}

/// A frame delivered through a [`FrameChannel`].
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub port: Port,
    pub buffer: Arc<CameraBuffer>,
}

/// Forwards frames into a bounded `kanal` channel.
///
/// Size the channel with [`CaptureOrchestrator::client_buffers`] so every
/// buffer in rotation fits. Frames arriving while the channel is full are
/// held back until [`FrameChannel::take_overflow`] hands them out, so no
/// buffer leaves rotation.
///
/// [`CaptureOrchestrator::client_buffers`]: crate::capture::CaptureOrchestrator::client_buffers
pub struct FrameChannel {
    tx: kanal::Sender<CapturedFrame>,
    overflow: Mutex<Vec<CapturedFrame>>,
}

impl FrameChannel {
    pub fn new(capacity: usize) -> (Self, kanal::Receiver<CapturedFrame>) {
        let (tx, rx) = kanal::bounded(capacity);
        let channel = FrameChannel {
            tx,
            overflow: Mutex::new(Vec::new()),
        };
        (channel, rx)
    }

    /// Frames that did not fit in the channel, oldest first.
    pub fn take_overflow(&self) -> Vec<CapturedFrame> {
        std::mem::take(&mut *lock(&self.overflow))
    }
}

impl FrameListener for FrameChannel {
    fn on_frame_available(&self, port: Port, buffer: Arc<CameraBuffer>) {
        let index = buffer.index();
        let mut frame = Some(CapturedFrame { port, buffer });
        match self.tx.try_send_option(&mut frame) {
            Ok(true) => {}
            Ok(false) => {
                warn!(port = %port, index, "frame channel full, holding frame");
                lock(&self.overflow).extend(frame);
            }
            Err(_) => trace!(port = %port, "frame channel closed"),
        }
    }
}
