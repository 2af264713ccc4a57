// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Multi-device capture orchestration.
//!
//! The [`CaptureOrchestrator`] owns one [`DeviceHandle`] per capture node,
//! keeps their buffer queues filled in lock-step and runs a poll thread that
//! dequeues completed frames and hands them to listeners.
//!
//! Sessions follow `Uninit -> Init -> Configure -> Start <-> Stop`. A stop
//! request sets the exit flag and writes to an [`EventPipe`], which wakes a
//! blocked poll so the poll thread can be joined.

use crate::{
    buffer::CameraBuffer,
    config::{ConfigMode, PlatformSettings, Port, StreamConfig, TuningMode, VideoNodeType},
    device::DeviceHandle,
    error::{Error, Result},
    listener::{EventData, EventListener, EventSource, EventType, FrameListener, FrameListeners},
    poller::{DevicePoller, EventPipe, PollEvent},
    video::CaptureDeviceFactory,
};
use std::{
    collections::{BTreeMap, HashMap},
    os::fd::OwnedFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

/// Session state of a [`CaptureOrchestrator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Uninit,
    Init,
    Configure,
    Start,
    Stop,
}

/// Result of one [`CaptureOrchestrator::poll`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Number of devices a frame was dequeued from
    Dequeued(usize),
    /// No device became ready within the retry budget
    Timeout,
    /// The poll was interrupted by a stop or cancel request
    Cancelled,
}

/// Programs the pixel route for the main stream before devices are opened.
pub trait RouteSetup: Send {
    fn setup_route(&mut self, main: &StreamConfig, port: Port) -> Result<()>;
}

impl<F> RouteSetup for F
where
    F: FnMut(&StreamConfig, Port) -> Result<()> + Send,
{
    fn setup_route(&mut self, main: &StreamConfig, port: Port) -> Result<()> {
        self(main, port)
    }
}

/// Auxiliary processing stage ahead of the ISP.
pub trait PreIspStage: Send {
    fn init(&mut self) -> Result<()>;
    fn configure(&mut self, width: u32, height: u32, mode: TuningMode) -> Result<()>;
    fn deinit(&mut self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared with the poll thread.
struct Shared {
    settings: PlatformSettings,
    max_buffers_in_device: usize,
    state: Mutex<State>,
    devices: Mutex<Vec<DeviceHandle>>,
    exit_pending: AtomicBool,
    pipe: EventPipe,
    frame_listeners: FrameListeners,
    events: EventSource,
}

impl Shared {
    fn state(&self) -> State {
        *lock(&self.state)
    }

    fn set_state(&self, state: State) {
        debug!(?state, "capture state");
        *lock(&self.state) = state;
    }

    fn exiting(&self) -> bool {
        self.exit_pending.load(Ordering::SeqCst)
    }

    /// Queue one round of buffers, one per device. The first device sets
    /// the predicted sequence every sibling buffer is tagged with.
    fn queue_all(&self, devices: &mut [DeviceHandle]) -> Result<()> {
        if self.exiting() {
            return Ok(());
        }

        let mut predicted = None;
        for device in devices.iter_mut() {
            device.queue_buffer(predicted.unwrap_or(-1))?;
            if self.exiting() {
                break;
            }
            if predicted.is_none() {
                let sequence = device.predict_sequence();
                device.tag_last_queued(sequence);
                predicted = Some(sequence);
            }
        }
        trace!(sequence = predicted.unwrap_or(-1), "queued buffer round");
        Ok(())
    }

    /// Queue rounds while every device has a pending buffer and the first
    /// device is below its in-flight limit.
    fn process_pending(&self, devices: &mut [DeviceHandle]) -> Result<()> {
        let Some(first) = devices.first() else {
            return Ok(());
        };
        trace!(in_device = first.in_device(), "process pending buffers");

        while devices[0].in_device() < self.max_buffers_in_device {
            if !devices.iter().all(DeviceHandle::has_pending) {
                break;
            }
            self.queue_all(devices)?;
            if self.exiting() {
                break;
            }
        }
        Ok(())
    }

    fn poll(&self) -> Result<PollOutcome> {
        let state = self.state();
        if state != State::Configure && state != State::Start {
            return Err(Error::InvalidState {
                operation: "poll",
                state,
            });
        }

        let (fds, in_flight, first_in_device) = {
            let devices = lock(&self.devices);
            for device in devices.iter() {
                trace!(device = %device.name(), in_device = device.in_device(), "poll");
            }
            (
                devices.iter().map(DeviceHandle::poll_fd).collect::<Vec<_>>(),
                devices.iter().map(DeviceHandle::in_device).sum::<usize>(),
                devices.first().map_or(0, DeviceHandle::in_device),
            )
        };

        // Idle V4L2 queues report POLLERR, so with nothing in flight only
        // the event pipe is watched for a single period.
        let (fds, iterations) = match in_flight {
            0 => (Vec::new(), 1),
            _ => (fds, self.settings.poll_iterations()),
        };
        let timeout = self.settings.poll_timeout_ms.min(i32::MAX as u32) as i32;
        let mut poller = DevicePoller::new(&fds, &self.pipe);

        let mut event = PollEvent::Timeout;
        for _ in 0..iterations {
            if self.exiting() {
                trace!("exit pending, poll cancelled");
                return Ok(PollOutcome::Cancelled);
            }
            event = poller.poll(timeout)?;
            if event != PollEvent::Timeout {
                break;
            }
        }

        if self.exiting() {
            trace!("exit pending after poll");
            return Ok(PollOutcome::Cancelled);
        }

        match event {
            PollEvent::Cancelled => Ok(PollOutcome::Cancelled),
            PollEvent::Timeout => {
                if in_flight > 0 {
                    info!(in_device = first_in_device, "poll timeout, waiting for recovery");
                }
                if self.settings.max_isys_timeout > 0 && first_in_device > 0 {
                    self.events.notify(&EventData::IsysError);
                }
                Ok(PollOutcome::Timeout)
            }
            PollEvent::Ready(ready) => {
                let mut dequeued = 0;
                for index in ready {
                    match self.dequeue(index) {
                        Ok(()) => dequeued += 1,
                        Err(err) => error!(device = index, "grab frame failed: {}", err),
                    }
                    if self.exiting() {
                        return Ok(PollOutcome::Cancelled);
                    }
                }
                Ok(PollOutcome::Dequeued(dequeued))
            }
        }
    }

    /// Dequeue one frame from device `index`, refill the queues and deliver
    /// the frame. Frames of unbound devices are not delivered. Listeners run
    /// without the device lock held.
    fn dequeue(&self, index: usize) -> Result<()> {
        let (port, dequeued) = {
            let mut devices = lock(&self.devices);
            let device = devices
                .get_mut(index)
                .ok_or_else(|| Error::Config(format!("no capture device {index}")))?;
            let port = device.port();
            let dequeued = device.dequeue_buffer()?;
            if let Err(err) = self.process_pending(&mut devices) {
                warn!("queue pending buffers failed: {}", err);
            }
            (port, dequeued)
        };

        if !dequeued.skipped && port != Port::Invalid {
            let meta = dequeued.buffer.meta();
            trace!(port = %port, sequence = meta.sequence, "frame available");
            self.frame_listeners.notify(port, &dequeued.buffer);
            self.events.notify(&EventData::Frame {
                sequence: meta.sequence,
                timestamp: meta.timestamp,
            });
        }

        match dequeued.index_mismatch {
            Some(actual) => Err(Error::BufferIndex {
                port,
                expected: dequeued.buffer.index(),
                actual,
            }),
            None => Ok(()),
        }
    }

    fn poll_loop(&self) {
        debug!("poll thread started");
        while !self.exiting() {
            match self.poll() {
                Ok(PollOutcome::Cancelled) if self.exiting() => break,
                Ok(outcome) => trace!(?outcome, "poll"),
                Err(_) if self.exiting() => break,
                Err(err) => {
                    error!("poll failed: {}", err);
                    break;
                }
            }
        }
        debug!("poll thread exited");
    }
}

/// Caller side state, serialized by one lock.
struct Control {
    thread: Option<JoinHandle<()>>,
    route: Option<Box<dyn RouteSetup>>,
    pre_isp: Option<Box<dyn PreIspStage>>,
    pre_isp_ready: bool,
    streams: BTreeMap<Port, StreamConfig>,
    config_modes: Vec<ConfigMode>,
}

/// Drives a set of capture devices bound to ports.
///
/// All methods take `&self`; the orchestrator can be shared with producer
/// threads calling [`qbuf`](Self::qbuf). Frame listeners run on the poll
/// thread and must not call [`stop`](Self::stop) or [`deinit`](Self::deinit).
pub struct CaptureOrchestrator {
    shared: Arc<Shared>,
    factory: Box<dyn CaptureDeviceFactory>,
    video_nodes: HashMap<VideoNodeType, String>,
    control: Mutex<Control>,
}

impl CaptureOrchestrator {
    /// Create an orchestrator opening the device nodes in `video_nodes`
    /// through `factory`.
    pub fn new(
        settings: PlatformSettings,
        factory: Box<dyn CaptureDeviceFactory>,
        video_nodes: HashMap<VideoNodeType, String>,
    ) -> Result<Self> {
        let shared = Shared {
            max_buffers_in_device: settings.max_buffers_in_device(),
            settings,
            state: Mutex::new(State::Uninit),
            devices: Mutex::new(Vec::new()),
            exit_pending: AtomicBool::new(false),
            pipe: EventPipe::new()?,
            frame_listeners: FrameListeners::default(),
            events: EventSource::default(),
        };
        Ok(CaptureOrchestrator {
            shared: Arc::new(shared),
            factory,
            video_nodes,
            control: Mutex::new(Control {
                thread: None,
                route: None,
                pre_isp: None,
                pre_isp_ready: false,
                streams: BTreeMap::new(),
                config_modes: Vec::new(),
            }),
        })
    }

    /// Program the pixel route on every [`configure`](Self::configure).
    pub fn with_route_setup(self, route: impl RouteSetup + 'static) -> Self {
        lock(&self.control).route = Some(Box::new(route));
        self
    }

    pub fn with_pre_isp(self, stage: impl PreIspStage + 'static) -> Self {
        lock(&self.control).pre_isp = Some(Box::new(stage));
        self
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    pub fn settings(&self) -> &PlatformSettings {
        &self.shared.settings
    }

    pub fn init(&self) -> Result<()> {
        let _control = lock(&self.control);
        self.shared.set_state(State::Init);
        Ok(())
    }

    /// Stop capture, close every device and tear down the pre-ISP stage.
    pub fn deinit(&self) {
        if self.state() == State::Uninit {
            return;
        }
        if let Err(err) = self.stop() {
            warn!("stop during deinit failed: {}", err);
        }

        let mut control = lock(&self.control);
        lock(&self.shared.devices).clear();
        if let Some(thread) = control.thread.take() {
            if thread.join().is_err() {
                error!("poll thread panicked");
            }
        }
        if control.pre_isp_ready {
            if let Some(stage) = control.pre_isp.as_mut() {
                stage.deinit();
            }
            control.pre_isp_ready = false;
        }
        self.shared.set_state(State::Uninit);
    }

    /// Configure the session for `streams`.
    ///
    /// The default port is the first of [`Port::PRIORITY`] present in
    /// `streams`. The route is programmed for its stream, then every device
    /// is recreated and configured.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] outside `Init`, `Configure` and `Stop`, and
    /// [`Error::Config`] for empty `streams` or a missing default port.
    pub fn configure(
        &self,
        streams: &BTreeMap<Port, StreamConfig>,
        config_modes: &[ConfigMode],
    ) -> Result<()> {
        let mut control = lock(&self.control);
        if streams.is_empty() {
            return Err(Error::Config("no frame info configured".to_string()));
        }
        let state = self.shared.state();
        if !matches!(state, State::Init | State::Configure | State::Stop) {
            return Err(Error::InvalidState {
                operation: "configure",
                state,
            });
        }

        let port = Port::find_default(streams)
            .ok_or_else(|| Error::Config("no stream on a valid port".to_string()))?;
        let main = streams[&port];
        for (port, stream) in streams {
            info!(
                port = %port,
                width = stream.width,
                height = stream.height,
                format = %stream.format,
                "configure stream"
            );
        }

        control.streams = streams.clone();
        control.config_modes = config_modes.to_vec();

        if let Some(route) = control.route.as_mut() {
            route.setup_route(&main, port)?;
        }

        self.create_devices(streams, port)?;

        let Control {
            pre_isp,
            pre_isp_ready,
            config_modes,
            ..
        } = &mut *control;
        if let Some(stage) = pre_isp.as_mut() {
            if !*pre_isp_ready {
                stage.init()?;
                *pre_isp_ready = true;
            }
            let mode = TuningMode::from(config_modes.first().copied().unwrap_or_default());
            stage.configure(main.width, main.height, mode)?;
        }

        self.shared.set_state(State::Configure);
        self.shared.exit_pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Destroy existing devices and open, bind and configure one per
    /// capture node. The first node is bound to `default_port`; the others
    /// to their configured port when it has a stream, otherwise to
    /// [`Port::Invalid`] with the default stream.
    fn create_devices(&self, streams: &BTreeMap<Port, StreamConfig>, default_port: Port) -> Result<()> {
        let settings = &self.shared.settings;
        let mut devices = lock(&self.shared.devices);
        devices.clear();

        let devnames = settings
            .capture_nodes
            .iter()
            .map(|node| {
                self.video_nodes.get(&node.node_type).ok_or_else(|| {
                    Error::Config(format!("no video node for {:?}", node.node_type))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let default_stream = streams[&default_port];
        for (i, (node, devname)) in settings.capture_nodes.iter().zip(devnames).enumerate() {
            let target = match i {
                0 => default_port,
                _ => node.port.unwrap_or(Port::Invalid),
            };
            let (port, stream) = match streams.get(&target) {
                Some(stream) => (target, *stream),
                None => (Port::Invalid, default_stream),
            };

            let device = self.factory.open(devname).inspect_err(|_| devices.clear())?;
            let mut handle = DeviceHandle::new(node.node_type, device, settings);
            if let Err(err) = handle.configure(port, &stream, settings.max_raw_buffers) {
                error!(device = %devname, "configure device failed: {}", err);
                devices.clear();
                return Err(err);
            }
            devices.push(handle);
        }
        debug!(count = devices.len(), "capture devices created");
        Ok(())
    }

    /// Stream on every device and launch the poll thread. Does nothing if
    /// already started.
    ///
    /// # Errors
    ///
    /// A stream-on failure streams off every device before it is returned.
    pub fn start(&self) -> Result<()> {
        let mut control = lock(&self.control);
        let state = self.shared.state();
        if state == State::Start {
            warn!("capture already started");
            return Ok(());
        }
        if !matches!(state, State::Configure | State::Stop) {
            return Err(Error::InvalidState {
                operation: "start",
                state,
            });
        }

        {
            let mut devices = lock(&self.shared.devices);
            let failed = devices
                .iter_mut()
                .map(|device| {
                    device
                        .stream_on()
                        .inspect_err(|err| error!(device = %device.name(), "stream on failed: {}", err))
                })
                .find_map(|result| result.err());
            if let Some(err) = failed {
                for device in devices.iter_mut() {
                    device.stream_off();
                }
                return Err(err);
            }
        }

        self.shared.pipe.drain();
        self.shared.exit_pending.store(false, Ordering::SeqCst);

        // The poll thread rejects any state but Configure and Start, so the
        // state is published before it runs.
        self.shared.set_state(State::Start);
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("capture-poll".to_string())
            .spawn(move || shared.poll_loop());
        match spawned {
            Ok(thread) => control.thread = Some(thread),
            Err(err) => {
                error!("poll thread spawn failed: {}", err);
                for device in lock(&self.shared.devices).iter_mut() {
                    device.stream_off();
                }
                self.shared.set_state(state);
                return Err(err.into());
            }
        }

        info!("capture started");
        Ok(())
    }

    /// Cancel polling, stream off every device, join the poll thread and
    /// reset buffer bookkeeping. Does nothing outside `Start`.
    pub fn stop(&self) -> Result<()> {
        let mut control = lock(&self.control);
        let state = self.shared.state();
        if state != State::Start {
            debug!(?state, "capture not started");
            return Ok(());
        }

        self.shared.exit_pending.store(true, Ordering::SeqCst);
        if let Err(err) = self.shared.pipe.notify() {
            warn!("poll cancellation failed: {}", err);
        }

        for device in lock(&self.shared.devices).iter_mut() {
            device.stream_off();
        }
        if let Some(thread) = control.thread.take() {
            if thread.join().is_err() {
                error!("poll thread panicked");
            }
        }

        self.shared.set_state(State::Stop);
        for device in lock(&self.shared.devices).iter_mut() {
            device.reset_buffers();
        }
        self.shared.exit_pending.store(false, Ordering::SeqCst);
        info!("capture stopped");
        Ok(())
    }

    /// Hand a client buffer to the device bound to `port` and queue buffer
    /// rounds if every device now has one pending.
    pub fn qbuf(&self, port: Port, buffer: Arc<CameraBuffer>) -> Result<()> {
        let state = self.shared.state();
        if matches!(state, State::Uninit | State::Init) {
            return Err(Error::InvalidState {
                operation: "qbuf",
                state,
            });
        }

        let mut devices = lock(&self.shared.devices);
        let device = devices
            .iter_mut()
            .find(|d| d.port() == port)
            .ok_or(Error::NoDeviceForPort(port))?;
        trace!(port = %port, index = buffer.index(), "qbuf");
        device.add_pending(buffer);
        self.shared.process_pending(&mut devices)
    }

    /// Back an MMAP `buffer` with memory of the device bound to `port`.
    pub fn allocate_memory(&self, port: Port, buffer: &CameraBuffer) -> Result<()> {
        let max = self.shared.settings.max_raw_buffers;
        if buffer.index() >= max {
            return Err(Error::Config(format!(
                "buffer index {} exceeds max count {}",
                buffer.index(),
                max
            )));
        }
        if buffer.memory() != crate::config::MemoryType::Mmap {
            return Err(Error::UnsupportedMemory(buffer.memory()));
        }

        let devices = lock(&self.shared.devices);
        let device = devices
            .iter()
            .find(|d| d.port() == port)
            .ok_or(Error::NoDeviceForPort(port))?;
        device.allocate_memory(buffer)
    }

    /// Export MMAP buffer `index` of the device bound to `port` as DMA-BUF.
    pub fn export_buffer(&self, port: Port, index: u32) -> Result<OwnedFd> {
        let devices = lock(&self.shared.devices);
        let device = devices
            .iter()
            .find(|d| d.port() == port)
            .ok_or(Error::NoDeviceForPort(port))?;
        device.export_buffer(index)
    }

    /// Wait for frames and dequeue one buffer from every ready device.
    ///
    /// A timeout across the whole retry budget is reported as
    /// [`PollOutcome::Timeout`], and a stop or [`cancel_poll`](Self::cancel_poll)
    /// as [`PollOutcome::Cancelled`]. Per-device dequeue failures are logged.
    pub fn poll(&self) -> Result<PollOutcome> {
        self.shared.poll()
    }

    /// Wake a blocked [`poll`](Self::poll), which returns
    /// [`PollOutcome::Cancelled`].
    pub fn cancel_poll(&self) -> Result<()> {
        self.shared.pipe.notify()
    }

    /// Number of open capture devices.
    pub fn device_count(&self) -> usize {
        lock(&self.shared.devices).len()
    }

    /// Ports of the open devices, in device order.
    pub fn device_ports(&self) -> Vec<Port> {
        lock(&self.shared.devices).iter().map(DeviceHandle::port).collect()
    }

    /// Client buffers the session holds at most: `max_raw_buffers` for every
    /// device bound to a client port.
    pub fn client_buffers(&self) -> usize {
        let bound = lock(&self.shared.devices)
            .iter()
            .filter(|d| d.port() != Port::Invalid)
            .count();
        bound * self.shared.settings.max_raw_buffers as usize
    }

    /// Buffers queued to the device bound to `port`.
    pub fn buffers_in_device(&self, port: Port) -> Option<usize> {
        lock(&self.shared.devices)
            .iter()
            .find(|d| d.port() == port)
            .map(DeviceHandle::in_device)
    }

    /// Client buffers waiting for the device bound to `port`.
    pub fn pending_buffers(&self, port: Port) -> Option<usize> {
        lock(&self.shared.devices)
            .iter()
            .find(|d| d.port() == port)
            .map(DeviceHandle::pending)
    }

    pub fn config_modes(&self) -> Vec<ConfigMode> {
        lock(&self.control).config_modes.clone()
    }

    pub fn streams(&self) -> BTreeMap<Port, StreamConfig> {
        lock(&self.control).streams.clone()
    }

    pub fn add_frame_listener(&self, listener: Arc<dyn FrameListener>) {
        self.shared.frame_listeners.add(listener);
    }

    pub fn remove_frame_listener(&self, listener: &Arc<dyn FrameListener>) {
        self.shared.frame_listeners.remove(listener);
    }

    pub fn remove_all_frame_listeners(&self) {
        self.shared.frame_listeners.remove_all();
    }

    pub fn register_listener(&self, event_type: EventType, listener: Arc<dyn EventListener>) {
        self.shared.events.register(event_type, listener);
    }

    pub fn remove_listener(&self, event_type: EventType, listener: &Arc<dyn EventListener>) {
        self.shared.events.remove(event_type, listener);
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.deinit();
    }
}
