// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory media, sub-device and capture devices shared by the tests.

#![allow(dead_code)]

use edgefirst_media::{
    buffer::{Backing, CameraBuffer},
    config::{
        CaptureNodeConfig, MemoryType, PlatformSettings, Port, Rect, StreamConfig, VideoNodeType,
    },
    error::{Error, Result},
    format::{format_row_stride, frame_size, FourCc},
    listener::{EventData, EventListener, FrameListener},
    media::{DeviceInfo, EntityDesc, LinkDesc, MediaDevice, PadDesc},
    poller::EventPipe,
    subdev::{MbusFormat, Route, Subdev, SubdevProvider},
    sysfs::Sysfs,
    uapi::media::*,
    video::{BufferInfo, CaptureDevice, CaptureDeviceFactory, DequeuedFrame, NegotiatedFormat},
};
use nix::errno::Errno;
use std::{
    collections::{HashMap, VecDeque},
    fs::File,
    os::fd::{OwnedFd, RawFd},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub const SENSOR0: &str = "imx390 0-001a";
pub const CSI0: &str = "Intel IPU6 CSI2 0";
pub const SENSOR1: &str = "imx390 1-0021";
pub const BRIDGE: &str = "max9296 1-0048";
pub const CSI1: &str = "Intel IPU6 CSI2 1";
pub const CAPTURE0: &str = "Intel IPU6 ISYS Capture 0";
pub const CAPTURE1: &str = "Intel IPU6 ISYS Capture 1";
pub const LENS: &str = "dw9714 0-000c";

/// Media device answering from a fixed topology.
pub struct FakeMedia {
    entities: Vec<(EntityDesc, Vec<PadDesc>)>,
    links: Vec<LinkDesc>,
    setup_log: Arc<Mutex<Vec<LinkDesc>>>,
    reject_setup: bool,
}

impl FakeMedia {
    pub fn new() -> Self {
        FakeMedia {
            entities: Vec::new(),
            links: Vec::new(),
            setup_log: Arc::default(),
            reject_setup: false,
        }
    }

    /// Add an entity whose pads carry `pad_flags`, with the character device
    /// `dev` when it has a device node.
    pub fn entity(
        mut self,
        id: u32,
        name: &str,
        type_: u32,
        pad_flags: &[u32],
        dev: Option<(u32, u32)>,
    ) -> Self {
        let (major, minor) = dev.unwrap_or((0, 0));
        let desc = EntityDesc {
            id,
            name: name.to_string(),
            type_,
            pads: pad_flags.len() as u16,
            major,
            minor,
            ..Default::default()
        };
        let pads = pad_flags
            .iter()
            .enumerate()
            .map(|(index, &flags)| PadDesc {
                entity: id,
                index: index as u16,
                flags,
            })
            .collect();
        self.entities.push((desc, pads));
        self
    }

    pub fn link(mut self, source: (u32, u16), sink: (u32, u16), flags: u32) -> Self {
        self.links.push(LinkDesc {
            source: PadDesc {
                entity: source.0,
                index: source.1,
                flags: MEDIA_PAD_FL_SOURCE,
            },
            sink: PadDesc {
                entity: sink.0,
                index: sink.1,
                flags: MEDIA_PAD_FL_SINK,
            },
            flags,
        });
        self
    }

    /// Fail every link setup request with `EBUSY`.
    pub fn reject_setup(mut self) -> Self {
        self.reject_setup = true;
        self
    }

    /// Link setup requests received so far.
    pub fn setup_log(&self) -> Arc<Mutex<Vec<LinkDesc>>> {
        self.setup_log.clone()
    }

    fn outbound(&self, id: u32) -> impl Iterator<Item = &LinkDesc> {
        self.links.iter().filter(move |l| l.source.entity == id)
    }

    fn describe(&self, index: usize) -> EntityDesc {
        let (desc, _) = &self.entities[index];
        EntityDesc {
            links: self.outbound(desc.id).count() as u16,
            ..desc.clone()
        }
    }
}

impl MediaDevice for FakeMedia {
    fn path(&self) -> &str {
        "/dev/media-fake"
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        Ok(DeviceInfo {
            driver: "intel-ipu6-isys".to_string(),
            model: "ipu6".to_string(),
            bus_info: "PCI:0000:00:05.0".to_string(),
            ..Default::default()
        })
    }

    fn enum_entity(&self, id: u32) -> Result<Option<EntityDesc>> {
        let index = match id & MEDIA_ENT_ID_FLAG_NEXT {
            0 => self.entities.iter().position(|(e, _)| e.id == id),
            _ => {
                let id = id & !MEDIA_ENT_ID_FLAG_NEXT;
                self.entities
                    .iter()
                    .enumerate()
                    .filter(|(_, (e, _))| e.id > id)
                    .min_by_key(|(_, (e, _))| e.id)
                    .map(|(i, _)| i)
            }
        };
        Ok(index.map(|i| self.describe(i)))
    }

    fn enum_links(&self, entity: &EntityDesc) -> Result<(Vec<PadDesc>, Vec<LinkDesc>)> {
        let (_, pads) = self
            .entities
            .iter()
            .find(|(e, _)| e.id == entity.id)
            .ok_or_else(|| Error::EntityNotFound(entity.name.clone()))?;
        Ok((pads.clone(), self.outbound(entity.id).copied().collect()))
    }

    fn setup_link(&self, link: &LinkDesc) -> Result<()> {
        if self.reject_setup {
            return Err(Error::Ioctl {
                request: "MEDIA_IOC_SETUP_LINK",
                device: self.path().to_string(),
                source: Errno::EBUSY,
            });
        }
        lock(&self.setup_log).push(*link);
        Ok(())
    }
}

/// Two sensor pipelines, the second behind a serializer bridge, feeding two
/// capture nodes.
///
/// ```text
/// imx390 0-001a:0 =>  CSI2 0:0      CSI2 0:1 -> Capture 0:0
///                                   CSI2 0:2 -> Capture 1:0
/// imx390 1-0021:0 ->  max9296:0     max9296:1 -> CSI2 1:0
///                                   CSI2 1:1 -> Capture 0:0, Capture 1:0
/// ```
pub fn ipu_media() -> FakeMedia {
    let sink = MEDIA_PAD_FL_SINK;
    let source = MEDIA_PAD_FL_SOURCE;
    FakeMedia::new()
        .entity(1, SENSOR0, MEDIA_ENT_T_V4L2_SUBDEV_SENSOR, &[source], Some((81, 1)))
        .entity(2, CSI0, MEDIA_ENT_T_V4L2_SUBDEV, &[sink, source, source], Some((81, 2)))
        .entity(3, SENSOR1, MEDIA_ENT_T_V4L2_SUBDEV_SENSOR, &[source], Some((81, 3)))
        .entity(4, BRIDGE, MEDIA_ENT_T_V4L2_SUBDEV, &[sink, source], Some((81, 4)))
        .entity(5, CSI1, MEDIA_ENT_T_V4L2_SUBDEV, &[sink, source], Some((81, 5)))
        .entity(6, CAPTURE0, MEDIA_ENT_T_DEVNODE_V4L, &[sink], Some((81, 6)))
        .entity(7, CAPTURE1, MEDIA_ENT_T_DEVNODE_V4L, &[sink], Some((81, 7)))
        .entity(8, LENS, MEDIA_ENT_T_V4L2_SUBDEV_LENS, &[], Some((81, 8)))
        .link((1, 0), (2, 0), MEDIA_LNK_FL_ENABLED | MEDIA_LNK_FL_IMMUTABLE)
        .link((2, 1), (6, 0), MEDIA_LNK_FL_ENABLED)
        .link((2, 2), (7, 0), 0)
        .link((3, 0), (4, 0), 0)
        .link((4, 1), (5, 0), 0)
        .link((5, 1), (6, 0), 0)
        .link((5, 1), (7, 0), 0)
}

/// Device nodes of the [`ipu_media`] entities.
pub const IPU_NODES: [(u32, &str); 8] = [
    (1, "v4l-subdev0"),
    (2, "v4l-subdev1"),
    (3, "v4l-subdev2"),
    (4, "v4l-subdev3"),
    (5, "v4l-subdev4"),
    (6, "video0"),
    (7, "video1"),
    (8, "v4l-subdev5"),
];

/// A sysfs tree under the temp directory with `/sys/dev/char` links for
/// every `(minor, name)` of major 81.
pub fn fake_sysfs(test: &str, nodes: &[(u32, &str)]) -> std::io::Result<Sysfs> {
    let root: PathBuf = std::env::temp_dir().join(format!(
        "edgefirst-media-{}-{}",
        test,
        std::process::id()
    ));
    let chars = root.join("dev/char");
    if chars.exists() {
        std::fs::remove_dir_all(&chars)?;
    }
    std::fs::create_dir_all(&chars)?;
    for (minor, name) in nodes {
        let target = format!("../../devices/pci0000:00/0000:00:05.0/video4linux/{name}");
        std::os::unix::fs::symlink(target, chars.join(format!("81:{minor}")))?;
    }
    Ok(Sysfs::new(root))
}

/// A sub-device request recorded by [`FakeSubdevs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubdevCall {
    Format {
        devname: String,
        pad: u32,
        stream: u32,
        width: u32,
        height: u32,
        code: u32,
    },
    Selection {
        devname: String,
        pad: u32,
        target: u32,
        rect: Rect,
    },
    Routing {
        devname: String,
        routes: Vec<Route>,
    },
    Control {
        devname: String,
        id: u32,
        value: i32,
    },
}

#[derive(Default)]
struct SubdevState {
    calls: Vec<SubdevCall>,
    opens: usize,
    routing: HashMap<String, Vec<Route>>,
    fail_controls: bool,
    fail_formats: bool,
}

/// Recording sub-device provider. Clones share their state.
#[derive(Clone, Default)]
pub struct FakeSubdevs {
    state: Arc<Mutex<SubdevState>>,
}

impl FakeSubdevs {
    pub fn calls(&self) -> Vec<SubdevCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Sub-device handles opened so far.
    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }

    /// Give `devname` routing support with the table `routes`.
    pub fn with_routing(self, devname: &str, routes: Vec<Route>) -> Self {
        lock(&self.state).routing.insert(devname.to_string(), routes);
        self
    }

    pub fn fail_controls(self) -> Self {
        lock(&self.state).fail_controls = true;
        self
    }

    pub fn fail_formats(self) -> Self {
        lock(&self.state).fail_formats = true;
        self
    }

    pub fn routing(&self, devname: &str) -> Option<Vec<Route>> {
        lock(&self.state).routing.get(devname).cloned()
    }
}

impl SubdevProvider for FakeSubdevs {
    fn open(&self, devname: &str) -> Result<Box<dyn Subdev>> {
        lock(&self.state).opens += 1;
        Ok(Box::new(FakeSubdev {
            devname: devname.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct FakeSubdev {
    devname: String,
    state: Arc<Mutex<SubdevState>>,
}

impl FakeSubdev {
    fn failure(&self, request: &'static str, source: Errno) -> Error {
        Error::Ioctl {
            request,
            device: self.devname.clone(),
            source,
        }
    }
}

impl Subdev for FakeSubdev {
    fn devname(&self) -> &str {
        &self.devname
    }

    fn set_format(&self, pad: u32, stream: u32, format: &MbusFormat) -> Result<MbusFormat> {
        let mut state = lock(&self.state);
        if state.fail_formats {
            return Err(self.failure("VIDIOC_SUBDEV_S_FMT", Errno::EINVAL));
        }
        state.calls.push(SubdevCall::Format {
            devname: self.devname.clone(),
            pad,
            stream,
            width: format.width,
            height: format.height,
            code: format.code,
        });
        Ok(*format)
    }

    fn get_format(&self, _pad: u32, _stream: u32) -> Result<MbusFormat> {
        Ok(MbusFormat::default())
    }

    fn set_selection(&self, pad: u32, _stream: u32, target: u32, rect: Rect) -> Result<Rect> {
        lock(&self.state).calls.push(SubdevCall::Selection {
            devname: self.devname.clone(),
            pad,
            target,
            rect,
        });
        Ok(rect)
    }

    fn get_routing(&self) -> Result<Vec<Route>> {
        lock(&self.state)
            .routing
            .get(&self.devname)
            .cloned()
            .ok_or_else(|| self.failure("VIDIOC_SUBDEV_G_ROUTING", Errno::ENOTTY))
    }

    fn set_routing(&self, routes: &[Route]) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(SubdevCall::Routing {
            devname: self.devname.clone(),
            routes: routes.to_vec(),
        });
        state.routing.insert(self.devname.clone(), routes.to_vec());
        Ok(())
    }

    fn set_control(&self, id: u32, value: i32) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_controls {
            return Err(self.failure("VIDIOC_S_CTRL", Errno::EINVAL));
        }
        state.calls.push(SubdevCall::Control {
            devname: self.devname.clone(),
            id,
            value,
        });
        Ok(())
    }

    fn get_control(&self, _id: u32) -> Result<i32> {
        Ok(0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VideoOptions {
    pub fail_stream_on: bool,
    /// Image size reported instead of the frame size of the format
    pub size_image: Option<u32>,
}

#[derive(Default)]
struct VideoState {
    queued: VecDeque<u32>,
    done: VecDeque<DequeuedFrame>,
    queue_log: Vec<u32>,
    mapped: Vec<u32>,
    requested: Option<(u32, MemoryType)>,
    size_image: u32,
    sequence: u32,
    stream_on: usize,
    stream_off: usize,
    streaming: bool,
}

/// Capture device completing queued buffers on request. Its poll descriptor
/// is readable while a completed frame waits to be dequeued.
#[derive(Clone)]
pub struct FakeVideo {
    devname: String,
    options: VideoOptions,
    state: Arc<Mutex<VideoState>>,
    ready: Arc<EventPipe>,
}

impl FakeVideo {
    fn new(devname: &str, options: VideoOptions) -> Result<Self> {
        Ok(FakeVideo {
            devname: devname.to_string(),
            options,
            state: Arc::default(),
            ready: Arc::new(EventPipe::new()?),
        })
    }

    /// Complete up to `count` queued buffers in order. Returns the number
    /// completed.
    pub fn complete(&self, count: usize) -> usize {
        self.complete_with_flags(count, 0)
    }

    pub fn complete_with_flags(&self, count: usize, flags: u32) -> usize {
        let mut state = lock(&self.state);
        let mut completed = 0;
        while completed < count {
            let Some(index) = state.queued.pop_front() else {
                break;
            };
            let frame = DequeuedFrame {
                index,
                sequence: state.sequence,
                timestamp: Duration::from_millis(33 * state.sequence as u64),
                bytes_used: state.size_image,
                flags,
                field: 0,
            };
            state.sequence += 1;
            state.done.push_back(frame);
            completed += 1;
        }
        if completed > 0 {
            let _ = self.ready.notify();
        }
        completed
    }

    /// Complete the queued buffer `index` ahead of the others.
    pub fn complete_index(&self, index: u32) -> bool {
        let mut state = lock(&self.state);
        let Some(position) = state.queued.iter().position(|&i| i == index) else {
            return false;
        };
        state.queued.remove(position);
        let frame = DequeuedFrame {
            index,
            sequence: state.sequence,
            bytes_used: state.size_image,
            ..Default::default()
        };
        state.sequence += 1;
        state.done.push_back(frame);
        let _ = self.ready.notify();
        true
    }

    pub fn queued(&self) -> Vec<u32> {
        lock(&self.state).queued.iter().copied().collect()
    }

    pub fn queue_log(&self) -> Vec<u32> {
        lock(&self.state).queue_log.clone()
    }

    pub fn mapped(&self) -> Vec<u32> {
        lock(&self.state).mapped.clone()
    }

    pub fn requested(&self) -> Option<(u32, MemoryType)> {
        lock(&self.state).requested
    }

    pub fn stream_on_count(&self) -> usize {
        lock(&self.state).stream_on
    }

    pub fn stream_off_count(&self) -> usize {
        lock(&self.state).stream_off
    }

    pub fn streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    fn failure(&self, request: &'static str, source: Errno) -> Error {
        Error::Ioctl {
            request,
            device: self.devname.clone(),
            source,
        }
    }
}

impl CaptureDevice for FakeVideo {
    fn devname(&self) -> &str {
        &self.devname
    }

    fn poll_fd(&self) -> RawFd {
        self.ready.read_fd()
    }

    fn set_format(&mut self, stream: &StreamConfig) -> Result<NegotiatedFormat> {
        let size_image = self
            .options
            .size_image
            .or(frame_size(stream.width, stream.height, stream.format))
            .unwrap_or_default();
        lock(&self.state).size_image = size_image;
        Ok(NegotiatedFormat {
            width: stream.width,
            height: stream.height,
            format: stream.format,
            field: stream.field,
            bytes_per_line: format_row_stride(stream.format, stream.width).unwrap_or_default(),
            size_image,
        })
    }

    fn request_buffers(&mut self, count: u32, memory: MemoryType) -> Result<u32> {
        lock(&self.state).requested = Some((count, memory));
        Ok(count)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo> {
        let size = lock(&self.state).size_image;
        Ok(BufferInfo {
            index,
            length: size,
            offset: index * size,
        })
    }

    fn map_buffer(&self, buffer: &CameraBuffer) -> Result<()> {
        let mut state = lock(&self.state);
        state.mapped.push(buffer.index());
        buffer.set_backing(Backing::UserPtr(
            vec![0u8; state.size_image as usize].into_boxed_slice(),
        ));
        Ok(())
    }

    fn export_buffer(&self, _index: u32) -> Result<OwnedFd> {
        Ok(OwnedFd::from(File::open("/dev/null")?))
    }

    fn queue(&mut self, buffer: &CameraBuffer) -> Result<()> {
        let mut state = lock(&self.state);
        state.queued.push_back(buffer.index());
        state.queue_log.push(buffer.index());
        Ok(())
    }

    fn dequeue(&mut self) -> Result<DequeuedFrame> {
        let mut state = lock(&self.state);
        let frame = state
            .done
            .pop_front()
            .ok_or_else(|| self.failure("VIDIOC_DQBUF", Errno::EAGAIN))?;
        self.ready.drain();
        if !state.done.is_empty() {
            self.ready.notify()?;
        }
        Ok(frame)
    }

    fn stream_on(&mut self) -> Result<()> {
        if self.options.fail_stream_on {
            return Err(self.failure("VIDIOC_STREAMON", Errno::EIO));
        }
        let mut state = lock(&self.state);
        state.stream_on += 1;
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.stream_off += 1;
        state.streaming = false;
        state.queued.clear();
        state.done.clear();
        self.ready.drain();
        Ok(())
    }
}

/// Device-side handle returned by [`FakeVideoFactory`], counted while open.
struct OpenVideo {
    video: FakeVideo,
    live: Arc<AtomicUsize>,
}

impl Drop for OpenVideo {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CaptureDevice for OpenVideo {
    fn devname(&self) -> &str {
        self.video.devname()
    }

    fn poll_fd(&self) -> RawFd {
        self.video.poll_fd()
    }

    fn set_format(&mut self, stream: &StreamConfig) -> Result<NegotiatedFormat> {
        self.video.set_format(stream)
    }

    fn request_buffers(&mut self, count: u32, memory: MemoryType) -> Result<u32> {
        self.video.request_buffers(count, memory)
    }

    fn query_buffer(&self, index: u32) -> Result<BufferInfo> {
        self.video.query_buffer(index)
    }

    fn map_buffer(&self, buffer: &CameraBuffer) -> Result<()> {
        self.video.map_buffer(buffer)
    }

    fn export_buffer(&self, index: u32) -> Result<OwnedFd> {
        self.video.export_buffer(index)
    }

    fn queue(&mut self, buffer: &CameraBuffer) -> Result<()> {
        self.video.queue(buffer)
    }

    fn dequeue(&mut self) -> Result<DequeuedFrame> {
        self.video.dequeue()
    }

    fn stream_on(&mut self) -> Result<()> {
        self.video.stream_on()
    }

    fn stream_off(&mut self) -> Result<()> {
        self.video.stream_off()
    }
}

/// Opens [`FakeVideo`] devices and keeps a handle to the latest one per
/// device node. Clones share their registry.
#[derive(Clone, Default)]
pub struct FakeVideoFactory {
    devices: Arc<Mutex<HashMap<String, FakeVideo>>>,
    options: Arc<Mutex<HashMap<String, VideoOptions>>>,
    live: Arc<AtomicUsize>,
}

impl FakeVideoFactory {
    pub fn with_options(self, devname: &str, options: VideoOptions) -> Self {
        lock(&self.options).insert(devname.to_string(), options);
        self
    }

    /// The device most recently opened at `devname`.
    pub fn device(&self, devname: &str) -> Option<FakeVideo> {
        lock(&self.devices).get(devname).cloned()
    }

    /// Distinct device nodes opened so far.
    pub fn opened(&self) -> usize {
        lock(&self.devices).len()
    }

    /// Handles opened and not yet dropped by their owner.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl CaptureDeviceFactory for FakeVideoFactory {
    fn open(&self, devname: &str) -> Result<Box<dyn CaptureDevice>> {
        let options = lock(&self.options).get(devname).copied().unwrap_or_default();
        let video = FakeVideo::new(devname, options)?;
        lock(&self.devices).insert(devname.to_string(), video.clone());
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(OpenVideo {
            video,
            live: Arc::clone(&self.live),
        }))
    }
}

/// A frame seen by [`FrameLog`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoggedFrame {
    pub port: Port,
    pub index: u32,
    pub sequence: i64,
    pub predicted: i64,
}

/// Frame listener recording every delivery.
#[derive(Default)]
pub struct FrameLog {
    frames: Mutex<Vec<LoggedFrame>>,
}

impl FrameLog {
    pub fn frames(&self) -> Vec<LoggedFrame> {
        lock(&self.frames).clone()
    }
}

impl FrameListener for FrameLog {
    fn on_frame_available(&self, port: Port, buffer: Arc<CameraBuffer>) {
        let meta = buffer.meta();
        lock(&self.frames).push(LoggedFrame {
            port,
            index: buffer.index(),
            sequence: meta.sequence,
            predicted: meta.predicted_sequence,
        });
    }
}

/// Event listener recording every event.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<EventData>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<EventData> {
        lock(&self.events).clone()
    }
}

impl EventListener for EventLog {
    fn notify(&self, event: &EventData) {
        lock(&self.events).push(*event);
    }
}

/// Platform settings with short poll periods.
pub fn test_settings(nodes: &[(VideoNodeType, Option<Port>)]) -> PlatformSettings {
    PlatformSettings {
        max_raw_buffers: 4,
        exposure_lag: 2,
        poll_timeout_ms: 50,
        poll_retries: 1,
        capture_nodes: nodes
            .iter()
            .map(|&(node_type, port)| CaptureNodeConfig { node_type, port })
            .collect(),
        ..Default::default()
    }
}

pub fn stream(width: u32, height: u32, format: FourCc, memory: MemoryType) -> StreamConfig {
    StreamConfig {
        width,
        height,
        format,
        field: 0,
        memory,
    }
}

/// Video node paths for the three exposure planes.
pub fn exposure_nodes() -> HashMap<VideoNodeType, String> {
    HashMap::from([
        (VideoNodeType::Generic, "/dev/video0".to_string()),
        (VideoNodeType::GenericShortExpo, "/dev/video1".to_string()),
        (VideoNodeType::GenericMediumExpo, "/dev/video2".to_string()),
    ])
}
