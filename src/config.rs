// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera configuration: platform settings, per-port stream descriptors and
//! the media-ctl description of the pixel route.
//!
//! Configuration is loaded from a JSON document. Every platform setting has a
//! default, so a minimal file only needs `media_ctl` and `streams`:
//!
//! ```json
//! {
//!   "media_ctl": {
//!     "formats": [
//!       { "entity": "imx390 0-001a", "pad": 0, "type": "format",
//!         "code": 12298, "size": "target" }
//!     ],
//!     "links": [
//!       { "src_entity": "imx390 0-001a", "src_pad": 0,
//!         "sink_entity": "Intel IPU6 CSI2 0", "sink_pad": 0, "enable": true }
//!     ],
//!     "video_nodes": [
//!       { "name": "Intel IPU6 ISYS Capture 0", "node_type": "generic" }
//!     ]
//!   },
//!   "streams": {
//!     "main": { "width": 1920, "height": 1080, "format": "BA10" }
//!   }
//! }
//! ```

use crate::{
    error::{Error, Result},
    format::{format_row_stride, frame_size, FourCc},
    uapi::{subdev, videodev2},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::Path};

/// Logical consumer-facing output of the capture pipeline.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    Main,
    Second,
    Third,
    Forth,
    Invalid,
}

impl Port {
    /// Ports in the order used to pick the default stream.
    pub const PRIORITY: [Port; 4] = [Port::Main, Port::Second, Port::Third, Port::Forth];

    /// First port from [`Port::PRIORITY`] present in `streams`.
    pub fn find_default<V>(streams: &BTreeMap<Port, V>) -> Option<Port> {
        Port::PRIORITY
            .into_iter()
            .find(|port| streams.contains_key(port))
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Port::Main => "main",
            Port::Second => "second",
            Port::Third => "third",
            Port::Forth => "forth",
            Port::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Buffer memory model of a capture queue.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Kernel allocated, mapped into the process
    #[default]
    Mmap,
    /// Client allocated user memory
    UserPtr,
    /// Video overlay, not usable for capture
    Overlay,
    /// Imported DMA-BUF file descriptors
    DmaBuf,
}

impl MemoryType {
    pub const fn as_v4l2(self) -> u32 {
        match self {
            MemoryType::Mmap => videodev2::V4L2_MEMORY_MMAP,
            MemoryType::UserPtr => videodev2::V4L2_MEMORY_USERPTR,
            MemoryType::Overlay => videodev2::V4L2_MEMORY_OVERLAY,
            MemoryType::DmaBuf => videodev2::V4L2_MEMORY_DMABUF,
        }
    }
}

/// Resolved stream descriptor for one port.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub format: FourCc,
    #[serde(default)]
    pub field: u32,
    #[serde(default)]
    pub memory: MemoryType,
}

impl StreamConfig {
    /// True when the format's layout is known but one frame does not fit in
    /// a `u32` byte count.
    pub fn size_overflows(&self) -> bool {
        format_row_stride(self.format, self.width).is_some()
            && frame_size(self.width, self.height, self.format).is_none()
    }
}

/// Stream configuration mode requested by the application.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigMode {
    #[default]
    Normal,
    Auto,
    Hdr,
    Ull,
    Hlc,
    CustomAic,
    VideoLl,
    StillCapture,
    Hdr2,
}

/// Tuning mode handed to image processing stages.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TuningMode {
    #[default]
    Video,
    VideoUll,
    VideoHdr,
    VideoHdr2,
    VideoHlc,
    VideoCustomAic,
    VideoLl,
    StillCapture,
}

impl From<ConfigMode> for TuningMode {
    fn from(mode: ConfigMode) -> Self {
        match mode {
            ConfigMode::Normal | ConfigMode::Auto => TuningMode::Video,
            ConfigMode::Hdr => TuningMode::VideoHdr,
            ConfigMode::Hdr2 => TuningMode::VideoHdr2,
            ConfigMode::Ull => TuningMode::VideoUll,
            ConfigMode::Hlc => TuningMode::VideoHlc,
            ConfigMode::CustomAic => TuningMode::VideoCustomAic,
            ConfigMode::VideoLl => TuningMode::VideoLl,
            ConfigMode::StillCapture => TuningMode::StillCapture,
        }
    }
}

/// Kind of capture node, used to bind media-ctl video nodes to devices.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoNodeType {
    /// Primary capture node
    #[default]
    Generic,
    /// Short exposure plane of a multi-exposure sensor
    GenericShortExpo,
    /// Medium exposure plane of a multi-exposure sensor
    GenericMediumExpo,
}

/// A capture node the orchestrator opens.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureNodeConfig {
    pub node_type: VideoNodeType,
    /// Port the node delivers to. The first node always serves the default
    /// port; other nodes without a configured stream are left unbound.
    #[serde(default)]
    pub port: Option<Port>,
}

/// Auxiliary processing stage placed ahead of the ISP.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PreIspSettings {
    #[serde(default)]
    pub enabled: bool,
}

fn default_media_driver() -> String {
    "intel-ipu".to_string()
}

fn default_sysfs_root() -> String {
    "/sys".to_string()
}

const fn default_max_raw_buffers() -> u32 {
    6
}

const fn default_exposure_lag() -> u32 {
    2
}

const fn default_poll_timeout_ms() -> u32 {
    1000
}

const fn default_poll_retries() -> u32 {
    10
}

const fn default_true() -> bool {
    true
}

fn default_capture_nodes() -> Vec<CaptureNodeConfig> {
    vec![CaptureNodeConfig {
        node_type: VideoNodeType::Generic,
        port: None,
    }]
}

/// Platform tunables of the capture pipeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PlatformSettings {
    /// Driver name prefix used to find the media device
    #[serde(default = "default_media_driver")]
    pub media_driver: String,

    /// Explicit media device path, skips the driver scan
    #[serde(default)]
    pub media_device: Option<String>,

    /// Root of the sysfs mount
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,

    /// Buffers requested from each capture node
    #[serde(default = "default_max_raw_buffers")]
    pub max_raw_buffers: u32,

    /// Sensor exposure lag in frames
    #[serde(default = "default_exposure_lag")]
    pub exposure_lag: u32,

    /// Frames dropped after stream on
    #[serde(default)]
    pub initial_skip_frames: u32,

    /// Poll retries before reporting an ISYS error, 0 disables
    #[serde(default)]
    pub max_isys_timeout: u32,

    /// Timeout of a single poll call
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u32,

    /// Poll retries when `max_isys_timeout` is 0
    #[serde(default = "default_poll_retries")]
    pub poll_retries: u32,

    /// Reset links and routes before applying a route
    #[serde(default = "default_true")]
    pub reset_link_route: bool,

    /// Recycle dequeued buffers carrying the error flag
    #[serde(default)]
    pub skip_frame_on_buffer_error: bool,

    #[serde(default = "default_capture_nodes")]
    pub capture_nodes: Vec<CaptureNodeConfig>,

    #[serde(default)]
    pub pre_isp: PreIspSettings,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        PlatformSettings {
            media_driver: default_media_driver(),
            media_device: None,
            sysfs_root: default_sysfs_root(),
            max_raw_buffers: default_max_raw_buffers(),
            exposure_lag: default_exposure_lag(),
            initial_skip_frames: 0,
            max_isys_timeout: 0,
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_retries: default_poll_retries(),
            reset_link_route: true,
            skip_frame_on_buffer_error: false,
            capture_nodes: default_capture_nodes(),
            pre_isp: PreIspSettings::default(),
        }
    }
}

impl PlatformSettings {
    /// Buffers allowed in flight on the first device.
    pub fn max_buffers_in_device(&self) -> usize {
        (self.exposure_lag as usize + 1).max(2)
    }

    /// Poll iterations before a poll call gives up with a timeout.
    pub fn poll_iterations(&self) -> u32 {
        if self.max_isys_timeout > 0 {
            self.max_isys_timeout
        } else {
            self.poll_retries.max(1)
        }
    }
}

/// Sub-device control applied before routing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct McCtl {
    pub entity: String,
    pub id: u32,
    pub value: i32,
    #[serde(default)]
    pub name: String,
}

const fn default_route_flags() -> u32 {
    subdev::V4L2_SUBDEV_ROUTE_FL_ACTIVE
}

/// Virtual channel route inside a sub-device.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct McRoute {
    pub entity: String,
    pub sink_pad: u32,
    #[serde(default)]
    pub sink_stream: u32,
    pub source_pad: u32,
    #[serde(default)]
    pub source_stream: u32,
    #[serde(default = "default_route_flags")]
    pub flags: u32,
}

/// Rectangle of a crop or compose selection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// Where the size of a pad format comes from.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dimensions {
    Explicit {
        width: u32,
        height: u32,
    },
    /// Size of the target stream
    Target,
    /// Leave the size to the driver
    #[default]
    DontCare,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McFormatKind {
    Format {
        /// Media bus code, falls back to [`MediaCtlConf::code`]
        #[serde(default)]
        code: Option<u32>,
        #[serde(default)]
        size: Dimensions,
    },
    Selection {
        target: u32,
        /// Explicit rectangle, otherwise the target stream size at 0,0
        #[serde(default)]
        rect: Option<Rect>,
    },
}

/// Format or selection descriptor for one (entity, pad).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct McFormat {
    pub entity: String,
    pub pad: u32,
    #[serde(default)]
    pub stream: u32,
    #[serde(flatten)]
    pub kind: McFormatKind,
}

/// Link between two entity pads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct McLink {
    pub src_entity: String,
    pub src_pad: u32,
    pub sink_entity: String,
    pub sink_pad: u32,
    pub enable: bool,
}

/// Capture node entity used for a node type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct McVideoNode {
    pub name: String,
    #[serde(default)]
    pub node_type: VideoNodeType,
}

/// Complete description of one pixel route through the media graph.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct MediaCtlConf {
    #[serde(default)]
    pub ctls: Vec<McCtl>,
    #[serde(default)]
    pub routes: Vec<McRoute>,
    #[serde(default)]
    pub formats: Vec<McFormat>,
    #[serde(default)]
    pub links: Vec<McLink>,
    #[serde(default)]
    pub video_nodes: Vec<McVideoNode>,
    /// Fixed route output size, 0 when the output follows the stream
    #[serde(default)]
    pub output_width: u32,
    #[serde(default)]
    pub output_height: u32,
    #[serde(default)]
    pub config_modes: Vec<ConfigMode>,
    /// Default media bus code for formats without one
    #[serde(default)]
    pub code: Option<u32>,
}

impl MediaCtlConf {
    pub fn video_node(&self, node_type: VideoNodeType) -> Option<&McVideoNode> {
        self.video_nodes.iter().find(|n| n.node_type == node_type)
    }

    /// Whether the route can carry `stream`. A zero output size follows the
    /// stream; otherwise the height must match and the width either match
    /// or produce the same row stride.
    pub fn supports(&self, stream: &StreamConfig) -> bool {
        if self.output_width == 0 && self.output_height == 0 {
            return true;
        }
        let same_stride = format_row_stride(stream.format, self.output_width)
            == format_row_stride(stream.format, stream.width);
        (stream.width == self.output_width || same_stride) && stream.height == self.output_height
    }
}

/// Top level camera configuration file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub media_ctl: MediaCtlConf,
    pub streams: BTreeMap<Port, StreamConfig>,
}

impl CameraConfig {
    /// Parse and validate a configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CameraConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`CameraConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if Port::find_default(&self.streams).is_none() {
            return Err(Error::Config("no stream on a valid port".to_string()));
        }
        if self.platform.capture_nodes.is_empty() {
            return Err(Error::Config("at least one capture node is required".into()));
        }
        if self.platform.max_raw_buffers == 0 {
            return Err(Error::Config("max_raw_buffers must be positive".into()));
        }
        for (port, stream) in &self.streams {
            if stream.width == 0 || stream.height == 0 {
                return Err(Error::Config(format!("port {port}: empty stream size")));
            }
            if stream.size_overflows() {
                return Err(Error::Config(format!("port {port}: stream size overflows")));
            }
        }
        Ok(())
    }
}
