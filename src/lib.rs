// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Media Pipeline Library
//!
//! This library discovers and programs Linux media-controller pipelines and
//! drives the V4L2 capture devices at their end. It covers the path from a
//! camera sensor through CSI-2 receivers, bridges and crossbars to the
//! capture nodes that deliver frames to the application.
//!
//! ## Features
//!
//! - **Topology Discovery**: Enumerate entities, pads and links of a media
//!   device into an in-memory [`graph::MediaGraph`] with device node names
//!   resolved through sysfs.
//! - **Link Routing**: Apply a [`config::MediaCtlConf`] route description:
//!   controls, virtual-channel routing tables, pad formats, selections and
//!   link enables, validated against the graph before any device is touched.
//! - **Capture Orchestration**: Run several capture devices in lock-step with
//!   predicted frame sequences, initial frame skipping and a cancellable poll
//!   thread delivering frames to registered listeners.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_media::{
//!     capture::CaptureOrchestrator,
//!     config::CameraConfig,
//!     context::{MediaContext, SessionRoute},
//!     video::VideoNodeFactory,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CameraConfig::load("/etc/edgefirst/camera.json")?;
//!
//! // Discover the media graph
//! let mut context = MediaContext::open(&config.platform)?;
//! context.init_entities()?;
//! let video_nodes = context.video_nodes(&config.media_ctl)?;
//!
//! // Program the route and open the capture devices on configure
//! let capture = CaptureOrchestrator::new(
//!     config.platform.clone(),
//!     Box::new(VideoNodeFactory),
//!     video_nodes,
//! )?
//! .with_route_setup(SessionRoute::new(context, config.media_ctl.clone()));
//! capture.init()?;
//! capture.configure(&config.streams, &config.media_ctl.config_modes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: Kernel 5.10+ with the media controller API; sub-device
//!   routing requires kernel 6.3+ with streams support.
//!
//! ## Safety
//!
//! This library uses `unsafe` code for ioctl calls and buffer mappings. All
//! unsafe operations are isolated to [`uapi`], [`media`], [`subdev`],
//! [`video`] and [`buffer`] and wrapped with safe APIs.

pub mod buffer;
pub mod capture;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod graph;
pub mod listener;
pub mod media;
pub mod poller;
pub mod router;
pub mod subdev;
pub mod sysfs;
pub mod topology;
pub mod uapi;
pub mod video;

pub use error::{Error, Result};
