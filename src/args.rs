// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::path::PathBuf;

/// Media graph topology dump formats.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum TopologyFormat {
    /// Graphviz dot, render with `dot -Tsvg`
    Dot,
    /// Text listing in the style of `media-ctl -p`
    Text,
}

/// Command-line arguments for the EdgeFirst media pipeline tool.
///
/// Loads a camera configuration, discovers the media graph, programs the
/// pixel route and captures frames until interrupted or the frame limit is
/// reached. Arguments can be specified via command line or environment
/// variables.
///
/// # Example
///
/// ```bash
/// # Print the media graph and exit
/// edgefirst-media --config camera.json --topology text
///
/// # Capture 100 frames
/// export CONFIG=/etc/edgefirst/camera.json
/// edgefirst-media --frames 100
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera configuration file (JSON)
    #[arg(short, long, env = "CONFIG", default_value = "/etc/edgefirst/camera.json")]
    pub config: PathBuf,

    /// Media controller device, overrides the driver scan (e.g., /dev/media0)
    #[arg(short, long, env = "MEDIA_DEVICE")]
    pub media_device: Option<String>,

    /// Number of frames to capture, 0 captures until interrupted
    #[arg(short, long, env = "FRAMES", default_value = "0")]
    pub frames: u64,

    /// Print the discovered media graph and exit
    #[arg(long, value_enum)]
    pub topology: Option<TopologyFormat>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}
