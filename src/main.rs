// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, TopologyFormat};
use clap::Parser;
use edgefirst_media::{
    buffer::CameraBuffer,
    capture::CaptureOrchestrator,
    config::{CameraConfig, MemoryType},
    context::{MediaContext, SessionRoute},
    format::frame_size,
    listener::FrameChannel,
    video::VideoNodeFactory,
};
use std::{error::Error, path::Path, sync::Arc, time::Instant};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = match args.verbose {
        true => LevelFilter::DEBUG,
        false => LevelFilter::INFO,
    };
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(level);

    let journald = match Path::new("/run/systemd/journal/socket").exists() {
        true => tracing_journald::layer().ok().map(|l| l.with_filter(level)),
        false => None,
    };

    let tracy = match args.tracy {
        true => {
            tracy_client::Client::start();
            Some(tracing_tracy::TracyLayer::default().with_filter(level))
        }
        false => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

/// Hand every capture port its initial set of client buffers.
fn seed_buffers(
    orchestrator: &CaptureOrchestrator,
    config: &CameraConfig,
) -> Result<(), Box<dyn Error>> {
    let count = config.platform.max_raw_buffers;
    for port in orchestrator.device_ports() {
        // Unbound devices cycle their own buffers.
        let Some(stream) = config.streams.get(&port) else {
            continue;
        };

        for index in 0..count {
            let buffer = match stream.memory {
                MemoryType::Mmap => {
                    let buffer = CameraBuffer::new(index, MemoryType::Mmap);
                    orchestrator.allocate_memory(port, &buffer)?;
                    buffer
                }
                MemoryType::UserPtr => {
                    let size = frame_size(stream.width, stream.height, stream.format)
                        .ok_or_else(|| format!("no frame size for format {}", stream.format))?;
                    CameraBuffer::user_ptr(index, size as usize)
                }
                memory => {
                    return Err(
                        format!("port {port}: {memory:?} buffers need an external allocator").into(),
                    )
                }
            };
            orchestrator.qbuf(port, Arc::new(buffer))?;
        }
        debug!(port = %port, count, "seeded buffers");
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = CameraConfig::load(&args.config)?;
    if let Some(media_device) = &args.media_device {
        config.platform.media_device = Some(media_device.clone());
    }

    let mut context = MediaContext::open(&config.platform)?;
    let report = context.init_entities()?;
    info!(
        entities = report.entities,
        links = report.links,
        skipped = report.skipped_links,
        "media graph"
    );

    match args.topology {
        Some(TopologyFormat::Dot) => {
            print!("{}", context.graph().dump_dot());
            return Ok(());
        }
        Some(TopologyFormat::Text) => {
            print!("{}", context.graph().dump_text());
            return Ok(());
        }
        None => debug!("{}", context.graph().dump_text()),
    }

    if config.platform.reset_link_route {
        let links = context.reset_links(true)?;
        debug!(links, "links reset");
    }

    let video_nodes = context.video_nodes(&config.media_ctl)?;
    let orchestrator = CaptureOrchestrator::new(
        config.platform.clone(),
        Box::new(VideoNodeFactory),
        video_nodes,
    )?
    .with_route_setup(SessionRoute::new(context, config.media_ctl.clone()));
    let orchestrator = Arc::new(orchestrator);

    orchestrator.init()?;
    orchestrator.configure(&config.streams, &config.media_ctl.config_modes)?;

    let (channel, rx) = FrameChannel::new(orchestrator.client_buffers());
    let channel = Arc::new(channel);
    orchestrator.add_frame_listener(channel.clone());
    seed_buffers(&orchestrator, &config)?;
    orchestrator.start()?;

    let rx = rx.to_async();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let start = Instant::now();
    let mut frames = 0u64;
    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Ok(frame) = frame else {
                    warn!("frame channel closed");
                    break;
                };
                frames += 1;
                let meta = frame.buffer.meta();
                debug!(
                    port = %frame.port,
                    index = frame.buffer.index(),
                    sequence = meta.sequence,
                    predicted = meta.predicted_sequence,
                    bytes = meta.bytes_used,
                    "frame"
                );
                for frame in std::iter::once(frame).chain(channel.take_overflow()) {
                    if let Err(err) = orchestrator.qbuf(frame.port, frame.buffer) {
                        error!(port = %frame.port, "requeue failed: {}", err);
                    }
                }
                if args.frames > 0 && frames >= args.frames {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        frames,
        fps = if elapsed > 0.0 { frames as f64 / elapsed } else { 0.0 },
        "capture finished"
    );

    orchestrator.stop()?;
    orchestrator.deinit();
    Ok(())
}
