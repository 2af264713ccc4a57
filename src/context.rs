// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Media session context.
//!
//! A [`MediaContext`] owns the media device, its discovered graph and the
//! sub-device handles for one session. It is built once and passed to the
//! routing and capture layers.

use crate::{
    capture::RouteSetup,
    config::{MediaCtlConf, PlatformSettings, Port, StreamConfig, VideoNodeType},
    error::{Error, Result},
    graph::MediaGraph,
    media::{find_media_device, MediaDevice, MediaNode},
    router::{LinkRouter, RouteTarget},
    subdev::{SubdevCache, SubdevProvider, V4l2SubdevProvider},
    sysfs::Sysfs,
    topology::{DiscoveryReport, TopologyEnumerator},
};
use std::collections::HashMap;
use tracing::{debug, info};

pub struct MediaContext {
    media: Box<dyn MediaDevice>,
    sysfs: Sysfs,
    graph: MediaGraph,
    subdevs: SubdevCache,
    settings: PlatformSettings,
}

impl MediaContext {
    /// Open the media device named by `settings`, either the explicit
    /// `media_device` path or the first device of `media_driver`.
    pub fn open(settings: &PlatformSettings) -> Result<Self> {
        let media = match &settings.media_device {
            Some(path) => MediaNode::open(path)?,
            None => find_media_device(&settings.media_driver)?,
        };
        info!(device = media.path(), "media device opened");
        Ok(Self::with_parts(
            Box::new(media),
            Sysfs::new(&settings.sysfs_root),
            Box::new(V4l2SubdevProvider),
            settings.clone(),
        ))
    }

    pub fn with_parts(
        media: Box<dyn MediaDevice>,
        sysfs: Sysfs,
        subdevs: Box<dyn SubdevProvider>,
        settings: PlatformSettings,
    ) -> Self {
        MediaContext {
            media,
            sysfs,
            graph: MediaGraph::new(),
            subdevs: SubdevCache::new(subdevs),
            settings,
        }
    }

    /// Discover the media graph. Later calls return the existing counts.
    pub fn init_entities(&mut self) -> Result<DiscoveryReport> {
        TopologyEnumerator::new(self.media.as_ref(), &self.sysfs).discover(&mut self.graph)
    }

    pub fn graph(&self) -> &MediaGraph {
        &self.graph
    }

    pub fn media(&self) -> &dyn MediaDevice {
        self.media.as_ref()
    }

    pub fn settings(&self) -> &PlatformSettings {
        &self.settings
    }

    /// A router over this context's graph, resetting links first when
    /// `reset_link_route` is set.
    pub fn router(&mut self) -> LinkRouter<'_> {
        LinkRouter::new(&mut self.graph, self.media.as_ref(), &mut self.subdevs)
            .with_reset_links(self.settings.reset_link_route)
    }

    /// Disable every mutable link and, with `routes`, deactivate every
    /// sub-device route.
    pub fn reset_links(&mut self, routes: bool) -> Result<usize> {
        let links = self.graph.reset_all_links(self.media.as_ref())?;
        if routes {
            let mut router = LinkRouter::new(&mut self.graph, self.media.as_ref(), &mut self.subdevs);
            router.reset_all_routes();
        }
        Ok(links)
    }

    /// Device node of the entity `name`.
    pub fn devname_for(&self, name: &str) -> Result<String> {
        let entity = self
            .graph
            .entity_by_name(name)
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))?;
        entity
            .devname
            .clone()
            .ok_or_else(|| Error::NoDevnode(name.to_string()))
    }

    /// Device nodes of the capture entities named by `conf.video_nodes`.
    pub fn video_nodes(&self, conf: &MediaCtlConf) -> Result<HashMap<VideoNodeType, String>> {
        conf.video_nodes
            .iter()
            .map(|node| Ok((node.node_type, self.devname_for(&node.name)?)))
            .collect()
    }

    pub fn apply_route(&mut self, conf: &MediaCtlConf, target: &RouteTarget) -> Result<()> {
        self.router().configure_route(conf, target)
    }

    pub fn clear_route(&mut self, conf: &MediaCtlConf) -> usize {
        self.router().clear_route(conf)
    }

    /// Close cached sub-device handles.
    pub fn close_subdevs(&mut self) {
        self.subdevs.close_all();
    }
}

/// Route setup for a capture session: applies `conf` to the context for the
/// main stream of every configure.
pub struct SessionRoute {
    context: MediaContext,
    conf: MediaCtlConf,
}

impl SessionRoute {
    pub fn new(context: MediaContext, conf: MediaCtlConf) -> Self {
        SessionRoute { context, conf }
    }

    pub fn context(&self) -> &MediaContext {
        &self.context
    }

    pub fn into_inner(self) -> MediaContext {
        self.context
    }
}

impl RouteSetup for SessionRoute {
    fn setup_route(&mut self, main: &StreamConfig, port: Port) -> Result<()> {
        debug!(port = %port, width = main.width, height = main.height, "setup route");
        if !self.conf.supports(main) {
            let conf = &self.conf;
            return Err(Error::Config(format!(
                "route output {}x{} cannot carry {}x{} {}",
                conf.output_width, conf.output_height, main.width, main.height, main.format
            )));
        }
        self.context.apply_route(&self.conf, &RouteTarget::from(main))
    }
}
