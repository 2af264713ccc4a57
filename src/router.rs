// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel route activation.
//!
//! [`LinkRouter::configure_route`] applies a [`MediaCtlConf`] to the media
//! graph in a fixed order: reset links, controls, sub-device routing, pad
//! formats and selections, then links. The whole configuration is validated
//! against the graph before the first device request is issued.

use crate::{
    config::{Dimensions, McFormat, McFormatKind, McLink, MediaCtlConf, Rect, StreamConfig},
    error::{Error, Result},
    graph::{MediaGraph, PadRef},
    media::MediaDevice,
    subdev::{MbusFormat, Route, SubdevCache},
    uapi::{media::MEDIA_LNK_FL_ENABLED, subdev::*},
};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Stream the route is configured for. Formats sized as
/// [`Dimensions::Target`] and selections without a rectangle use its size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteTarget {
    pub width: u32,
    pub height: u32,
    pub field: u32,
}

impl From<&StreamConfig> for RouteTarget {
    fn from(stream: &StreamConfig) -> Self {
        RouteTarget {
            width: stream.width,
            height: stream.height,
            field: stream.field,
        }
    }
}

/// A link of the route resolved against the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedLink {
    pub source: PadRef,
    pub sink: PadRef,
    pub enable: bool,
    /// Hop created by splicing a bridge entity into the requested link
    pub bridged: bool,
}

/// Applies routes to a media graph.
pub struct LinkRouter<'a> {
    graph: &'a mut MediaGraph,
    media: &'a dyn MediaDevice,
    subdevs: &'a mut SubdevCache,
    reset_links: bool,
}

impl<'a> LinkRouter<'a> {
    pub fn new(
        graph: &'a mut MediaGraph,
        media: &'a dyn MediaDevice,
        subdevs: &'a mut SubdevCache,
    ) -> Self {
        LinkRouter {
            graph,
            media,
            subdevs,
            reset_links: false,
        }
    }

    /// Disable every mutable link before applying a route.
    pub fn with_reset_links(mut self, reset: bool) -> Self {
        self.reset_links = reset;
        self
    }

    /// Apply `conf` for the `target` stream.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before any device request. A failed
    /// routing, format, selection or link request aborts the remaining
    /// steps; steps already applied are not rolled back.
    pub fn configure_route(&mut self, conf: &MediaCtlConf, target: &RouteTarget) -> Result<()> {
        debug!(
            width = target.width,
            height = target.height,
            links = conf.links.len(),
            formats = conf.formats.len(),
            "configure route"
        );
        let links = self.plan(conf)?;

        if self.reset_links {
            self.graph.reset_all_links(self.media)?;
        }

        self.apply_controls(conf);
        self.apply_routes(conf)?;

        for format in &conf.formats {
            match format.kind {
                McFormatKind::Format { code, size } => {
                    self.set_format(format, code.or(conf.code), size, target)?
                }
                McFormatKind::Selection { target: sel, rect } => {
                    self.set_selection(format, sel, rect, target)?
                }
            }
        }

        for link in &links {
            let current = self
                .graph
                .find_link(link.source, link.sink)
                .map(|l| self.graph.link(l).flags)
                .unwrap_or_default();
            let flags = match link.enable {
                true => current | MEDIA_LNK_FL_ENABLED,
                false => current & !MEDIA_LNK_FL_ENABLED,
            };
            debug!(
                "setup link {} -> {} enable {}",
                self.graph.pad_label(link.source),
                self.graph.pad_label(link.sink),
                link.enable
            );
            self.graph
                .setup_link(self.media, link.source, link.sink, flags)?;
        }

        trace!("{}", self.graph.dump_text());
        Ok(())
    }

    /// Validate `conf` against the graph and resolve its links, splicing in
    /// bridge entities where a requested link does not exist.
    pub fn plan(&self, conf: &MediaCtlConf) -> Result<Vec<PlannedLink>> {
        for ctl in &conf.ctls {
            let entity = self.entity(&ctl.entity)?;
            self.devname(entity)?;
        }

        for route in &conf.routes {
            self.pad(&route.entity, route.sink_pad)?;
            self.pad(&route.entity, route.source_pad)?;
            self.devname(self.entity(&route.entity)?)?;
        }

        for format in &conf.formats {
            self.pad(&format.entity, format.pad)?;
            self.devname(self.entity(&format.entity)?)?;
            match format.kind {
                McFormatKind::Format { code, .. } => {
                    if code.or(conf.code).is_none() {
                        return Err(Error::Config(format!(
                            "format on \"{}\":{} has no media bus code",
                            format.entity, format.pad
                        )));
                    }
                }
                McFormatKind::Selection { target, rect } => {
                    if explicit_rect(rect).is_none()
                        && target != V4L2_SEL_TGT_CROP
                        && target != V4L2_SEL_TGT_COMPOSE
                    {
                        return Err(Error::Config(format!(
                            "selection target {target:#x} on \"{}\":{} needs a rectangle",
                            format.entity, format.pad
                        )));
                    }
                }
            }
        }

        let mut planned = Vec::with_capacity(conf.links.len());
        for link in &conf.links {
            planned.extend(self.resolve_link(link)?);
        }
        self.check_links(&planned)?;
        Ok(planned)
    }

    /// Walk the planned links over the expected link state, rejecting
    /// immutable disables and sink pads fed by more than one mutable link.
    fn check_links(&self, planned: &[PlannedLink]) -> Result<()> {
        let mut enabled: HashMap<PadRef, PadRef> = HashMap::new();
        if !self.reset_links {
            for entity in self.graph.entities() {
                for link in entity.links.iter().filter(|l| !l.backlink) {
                    if link.is_enabled() && !link.is_immutable() {
                        enabled.insert(link.sink, link.source);
                    }
                }
            }
        }

        for link in planned {
            let record = self
                .graph
                .find_link(link.source, link.sink)
                .map(|l| self.graph.link(l))
                .ok_or_else(|| Error::LinkNotFound {
                    from: self.graph.pad_label(link.source),
                    to: self.graph.pad_label(link.sink),
                })?;

            if record.is_immutable() {
                if !link.enable {
                    return Err(Error::ImmutableLink {
                        from: self.graph.pad_label(link.source),
                        to: self.graph.pad_label(link.sink),
                    });
                }
                continue;
            }

            if !link.enable {
                if enabled.get(&link.sink) == Some(&link.source) {
                    enabled.remove(&link.sink);
                }
                continue;
            }

            match enabled.get(&link.sink) {
                Some(source) if *source != link.source => {
                    return Err(Error::ConflictingRoute(self.graph.pad_label(link.sink)));
                }
                _ => {
                    enabled.insert(link.sink, link.source);
                }
            }
        }
        Ok(())
    }

    fn resolve_link(&self, link: &McLink) -> Result<Vec<PlannedLink>> {
        let source = self.pad(&link.src_entity, link.src_pad)?;
        let sink = self.pad(&link.sink_entity, link.sink_pad)?;

        if self.graph.find_link(source, sink).is_some() {
            return Ok(vec![PlannedLink {
                source,
                sink,
                enable: link.enable,
                bridged: false,
            }]);
        }

        // A bridge B splices S:p -> K:q into S:p -> B:x and B:y -> K:q.
        let mut hops = Vec::new();
        for first in self.graph.links_from(source) {
            let bridge_in = self.graph.link(first).sink;
            if bridge_in.entity == sink.entity || bridge_in.entity == source.entity {
                continue;
            }
            for second in self.graph.entity(bridge_in.entity).links.iter() {
                if !second.backlink && second.sink == sink {
                    hops.push((bridge_in, second.source));
                }
            }
        }

        match hops.as_slice() {
            [(bridge_in, bridge_out)] => {
                debug!(
                    "bridge {} spliced into {} -> {}",
                    self.graph.entity(bridge_in.entity).name(),
                    self.graph.pad_label(source),
                    self.graph.pad_label(sink)
                );
                Ok(vec![
                    PlannedLink {
                        source,
                        sink: *bridge_in,
                        enable: link.enable,
                        bridged: true,
                    },
                    PlannedLink {
                        source: *bridge_out,
                        sink,
                        enable: link.enable,
                        bridged: true,
                    },
                ])
            }
            _ => Err(Error::LinkNotFound {
                from: self.graph.pad_label(source),
                to: self.graph.pad_label(sink),
            }),
        }
    }

    fn entity(&self, name: &str) -> Result<usize> {
        self.graph
            .entity_index_by_name(name)
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    fn pad(&self, name: &str, pad: u32) -> Result<PadRef> {
        let entity = self.entity(name)?;
        self.graph
            .pad_ref(entity, pad)
            .ok_or_else(|| Error::PadOutOfRange {
                entity: name.to_string(),
                pad,
            })
    }

    fn devname(&self, entity: usize) -> Result<String> {
        let entity = self.graph.entity(entity);
        entity
            .devname
            .clone()
            .ok_or_else(|| Error::NoDevnode(entity.name().to_string()))
    }

    /// Controls are best effort, failures are logged.
    fn apply_controls(&mut self, conf: &MediaCtlConf) {
        for ctl in &conf.ctls {
            let devname = match self.entity(&ctl.entity).and_then(|e| self.devname(e)) {
                Ok(devname) => devname,
                Err(err) => {
                    warn!(entity = %ctl.entity, "set ctl {} skipped: {}", ctl.name, err);
                    continue;
                }
            };
            debug!(
                entity = %ctl.entity,
                "set ctl {} [{:#010x}] value {}",
                ctl.name,
                ctl.id,
                ctl.value
            );
            let result = self
                .subdevs
                .get(&devname)
                .and_then(|subdev| subdev.set_control(ctl.id, ctl.value));
            if let Err(err) = result {
                warn!(
                    entity = %ctl.entity,
                    "set ctl {} [{:#010x}] value {} failed: {}",
                    ctl.name,
                    ctl.id,
                    ctl.value,
                    err
                );
            }
        }
    }

    /// Program the routing table of every sub-device named by `conf.routes`.
    fn apply_routes(&mut self, conf: &MediaCtlConf) -> Result<()> {
        let mut tables: Vec<(String, Vec<Route>)> = Vec::new();
        for route in &conf.routes {
            let devname = self.devname(self.entity(&route.entity)?)?;
            let route = Route {
                sink_pad: route.sink_pad,
                sink_stream: route.sink_stream,
                source_pad: route.source_pad,
                source_stream: route.source_stream,
                flags: route.flags,
            };
            match tables.iter_mut().find(|(d, _)| *d == devname) {
                Some((_, routes)) => routes.push(route),
                None => tables.push((devname, vec![route])),
            }
        }

        for (devname, routes) in tables {
            debug!(devname = %devname, routes = routes.len(), "set routing");
            self.subdevs.get(&devname)?.set_routing(&routes)?;
        }
        Ok(())
    }

    fn set_format(
        &mut self,
        format: &McFormat,
        code: Option<u32>,
        size: Dimensions,
        target: &RouteTarget,
    ) -> Result<()> {
        let pad = self.pad(&format.entity, format.pad)?;
        let devname = self.devname(pad.entity)?;
        let (width, height) = match size {
            Dimensions::Explicit { width, height } => (width, height),
            Dimensions::Target => (target.width, target.height),
            Dimensions::DontCare => (0, 0),
        };
        let code = code.ok_or_else(|| {
            Error::Config(format!("no media bus code for {}", self.graph.pad_label(pad)))
        })?;

        let request = MbusFormat {
            width,
            height,
            code,
            field: target.field,
            ..Default::default()
        };
        debug!(
            "set format {} [{}x{}] code {:#x}",
            self.graph.pad_label(pad),
            width,
            height,
            code
        );
        let applied = self
            .subdevs
            .get(&devname)?
            .set_format(format.pad, format.stream, &request)?;

        if !self.graph.pad(pad).is_source() {
            return Ok(());
        }

        // Propagate the applied source format to connected sub-device sinks.
        let mut sinks = Vec::new();
        for link in self.graph.links_from(pad) {
            let link = self.graph.link(link);
            let entity = self.graph.entity(link.sink.entity);
            if !link.is_enabled() || !entity.info.is_subdev() {
                continue;
            }
            sinks.push((self.devname(link.sink.entity)?, link.sink));
        }

        for (devname, sink) in sinks {
            trace!("propagate format to {}", self.graph.pad_label(sink));
            self.subdevs
                .get(&devname)?
                .set_format(sink.index as u32, format.stream, &applied)?;
        }
        Ok(())
    }

    fn set_selection(
        &mut self,
        format: &McFormat,
        sel: u32,
        rect: Option<Rect>,
        target: &RouteTarget,
    ) -> Result<()> {
        let pad = self.pad(&format.entity, format.pad)?;
        let devname = self.devname(pad.entity)?;
        let rect = match explicit_rect(rect) {
            Some(rect) => rect,
            None if sel == V4L2_SEL_TGT_CROP || sel == V4L2_SEL_TGT_COMPOSE => Rect {
                left: 0,
                top: 0,
                width: target.width,
                height: target.height,
            },
            None => {
                return Err(Error::Config(format!(
                    "selection target {sel:#x} on {} needs a rectangle",
                    self.graph.pad_label(pad)
                )))
            }
        };

        debug!(
            "set selection {} target {:#x} ({},{}) {}x{}",
            self.graph.pad_label(pad),
            sel,
            rect.left,
            rect.top,
            rect.width,
            rect.height
        );
        self.subdevs
            .get(&devname)?
            .set_selection(format.pad, format.stream, sel, rect)?;
        Ok(())
    }

    /// Re-issue every configured route with the active flag cleared. Failures
    /// are logged and the remaining routes are still cleared.
    pub fn clear_route(&mut self, conf: &MediaCtlConf) -> usize {
        let mut cleared = 0;
        for route in &conf.routes {
            let devname = match self.entity(&route.entity).and_then(|e| self.devname(e)) {
                Ok(devname) => devname,
                Err(err) => {
                    warn!(entity = %route.entity, "clear routing skipped: {}", err);
                    continue;
                }
            };
            let route = Route {
                sink_pad: route.sink_pad,
                sink_stream: route.sink_stream,
                source_pad: route.source_pad,
                source_stream: route.source_stream,
                flags: route.flags & !V4L2_SUBDEV_ROUTE_FL_ACTIVE,
            };
            match self
                .subdevs
                .get(&devname)
                .and_then(|subdev| subdev.set_routing(&[route]))
            {
                Ok(()) => cleared += 1,
                Err(err) => warn!(devname = %devname, "clear routing failed: {}", err),
            }
        }
        cleared
    }

    /// Deactivate every route of every sub-device that supports routing.
    /// Returns the number of sub-devices whose table was rewritten.
    pub fn reset_all_routes(&mut self) -> usize {
        let devnames: Vec<String> = self
            .graph
            .entities()
            .iter()
            .filter(|e| e.info.is_subdev())
            .filter_map(|e| e.devname.clone())
            .collect();

        let mut count = 0;
        for devname in devnames {
            let subdev = match self.subdevs.get(&devname) {
                Ok(subdev) => subdev,
                Err(err) => {
                    trace!(devname = %devname, "skip routing reset: {}", err);
                    continue;
                }
            };
            let mut routes = match subdev.get_routing() {
                Ok(routes) if !routes.is_empty() => routes,
                _ => continue,
            };
            for route in &mut routes {
                route.flags &= !V4L2_SUBDEV_ROUTE_FL_ACTIVE;
            }
            match subdev.set_routing(&routes) {
                Ok(()) => count += 1,
                Err(err) => warn!(devname = %devname, "reset routing failed: {}", err),
            }
        }
        debug!(count, "reset all routes");
        count
    }
}

fn explicit_rect(rect: Option<Rect>) -> Option<Rect> {
    rect.filter(|r| r.width != 0 && r.height != 0 && r.left >= 0 && r.top >= 0)
}
