// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Media graph discovery.

use crate::{
    error::Result,
    graph::MediaGraph,
    media::{EntityDesc, MediaDevice},
    sysfs::Sysfs,
    uapi::media::MEDIA_ENT_ID_FLAG_NEXT,
};
use tracing::{debug, info, trace, warn};

/// Outcome of a discovery pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub entities: usize,
    /// Physical links added to the graph
    pub links: usize,
    /// Links dropped because an endpoint could not be resolved
    pub skipped_links: usize,
}

/// Populates a [`MediaGraph`] from a media device.
pub struct TopologyEnumerator<'a> {
    media: &'a dyn MediaDevice,
    sysfs: &'a Sysfs,
}

impl<'a> TopologyEnumerator<'a> {
    pub fn new(media: &'a dyn MediaDevice, sysfs: &'a Sysfs) -> Self {
        TopologyEnumerator { media, sysfs }
    }

    /// Enumerate entities, pads and links into `graph`.
    ///
    /// Does nothing if `graph` already holds entities. Links whose endpoints
    /// cannot be resolved are logged and skipped.
    ///
    /// # Errors
    ///
    /// Any failed device request is fatal and leaves `graph` empty.
    pub fn discover(&self, graph: &mut MediaGraph) -> Result<DiscoveryReport> {
        if !graph.is_empty() {
            trace!("media graph already discovered");
            return Ok(DiscoveryReport {
                entities: graph.len(),
                links: graph
                    .entities()
                    .iter()
                    .map(|e| e.links.iter().filter(|l| !l.backlink).count())
                    .sum(),
                skipped_links: 0,
            });
        }

        let result = self.enumerate(graph);
        if result.is_err() {
            graph.clear();
        }
        result
    }

    fn enumerate(&self, graph: &mut MediaGraph) -> Result<DiscoveryReport> {
        let info = self.media.device_info()?;
        debug!(
            device = self.media.path(),
            driver = %info.driver,
            model = %info.model,
            serial = %info.serial,
            bus_info = %info.bus_info,
            hw_revision = info.hw_revision,
            "media device info"
        );

        let mut report = DiscoveryReport::default();
        self.enum_entities(graph)?;
        report.entities = graph.len();
        debug!("found {} entities", report.entities);

        for index in 0..graph.len() {
            let entity = graph.entity(index).info.clone();
            let (pads, links) = self.media.enum_links(&entity)?;
            graph.set_pads(index, &pads);

            for (i, link) in links.iter().enumerate() {
                let source = graph
                    .entity_index_by_id(link.source.entity)
                    .and_then(|e| graph.pad_ref(e, link.source.index as u32));
                let sink = graph
                    .entity_index_by_id(link.sink.entity)
                    .and_then(|e| graph.pad_ref(e, link.sink.index as u32));

                match (source, sink) {
                    (Some(source), Some(sink)) => {
                        graph.add_link(source, sink, link.flags);
                        report.links += 1;
                    }
                    _ => {
                        warn!(
                            "entity {} link {} src {}/{} to {}/{} is invalid",
                            entity.id,
                            i,
                            link.source.entity,
                            link.source.index,
                            link.sink.entity,
                            link.sink.index
                        );
                        report.skipped_links += 1;
                    }
                }
            }
        }

        info!(
            entities = report.entities,
            links = report.links,
            skipped = report.skipped_links,
            "media topology discovered"
        );
        Ok(report)
    }

    fn enum_entities(&self, graph: &mut MediaGraph) -> Result<()> {
        let mut id = 0;
        while let Some(desc) = self.media.enum_entity(id | MEDIA_ENT_ID_FLAG_NEXT)? {
            if desc.id <= id && graph.len() > 0 {
                warn!(id = desc.id, "entity ids not increasing, stopping enumeration");
                break;
            }
            id = desc.id;
            trace!(
                id = desc.id,
                name = %desc.name,
                type_ = desc.type_,
                pads = desc.pads,
                links = desc.links,
                "entity"
            );

            let devname = self.devname(&desc);
            graph.add_entity(desc, devname);
        }
        Ok(())
    }

    fn devname(&self, desc: &EntityDesc) -> Option<String> {
        if desc.major == 0 && desc.minor == 0 {
            return None;
        }
        self.sysfs.devname(desc.major, desc.minor)
    }
}

/// Discover `graph` from `media`, resolving device nodes under `sysfs`.
pub fn discover(
    media: &dyn MediaDevice,
    sysfs: &Sysfs,
    graph: &mut MediaGraph,
) -> Result<DiscoveryReport> {
    TopologyEnumerator::new(media, sysfs).discover(graph)
}
