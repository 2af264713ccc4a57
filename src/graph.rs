// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory media graph of entities, pads and links.
//!
//! Entities are stored in an arena and referenced by index. Every physical
//! link is recorded twice, once in the link array of its source entity (the
//! forward record) and once in the array of its sink entity (the back
//! record). The two records reference each other as twins and always carry
//! the same flags.

use crate::{
    error::{Error, Result},
    media::{EntityDesc, LinkDesc, MediaDevice, PadDesc},
    uapi::media::*,
};
use std::fmt::Write;
use tracing::{debug, trace};

/// A pad, by entity arena index and pad index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PadRef {
    pub entity: usize,
    pub index: usize,
}

/// A link record, by entity arena index and slot in that entity's link array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkRef {
    pub entity: usize,
    pub slot: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pad {
    /// Owning entity
    pub entity: usize,
    pub index: u32,
    pub flags: u32,
}

impl Pad {
    pub const fn is_source(&self) -> bool {
        self.flags & MEDIA_PAD_FL_SOURCE != 0
    }

    pub const fn is_sink(&self) -> bool {
        self.flags & MEDIA_PAD_FL_SINK != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub source: PadRef,
    pub sink: PadRef,
    pub flags: u32,
    pub twin: Option<LinkRef>,
    /// Record stored on the sink side
    pub backlink: bool,
}

impl Link {
    pub const fn is_enabled(&self) -> bool {
        self.flags & MEDIA_LNK_FL_ENABLED != 0
    }

    pub const fn is_immutable(&self) -> bool {
        self.flags & MEDIA_LNK_FL_IMMUTABLE != 0
    }

    pub const fn is_dynamic(&self) -> bool {
        self.flags & MEDIA_LNK_FL_DYNAMIC != 0
    }
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub info: EntityDesc,
    pub pads: Vec<Pad>,
    pub links: Vec<Link>,
    /// Link capacity, doubled when exceeded
    pub max_links: usize,
    pub devname: Option<String>,
}

impl Entity {
    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// The media graph of one media device.
#[derive(Clone, Debug, Default)]
pub struct MediaGraph {
    entities: Vec<Entity>,
}

impl MediaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// # Panics
    ///
    /// If `index` is not an entity of this graph.
    pub fn entity(&self, index: usize) -> &Entity {
        &self.entities[index]
    }

    /// # Panics
    ///
    /// If `pad` does not name a pad of this graph. References from
    /// [`MediaGraph::pad_ref`] stay valid until the graph is cleared.
    pub fn pad(&self, pad: PadRef) -> &Pad {
        &self.entities[pad.entity].pads[pad.index]
    }

    /// # Panics
    ///
    /// If `link` does not name a link record of this graph, for example a
    /// reference taken before [`MediaGraph::clear`].
    pub fn link(&self, link: LinkRef) -> &Link {
        &self.entities[link.entity].links[link.slot]
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Add an entity with storage for `pads + links` link records.
    pub fn add_entity(&mut self, info: EntityDesc, devname: Option<String>) -> usize {
        let index = self.entities.len();
        let pads = (0..info.pads as u32)
            .map(|i| Pad {
                entity: index,
                index: i,
                flags: 0,
            })
            .collect();
        let max_links = info.pads as usize + info.links as usize;

        self.entities.push(Entity {
            info,
            pads,
            links: Vec::with_capacity(max_links),
            max_links,
            devname,
        });
        index
    }

    /// Record pad directions reported by the kernel.
    pub fn set_pads(&mut self, entity: usize, pads: &[PadDesc]) {
        let entity = &mut self.entities[entity];
        for (pad, desc) in entity.pads.iter_mut().zip(pads) {
            pad.index = desc.index as u32;
            pad.flags = desc.flags;
        }
    }

    pub fn entity_index_by_name(&self, name: &str) -> Option<usize> {
        self.entities.iter().position(|e| e.info.name == name)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.info.name == name)
    }

    pub fn entity_id_by_name(&self, name: &str) -> Option<u32> {
        self.entity_by_name(name).map(Entity::id)
    }

    /// Arena index of the entity `id`. With [`MEDIA_ENT_ID_FLAG_NEXT`] set,
    /// the entity with the smallest id greater than `id`.
    pub fn entity_index_by_id(&self, id: u32) -> Option<usize> {
        if id & MEDIA_ENT_ID_FLAG_NEXT == 0 {
            return self.entities.iter().position(|e| e.info.id == id);
        }

        let id = id & !MEDIA_ENT_ID_FLAG_NEXT;
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.info.id > id)
            .min_by_key(|(_, e)| e.info.id)
            .map(|(i, _)| i)
    }

    pub fn entity_by_id(&self, id: u32) -> Option<&Entity> {
        self.entity_index_by_id(id).map(|i| &self.entities[i])
    }

    /// Reference to pad `index` of `entity`, if it exists.
    pub fn pad_ref(&self, entity: usize, index: u32) -> Option<PadRef> {
        let pads = &self.entities.get(entity)?.pads;
        ((index as usize) < pads.len()).then_some(PadRef {
            entity,
            index: index as usize,
        })
    }

    /// `"name":index`, for messages.
    pub fn pad_label(&self, pad: PadRef) -> String {
        format!("\"{}\":{}", self.entities[pad.entity].info.name, pad.index)
    }

    /// Add a physical link, creating the forward and back records.
    pub fn add_link(&mut self, source: PadRef, sink: PadRef, flags: u32) -> (LinkRef, LinkRef) {
        let fwd = self.entity_add_link(
            source.entity,
            Link {
                source,
                sink,
                flags,
                twin: None,
                backlink: false,
            },
        );
        let back = self.entity_add_link(
            sink.entity,
            Link {
                source,
                sink,
                flags,
                twin: Some(fwd),
                backlink: true,
            },
        );
        self.link_mut(fwd).twin = Some(back);
        (fwd, back)
    }

    fn link_mut(&mut self, link: LinkRef) -> &mut Link {
        &mut self.entities[link.entity].links[link.slot]
    }

    fn entity_add_link(&mut self, entity: usize, link: Link) -> LinkRef {
        let e = &mut self.entities[entity];
        if e.links.len() >= e.max_links {
            let max_links = (e.max_links * 2).max(1);
            e.links.reserve_exact(max_links - e.links.len());
            trace!(
                entity = %e.info.name,
                from = e.max_links,
                to = max_links,
                "growing link array"
            );
            e.max_links = max_links;
            self.repair_twins(entity);
        }

        let links = &mut self.entities[entity].links;
        links.push(link);
        LinkRef {
            entity,
            slot: links.len() - 1,
        }
    }

    /// Point the twin of every link record of `entity` back at that record.
    fn repair_twins(&mut self, entity: usize) {
        let twins: Vec<(usize, LinkRef)> = self.entities[entity]
            .links
            .iter()
            .enumerate()
            .filter_map(|(slot, link)| link.twin.map(|twin| (slot, twin)))
            .collect();

        for (slot, twin) in twins {
            self.link_mut(twin).twin = Some(LinkRef { entity, slot });
        }
    }

    /// Forward record of the link `source -> sink`.
    pub fn find_link(&self, source: PadRef, sink: PadRef) -> Option<LinkRef> {
        self.entities[source.entity]
            .links
            .iter()
            .position(|l| !l.backlink && l.source == source && l.sink == sink)
            .map(|slot| LinkRef {
                entity: source.entity,
                slot,
            })
    }

    /// Forward records of every link leaving `source`.
    pub fn links_from(&self, source: PadRef) -> impl Iterator<Item = LinkRef> + '_ {
        self.entities[source.entity]
            .links
            .iter()
            .enumerate()
            .filter(move |(_, l)| !l.backlink && l.source == source)
            .map(move |(slot, _)| LinkRef {
                entity: source.entity,
                slot,
            })
    }

    /// Forward records of every link entering `sink`.
    pub fn links_into(&self, sink: PadRef) -> impl Iterator<Item = LinkRef> + '_ {
        self.entities[sink.entity]
            .links
            .iter()
            .filter(move |l| l.backlink && l.sink == sink)
            .filter_map(|l| l.twin)
    }

    /// An enabled mutable link into `sink` other than `except`.
    pub fn enabled_mutable_into(&self, sink: PadRef, except: Option<LinkRef>) -> Option<LinkRef> {
        self.links_into(sink).find(|&r| {
            let link = self.link(r);
            Some(r) != except && link.is_enabled() && !link.is_immutable()
        })
    }

    fn check_enable(&self, link: LinkRef, flags: u32) -> Result<()> {
        let current = self.link(link);
        if flags & MEDIA_LNK_FL_ENABLED == 0 && current.is_immutable() {
            return Err(Error::ImmutableLink {
                from: self.pad_label(current.source),
                to: self.pad_label(current.sink),
            });
        }

        let forward = match current.backlink {
            true => current.twin.unwrap_or(link),
            false => link,
        };
        if flags & MEDIA_LNK_FL_ENABLED != 0
            && flags & MEDIA_LNK_FL_IMMUTABLE == 0
            && !current.is_immutable()
            && self
                .enabled_mutable_into(current.sink, Some(forward))
                .is_some()
        {
            return Err(Error::ConflictingRoute(self.pad_label(current.sink)));
        }
        Ok(())
    }

    fn set_flags(&mut self, link: LinkRef, flags: u32) {
        let twin = self.link(link).twin;
        self.link_mut(link).flags = flags;
        if let Some(twin) = twin {
            self.link_mut(twin).flags = flags;
        }
    }

    /// Set or clear the enabled flag of `link` and its twin in the model.
    ///
    /// # Errors
    ///
    /// [`Error::ImmutableLink`] when clearing an immutable link, and
    /// [`Error::ConflictingRoute`] when another mutable link already feeds
    /// the same sink pad.
    pub fn set_link_enabled(&mut self, link: LinkRef, enabled: bool) -> Result<()> {
        let flags = match enabled {
            true => self.link(link).flags | MEDIA_LNK_FL_ENABLED,
            false => self.link(link).flags & !MEDIA_LNK_FL_ENABLED,
        };
        self.check_enable(link, flags)?;
        self.set_flags(link, flags);
        Ok(())
    }

    /// Configure the link `source -> sink` on the device and mirror the
    /// accepted flags into both link records.
    pub fn setup_link(
        &mut self,
        media: &dyn MediaDevice,
        source: PadRef,
        sink: PadRef,
        flags: u32,
    ) -> Result<()> {
        let link = self.find_link(source, sink).ok_or_else(|| Error::LinkNotFound {
            from: self.pad_label(source),
            to: self.pad_label(sink),
        })?;

        let flags = flags | (self.link(link).flags & MEDIA_LNK_FL_IMMUTABLE);
        self.check_enable(link, flags)?;

        let desc = LinkDesc {
            source: PadDesc {
                entity: self.entities[source.entity].info.id,
                index: source.index as u16,
                flags: MEDIA_PAD_FL_SOURCE,
            },
            sink: PadDesc {
                entity: self.entities[sink.entity].info.id,
                index: sink.index as u16,
                flags: MEDIA_PAD_FL_SINK,
            },
            flags,
        };
        media.setup_link(&desc)?;

        self.set_flags(link, flags);
        Ok(())
    }

    /// Enable or disable the link between two pads given by kernel entity
    /// ids and pad indices.
    pub fn setup_link_by_id(
        &mut self,
        media: &dyn MediaDevice,
        source: (u32, u32),
        sink: (u32, u32),
        enable: bool,
    ) -> Result<()> {
        let source = self.pad_by_id(source.0, source.1)?;
        let sink = self.pad_by_id(sink.0, sink.1)?;
        let link = self.find_link(source, sink).ok_or_else(|| Error::LinkNotFound {
            from: self.pad_label(source),
            to: self.pad_label(sink),
        })?;

        let flags = match enable {
            true => self.link(link).flags | MEDIA_LNK_FL_ENABLED,
            false => self.link(link).flags & !MEDIA_LNK_FL_ENABLED,
        };
        self.setup_link(media, source, sink, flags)
    }

    fn pad_by_id(&self, entity: u32, pad: u32) -> Result<PadRef> {
        let index = self
            .entity_index_by_id(entity)
            .ok_or_else(|| Error::EntityNotFound(format!("id {entity}")))?;
        self.pad_ref(index, pad).ok_or_else(|| Error::PadOutOfRange {
            entity: self.entities[index].info.name.clone(),
            pad,
        })
    }

    /// Disable every mutable link, driving each physical link once from its
    /// forward record. Returns the number of links reset.
    pub fn reset_all_links(&mut self, media: &dyn MediaDevice) -> Result<usize> {
        let mut count = 0;
        for entity in 0..self.entities.len() {
            for slot in 0..self.entities[entity].links.len() {
                let link = &self.entities[entity].links[slot];
                if link.backlink || link.is_immutable() {
                    continue;
                }
                let (source, sink) = (link.source, link.sink);
                let flags = link.flags & !MEDIA_LNK_FL_ENABLED;
                self.setup_link(media, source, sink, flags)?;
                count += 1;
            }
        }
        debug!(count, "reset all links");
        Ok(count)
    }

    /// Every link record has a twin whose twin is the record itself and
    /// whose flags match.
    pub fn check_twins(&self) -> bool {
        self.entities.iter().enumerate().all(|(entity, e)| {
            e.links.iter().enumerate().all(|(slot, link)| {
                let this = LinkRef { entity, slot };
                match link.twin {
                    Some(twin) => {
                        let other = self.link(twin);
                        other.twin == Some(this)
                            && other.flags == link.flags
                            && other.source == link.source
                            && other.sink == link.sink
                    }
                    None => false,
                }
            })
        })
    }

    /// Name of the first lens sub-device.
    pub fn lens_name(&self) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.info.type_ == MEDIA_ENT_T_V4L2_SUBDEV_LENS)
            .map(Entity::name)
    }

    /// Name of the first entity whose name starts with `vcm`, which carries
    /// the I2C address of the voice coil motor.
    pub fn vcm_i2c_addr(&self, vcm: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.info.name.starts_with(vcm))
            .map(Entity::name)
    }

    /// Entity named `"<sensor> ..."` with a link into the entity `sink`.
    fn sensor_linked_to(&self, sensor: &str, sink: &str) -> Option<&Entity> {
        let prefix = format!("{sensor} ");
        self.entities.iter().find(|e| {
            e.info.name.starts_with(&prefix)
                && e.links.iter().any(|l| {
                    !l.backlink && self.entities[l.sink.entity].info.name == sink
                })
        })
    }

    /// Whether a sensor named `sensor` is linked into `sink`.
    pub fn check_available_sensor(&self, sensor: &str, sink: &str) -> bool {
        self.sensor_linked_to(sensor, sink).is_some()
    }

    /// I2C bus address of the sensor linked into `sink`, taken from the
    /// entity name, e.g. `"10-0010"` for `"imx319 10-0010"`.
    pub fn i2c_bus_address(&self, sensor: &str, sink: &str) -> Option<&str> {
        let entity = self.sensor_linked_to(sensor, sink)?;
        entity
            .info
            .name
            .get(sensor.len() + 1..)
            .filter(|s| !s.is_empty())
    }

    /// Graphviz rendering of the graph. Immutable links are bold, disabled
    /// links dashed.
    pub fn dump_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph board {{");
        let _ = writeln!(out, "\trankdir=TB");

        for entity in &self.entities {
            let info = &entity.info;
            if info.is_devnode() {
                if let Some(devname) = &entity.devname {
                    let _ = writeln!(
                        out,
                        "\tn{:08x} [label=\"{}\\n{}\", shape=box, style=filled, fillcolor=yellow]",
                        info.id, info.name, devname
                    );
                }
            } else if info.is_subdev() {
                let ports = |sink: bool| {
                    entity
                        .pads
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| if sink { p.is_sink() } else { p.is_source() })
                        .map(|(i, _)| format!("<port{i}> {i}"))
                        .collect::<Vec<_>>()
                        .join(" | ")
                };
                let devname = entity
                    .devname
                    .as_deref()
                    .map(|d| format!("\\n{d}"))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "\tn{:08x} [label=\"{{{{{}}} | {}{} | {{{}}}}}\", shape=Mrecord, style=filled, fillcolor=green]",
                    info.id,
                    ports(true),
                    info.name,
                    devname,
                    ports(false)
                );
            } else {
                continue;
            }

            for link in entity.links.iter().filter(|l| !l.backlink) {
                let source = &self.entities[link.source.entity];
                let sink = &self.entities[link.sink.entity];
                let _ = write!(out, "\tn{:08x}", source.info.id);
                if source.info.is_subdev() {
                    let _ = write!(out, ":port{}", link.source.index);
                }
                let _ = write!(out, " -> n{:08x}", sink.info.id);
                if sink.info.is_subdev() {
                    let _ = write!(out, ":port{}", link.sink.index);
                }
                if link.is_immutable() {
                    out.push_str(" [style=bold]");
                } else if !link.is_enabled() {
                    out.push_str(" [style=dashed]");
                }
                out.push('\n');
            }
        }

        out.push_str("}\n");
        out
    }

    /// Text rendering of the graph in the style of `media-ctl -p`.
    pub fn dump_text(&self) -> String {
        let plural = |n: usize| if n > 1 { "s" } else { "" };

        let mut out = String::from("Device topology\n");
        for entity in &self.entities {
            let info = &entity.info;
            let header = format!("- entity {}: ", info.id);
            let indent = " ".repeat(header.len());
            let _ = writeln!(
                out,
                "{header}{} ({} pad{}, {} link{})",
                info.name,
                entity.pads.len(),
                plural(entity.pads.len()),
                entity.links.len(),
                plural(entity.links.len())
            );
            let _ = writeln!(
                out,
                "{indent}type {} subtype {} flags {:x}",
                info.type_name(),
                info.subtype_name(),
                info.flags
            );
            if let Some(devname) = &entity.devname {
                let _ = writeln!(out, "{indent}device node name {devname}");
            }

            for (i, pad) in entity.pads.iter().enumerate() {
                let direction = if pad.is_sink() {
                    "Sink"
                } else if pad.is_source() {
                    "Source"
                } else {
                    "Unknown"
                };
                let _ = writeln!(out, "\tpad{i}: {direction}");

                for link in &entity.links {
                    let (arrow, remote) = if !link.backlink && link.source.index == i {
                        ("->", link.sink)
                    } else if link.backlink && link.sink.index == i {
                        ("<-", link.source)
                    } else {
                        continue;
                    };
                    let flags = [
                        (link.is_enabled(), "ENABLED"),
                        (link.is_immutable(), "IMMUTABLE"),
                        (link.is_dynamic(), "DYNAMIC"),
                    ]
                    .into_iter()
                    .filter_map(|(set, name)| set.then_some(name))
                    .collect::<Vec<_>>()
                    .join(",");
                    let _ = writeln!(out, "\t\t{arrow} {} [{flags}]", self.pad_label(remote));
                }
            }
            out.push('\n');
        }
        out
    }
}
