// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::*;
use edgefirst_media::{
    capture::RouteSetup,
    config::{
        Dimensions, McCtl, McFormat, McFormatKind, McLink, McRoute, McVideoNode, MediaCtlConf,
        MemoryType, PlatformSettings, Port, Rect, VideoNodeType,
    },
    context::{MediaContext, SessionRoute},
    error::Error as MediaError,
    format::{mbus, SGRBG10},
    media::LinkDesc,
    router::RouteTarget,
    subdev::Route,
    uapi::{media::*, subdev::*},
};
use std::{
    error::Error,
    sync::{Arc, Mutex},
};

const TARGET: RouteTarget = RouteTarget {
    width: 1920,
    height: 1080,
    field: 0,
};

struct Fixture {
    context: MediaContext,
    subdevs: FakeSubdevs,
    links: Arc<Mutex<Vec<LinkDesc>>>,
}

fn fixture(
    test: &str,
    subdevs: FakeSubdevs,
    settings: PlatformSettings,
) -> Result<Fixture, Box<dyn Error>> {
    let media = ipu_media();
    let links = media.setup_log();
    let mut context = MediaContext::with_parts(
        Box::new(media),
        fake_sysfs(test, &IPU_NODES)?,
        Box::new(subdevs.clone()),
        settings,
    );
    context.init_entities()?;
    Ok(Fixture {
        context,
        subdevs,
        links,
    })
}

impl Fixture {
    fn link_requests(&self) -> Vec<LinkDesc> {
        self.links.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn enabled(&self, source: (&str, u32), sink: (&str, u32)) -> Option<bool> {
        let graph = self.context.graph();
        let source = graph.pad_ref(graph.entity_index_by_name(source.0)?, source.1)?;
        let sink = graph.pad_ref(graph.entity_index_by_name(sink.0)?, sink.1)?;
        graph.find_link(source, sink).map(|l| graph.link(l).is_enabled())
    }
}

fn link(source: (&str, u32), sink: (&str, u32), enable: bool) -> McLink {
    McLink {
        src_entity: source.0.to_string(),
        src_pad: source.1,
        sink_entity: sink.0.to_string(),
        sink_pad: sink.1,
        enable,
    }
}

fn format(entity: &str, pad: u32, code: Option<u32>, size: Dimensions) -> McFormat {
    McFormat {
        entity: entity.to_string(),
        pad,
        stream: 0,
        kind: McFormatKind::Format { code, size },
    }
}

fn selection(entity: &str, pad: u32, target: u32, rect: Option<Rect>) -> McFormat {
    McFormat {
        entity: entity.to_string(),
        pad,
        stream: 0,
        kind: McFormatKind::Selection { target, rect },
    }
}

fn csi_route(flags: u32) -> McRoute {
    McRoute {
        entity: CSI0.to_string(),
        sink_pad: 0,
        sink_stream: 0,
        source_pad: 1,
        source_stream: 0,
        flags,
    }
}

/// Sensor 0 through CSI2 0 into capture 0.
fn main_route() -> MediaCtlConf {
    MediaCtlConf {
        ctls: vec![McCtl {
            entity: SENSOR0.to_string(),
            id: 0x009e_0903,
            value: 1,
            name: "test pattern".to_string(),
        }],
        routes: vec![csi_route(V4L2_SUBDEV_ROUTE_FL_ACTIVE)],
        formats: vec![
            format(SENSOR0, 0, Some(mbus::SGRBG10_1X10), Dimensions::Target),
            format(
                CSI0,
                1,
                None,
                Dimensions::Explicit {
                    width: 1280,
                    height: 720,
                },
            ),
            selection(CSI0, 1, V4L2_SEL_TGT_CROP, None),
        ],
        links: vec![link((CSI0, 1), (CAPTURE0, 0), true)],
        video_nodes: vec![McVideoNode {
            name: CAPTURE0.to_string(),
            node_type: VideoNodeType::Generic,
        }],
        code: Some(mbus::SGRBG10_1X10),
        ..Default::default()
    }
}

#[test]
fn test_configure_route() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("route", FakeSubdevs::default(), PlatformSettings::default())?;
    fx.context.apply_route(&main_route(), &TARGET)?;

    let sensor = "/dev/v4l-subdev0".to_string();
    let csi = "/dev/v4l-subdev1".to_string();
    let expected = vec![
        SubdevCall::Control {
            devname: sensor.clone(),
            id: 0x009e_0903,
            value: 1,
        },
        SubdevCall::Routing {
            devname: csi.clone(),
            routes: vec![Route {
                sink_pad: 0,
                sink_stream: 0,
                source_pad: 1,
                source_stream: 0,
                flags: V4L2_SUBDEV_ROUTE_FL_ACTIVE,
            }],
        },
        SubdevCall::Format {
            devname: sensor,
            pad: 0,
            stream: 0,
            width: 1920,
            height: 1080,
            code: mbus::SGRBG10_1X10,
        },
        // propagated over the immutable sensor link
        SubdevCall::Format {
            devname: csi.clone(),
            pad: 0,
            stream: 0,
            width: 1920,
            height: 1080,
            code: mbus::SGRBG10_1X10,
        },
        SubdevCall::Format {
            devname: csi.clone(),
            pad: 1,
            stream: 0,
            width: 1280,
            height: 720,
            code: mbus::SGRBG10_1X10,
        },
        SubdevCall::Selection {
            devname: csi,
            pad: 1,
            target: V4L2_SEL_TGT_CROP,
            rect: Rect {
                left: 0,
                top: 0,
                width: 1920,
                height: 1080,
            },
        },
    ];
    assert_eq!(fx.subdevs.calls(), expected);

    // six mutable links reset, then the requested link enabled
    let requests = fx.link_requests();
    assert_eq!(requests.len(), 7);
    assert!(requests[..6].iter().all(|l| l.flags & MEDIA_LNK_FL_ENABLED == 0));
    let last = requests[6];
    assert_eq!((last.source.entity, last.source.index), (2, 1));
    assert_eq!((last.sink.entity, last.sink.index), (6, 0));
    assert_eq!(last.flags & MEDIA_LNK_FL_ENABLED, MEDIA_LNK_FL_ENABLED);

    assert_eq!(fx.enabled((CSI0, 1), (CAPTURE0, 0)), Some(true));
    assert_eq!(fx.enabled((CSI0, 2), (CAPTURE1, 0)), Some(false));
    assert!(fx.context.graph().check_twins());
    Ok(())
}

#[test]
fn test_bridge_splice() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("bridge", FakeSubdevs::default(), PlatformSettings::default())?;
    let conf = MediaCtlConf {
        links: vec![
            link((SENSOR1, 0), (CSI1, 0), true),
            link((CSI1, 1), (CAPTURE1, 0), true),
        ],
        ..Default::default()
    };
    let before = conf.clone();

    let planned = fx.context.router().plan(&conf)?;
    assert_eq!(planned.len(), 3);
    assert!(planned[0].bridged && planned[1].bridged);
    assert!(!planned[2].bridged);

    fx.context.apply_route(&conf, &TARGET)?;
    assert_eq!(conf, before);
    assert_eq!(fx.enabled((SENSOR1, 0), (BRIDGE, 0)), Some(true));
    assert_eq!(fx.enabled((BRIDGE, 1), (CSI1, 0)), Some(true));
    assert_eq!(fx.enabled((CSI1, 1), (CAPTURE1, 0)), Some(true));
    assert_eq!(fx.enabled((SENSOR1, 0), (CSI1, 0)), None);
    Ok(())
}

#[test]
fn test_missing_link() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("missing-link", FakeSubdevs::default(), PlatformSettings::default())?;
    let conf = MediaCtlConf {
        links: vec![link((SENSOR0, 0), (CSI1, 0), true)],
        ..Default::default()
    };
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::LinkNotFound { .. })
    ));
    assert!(fx.link_requests().is_empty());
    Ok(())
}

#[test]
fn test_validation_before_requests() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("validation", FakeSubdevs::default(), PlatformSettings::default())?;

    let mut conf = main_route();
    conf.links.push(link(("imx999 9-0010", 0), (CSI0, 0), true));
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::EntityNotFound(name)) if name == "imx999 9-0010"
    ));

    let mut conf = main_route();
    conf.formats.push(format(CSI0, 7, None, Dimensions::DontCare));
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::PadOutOfRange { pad: 7, .. })
    ));

    let mut conf = main_route();
    conf.formats.push(selection(CSI0, 1, V4L2_SEL_TGT_CROP_BOUNDS, None));
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::Config(_))
    ));

    let mut conf = main_route();
    conf.code = None;
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::Config(_))
    ));

    assert!(fx.subdevs.calls().is_empty());
    assert!(fx.link_requests().is_empty());
    Ok(())
}

#[test]
fn test_immutable_link_disable() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("immutable", FakeSubdevs::default(), PlatformSettings::default())?;
    let conf = MediaCtlConf {
        links: vec![link((SENSOR0, 0), (CSI0, 0), false)],
        ..Default::default()
    };
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::ImmutableLink { .. })
    ));
    assert!(fx.link_requests().is_empty());
    Ok(())
}

#[test]
fn test_conflicting_route() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("conflict", FakeSubdevs::default(), PlatformSettings::default())?;
    let conf = MediaCtlConf {
        links: vec![
            link((CSI0, 1), (CAPTURE0, 0), true),
            link((CSI1, 1), (CAPTURE0, 0), true),
        ],
        ..Default::default()
    };
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::ConflictingRoute(_))
    ));
    assert!(fx.link_requests().is_empty());
    Ok(())
}

#[test]
fn test_route_without_reset() -> Result<(), Box<dyn Error>> {
    let settings = PlatformSettings {
        reset_link_route: false,
        ..Default::default()
    };
    let mut fx = fixture("no-reset", FakeSubdevs::default(), settings)?;

    // CSI2 0 already feeds capture 0
    let conf = MediaCtlConf {
        links: vec![link((CSI1, 1), (CAPTURE0, 0), true)],
        ..Default::default()
    };
    assert!(matches!(
        fx.context.apply_route(&conf, &TARGET),
        Err(MediaError::ConflictingRoute(_))
    ));

    let conf = MediaCtlConf {
        links: vec![
            link((CSI0, 1), (CAPTURE0, 0), false),
            link((CSI1, 1), (CAPTURE0, 0), true),
        ],
        ..Default::default()
    };
    fx.context.apply_route(&conf, &TARGET)?;
    assert_eq!(fx.link_requests().len(), 2);
    assert_eq!(fx.enabled((CSI0, 1), (CAPTURE0, 0)), Some(false));
    assert_eq!(fx.enabled((CSI1, 1), (CAPTURE0, 0)), Some(true));
    Ok(())
}

#[test]
fn test_control_failure_ignored() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture(
        "ctl-failure",
        FakeSubdevs::default().fail_controls(),
        PlatformSettings::default(),
    )?;
    fx.context.apply_route(&main_route(), &TARGET)?;
    assert_eq!(fx.enabled((CSI0, 1), (CAPTURE0, 0)), Some(true));
    Ok(())
}

#[test]
fn test_format_failure_aborts() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture(
        "fmt-failure",
        FakeSubdevs::default().fail_formats(),
        PlatformSettings::default(),
    )?;
    let err = fx.context.apply_route(&main_route(), &TARGET).err().ok_or("route applied")?;
    assert_eq!(err.errno(), Some(nix::errno::Errno::EINVAL));

    // links were reset but the requested link was never enabled
    assert_eq!(fx.link_requests().len(), 6);
    assert_eq!(fx.enabled((CSI0, 1), (CAPTURE0, 0)), Some(false));
    Ok(())
}

#[test]
fn test_explicit_selection() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("selection", FakeSubdevs::default(), PlatformSettings::default())?;
    let rect = Rect {
        left: 16,
        top: 8,
        width: 1280,
        height: 720,
    };
    let conf = MediaCtlConf {
        formats: vec![selection(CSI0, 1, V4L2_SEL_TGT_COMPOSE, Some(rect))],
        ..Default::default()
    };
    fx.context.apply_route(&conf, &TARGET)?;
    assert_eq!(
        fx.subdevs.calls(),
        vec![SubdevCall::Selection {
            devname: "/dev/v4l-subdev1".to_string(),
            pad: 1,
            target: V4L2_SEL_TGT_COMPOSE,
            rect,
        }]
    );
    Ok(())
}

#[test]
fn test_clear_route() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("clear", FakeSubdevs::default(), PlatformSettings::default())?;
    let mut conf = main_route();
    conf.routes.push(McRoute {
        entity: "imx999 9-0010".to_string(),
        ..csi_route(V4L2_SUBDEV_ROUTE_FL_ACTIVE)
    });

    assert_eq!(fx.context.clear_route(&conf), 1);
    let routing = fx.subdevs.routing("/dev/v4l-subdev1").ok_or("no routing")?;
    assert_eq!(routing.len(), 1);
    assert!(!routing[0].is_active());
    Ok(())
}

#[test]
fn test_reset_links_and_routes() -> Result<(), Box<dyn Error>> {
    let active = Route {
        sink_pad: 0,
        sink_stream: 0,
        source_pad: 1,
        source_stream: 0,
        flags: V4L2_SUBDEV_ROUTE_FL_ACTIVE,
    };
    let subdevs = FakeSubdevs::default()
        .with_routing("/dev/v4l-subdev1", vec![active, Route { source_pad: 2, ..active }])
        .with_routing("/dev/v4l-subdev4", vec![]);
    let mut fx = fixture("reset", subdevs, PlatformSettings::default())?;

    assert_eq!(fx.context.reset_links(true)?, 6);
    let routing = fx.subdevs.routing("/dev/v4l-subdev1").ok_or("no routing")?;
    assert_eq!(routing.len(), 2);
    assert!(routing.iter().all(|r| !r.is_active()));

    // sub-devices without routing support or an empty table are left alone
    let rewritten: Vec<_> = fx
        .subdevs
        .calls()
        .into_iter()
        .filter(|c| matches!(c, SubdevCall::Routing { .. }))
        .collect();
    assert_eq!(rewritten.len(), 1);
    Ok(())
}

#[test]
fn test_video_nodes() -> Result<(), Box<dyn Error>> {
    let fx = fixture("video-nodes", FakeSubdevs::default(), PlatformSettings::default())?;
    let mut conf = main_route();
    conf.video_nodes.push(McVideoNode {
        name: CAPTURE1.to_string(),
        node_type: VideoNodeType::GenericShortExpo,
    });

    let nodes = fx.context.video_nodes(&conf)?;
    assert_eq!(nodes[&VideoNodeType::Generic], "/dev/video0");
    assert_eq!(nodes[&VideoNodeType::GenericShortExpo], "/dev/video1");

    conf.video_nodes.push(McVideoNode {
        name: "Intel IPU6 ISYS Capture 9".to_string(),
        node_type: VideoNodeType::GenericMediumExpo,
    });
    assert!(matches!(
        fx.context.video_nodes(&conf),
        Err(MediaError::EntityNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_session_route() -> Result<(), Box<dyn Error>> {
    let fx = fixture("session", FakeSubdevs::default(), PlatformSettings::default())?;
    let subdevs = fx.subdevs.clone();
    let mut session = SessionRoute::new(fx.context, main_route());

    let main = stream(3840, 2160, SGRBG10, MemoryType::Mmap);
    session.setup_route(&main, Port::Main)?;

    let sized = subdevs.calls().into_iter().any(|c| {
        matches!(
            c,
            SubdevCall::Format {
                pad: 0,
                width: 3840,
                height: 2160,
                ..
            }
        )
    });
    assert!(sized);

    let graph = session.context().graph();
    assert!(graph.check_twins());
    Ok(())
}

#[test]
fn test_session_route_output_size() -> Result<(), Box<dyn Error>> {
    let fx = fixture("output", FakeSubdevs::default(), PlatformSettings::default())?;
    let links = fx.links.clone();
    let conf = MediaCtlConf {
        output_width: 1920,
        output_height: 1080,
        ..main_route()
    };
    let mut session = SessionRoute::new(fx.context, conf);

    let uhd = stream(3840, 2160, SGRBG10, MemoryType::Mmap);
    assert!(matches!(
        session.setup_route(&uhd, Port::Main),
        Err(MediaError::Config(_))
    ));
    assert!(links.lock().map(|l| l.is_empty()).unwrap_or_default());

    session.setup_route(&stream(1920, 1080, SGRBG10, MemoryType::Mmap), Port::Main)?;
    assert!(!links.lock().map(|l| l.is_empty()).unwrap_or_default());
    Ok(())
}

#[test]
fn test_close_subdevs() -> Result<(), Box<dyn Error>> {
    let mut fx = fixture("close", FakeSubdevs::default(), PlatformSettings::default())?;
    fx.context.apply_route(&main_route(), &TARGET)?;
    let opened = fx.subdevs.opens();
    assert!(opened > 0);

    // cached handles are reused
    fx.context.apply_route(&main_route(), &TARGET)?;
    assert_eq!(fx.subdevs.opens(), opened);

    fx.context.close_subdevs();
    fx.context.apply_route(&main_route(), &TARGET)?;
    assert_eq!(fx.subdevs.opens(), 2 * opened);
    Ok(())
}
