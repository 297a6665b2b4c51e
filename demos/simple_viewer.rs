//! Headless viewer: streams the map around Cambridge, adds a region and a small
//! chart layer, then writes the composited frame to `frame.png`.

use bevy::log::LogPlugin;
use bevy::math::DVec2;
use bevy::prelude::*;
use bevy_live_map::chart::{MarkerShape, PieSpecComponent, PointComponent};
use bevy_live_map::fragment::RegionComponent;
use bevy_live_map::geometry::WORLD_SIZE;
use bevy_live_map::{
    CameraInput, CellKey, ChartElementComponent, Color, LayerBuilder, LiveMapConfig, LiveMapPlugin,
    LoadingState, MapError, MapProjection, MemoryFragmentProvider, MercatorProjection, RenderedFrame,
};
use geo::{polygon, Coord, MultiPolygon};

const MAX_FRAMES: usize = 600;

fn main() -> Result<(), MapError> {
    let config = LiveMapConfig {
        viewport_size: (1024, 768),
        initial_zoom: 12.0,
        initial_center: (0.1313, 52.1951),
        ..default()
    };

    let region = MultiPolygon(vec![polygon![
        (x: 0.08, y: 52.17),
        (x: 0.18, y: 52.17),
        (x: 0.18, y: 52.23),
        (x: 0.08, y: 52.23),
    ]]);
    // One fragment per quad covering the region at the finest quad zoom.
    let quad_zoom = config.fragment_max_quad_zoom;
    let cell_size = WORLD_SIZE / f64::from(1u32 << quad_zoom);
    let north_west = MercatorProjection.project(Coord { x: 0.08, y: 52.23 });
    let south_east = MercatorProjection.project(Coord { x: 0.18, y: 52.17 });
    let mut fragments = MemoryFragmentProvider::new();
    for x in (north_west.x / cell_size) as u32..=(south_east.x / cell_size) as u32 {
        for y in (north_west.y / cell_size) as u32..=(south_east.y / cell_size) as u32 {
            let quad = CellKey::new(quad_zoom, x, y).quad_key();
            fragments = fragments.with_fragment("cambridge", quad, region.clone());
        }
    }

    let mut plugin = LiveMapPlugin::new(config.clone()).with_fragments(fragments);
    #[cfg(feature = "http")]
    {
        plugin = plugin.with_tiles(bevy_live_map::HttpTileFetcher::from_config(&config));
    }

    let mut app = App::new();
    app.add_plugins(LogPlugin::default()).add_plugins(plugin);

    app.world_mut().spawn(RegionComponent::new("cambridge"));
    let mut builder = LayerBuilder::new(app.world_mut(), "overlay");
    builder.path(
        &[Coord { x: 0.09, y: 52.18 }, Coord { x: 0.17, y: 52.22 }],
        ChartElementComponent {
            stroke_color: Some(Color::rgba(0xd0, 0x30, 0x30, 0xff)),
            stroke_width: 3.0,
            ..default()
        },
    )?;
    builder.point(
        Coord { x: 0.1313, y: 52.1951 },
        PointComponent {
            size: 10.0,
            shape: MarkerShape::Circle,
        },
        ChartElementComponent::default(),
    )?;
    builder.pie(
        Coord { x: 0.16, y: 52.19 },
        PieSpecComponent {
            radius: 24.0,
            hole_radius: 10.0,
            values: vec![3.0, 2.0, 1.0],
            colors: vec![Color::rgba(0xe0, 0x60, 0x20, 0xff), Color::rgba(0x20, 0x80, 0xe0, 0xff), Color::WHITE],
            indices: vec![0, 1, 2],
        },
        ChartElementComponent::default(),
    )?;

    app.world_mut()
        .send_event(CameraInput::move_to_lon_lat(0.1313, 52.1951, 12.0));
    app.update();
    app.world_mut().send_event(CameraInput::Pan {
        delta: DVec2::new(40.0, 0.0),
    });

    for _ in 0..MAX_FRAMES {
        app.update();
        if !app.world().resource::<LoadingState>().0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(16));
    }
    app.update();

    let frame = app.world().resource::<RenderedFrame>();
    let Some(bitmap) = &frame.bitmap else {
        error!("No frame was rendered");
        return Ok(());
    };
    bitmap.to_rgba_image()?.save("frame.png")?;
    info!("Wrote frame {} to frame.png", frame.frame);
    Ok(())
}
