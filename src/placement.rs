//! World and screen placement of renderable entities.

use bevy::math::DVec2;
use bevy::prelude::*;
use geo::{Coord, MultiPolygon};

use crate::config::LiveMapConfig;
use crate::geometry::SimplifyTask;
use crate::multitasking::{MicroTaskExt, MicroTaskFailed, MicroThreadComponent, WorldUpdate};
use crate::viewport::{Viewport, ViewportGrid};

/// Top-left corner in world units.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct WorldOrigin(pub DVec2);

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct WorldDimension(pub DVec2);

/// Top-left corner in client pixels, derived from [`WorldOrigin`].
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct ScreenOrigin(pub DVec2);

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct ScreenDimension(pub DVec2);

#[derive(Component, Debug, Clone, PartialEq)]
pub struct WorldGeometryComponent(pub MultiPolygon<f64>);

/// Geometry in pixels at `zoom`, relative to the entity's [`WorldOrigin`].
#[derive(Component, Debug, Clone, PartialEq)]
pub struct ScreenGeometryComponent {
    pub geometry: MultiPolygon<f64>,
    pub zoom: u8,
}

pub fn world_to_screen_update_system(
    mut commands: Commands,
    viewport: Res<Viewport>,
    placed: Query<(
        Entity,
        Ref<WorldOrigin>,
        Option<Ref<WorldDimension>>,
        Has<ScreenOrigin>,
    )>,
) {
    let scale = viewport.scale();
    for (entity, origin, dimension, placed_before) in &placed {
        let moved = origin.is_changed() || dimension.as_ref().is_some_and(|d| d.is_changed());
        if placed_before && !moved && !viewport.is_changed() {
            continue;
        }
        let mut target = commands.entity(entity);
        target.insert(ScreenOrigin(viewport.world_to_screen(origin.0)));
        if let Some(dimension) = dimension {
            target.insert(ScreenDimension(dimension.0 * scale));
        }
    }
}

/// Starts a simplification task for every entity whose screen geometry is
/// missing or was prepared for another zoom bucket.
pub fn screen_geometry_system(
    mut commands: Commands,
    grid: Res<ViewportGrid>,
    config: Res<LiveMapConfig>,
    pending: Query<
        (
            Entity,
            &WorldGeometryComponent,
            &WorldOrigin,
            Option<&ScreenGeometryComponent>,
        ),
        (Without<MicroThreadComponent>, Without<MicroTaskFailed>),
    >,
) {
    let zoom = grid.zoom_bucket;
    for (entity, geometry, origin, screen) in &pending {
        if screen.is_some_and(|s| s.zoom == zoom) {
            continue;
        }
        let origin = Coord {
            x: origin.0.x,
            y: origin.0.y,
        };
        let task = SimplifyTask::new(geometry.0.clone(), origin, zoom, config.screen_precision_px).map(
            move |geometry| {
                WorldUpdate::on_entity(entity, move |target| {
                    target.insert(ScreenGeometryComponent {
                        geometry: geometry.clone(),
                        zoom,
                    });
                })
            },
        );
        commands
            .entity(entity)
            .insert(MicroThreadComponent::new(task, config.projection_quant));
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;
    use crate::multitasking::scheduler_system;
    use crate::ecs::SystemClock;
    use crate::error::ErrorChannel;
    use crate::multitasking::SchedulerStats;

    #[test]
    fn screen_origin_follows_viewport() {
        let mut app = App::new();
        app.insert_resource(Viewport {
            zoom: 1.0,
            center: DVec2::splat(128.0),
            size: DVec2::splat(100.0),
            min_zoom: 0.0,
            max_zoom: 5.0,
        })
        .add_systems(Update, world_to_screen_update_system);
        let entity = app
            .world_mut()
            .spawn((WorldOrigin(DVec2::splat(128.0)), WorldDimension(DVec2::splat(10.0))))
            .id();

        app.update();
        assert_eq!(app.world().get::<ScreenOrigin>(entity), Some(&ScreenOrigin(DVec2::splat(50.0))));
        assert_eq!(app.world().get::<ScreenDimension>(entity), Some(&ScreenDimension(DVec2::splat(20.0))));

        app.world_mut().resource_mut::<Viewport>().center = DVec2::splat(118.0);
        app.update();
        assert_eq!(app.world().get::<ScreenOrigin>(entity), Some(&ScreenOrigin(DVec2::splat(70.0))));
    }

    #[test]
    fn screen_geometry_is_prepared_per_zoom_bucket() {
        let mut app = App::new();
        app.insert_resource(ViewportGrid {
            zoom_bucket: 2,
            ..default()
        })
        .init_resource::<LiveMapConfig>()
        .init_resource::<SystemClock>()
        .init_resource::<ErrorChannel>()
        .init_resource::<SchedulerStats>()
        .add_systems(Update, (screen_geometry_system, scheduler_system).chain());

        let square = polygon![
            (x: 10.0, y: 10.0),
            (x: 11.0, y: 10.0),
            (x: 11.0, y: 11.0),
            (x: 10.0, y: 11.0),
        ];
        let entity = app
            .world_mut()
            .spawn((
                WorldGeometryComponent(MultiPolygon(vec![square])),
                WorldOrigin(DVec2::splat(10.0)),
            ))
            .id();

        app.update();
        let screen = app.world().get::<ScreenGeometryComponent>(entity).cloned().unwrap();
        assert_eq!(screen.zoom, 2);
        let exterior = &screen.geometry.0[0].exterior().0;
        assert!(exterior.contains(&Coord { x: 4.0, y: 4.0 }));
        assert!(app.world().get::<MicroThreadComponent>(entity).is_none());

        app.world_mut().resource_mut::<ViewportGrid>().zoom_bucket = 3;
        app.update();
        assert_eq!(app.world().get::<ScreenGeometryComponent>(entity).map(|s| s.zoom), Some(3));
    }
}
