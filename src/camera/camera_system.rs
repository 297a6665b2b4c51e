use bevy::prelude::*;

use super::camera_helper::CameraInput;
use super::CameraConfig;
use crate::ecs::{tick_alive, MapSystems, MapTick};
use crate::viewport::{viewport_grid_update_system, Viewport, ViewportGrid};

pub struct CameraSystemPlugin {
    pub config: CameraConfig,
}

impl CameraSystemPlugin {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl Plugin for CameraSystemPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.config.clone())
            .insert_resource(ViewportGrid::stale())
            .add_event::<CameraInput>()
            .add_systems(
                MapTick,
                camera_input_system
                    .run_if(tick_alive)
                    .in_set(MapSystems::Input),
            )
            .add_systems(
                MapTick,
                viewport_grid_update_system
                    .run_if(tick_alive)
                    .in_set(MapSystems::Viewport),
            );
    }
}

/// Applies camera input to the viewport. The only writer of [`Viewport`].
pub fn camera_input_system(
    mut events: EventReader<CameraInput>,
    config: Res<CameraConfig>,
    mut viewport: ResMut<Viewport>,
    mut grid: ResMut<ViewportGrid>,
) {
    if viewport.min_zoom != config.min_zoom || viewport.max_zoom != config.max_zoom {
        let zoom = viewport.zoom;
        viewport.set_zoom_bounds(config.min_zoom, config.max_zoom);
        if viewport.zoom != zoom {
            grid.stale = true;
        }
    }
    if !config.enable_camera {
        events.clear();
        return;
    }

    for input in events.read() {
        let before = viewport.clone();
        match *input {
            CameraInput::Pan { delta } if config.enable_pan => viewport.pan(delta),
            CameraInput::Zoom { delta, anchor } if config.enable_zoom => {
                viewport.zoom_at(delta, anchor)
            }
            CameraInput::MoveTo { center, zoom } => viewport.move_to(center, zoom),
            _ => {}
        }
        if *viewport != before {
            grid.stale = true;
        }
    }
}
