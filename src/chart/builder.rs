use std::sync::Arc;

use bevy::math::DVec2;
use bevy::prelude::*;
use geo::{BoundingRect, Coord, LineString};

use crate::chart::{
    ChartElementComponent, LocatorComponent, PathGeometryComponent, PathLocator, PathRenderer,
    PieLocator, PieRenderer, PieSpecComponent, PointComponent, PointLocator, PointRenderer,
    RendererComponent,
};
use crate::ecs::EntityStore;
use crate::error::MapError;
use crate::geometry::{resample_path, Projection, RESAMPLING_PRECISION};
use crate::layers::{spawn_layer, LayerComponent, ParentLayerComponent};
use crate::placement::{WorldDimension, WorldOrigin};

/// Creates a chart layer on top of the existing ones and fills it with
/// elements given in lon/lat.
pub struct LayerBuilder<'w> {
    world: &'w mut World,
    layer: Entity,
    name: String,
    count: usize,
}

impl<'w> LayerBuilder<'w> {
    pub fn new(world: &'w mut World, name: &str) -> Self {
        let order = world
            .query::<&LayerComponent>()
            .iter(world)
            .map(|layer| layer.order)
            .max()
            .map_or(0, |order| order + 1);
        let layer = spawn_layer(world, name, order);
        Self {
            world,
            layer,
            name: name.to_string(),
            count: 0,
        }
    }

    pub fn layer(&self) -> Entity {
        self.layer
    }

    fn project(&self, lon_lat: Coord<f64>) -> DVec2 {
        let projection = self.world.get_resource::<Projection>().cloned().unwrap_or_default();
        let world = projection.0.project(lon_lat);
        DVec2::new(world.x, world.y)
    }

    fn spawn(&mut self, kind: &str, bundle: impl Bundle) -> Result<Entity, MapError> {
        let entity = self
            .world
            .create_entity(format!("{}_{kind}_{}", self.name, self.count));
        self.count += 1;
        self.world
            .add_component(entity, (ParentLayerComponent(self.layer), bundle))?;
        Ok(entity)
    }

    /// Path through `lon_lat`, resampled so that it follows the projection's curvature.
    pub fn path(
        &mut self,
        lon_lat: &[Coord<f64>],
        element: ChartElementComponent,
    ) -> Result<Entity, MapError> {
        let projection = self.world.get_resource::<Projection>().cloned().unwrap_or_default();
        let line = LineString(resample_path(projection.0.as_ref(), RESAMPLING_PRECISION, lon_lat));
        let (origin, dimension) = line
            .bounding_rect()
            .map(|rect| {
                (
                    DVec2::new(rect.min().x, rect.min().y),
                    DVec2::new(rect.width(), rect.height()),
                )
            })
            .unwrap_or_default();
        self.spawn(
            "path",
            (
                PathGeometryComponent(line),
                WorldOrigin(origin),
                WorldDimension(dimension),
                element,
                RendererComponent(Arc::new(PathRenderer)),
                LocatorComponent(Arc::new(PathLocator)),
            ),
        )
    }

    pub fn point(
        &mut self,
        lon_lat: Coord<f64>,
        marker: PointComponent,
        element: ChartElementComponent,
    ) -> Result<Entity, MapError> {
        let origin = self.project(lon_lat);
        self.spawn(
            "point",
            (
                WorldOrigin(origin),
                marker,
                element,
                RendererComponent(Arc::new(PointRenderer)),
                LocatorComponent(Arc::new(PointLocator)),
            ),
        )
    }

    /// Pie, or donut when `spec.hole_radius` is positive.
    pub fn pie(
        &mut self,
        lon_lat: Coord<f64>,
        spec: PieSpecComponent,
        element: ChartElementComponent,
    ) -> Result<Entity, MapError> {
        let origin = self.project(lon_lat);
        self.spawn(
            "pie",
            (
                WorldOrigin(origin),
                spec,
                element,
                RendererComponent(Arc::new(PieRenderer)),
                LocatorComponent(Arc::new(PieLocator)),
            ),
        )
    }
}
