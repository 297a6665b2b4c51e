//! Chart primitives drawn over the map and the hit testing behind hovering.
//!
//! Drawing and hit testing are two independent contracts attached to an entity
//! through [`RendererComponent`] and [`LocatorComponent`]. Implementations are
//! stateless: they read the entity, convert through the [`RenderHelper`] and
//! never mutate the world.

pub mod builder;
pub mod path;
pub mod pie;
pub mod point;
pub mod region;
pub mod tile;

use std::sync::Arc;

use bevy::ecs::world::EntityRef;
use bevy::math::DVec2;
use bevy::prelude::*;

use crate::canvas::{Color, DrawSurface};
use crate::layers::HiddenComponent;
use crate::viewport::{RenderHelper, Viewport};

pub use builder::LayerBuilder;
pub use path::{ArrowEnd, ArrowSpec, ArrowType, PathGeometryComponent, PathLocator, PathRenderer};
pub use pie::{PieLocator, PieRenderer, PieSpecComponent};
pub use point::{MarkerShape, PointComponent, PointLocator, PointRenderer};
pub use region::{RegionLocator, RegionRenderer, RegionStyleComponent};
pub use tile::TileRenderer;

pub trait Renderer: Send + Sync {
    fn render(&self, entity: EntityRef, surface: &mut dyn DrawSurface, helper: &RenderHelper);
}

pub trait Locator: Send + Sync {
    /// Hit test at `point` in world units.
    fn search(&self, point: DVec2, entity: EntityRef, helper: &RenderHelper) -> Option<HoverObject>;
}

#[derive(Component, Clone)]
pub struct RendererComponent(pub Arc<dyn Renderer>);

#[derive(Component, Clone)]
pub struct LocatorComponent(pub Arc<dyn Locator>);

/// Visual parameters shared by every chart element. Sizes are in client pixels.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct ChartElementComponent {
    pub fill_color: Option<Color>,
    pub stroke_color: Option<Color>,
    pub stroke_width: f64,
    pub line_dash: Vec<f64>,
    pub start_padding: f64,
    pub end_padding: f64,
    pub arrow: Option<ArrowSpec>,
    /// Row of the source data this element was built from.
    pub index: usize,
}

impl Default for ChartElementComponent {
    fn default() -> Self {
        Self {
            fill_color: None,
            stroke_color: Some(Color::BLACK),
            stroke_width: 1.0,
            line_dash: Vec::new(),
            start_padding: 0.0,
            end_padding: 0.0,
            arrow: None,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoverObject {
    pub entity: Entity,
    /// Data index of the hit element; the sector for pies.
    pub index: usize,
    /// Distance from the pointer in client pixels, zero for area hits.
    pub distance: f64,
}

#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub enum PointerInput {
    Move { position: DVec2 },
    Leave,
}

/// Objects under the pointer, nearest first.
#[derive(Resource, Debug, Clone, Default)]
pub struct HoverObjects {
    pub pointer: Option<DVec2>,
    pub objects: Vec<HoverObject>,
}

pub fn hover_search_system(
    mut inputs: EventReader<PointerInput>,
    viewport: Res<Viewport>,
    locators: Query<(EntityRef, &LocatorComponent), Without<HiddenComponent>>,
    mut hover: ResMut<HoverObjects>,
) {
    let Some(input) = inputs.read().last().copied() else {
        return;
    };
    hover.objects.clear();
    let position = match input {
        PointerInput::Move { position } => position,
        PointerInput::Leave => {
            hover.pointer = None;
            return;
        }
    };
    hover.pointer = Some(position);

    let helper = RenderHelper::new(&viewport);
    let world = helper.to_world(position);
    let mut found: Vec<HoverObject> = locators
        .iter()
        .filter_map(|(entity, locator)| locator.0.search(world, entity, &helper))
        .collect();
    found.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(b.entity.cmp(&a.entity)));
    hover.objects = found;
}
