//! Layer bookkeeping and frame compositing.
//!
//! Every renderable entity points at its layer through [`ParentLayerComponent`].
//! A layer is redrawn into its own bitmap only when marked dirty; the frame is
//! the composition of all layer bitmaps in `order`.

use bevy::ecs::world::EntityRef;
use bevy::prelude::*;

use crate::canvas::{Bitmap, Canvas, Color};
use crate::chart::RendererComponent;
use crate::error::MapError;
use crate::placement::{ScreenDimension, ScreenGeometryComponent, ScreenOrigin};
use crate::viewport::{RenderHelper, Viewport};

#[derive(Component, Debug, Clone)]
pub struct LayerComponent {
    pub name: String,
    /// Layers are composited from low to high order.
    pub order: i32,
    pub dirty: bool,
}

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLayerComponent(pub Entity);

/// Last rendering of a layer.
#[derive(Component, Debug, Clone, Default)]
pub struct LayerBitmap(pub Option<Bitmap>);

/// Entities marked hidden are skipped when their layer is drawn.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct HiddenComponent;

/// The layers every map has.
#[derive(Resource, Debug, Clone, Copy)]
pub struct MapLayers {
    pub basemap: Entity,
    pub fragments: Entity,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct RenderedFrame {
    pub bitmap: Option<Bitmap>,
    /// Number of frames composited so far.
    pub frame: u64,
}

pub fn spawn_layer(world: &mut World, name: &str, order: i32) -> Entity {
    world
        .spawn((
            Name::new(format!("layer_{name}")),
            LayerComponent {
                name: name.to_string(),
                order,
                dirty: true,
            },
            LayerBitmap::default(),
        ))
        .id()
}

pub fn mark_layer_dirty(world: &mut World, layer: Entity) {
    if let Some(mut component) = world.get_mut::<LayerComponent>(layer) {
        component.dirty = true;
    }
}

/// Marks layers dirty after a viewport change, a despawned child or a child
/// whose placement changed.
pub fn layer_dirty_tracking_system(
    viewport: Res<Viewport>,
    mut layers: Query<&mut LayerComponent>,
    changed: Query<
        &ParentLayerComponent,
        Or<(
            Changed<ParentLayerComponent>,
            Changed<ScreenOrigin>,
            Changed<ScreenDimension>,
            Changed<ScreenGeometryComponent>,
            Changed<RendererComponent>,
        )>,
    >,
    mut removed: RemovedComponents<ParentLayerComponent>,
) {
    if viewport.is_changed() || removed.read().count() > 0 {
        for mut layer in &mut layers {
            layer.dirty = true;
        }
        return;
    }
    for parent in &changed {
        if let Ok(mut layer) = layers.get_mut(parent.0) {
            layer.dirty = true;
        }
    }
}

pub fn layers_rendering_system(
    mut layers: Query<(Entity, &mut LayerComponent, &mut LayerBitmap)>,
    children: Query<
        (EntityRef, &ParentLayerComponent, &RendererComponent),
        (Without<LayerComponent>, Without<HiddenComponent>),
    >,
    viewport: Res<Viewport>,
    canvas: Res<Canvas>,
    mut frame: ResMut<RenderedFrame>,
) -> Result<(), MapError> {
    let helper = RenderHelper::new(&viewport);
    let (width, height) = (viewport.size.x.max(1.0) as u32, viewport.size.y.max(1.0) as u32);

    let mut redrawn = 0;
    for (layer_entity, mut layer, mut bitmap) in &mut layers {
        if !layer.dirty && bitmap.0.is_some() {
            continue;
        }
        let mut drawn: Vec<_> = children
            .iter()
            .filter(|(_, parent, _)| parent.0 == layer_entity)
            .collect();
        drawn.sort_by_key(|(entity, ..)| entity.id());

        let mut surface = canvas.create_surface(width, height);
        for (entity, _, renderer) in drawn {
            surface.save();
            renderer.0.render(entity, surface.as_mut(), &helper);
            surface.restore();
        }
        bitmap.0 = Some(take_snapshot(surface.as_ref(), "layers_rendering_system")?);
        layer.dirty = false;
        redrawn += 1;
    }
    if redrawn == 0 && frame.bitmap.is_some() {
        return Ok(());
    }

    let mut ordered: Vec<_> = layers.iter().map(|(_, layer, bitmap)| (layer.order, bitmap)).collect();
    ordered.sort_by_key(|(order, _)| *order);

    let mut surface = canvas.create_surface(width, height);
    surface.clear(Color::TRANSPARENT);
    for (_, bitmap) in ordered {
        if let Some(bitmap) = &bitmap.0 {
            surface.draw_bitmap(bitmap, 0.0, 0.0, f64::from(width), f64::from(height));
        }
    }
    frame.bitmap = Some(take_snapshot(surface.as_ref(), "layers_rendering_system")?);
    frame.frame += 1;
    trace!("Composited frame {} ({redrawn} layers redrawn)", frame.frame);
    Ok(())
}

fn take_snapshot(surface: &dyn crate::canvas::DrawSurface, system: &'static str) -> Result<Bitmap, MapError> {
    match surface.snapshot().poll() {
        Some(result) => result,
        None => Err(MapError::System {
            system,
            reason: "surface snapshot is not ready within the tick".into(),
        }),
    }
}
