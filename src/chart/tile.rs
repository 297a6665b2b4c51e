use bevy::ecs::world::EntityRef;

use crate::canvas::DrawSurface;
use crate::chart::Renderer;
use crate::placement::{ScreenDimension, ScreenOrigin};
use crate::tile_map::{Tile, TileComponent};
use crate::viewport::RenderHelper;

/// Draws a tile snapshot, or the donor region shown until the snapshot exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileRenderer;

impl Renderer for TileRenderer {
    fn render(&self, entity: EntityRef, surface: &mut dyn DrawSurface, _: &RenderHelper) {
        let (Some(tile), Some(origin), Some(dimension)) = (
            entity.get::<TileComponent>(),
            entity.get::<ScreenOrigin>(),
            entity.get::<ScreenDimension>(),
        ) else {
            return;
        };
        let bitmap = match &tile.0 {
            Tile::Empty => return,
            Tile::Snapshot(bitmap) | Tile::SubTile { bitmap, .. } => bitmap,
        };
        surface.draw_bitmap(bitmap, origin.0.x, origin.0.y, dimension.0.x, dimension.0.y);
    }
}
