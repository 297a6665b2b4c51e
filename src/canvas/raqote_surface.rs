use std::f64::consts::TAU;

use bevy::math::{DAffine2, DVec2};
use raqote::{
    AntialiasMode, BlendMode, DrawOptions, DrawTarget, Image, LineCap, LineJoin, Path,
    PathBuilder, SolidSource, Source, StrokeStyle,
};

use crate::canvas::{Async, Bitmap, CanvasProvider, Color, DrawSurface};

#[derive(Debug, Clone, Copy)]
enum PathOp {
    MoveTo(DVec2),
    LineTo(DVec2),
    Close,
}

#[derive(Debug, Clone)]
struct SurfaceState {
    transform: DAffine2,
    fill: Color,
    stroke: Color,
    line_width: f64,
    dash: Vec<f64>,
    alpha: f64,
    clip: Option<[DVec2; 4]>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            transform: DAffine2::IDENTITY,
            fill: Color::BLACK,
            stroke: Color::BLACK,
            line_width: 1.0,
            dash: Vec::new(),
            alpha: 1.0,
            clip: None,
        }
    }
}

/// Software surface rasterized by raqote into an owned premultiplied ARGB buffer.
///
/// The current transform is applied while the path is built, so the raqote
/// target itself always draws with the identity transform.
pub struct RaqoteSurface {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
    state: SurfaceState,
    saved: Vec<SurfaceState>,
    path: Vec<PathOp>,
    cursor: Option<DVec2>,
}

impl RaqoteSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
            state: SurfaceState::default(),
            saved: Vec::new(),
            path: Vec::new(),
            cursor: None,
        }
    }

    pub fn bitmap(&self) -> Bitmap {
        Bitmap {
            width: self.width,
            height: self.height,
            pixels: self.pixels.clone().into(),
        }
    }

    fn build_path(&self) -> Path {
        let mut pb = PathBuilder::new();
        for op in &self.path {
            match *op {
                PathOp::MoveTo(p) => pb.move_to(p.x as f32, p.y as f32),
                PathOp::LineTo(p) => pb.line_to(p.x as f32, p.y as f32),
                PathOp::Close => pb.close(),
            }
        }
        pb.finish()
    }

    fn clip_path(&self) -> Option<Path> {
        let corners = self.state.clip?;
        let mut pb = PathBuilder::new();
        pb.move_to(corners[0].x as f32, corners[0].y as f32);
        for corner in &corners[1..] {
            pb.line_to(corner.x as f32, corner.y as f32);
        }
        pb.close();
        Some(pb.finish())
    }

    fn options(&self) -> DrawOptions {
        DrawOptions {
            antialias: AntialiasMode::Gray,
            blend_mode: BlendMode::SrcOver,
            alpha: self.state.alpha as f32,
        }
    }

    fn with_target(&mut self, draw: impl FnOnce(&mut DrawTarget<&mut [u32]>)) {
        let clip = self.clip_path();
        let mut dt = DrawTarget::from_backing(self.width as i32, self.height as i32, &mut self.pixels[..]);
        if let Some(clip) = &clip {
            dt.push_clip(clip);
        }
        draw(&mut dt);
        if clip.is_some() {
            dt.pop_clip();
        }
    }

    fn transform_scale(&self) -> f64 {
        self.state.transform.matrix2.determinant().abs().sqrt()
    }

    fn push_point(&mut self, p: DVec2, connect: bool) {
        let p = self.state.transform.transform_point2(p);
        if connect && self.cursor.is_some() {
            self.path.push(PathOp::LineTo(p));
        } else {
            self.path.push(PathOp::MoveTo(p));
        }
        self.cursor = Some(p);
    }
}

fn solid(color: Color) -> Source<'static> {
    let argb = color.to_premultiplied_argb();
    Source::Solid(SolidSource {
        r: (argb >> 16) as u8,
        g: (argb >> 8) as u8,
        b: argb as u8,
        a: (argb >> 24) as u8,
    })
}

impl DrawSurface for RaqoteSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn save(&mut self) {
        self.saved.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.state = state;
        }
    }

    fn translate(&mut self, x: f64, y: f64) {
        self.state.transform = self.state.transform * DAffine2::from_translation(DVec2::new(x, y));
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        self.state.transform = self.state.transform * DAffine2::from_scale(DVec2::new(sx, sy));
    }

    fn rotate(&mut self, angle: f64) {
        self.state.transform = self.state.transform * DAffine2::from_angle(angle);
    }

    fn begin_path(&mut self) {
        self.path.clear();
        self.cursor = None;
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.push_point(DVec2::new(x, y), false);
    }

    fn line_to(&mut self, x: f64, y: f64) {
        self.push_point(DVec2::new(x, y), true);
    }

    fn arc(&mut self, x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, anticlockwise: bool) {
        let mut sweep = end_angle - start_angle;
        if anticlockwise {
            if sweep > 0.0 {
                sweep -= TAU * (sweep / TAU).ceil().max(1.0);
            }
            sweep = sweep.max(-TAU);
        } else {
            if sweep < 0.0 {
                sweep += TAU * (-sweep / TAU).ceil().max(1.0);
            }
            sweep = sweep.min(TAU);
        }
        let pixels = radius * sweep.abs() * self.transform_scale();
        let segments = (pixels / 2.0).ceil().clamp(8.0, 256.0) as usize;
        for i in 0..=segments {
            let angle = start_angle + sweep * i as f64 / segments as f64;
            let point = DVec2::new(x + radius * angle.cos(), y + radius * angle.sin());
            self.push_point(point, true);
        }
    }

    fn close_path(&mut self) {
        self.path.push(PathOp::Close);
    }

    fn set_fill_style(&mut self, color: Color) {
        self.state.fill = color;
    }

    fn set_stroke_style(&mut self, color: Color) {
        self.state.stroke = color;
    }

    fn set_line_width(&mut self, width: f64) {
        self.state.line_width = width;
    }

    fn set_line_dash(&mut self, dash: &[f64]) {
        self.state.dash = dash.to_vec();
    }

    fn set_global_alpha(&mut self, alpha: f64) {
        self.state.alpha = alpha.clamp(0.0, 1.0);
    }

    fn fill(&mut self) {
        if self.path.is_empty() {
            return;
        }
        let path = self.build_path();
        let source = solid(self.state.fill);
        let options = self.options();
        self.with_target(|dt| dt.fill(&path, &source, &options));
    }

    fn stroke(&mut self) {
        if self.path.is_empty() {
            return;
        }
        let path = self.build_path();
        let source = solid(self.state.stroke);
        let scale = self.transform_scale();
        let style = StrokeStyle {
            cap: LineCap::Round,
            join: LineJoin::Round,
            width: (self.state.line_width * scale) as f32,
            miter_limit: 10.0,
            dash_array: self.state.dash.iter().map(|d| (d * scale) as f32).collect(),
            dash_offset: 0.0,
        };
        let options = self.options();
        self.with_target(|dt| dt.stroke(&path, &source, &style, &options));
    }

    fn clip_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let t = self.state.transform;
        self.state.clip = Some([
            t.transform_point2(DVec2::new(x, y)),
            t.transform_point2(DVec2::new(x + width, y)),
            t.transform_point2(DVec2::new(x + width, y + height)),
            t.transform_point2(DVec2::new(x, y + height)),
        ]);
    }

    fn clear(&mut self, color: Color) {
        self.pixels.fill(color.to_premultiplied_argb());
    }

    fn draw_bitmap(&mut self, bitmap: &Bitmap, x: f64, y: f64, width: f64, height: f64) {
        if bitmap.width == 0 || bitmap.height == 0 {
            return;
        }
        // Rotation is not supported for bitmaps; the transformed box is used.
        let t = self.state.transform;
        let a = t.transform_point2(DVec2::new(x, y));
        let b = t.transform_point2(DVec2::new(x + width, y + height));
        let min = a.min(b);
        let size = (a - b).abs();
        let image = Image {
            width: bitmap.width as i32,
            height: bitmap.height as i32,
            data: &bitmap.pixels[..],
        };
        let options = self.options();
        self.with_target(|dt| {
            dt.draw_image_with_size_at(
                min.x as f32,
                min.y as f32,
                size.x as f32,
                size.y as f32,
                &image,
                &options,
            )
        });
    }

    fn snapshot(&self) -> Async<Bitmap> {
        Async::ready(self.bitmap())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RaqoteCanvasProvider;

impl CanvasProvider for RaqoteCanvasProvider {
    fn create_surface(&self, width: u32, height: u32) -> Box<dyn DrawSurface> {
        Box::new(RaqoteSurface::new(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_paints_inside_only() {
        let mut surface = RaqoteSurface::new(10, 10);
        surface.set_fill_style(Color::rgb(0, 0, 255));
        surface.translate(2.0, 2.0);
        surface.fill_rect(0.0, 0.0, 4.0, 4.0);

        let bitmap = surface.bitmap();
        assert_eq!(bitmap.pixel(3, 3), Some(Color::rgb(0, 0, 255)));
        assert_eq!(bitmap.pixel(8, 8), Some(Color::TRANSPARENT));
    }

    #[test]
    fn restore_undoes_transform() {
        let mut surface = RaqoteSurface::new(10, 10);
        surface.save();
        surface.translate(100.0, 100.0);
        surface.restore();
        surface.set_fill_style(Color::WHITE);
        surface.fill_rect(0.0, 0.0, 2.0, 2.0);
        assert_eq!(surface.bitmap().pixel(1, 1), Some(Color::WHITE));
    }

    #[test]
    fn clip_limits_drawing() {
        let mut surface = RaqoteSurface::new(10, 10);
        surface.clip_rect(0.0, 0.0, 5.0, 10.0);
        surface.set_fill_style(Color::WHITE);
        surface.fill_rect(0.0, 0.0, 10.0, 10.0);
        let bitmap = surface.bitmap();
        assert_eq!(bitmap.pixel(2, 5), Some(Color::WHITE));
        assert_eq!(bitmap.pixel(7, 5), Some(Color::TRANSPARENT));
    }

    #[test]
    fn bitmap_is_blitted_scaled() {
        let tile = Bitmap::filled(2, 2, Color::rgb(0, 255, 0));
        let mut surface = RaqoteSurface::new(8, 8);
        surface.draw_bitmap(&tile, 0.0, 0.0, 4.0, 4.0);
        let bitmap = surface.bitmap();
        let inside = bitmap.pixel(1, 1).unwrap();
        assert!(inside.g > 240 && inside.a > 240, "{inside:?}");
        assert_eq!(bitmap.pixel(6, 6), Some(Color::TRANSPARENT));
    }
}
