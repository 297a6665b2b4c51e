//! Immediate-mode 2D drawing surface, bitmaps and the async handle used for
//! snapshots and fetches.

pub mod async_value;
pub mod raqote_surface;

use std::io::Cursor;
use std::sync::Arc;

use bevy::prelude::*;
use image::{ImageReader, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::MapError;

pub use async_value::{Async, AsyncSender};
pub use raqote_surface::{RaqoteCanvasProvider, RaqoteSurface};

/// Straight (not premultiplied) RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, alpha: f64) -> Self {
        Self {
            a: (f64::from(self.a) * alpha.clamp(0.0, 1.0)).round() as u8,
            ..self
        }
    }

    /// Packs into raqote's premultiplied `0xAARRGGBB`.
    pub fn to_premultiplied_argb(self) -> u32 {
        let premultiply = |c: u8| (u32::from(c) * u32::from(self.a) + 127) / 255;
        (u32::from(self.a) << 24)
            | (premultiply(self.r) << 16)
            | (premultiply(self.g) << 8)
            | premultiply(self.b)
    }

    pub fn from_premultiplied_argb(pixel: u32) -> Self {
        let a = (pixel >> 24) as u8;
        let unpremultiply = |c: u32| {
            if a == 0 {
                0
            } else {
                ((c * 255 + u32::from(a) / 2) / u32::from(a)).min(255) as u8
            }
        };
        Self {
            r: unpremultiply((pixel >> 16) & 0xff),
            g: unpremultiply((pixel >> 8) & 0xff),
            b: unpremultiply(pixel & 0xff),
            a,
        }
    }
}

/// Immutable image in premultiplied ARGB, cheap to clone.
#[derive(Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u32]>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Bitmap {
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let pixel = color.to_premultiplied_argb();
        Self {
            width,
            height,
            pixels: vec![pixel; (width * height) as usize].into(),
        }
    }

    /// Decodes PNG or JPEG bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, MapError> {
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?;
        Ok(Self::from_rgba_image(&image.to_rgba8()))
    }

    pub fn from_rgba_image(image: &RgbaImage) -> Self {
        let pixels: Vec<u32> = image
            .pixels()
            .map(|p| Color::rgba(p[0], p[1], p[2], p[3]).to_premultiplied_argb())
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels: pixels.into(),
        }
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage, MapError> {
        let mut raw = Vec::with_capacity(self.pixels.len() * 4);
        for &pixel in self.pixels.iter() {
            let c = Color::from_premultiplied_argb(pixel);
            raw.extend_from_slice(&[c.r, c.g, c.b, c.a]);
        }
        RgbaImage::from_raw(self.width, self.height, raw)
            .ok_or_else(|| MapError::Image("pixel buffer does not match bitmap size".to_string()))
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get((y * self.width + x) as usize)
            .map(|&p| Color::from_premultiplied_argb(p))
    }

    /// Copies a sub-rectangle, clamped to the bitmap bounds.
    pub fn sub_region(&self, x: u32, y: u32, width: u32, height: u32) -> Bitmap {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for row in y..y + height {
            let start = (row * self.width + x) as usize;
            pixels.extend_from_slice(&self.pixels[start..start + width as usize]);
        }
        Bitmap {
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

/// 2D immediate-mode drawing context. Coordinates are client pixels.
///
/// There is no text support; none of the engine renderers draw text.
pub trait DrawSurface: Send + Sync {
    fn size(&self) -> (u32, u32);

    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, x: f64, y: f64);
    fn scale(&mut self, sx: f64, sy: f64);
    fn rotate(&mut self, angle: f64);

    fn begin_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    fn arc(&mut self, x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, anticlockwise: bool);
    fn close_path(&mut self);

    fn set_fill_style(&mut self, color: Color);
    fn set_stroke_style(&mut self, color: Color);
    fn set_line_width(&mut self, width: f64);
    fn set_line_dash(&mut self, dash: &[f64]);
    fn set_global_alpha(&mut self, alpha: f64);

    fn fill(&mut self);
    fn stroke(&mut self);
    fn clip_rect(&mut self, x: f64, y: f64, width: f64, height: f64);
    fn clear(&mut self, color: Color);

    fn draw_bitmap(&mut self, bitmap: &Bitmap, x: f64, y: f64, width: f64, height: f64);

    fn snapshot(&self) -> Async<Bitmap>;

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.begin_path();
        self.move_to(x, y);
        self.line_to(x + width, y);
        self.line_to(x + width, y + height);
        self.line_to(x, y + height);
        self.close_path();
        self.fill();
    }
}

pub trait CanvasProvider: Send + Sync {
    fn create_surface(&self, width: u32, height: u32) -> Box<dyn DrawSurface>;

    fn decode_bitmap(&self, bytes: &[u8]) -> Async<Bitmap> {
        Async::from_result(Bitmap::decode(bytes))
    }
}

#[derive(Resource, Clone)]
pub struct Canvas(pub Arc<dyn CanvasProvider>);

impl Default for Canvas {
    fn default() -> Self {
        Self(Arc::new(RaqoteCanvasProvider))
    }
}

impl Canvas {
    pub fn create_surface(&self, width: u32, height: u32) -> Box<dyn DrawSurface> {
        self.0.create_surface(width, height)
    }
}
