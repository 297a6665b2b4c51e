#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use bevy::prelude::*;
use bevy_live_map::{LiveMapConfig, LiveMapPlugin, ManualTimeSource};
use image::{ImageFormat, Rgba, RgbaImage};

/// 256×256 client area centered on lon/lat (0, 0).
pub fn config(zoom: f64) -> LiveMapConfig {
    LiveMapConfig {
        viewport_size: (256, 256),
        initial_zoom: zoom,
        initial_center: (0.0, 0.0),
        min_zoom: 1,
        ..default()
    }
}

/// Headless map on a clock that never moves, so the scheduler budget is never exhausted.
pub fn headless(plugin: LiveMapPlugin) -> App {
    let mut app = App::new();
    app.add_plugins(plugin.with_clock(Arc::new(ManualTimeSource::default())));
    app
}

pub fn png(color: [u8; 4], size: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(size, size, Rgba(color));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Updates the app until `done` holds, at most `limit` times.
pub fn run_until(app: &mut App, limit: usize, done: impl Fn(&mut World) -> bool) -> bool {
    for _ in 0..limit {
        app.update();
        if done(app.world_mut()) {
            return true;
        }
    }
    false
}

fn varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Length-delimited protobuf field.
fn message(out: &mut Vec<u8>, field: u64, body: &[u8]) {
    varint(out, field << 3 | 2);
    varint(out, body.len() as u64);
    out.extend_from_slice(body);
}

/// Vector tile with a single layer holding one square polygon over the middle
/// half of the tile (extent 4096, so 1024..3072 on both axes).
pub fn mvt_square(layer: &str) -> Vec<u8> {
    let mut geometry = Vec::new();
    for value in [
        1 << 3 | 1, // MoveTo
        zigzag(1024),
        zigzag(1024),
        3 << 3 | 2, // LineTo x3
        zigzag(2048),
        zigzag(0),
        zigzag(0),
        zigzag(2048),
        zigzag(-2048),
        zigzag(0),
        1 << 3 | 7, // ClosePath
    ] {
        varint(&mut geometry, value);
    }

    let mut feature = Vec::new();
    varint(&mut feature, 3 << 3);
    varint(&mut feature, 3); // polygon
    message(&mut feature, 4, &geometry);

    let mut body = Vec::new();
    message(&mut body, 1, layer.as_bytes());
    message(&mut body, 2, &feature);
    varint(&mut body, 5 << 3);
    varint(&mut body, 4096);
    varint(&mut body, 15 << 3);
    varint(&mut body, 2);

    let mut tile = Vec::new();
    message(&mut tile, 3, &body);
    tile
}
