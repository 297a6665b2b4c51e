use bevy::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub enable_camera: bool,
    pub enable_pan: bool,
    pub enable_zoom: bool,
    // Fractional zoom steps are allowed, the cell grid uses the integer part.
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            enable_camera: true,
            enable_pan: true,
            enable_zoom: true,
            min_zoom: 1.0,
            max_zoom: 15.0,
        }
    }
}
