pub mod camera_config;
pub mod camera_helper;
pub mod camera_system;

pub use camera_config::CameraConfig;
pub use camera_helper::CameraInput;
pub use camera_system::CameraSystemPlugin;
