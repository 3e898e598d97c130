mod native;

use glam::{Mat4, Vec3};

pub use native::Renderer;

/// Camera parameters consumed by the renderer's uniform buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraParams {
    pub view_proj: Mat4,
    pub position: Vec3,
}

/// Lighting state consumed by the renderer's uniform buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct LightParams {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Uniform term added to every surface; zero turns ambient light off.
    pub ambient: f32,
}
