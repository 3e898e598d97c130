//! Free-flying camera driven by WASD and mouse motion.

use std::f32::consts::FRAC_PI_2;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::input::{InputState, KeyCode};
use crate::render::CameraParams;

const LOOK_SPEED: f32 = 0.002;
const MOVE_STEP: f32 = 0.2;
const FOV_DEGREES: f32 = 75.0;
const NEAR: f32 = 0.1;
const FAR: f32 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FreeCamera {
    pub position: Vec3,
    /// Rotation about the world Y axis, radians.
    pub yaw: f32,
    /// Rotation about the camera X axis, radians, within `±π/2`.
    pub pitch: f32,
}

impl Default for FreeCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 5.0, 20.0),
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

impl FreeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }

    /// Unit vector the camera looks along.
    pub fn direction(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }

    /// View direction projected onto the ground plane.
    pub fn forward(&self) -> Vec3 {
        let mut forward = self.direction();
        forward.y = 0.0;
        forward.try_normalize().unwrap_or_else(|| {
            Vec3::new(-self.yaw.sin(), 0.0, -self.yaw.cos())
        })
    }

    /// Points to the camera's left; `A` moves along it, `D` against it.
    pub fn lateral(&self) -> Vec3 {
        Vec3::Y.cross(self.forward()).normalize_or_zero()
    }

    pub fn look(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * LOOK_SPEED;
        self.pitch = (self.pitch - dy * LOOK_SPEED).clamp(-FRAC_PI_2, FRAC_PI_2);
    }

    /// Turns the camera toward `target`. A target at the camera position is ignored.
    pub fn look_at(&mut self, target: Vec3) {
        let Some(direction) = (target - self.position).try_normalize() else {
            return;
        };
        self.pitch = direction.y.clamp(-1.0, 1.0).asin();
        self.yaw = (-direction.x).atan2(-direction.z);
    }

    /// Applies one frame of input: mouse look while the pointer is locked and
    /// a fixed step per held movement key.
    pub fn update(&mut self, input: &mut InputState) {
        let delta = input.take_mouse_delta();
        if delta != glam::Vec2::ZERO {
            self.look(delta.x, delta.y);
        }

        let forward = self.forward();
        let lateral = self.lateral();
        let bindings = [
            ('W', forward),
            ('S', -forward),
            ('A', lateral),
            ('D', -lateral),
        ];
        for (key, step) in bindings {
            if input.is_key_down(KeyCode::Character(key)) {
                self.position += step * MOVE_STEP;
            }
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation(), self.position).inverse()
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(FOV_DEGREES.to_radians(), aspect.max(0.01), NEAR, FAR)
    }

    pub fn params(&self, aspect: f32) -> CameraParams {
        CameraParams {
            view_proj: self.projection(aspect) * self.view(),
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn starts_looking_down_negative_z() {
        let camera = FreeCamera::new();
        assert_eq!(camera.position, Vec3::new(0.0, 5.0, 20.0));
        assert!(close(camera.direction(), Vec3::NEG_Z));
        assert!(close(camera.lateral(), Vec3::NEG_X));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = FreeCamera::new();
        camera.look(0.0, -10_000.0);
        assert_eq!(camera.pitch, FRAC_PI_2);
        camera.look(0.0, 10_000.0);
        assert_eq!(camera.pitch, -FRAC_PI_2);
        camera.look(100.0, 0.0);
        assert!((camera.yaw + 0.2).abs() < 1e-6);
    }

    #[test]
    fn movement_stays_on_the_ground_plane() {
        let mut camera = FreeCamera::new();
        camera.pitch = 1.0;
        let mut input = InputState::new();
        input.set_key_down(KeyCode::Character('W'));
        camera.update(&mut input);
        assert!(close(camera.position, Vec3::new(0.0, 5.0, 19.8)));

        input.set_key_up(KeyCode::Character('W'));
        input.set_key_down(KeyCode::Character('D'));
        camera.update(&mut input);
        assert!(close(camera.position, Vec3::new(0.2, 5.0, 19.8)));
    }

    #[test]
    fn mouse_motion_turns_only_while_locked() {
        let mut camera = FreeCamera::new();
        let mut input = InputState::new();
        input.add_mouse_motion(50.0, 0.0);
        camera.update(&mut input);
        assert_eq!(camera.yaw, 0.0);

        input.set_pointer_locked(true);
        input.add_mouse_motion(50.0, 25.0);
        camera.update(&mut input);
        assert!((camera.yaw + 0.1).abs() < 1e-6);
        assert!((camera.pitch + 0.05).abs() < 1e-6);
    }

    #[test]
    fn look_at_points_the_camera() {
        let mut camera = FreeCamera::new();
        camera.position = Vec3::new(1.0, 2.0, 8.0);
        camera.look_at(Vec3::new(1.0, 2.0, 3.0));
        assert!(close(camera.direction(), Vec3::NEG_Z));

        camera.look_at(Vec3::new(6.0, 2.0, 8.0));
        assert!(close(camera.direction(), Vec3::X));

        let target = Vec3::new(0.0, 0.0, 0.0);
        camera.look_at(target);
        let clip = camera.params(1.0).view_proj.project_point3(target);
        assert!(clip.x.abs() < 1e-4 && clip.y.abs() < 1e-4);
    }
}
