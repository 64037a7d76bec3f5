//! Camera and per-frame camera state

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Quat, Vec3, Vec4};
use crate::math::{Aabb, Rect};

/// Camera with position, rotation, and projection parameters
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.01,
            far: 1000.0,
        }
    }

    /// Create camera looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut camera = Self::new(position, 60.0, 16.0 / 9.0);
        camera.point_at(target, up);
        camera
    }

    /// Rotate in place to face `target`
    pub fn point_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        self.rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
    }

    /// Place the camera on a sphere around `target` and face it.
    /// `yaw` and `pitch` are in radians.
    pub fn orbit(&mut self, target: Vec3, radius: f32, yaw: f32, pitch: f32) {
        let offset = Vec3::new(
            yaw.sin() * pitch.cos(),
            pitch.sin(),
            yaw.cos() * pitch.cos(),
        ) * radius;
        self.position = target + offset;
        self.point_at(target, Vec3::Y);
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> Mat4 {
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    /// Get projection matrix (camera to clip space)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Update aspect ratio (call on window resize)
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        self.aspect = width / height;
    }

    /// Snapshot of the matrices for one frame
    pub fn state(&self, viewport: Rect) -> CameraState {
        CameraState {
            modelview: self.view_matrix(),
            projection: self.projection_matrix(),
            viewport,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

/// Camera matrices and viewport, copied into every render event
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub modelview: Mat4,
    pub projection: Mat4,
    pub viewport: Rect,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            modelview: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            viewport: Rect::default(),
        }
    }
}

impl CameraState {
    /// Eye position in object space
    pub fn eye_position(&self) -> Vec3 {
        self.modelview.inverse().transform_point3(Vec3::ZERO)
    }

    /// Project an object-space point into window coordinates.
    /// Returns `None` for points behind the eye.
    pub fn project(&self, point: Vec3) -> Option<Vec3> {
        let clip = self.projection * self.modelview * Vec4::new(point.x, point.y, point.z, 1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let vp = self.viewport;
        Some(Vec3::new(
            vp.x as f32 + (ndc.x + 1.0) * 0.5 * vp.width as f32,
            vp.y as f32 + (ndc.y + 1.0) * 0.5 * vp.height as f32,
            (ndc.z + 1.0) * 0.5,
        ))
    }

    /// Screen rectangle covering the projection of `aabb`.
    ///
    /// Boxes reaching behind the eye cover the whole viewport.
    pub fn bounding_rect(&self, aabb: &Aabb) -> Rect {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for corner in aabb.corners() {
            match self.project(corner) {
                Some(p) => {
                    min = min.min(p);
                    max = max.max(p);
                }
                None => return self.viewport,
            }
        }
        Rect::from_corners(
            min.x.floor() as i32,
            min.y.floor() as i32,
            max.x.ceil() as i32,
            max.y.ceil() as i32,
        )
    }
}
