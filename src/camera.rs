use glam::{Mat4, Vec3};

/// A simple perspective camera for scene collaborators.
///
/// The pipeline itself never moves the camera; scenes use it to turn
/// [`SceneView::Camera`](crate::SceneView::Camera) into a view-projection.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub fov: f32, // radians
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2, // 90 degrees
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the camera to `(x, y, z)` without changing its heading.
    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    /// Points the camera at a world position. Call after [`at`](Self::at).
    pub fn looking_at(mut self, target_x: f32, target_y: f32, target_z: f32) -> Self {
        self.forward = (Vec3::new(target_x, target_y, target_z) - self.position).normalize_or_zero();
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    /// Right-handed perspective times [`view`](Self::view), for an
    /// `aspect` of width over height.
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far) * self.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_at_normalizes_forward() {
        let cam = Camera::new().at(0.0, 0.0, 10.0).looking_at(0.0, 0.0, 0.0);
        assert!((cam.forward - Vec3::NEG_Z).length() < 1e-6);
    }

    #[test]
    fn point_in_front_projects_inside_clip_space() {
        let cam = Camera::new();
        let clip = cam.view_projection(1.0) * Vec3::new(0.0, 0.0, 0.0).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&ndc.z));
    }
}
