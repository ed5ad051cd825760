//! The scene seam: the one capability the pipeline needs from the scene graph.

use glam::{Mat4, Vec3};

use crate::device::{Bound, Device};
use crate::error::ResourceError;

/// A directional light the shadow pass looks along.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels (from the light toward the scene).
    pub direction: Vec3,
    /// World-space point the shadow frustum is centred on.
    pub target: Vec3,
}

impl DirectionalLight {
    pub fn new(direction: Vec3, target: Vec3) -> Self {
        Self { direction, target }
    }

    /// Orthographic light view-projection covering `±scale` around the
    /// target and `view_depth` along the light direction.
    pub fn view_projection(&self, scale: f32, view_depth: f32) -> Mat4 {
        let dir = self.direction.normalize_or(Vec3::NEG_Y);
        let eye = self.target - dir * (view_depth * 0.5);
        // Looking straight up or down makes Y a degenerate up vector.
        let up = if dir.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(eye, dir, up);
        let proj = Mat4::orthographic_rh(-scale, scale, -scale, scale, 0.0, view_depth);
        proj * view
    }
}

/// Which viewpoint the scene should render from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SceneView {
    /// The scene's own camera, at the given target aspect ratio.
    Camera { aspect: f32 },
    /// A light's orthographic view, for depth-only shadow rendering.
    Light { view_projection: Mat4 },
}

/// Shadow information handed to the scene while it draws the main view.
pub struct ShadowContext<'a, T> {
    pub map: &'a T,
    pub light_view_projection: Mat4,
}

/// A scene that can render itself into the currently bound target.
pub trait Scene<D: Device> {
    fn draw(
        &mut self,
        target: &mut Bound<'_, D>,
        view: &SceneView,
        shadow: Option<ShadowContext<'_, D::Target>>,
    ) -> Result<(), ResourceError>;

    /// The light used for shadow mapping, if the scene has one.
    fn light(&self) -> Option<DirectionalLight> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_target_lands_mid_depth() {
        let light = DirectionalLight::new(Vec3::new(1.0, -1.0, 0.0), Vec3::ZERO);
        let clip = light.view_projection(10.0, 50.0) * Vec3::ZERO.extend(1.0);
        assert!(clip.x.abs() < 1e-4 && clip.y.abs() < 1e-4);
        assert!((clip.z - 0.5).abs() < 1e-4);
    }

    #[test]
    fn vertical_light_is_not_degenerate() {
        let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ZERO);
        let m = light.view_projection(5.0, 20.0);
        assert!(m.is_finite());
        let edge = m * Vec3::new(5.0, 0.0, 0.0).extend(1.0);
        assert!((edge.x.abs() - 1.0).abs() < 1e-4 || (edge.y.abs() - 1.0).abs() < 1e-4);
    }
}
