use glam::{Affine2, Vec2};
use serde::{Deserialize, Serialize};

/// Local 2D placement of an entity: position, rotation in degrees, scale
/// and the origin the rotation and scale are applied around.
///
/// Parent/child links are not stored here; they live in the entity
/// manager (see [`EntityManager::set_parent`](crate::ecs::EntityManager::set_parent)),
/// so copying or overwriting a `Transform` never corrupts the tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
    pub origin: Vec2,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            rotation: 0.0,
            scale: Vec2::ONE,
            origin: Vec2::ZERO,
        }
    }
}

impl Transform {
    pub fn from_xy(x: f32, y: f32) -> Self {
        Self::from_position(Vec2::new(x, y))
    }

    pub fn from_position(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_origin(mut self, origin: Vec2) -> Self {
        self.origin = origin;
        self
    }

    pub fn translate(&mut self, offset: Vec2) {
        self.position += offset;
    }

    pub fn rotate(&mut self, degrees: f32) {
        self.rotation = (self.rotation + degrees).rem_euclid(360.0);
    }

    /// Local-to-parent matrix: move the origin to zero, scale, rotate, then
    /// translate to `position`.
    pub fn local_matrix(&self) -> Affine2 {
        Affine2::from_scale_angle_translation(self.scale, self.rotation.to_radians(), self.position)
            * Affine2::from_translation(-self.origin)
    }
}
