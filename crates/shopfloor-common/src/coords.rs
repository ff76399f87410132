//! Position type for the shop floor.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// World position in metres. `y` is up; the shop floor is the `x`/`z` plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPos {
    /// X coordinate in world space
    pub x: f32,
    /// Y coordinate in world space (height)
    pub y: f32,
    /// Z coordinate in world space
    pub z: f32,
}

impl WorldPos {
    /// The world origin.
    pub const ORIGIN: Self = Self::new(0.0, 0.0, 0.0);

    /// Creates a new world position.
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Creates a position on the floor plane.
    #[must_use]
    pub const fn floor(x: f32, z: f32) -> Self {
        Self::new(x, 0.0, z)
    }

    /// Converts to a glam vector.
    #[must_use]
    pub const fn to_vec3(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        self.to_vec3().distance(other.to_vec3())
    }

    /// Squared distance to another position.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        self.to_vec3().distance_squared(other.to_vec3())
    }

    /// Returns true if `other` is within `tolerance` metres.
    #[must_use]
    pub fn is_near(self, other: Self, tolerance: f32) -> bool {
        self.distance_squared(other) <= tolerance * tolerance
    }

    /// Moves towards `target` by at most `max_step`, never overshooting.
    #[must_use]
    pub fn move_towards(self, target: Self, max_step: f32) -> Self {
        let from = self.to_vec3();
        let delta = target.to_vec3() - from;
        let len = delta.length();
        if len <= max_step || len < f32::EPSILON {
            target
        } else {
            Self::from(from + delta / len * max_step)
        }
    }
}

impl From<Vec3> for WorldPos {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<WorldPos> for Vec3 {
    fn from(p: WorldPos) -> Self {
        p.to_vec3()
    }
}
