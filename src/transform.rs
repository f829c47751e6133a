//! Rigid transforms between frames.
//!
//! Naming follows the monogram convention used throughout the crate: `X_AB` is the
//! pose of frame B measured in frame A, so `X_AB * X_BC == X_AC`.

use glam::{EulerRot, Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// A proper rigid transform: a rotation followed by a translation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    /// Orientation of the child frame in the parent frame.
    pub rotation: Quat,
    /// Position of the child origin in the parent frame.
    pub translation: Vec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
    };

    pub fn new(rotation: Quat, translation: Vec3) -> Self {
        Self {
            rotation: rotation.normalize(),
            translation,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            rotation: Quat::IDENTITY,
            translation,
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self::new(rotation, Vec3::ZERO)
    }

    /// Builds a transform from roll-pitch-yaw angles (radians), applied as
    /// `Rz(yaw) * Ry(pitch) * Rx(roll)`.
    pub fn from_rpy(roll: f32, pitch: f32, yaw: f32, translation: Vec3) -> Self {
        Self::new(Quat::from_euler(EulerRot::ZYX, yaw, pitch, roll), translation)
    }

    /// The rotation as a 3×3 matrix.
    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_quat(self.rotation)
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Maps a point expressed in the child frame into the parent frame.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    /// Rotates a free vector from the child frame into the parent frame.
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    /// Returns true if both transforms agree within `max_abs_diff`.
    ///
    /// Quaternions `q` and `-q` describe the same rotation and compare equal here.
    pub fn abs_diff_eq(&self, other: &Self, max_abs_diff: f32) -> bool {
        let same_rotation = self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
            || self.rotation.abs_diff_eq(-other.rotation, max_abs_diff);
        same_rotation
            && self
                .translation
                .abs_diff_eq(other.translation, max_abs_diff)
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: (self.rotation * rhs.rotation).normalize(),
            translation: self.translation + self.rotation * rhs.translation,
        }
    }
}
