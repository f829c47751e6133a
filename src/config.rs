//! Station configuration.

use crate::render::CameraProperties;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Station`](crate::Station).
///
/// Every field has a default, so a partial document deserializes into a complete
/// configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Discrete update period of the world and the interpolators, in seconds.
    pub time_step: f32,
    /// Uniform gravity applied to the world and the control model (m/s²).
    pub gravity: Vec3,
    pub manipulator: ManipulatorConfig,
    pub end_effector: EndEffectorConfig,
    /// Properties given to cameras registered without explicit ones.
    pub camera: CameraProperties,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            time_step: 0.002,
            gravity: Vec3::new(0.0, 0.0, -9.81),
            manipulator: ManipulatorConfig::default(),
            end_effector: EndEffectorConfig::default(),
            camera: CameraProperties::default(),
        }
    }
}

/// Default feedback gains for the manipulator, applied uniformly to every joint.
///
/// The derivative gain follows from critical damping, `kd = 2 * sqrt(kp)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManipulatorConfig {
    pub kp: f32,
    pub ki: f32,
}

impl Default for ManipulatorConfig {
    fn default() -> Self {
        Self { kp: 100.0, ki: 1.0 }
    }
}

/// Gripper controller settings.
///
/// `kp` and `kd` are the finger-separation command gains of a Schunk WSG
/// position controller (200 and 5); the finger-centering gains in
/// [`blocks`](crate::network::blocks) match its constraint gains. Override them
/// per station through
/// [`Station::set_end_effector_gains`](crate::Station::set_end_effector_gains).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EndEffectorConfig {
    pub kp: f32,
    pub kd: f32,
    /// Grip force limit (N) applied by
    /// [`Station::end_effector_command`](crate::Station::end_effector_command).
    pub force_limit: f32,
    /// Prismatic joint of the finger that moves toward negative travel when opening.
    pub left_finger_joint: String,
    /// Prismatic joint of the finger that moves toward positive travel when opening.
    pub right_finger_joint: String,
}

impl Default for EndEffectorConfig {
    fn default() -> Self {
        Self {
            kp: 200.0,
            kd: 5.0,
            force_limit: 40.0,
            left_finger_joint: "left_finger_sliding_joint".to_string(),
            right_finger_joint: "right_finger_sliding_joint".to_string(),
        }
    }
}
