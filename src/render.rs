//! Cameras and the rendering collaborator.
//!
//! The station never synthesizes images itself. Each registered camera becomes an
//! [`RgbdCamera`] block holding its mount and intrinsics, and all cameras share one
//! [`RenderEngine`] that turns a pose, intrinsics, and the current geometry poses
//! into color, depth, and label images.

use crate::transform::RigidTransform;
use crate::world::{BodyIndex, GeometryPose, MultibodyWorld};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Rendering quality requested from the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fidelity {
    #[default]
    Low,
    Medium,
    High,
}

/// Intrinsic properties of a depth camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraProperties {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub fidelity: Fidelity,
    /// Closest measurable depth (m).
    pub z_near: f32,
    /// Farthest measurable depth (m).
    pub z_far: f32,
}

impl Default for CameraProperties {
    /// A D415-class sensor at 848×480. Color and depth intrinsics differ slightly on
    /// the real device; one shared focal length of 645 px is used for both.
    fn default() -> Self {
        Self::from_focal_length(848, 480, 645.0, Fidelity::Low, 0.1, 2.0)
    }
}

impl CameraProperties {
    /// Derives the field of view from a vertical focal length in pixels:
    /// `fy = height / 2 / tan(fov_y / 2)`.
    pub fn from_focal_length(
        width: u32,
        height: u32,
        focal_y: f32,
        fidelity: Fidelity,
        z_near: f32,
        z_far: f32,
    ) -> Self {
        Self {
            width,
            height,
            fov_y: 2.0 * (height as f32 / 2.0 / focal_y).atan(),
            fidelity,
            z_near,
            z_far,
        }
    }

    pub fn focal_length_y(&self) -> f32 {
        self.height as f32 / 2.0 / (self.fov_y / 2.0).tan()
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidProperties(format!(
                "image size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if !(self.fov_y > 0.0 && self.fov_y < std::f32::consts::PI) {
            return Err(RenderError::InvalidProperties(format!(
                "vertical field of view {} must lie in (0, pi)",
                self.fov_y
            )));
        }
        if !(self.z_near > 0.0 && self.z_near < self.z_far) {
            return Err(RenderError::InvalidProperties(format!(
                "depth range [{}, {}] must satisfy 0 < near < far",
                self.z_near, self.z_far
            )));
        }
        Ok(())
    }
}

/// A dense row-major image.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    pub width: u32,
    pub height: u32,
    pub data: Vec<T>,
}

impl<T: Clone> Image<T> {
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&T> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y as usize * self.width as usize + x as usize)
    }
}

/// RGBA, 8 bits per channel.
pub type ColorImage = Image<[u8; 4]>;
/// Depth in millimeters; [`DEPTH_TOO_FAR`] marks pixels beyond `z_far`.
pub type DepthImage = Image<u16>;
/// Per-pixel body label; [`LABEL_EMPTY`] marks pixels that hit nothing.
pub type LabelImage = Image<i16>;

pub const DEPTH_TOO_FAR: u16 = u16::MAX;
pub const LABEL_EMPTY: i16 = -1;

/// The three images one camera produces per query.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraImages {
    pub color: ColorImage,
    pub depth: DepthImage,
    pub label: LabelImage,
}

/// Everything a render engine needs for one camera query.
#[derive(Clone, Copy, Debug)]
pub struct RenderRequest<'a> {
    pub camera: &'a str,
    /// Pose of the camera in the world frame.
    pub pose: RigidTransform,
    pub properties: &'a CameraProperties,
    pub scene: &'a [GeometryPose],
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid camera properties: {0}")]
    InvalidProperties(String),

    #[error("camera `{camera}` failed to render: {reason}")]
    Failed { camera: String, reason: String },
}

/// The rendering collaborator shared by every camera in a station.
pub trait RenderEngine: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<CameraImages, RenderError>;
}

/// A render engine that sees an empty scene: black color, every depth too far,
/// every label empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlankRenderer;

impl RenderEngine for BlankRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<CameraImages, RenderError> {
        let CameraProperties { width, height, .. } = *request.properties;
        Ok(CameraImages {
            color: Image::filled(width, height, [0, 0, 0, 255]),
            depth: Image::filled(width, height, DEPTH_TOO_FAR),
            label: Image::filled(width, height, LABEL_EMPTY),
        })
    }
}

/// A camera mounted on a body, rendering through the shared engine.
#[derive(Clone)]
pub struct RgbdCamera {
    name: String,
    parent_body: BodyIndex,
    /// `X_BC`: camera pose in the parent body frame.
    body_to_camera: RigidTransform,
    properties: CameraProperties,
    renderer: Arc<dyn RenderEngine>,
}

impl fmt::Debug for RgbdCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbdCamera")
            .field("name", &self.name)
            .field("parent_body", &self.parent_body)
            .field("body_to_camera", &self.body_to_camera)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl RgbdCamera {
    pub fn new(
        name: impl Into<String>,
        parent_body: BodyIndex,
        body_to_camera: RigidTransform,
        properties: CameraProperties,
        renderer: Arc<dyn RenderEngine>,
    ) -> Self {
        Self {
            name: name.into(),
            parent_body,
            body_to_camera,
            properties,
            renderer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &CameraProperties {
        &self.properties
    }

    pub fn parent_body(&self) -> BodyIndex {
        self.parent_body
    }

    /// Current camera pose in the world frame.
    pub fn pose_in_world(&self, world: &MultibodyWorld) -> RigidTransform {
        world.body_pose_in_world(self.parent_body) * self.body_to_camera
    }

    /// Renders the current scene through the shared engine.
    pub fn capture(&self, world: &MultibodyWorld) -> Result<CameraImages, RenderError> {
        let scene = world.geometry_poses();
        self.renderer.render(&RenderRequest {
            camera: &self.name,
            pose: self.pose_in_world(world),
            properties: &self.properties,
            scene: &scene,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn focal_length_round_trips() {
        let props = CameraProperties::default();
        assert_relative_eq!(props.focal_length_y(), 645.0, max_relative = 1e-4);
        assert!(props.validate().is_ok());
    }

    #[test]
    fn invalid_depth_range_is_rejected() {
        let props = CameraProperties {
            z_near: 2.0,
            z_far: 1.0,
            ..CameraProperties::default()
        };
        assert!(matches!(props.validate(), Err(RenderError::InvalidProperties(_))));
    }

    #[test]
    fn blank_renderer_fills_requested_size() {
        let props = CameraProperties::from_focal_length(4, 3, 10.0, Fidelity::High, 0.1, 1.0);
        let images = BlankRenderer
            .render(&RenderRequest {
                camera: "test",
                pose: RigidTransform::IDENTITY,
                properties: &props,
                scene: &[],
            })
            .unwrap();
        assert_eq!(images.color.data.len(), 12);
        assert_eq!(images.depth.get(3, 2), Some(&DEPTH_TOO_FAR));
        assert_eq!(images.label.get(4, 0), None);
    }
}
