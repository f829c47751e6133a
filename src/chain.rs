//! Cursor-driven construction of [`ModelDescription`]s.
//!
//! A [`ChainBuilder`] walks a cursor through space. Each [`link`](ChainBuilder::link)
//! call spawns a body whose base sits at the cursor and which grows along the
//! cursor's local `+Y`; the body is jointed to the previous one with the active
//! joint settings, and the cursor advances to the new body's far end.
//! [`push`](ChainBuilder::push) / [`pop`](ChainBuilder::pop) save and restore the
//! full cursor, which is how branches (such as two fingers on one palm) are built.

use crate::blueprint::{
    BodyDescription, FrameDescription, JointDescription, JointLimit, JointType, ModelDescription,
    ShapePrimitive,
};
use crate::transform::RigidTransform;
use glam::{Quat, Vec3};
use tracing::warn;

/// Settings applied to the next joint the cursor creates.
#[derive(Clone, Debug)]
pub struct ActiveJointConfig {
    /// Name of the next joint. Consumed by the link that creates it; when unset
    /// the joint is named `{parent}_to_{child}`.
    pub name: Option<String>,

    pub joint_type: JointType,

    /// Axis of rotation/translation in the cursor's frame at the joint.
    pub axis: Vec3,

    pub limits: Option<JointLimit>,
}

impl Default for ActiveJointConfig {
    fn default() -> Self {
        Self {
            name: None,
            joint_type: JointType::Fixed,
            axis: Vec3::X,
            limits: None,
        }
    }
}

/// Where the builder is and what it is extending.
#[derive(Clone, Debug)]
pub struct ChainCursor {
    /// Position in the model's root frame.
    pub position: Vec3,

    /// Orientation in the model's root frame.
    pub rotation: Quat,

    /// Index of the body the next link attaches to.
    pub current_body: Option<usize>,

    pub joint_config: ActiveJointConfig,
}

impl Default for ChainCursor {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            current_body: None,
            joint_config: ActiveJointConfig::default(),
        }
    }
}

impl ChainCursor {
    /// Local up (Y) in the root frame; the growth direction.
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn rotate_local_x(&mut self, angle: f32) {
        self.rotation *= Quat::from_axis_angle(Vec3::X, angle);
    }

    pub fn rotate_local_y(&mut self, angle: f32) {
        self.rotation *= Quat::from_axis_angle(Vec3::Y, angle);
    }

    pub fn rotate_local_z(&mut self, angle: f32) {
        self.rotation *= Quat::from_axis_angle(Vec3::Z, angle);
    }
}

#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// Density (kg/m³) used for every spawned body.
    pub density: f32,
    /// Pushes beyond this depth are dropped.
    pub max_stack_depth: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            density: 1000.0,
            max_stack_depth: 64,
        }
    }
}

/// Builds a [`ModelDescription`] by walking a cursor.
#[derive(Clone, Debug)]
pub struct ChainBuilder {
    description: ModelDescription,
    config: ChainConfig,
    cursor: ChainCursor,
    stack: Vec<ChainCursor>,
    /// Pose of every spawned body in the model's root frame, by body index.
    body_poses: Vec<RigidTransform>,
}

impl ChainBuilder {
    pub fn new(name: impl Into<String>, config: ChainConfig) -> Self {
        Self {
            description: ModelDescription::new(name),
            config,
            cursor: ChainCursor::default(),
            stack: Vec::new(),
            body_poses: Vec::new(),
        }
    }

    pub fn cursor(&self) -> &ChainCursor {
        &self.cursor
    }

    /// Configures the joint that attaches the next link.
    pub fn joint(mut self, name: impl Into<String>, joint_type: JointType, axis: Vec3) -> Self {
        self.cursor.joint_config.name = Some(name.into());
        self.cursor.joint_config.joint_type = joint_type;
        self.cursor.joint_config.axis = axis;
        self
    }

    pub fn limits(mut self, min: f32, max: f32, effort: f32, velocity: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.cursor.joint_config.limits = Some(JointLimit {
            min,
            max,
            effort,
            velocity,
        });
        self
    }

    /// Moves along the growth direction without spawning anything.
    pub fn advance(mut self, distance: f32) -> Self {
        self.cursor.position += self.cursor.up() * distance;
        self
    }

    pub fn yaw(mut self, angle: f32) -> Self {
        self.cursor.rotate_local_z(angle);
        self
    }

    pub fn pitch(mut self, angle: f32) -> Self {
        self.cursor.rotate_local_x(angle);
        self
    }

    pub fn roll(mut self, angle: f32) -> Self {
        self.cursor.rotate_local_y(angle);
        self
    }

    pub fn push(mut self) -> Self {
        if self.stack.len() < self.config.max_stack_depth {
            self.stack.push(self.cursor.clone());
        } else {
            warn!(depth = self.stack.len(), "cursor stack full; push dropped");
        }
        self
    }

    pub fn pop(mut self) -> Self {
        if let Some(cursor) = self.stack.pop() {
            self.cursor = cursor;
        }
        self
    }

    /// Spawns a body at the cursor and joints it to the body being extended.
    ///
    /// The body's origin is its center, `cursor + up * length / 2`; the joint
    /// frame sits at the cursor on the parent and at `(0, -length / 2, 0)` on
    /// the child.
    pub fn link(mut self, name: impl Into<String>, shape: ShapePrimitive) -> Self {
        let name = name.into();
        let length = shape.length_along_y();
        let pose = RigidTransform::new(
            self.cursor.rotation,
            self.cursor.position + self.cursor.up() * (length / 2.0),
        );

        let body = BodyDescription::from_shape(name.clone(), shape, self.config.density);
        let index = self.description.bodies.len();
        self.description.add_body(body);
        self.body_poses.push(pose);

        if let Some(parent) = self.cursor.current_body {
            let parent_pose = self.body_poses[parent];
            let config = &mut self.cursor.joint_config;
            let joint_name = config
                .name
                .take()
                .unwrap_or_else(|| format!("{}_to_{}", self.description.bodies[parent].name, name));
            self.description.add_joint(JointDescription {
                name: joint_name,
                parent: self.description.bodies[parent].name.clone(),
                child: name,
                parent_pose: parent_pose.inverse()
                    * RigidTransform::new(self.cursor.rotation, self.cursor.position),
                child_pose: RigidTransform::from_translation(Vec3::new(0.0, -length / 2.0, 0.0)),
                joint_type: config.joint_type,
                axis: config.axis,
                limits: config.limits,
            });
        }

        self.cursor.position += self.cursor.up() * length;
        self.cursor.current_body = Some(index);
        self
    }

    /// Names a frame at the cursor, fixed to the body being extended.
    pub fn frame(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let Some(body) = self.cursor.current_body else {
            warn!(frame = %name, "no body to mount the frame on; skipped");
            return self;
        };
        let body_pose = self.body_poses[body];
        self.description.add_frame(FrameDescription {
            name,
            body: self.description.bodies[body].name.clone(),
            pose: body_pose.inverse()
                * RigidTransform::new(self.cursor.rotation, self.cursor.position),
        });
        self
    }

    /// Pose of body `name` in the model's root frame, as placed by the cursor.
    pub fn body_pose(&self, name: &str) -> Option<RigidTransform> {
        self.description
            .bodies
            .iter()
            .position(|b| b.name == name)
            .map(|i| self.body_poses[i])
    }

    pub fn build(self) -> ModelDescription {
        self.description
    }
}
