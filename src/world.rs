//! The world model: the structure every sub-assembly is loaded into.
//!
//! A [`MultibodyWorld`] holds model instances, their rigid bodies, named frames, and
//! the joints connecting them as a kinematic tree rooted at the world body. It is
//! mutable until [`finalize`](MultibodyWorld::finalize) is called, after which the
//! structure is closed and only the joint state (positions and velocities) may
//! change. Integrating that state forward in time is the simulation driver's job.

use crate::blueprint::{JointLimit, JointType, ModelDescription, ShapePrimitive};
use crate::inertia::SpatialInertia;
use crate::transform::RigidTransform;
use glam::{Quat, Vec3};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the instance, body, and frame that represent the fixed world.
pub const WORLD_NAME: &str = "world";

static NEXT_WORLD_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a world. Handles issued by one world are rejected by every other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorldId(u32);

impl WorldId {
    fn next() -> Self {
        Self(NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to a model instance loaded into a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelInstanceId {
    world: WorldId,
    index: u32,
}

impl ModelInstanceId {
    pub fn world(&self) -> WorldId {
        self.world
    }
}

/// Non-owning handle to a frame.
///
/// A handle is only meaningful for the world that issued it, and stays valid for
/// that world's whole lifetime since frames are never removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId {
    world: WorldId,
    instance: u32,
    index: u32,
}

impl FrameId {
    pub fn world(&self) -> WorldId {
        self.world
    }

    /// The model instance the frame belongs to.
    pub fn model_instance(&self) -> ModelInstanceId {
        ModelInstanceId {
            world: self.world,
            index: self.instance,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyIndex(usize);

impl BodyIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointIndex(usize);

impl JointIndex {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Errors reported by the world model.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world `{world}` is finalized; structural edits are closed")]
    Finalized { world: String },

    #[error("world `{world}` is not finalized; joint state does not exist yet")]
    NotFinalized { world: String },

    #[error("a model instance named `{0}` already exists")]
    DuplicateInstance(String),

    #[error("model `{model}`: duplicate {kind} name `{name}`")]
    DuplicateName {
        model: String,
        kind: &'static str,
        name: String,
    },

    #[error("model `{model}`: {context} references unknown body `{body}`")]
    UnknownBody {
        model: String,
        context: String,
        body: String,
    },

    #[error("no model instance named `{0}`")]
    UnknownInstance(String),

    #[error("no frame named `{name}` in model instance `{instance}`")]
    UnknownFrame { name: String, instance: String },

    #[error("no joint named `{name}` in model instance `{instance}`")]
    UnknownJoint { name: String, instance: String },

    #[error("joint `{name}` is {actual}, expected {expected}")]
    JointKind {
        name: String,
        expected: JointType,
        actual: JointType,
    },

    #[error("handle was issued by a different world than `{world}`")]
    ForeignHandle { world: String },

    #[error("body `{body}` already has a parent joint")]
    AlreadyConnected { body: String },

    #[error("connecting `{parent}` to `{child}` would close a kinematic loop")]
    KinematicLoop { parent: String, child: String },

    #[error("the world body cannot be the child of a joint")]
    WorldAsChild,

    #[error("model instance `{instance}` expects {expected} values, got {actual}")]
    StateSize {
        instance: String,
        expected: usize,
        actual: usize,
    },

    /// Raised by an external dynamics solver working on this world.
    #[error("dynamics solver failed: {0}")]
    Solver(String),
}

/// A rigid body inside the world.
#[derive(Clone, Debug)]
pub struct Body {
    name: String,
    instance: u32,
    shape: Option<ShapePrimitive>,
    inertia: SpatialInertia,
    body_frame: u32,
}

impl Body {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Option<ShapePrimitive> {
        self.shape
    }

    /// Mass properties about the body origin, in the body frame.
    pub fn inertia(&self) -> SpatialInertia {
        self.inertia
    }
}

/// A frame fixed to a body.
#[derive(Clone, Debug)]
pub struct Frame {
    name: String,
    body: BodyIndex,
    pose_in_body: RigidTransform,
}

impl Frame {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> BodyIndex {
        self.body
    }

    /// Pose of this frame in its body's frame.
    pub fn pose_in_body(&self) -> RigidTransform {
        self.pose_in_body
    }
}

/// A joint between a frame on a parent body and a frame on a child body.
///
/// The child body's pose is `X_WB = X_WP * X_PF * offset * motion(q) * X_CF⁻¹`, where
/// `F` are the joint's frames on the parent and child.
#[derive(Clone, Debug)]
pub struct Joint {
    name: String,
    instance: u32,
    joint_type: JointType,
    parent_frame: u32,
    child_frame: u32,
    offset: RigidTransform,
    axis: Vec3,
    limits: Option<JointLimit>,
    state_index: Option<usize>,
}

impl Joint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joint_type(&self) -> JointType {
        self.joint_type
    }

    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    pub fn limits(&self) -> Option<JointLimit> {
        self.limits
    }

    /// Fixed transform from the parent-side frame to the child-side frame at zero travel.
    pub fn offset(&self) -> RigidTransform {
        self.offset
    }

    /// Relative transform contributed by the joint at position `q`.
    pub fn motion(&self, q: f32) -> RigidTransform {
        let axis = self.axis.normalize_or_zero();
        match self.joint_type {
            JointType::Fixed => RigidTransform::IDENTITY,
            JointType::Revolute => RigidTransform::from_rotation(Quat::from_axis_angle(axis, q)),
            JointType::Prismatic => RigidTransform::from_translation(axis * q),
        }
    }
}

#[derive(Clone, Debug)]
struct ModelInstance {
    name: String,
    bodies: Vec<BodyIndex>,
    joints: Vec<JointIndex>,
}

/// A mutable multibody model that closes for structural edits at finalize.
#[derive(Clone, Debug)]
pub struct MultibodyWorld {
    id: WorldId,
    name: String,
    time_step: f32,
    gravity: Vec3,
    finalized: bool,
    instances: Vec<ModelInstance>,
    bodies: Vec<Body>,
    frames: Vec<Frame>,
    joints: Vec<Joint>,
    parent_joint: Vec<Option<JointIndex>>,
    num_dofs: usize,
    positions: Vec<f32>,
    velocities: Vec<f32>,
    actuation: Vec<f32>,
    contact_forces: Vec<f32>,
    contact_results: ContactResults,
}

impl MultibodyWorld {
    /// Creates a world containing only the world instance, body, and frame.
    ///
    /// A `time_step` of zero denotes a continuous-time model.
    pub fn new(name: impl Into<String>, time_step: f32, gravity: Vec3) -> Self {
        let mut world = Self {
            id: WorldId::next(),
            name: name.into(),
            time_step,
            gravity,
            finalized: false,
            instances: vec![ModelInstance {
                name: WORLD_NAME.to_string(),
                bodies: Vec::new(),
                joints: Vec::new(),
            }],
            bodies: Vec::new(),
            frames: Vec::new(),
            joints: Vec::new(),
            parent_joint: Vec::new(),
            num_dofs: 0,
            positions: Vec::new(),
            velocities: Vec::new(),
            actuation: Vec::new(),
            contact_forces: Vec::new(),
            contact_results: ContactResults::default(),
        };
        world.push_body(WORLD_NAME.to_string(), 0, None, SpatialInertia::ZERO);
        world
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn world_instance(&self) -> ModelInstanceId {
        self.instance_id(0)
    }

    pub fn world_body(&self) -> BodyIndex {
        BodyIndex(0)
    }

    pub fn world_frame(&self) -> FrameId {
        self.frame_id(0, 0)
    }

    pub fn set_gravity(&mut self, gravity: Vec3) -> Result<(), WorldError> {
        self.ensure_mutable()?;
        self.gravity = gravity;
        Ok(())
    }

    // --- Structure -----------------------------------------------------------

    /// Loads every body, frame, and joint of `description` as a new model instance.
    ///
    /// The description is validated in full before anything is inserted, so a
    /// failed load leaves the world untouched. The model's root body is left
    /// unconnected; weld it with [`weld_frames`](Self::weld_frames).
    pub fn add_model(
        &mut self,
        description: &ModelDescription,
        instance_name: &str,
    ) -> Result<ModelInstanceId, WorldError> {
        self.ensure_mutable()?;
        if self.instances.iter().any(|i| i.name == instance_name) {
            return Err(WorldError::DuplicateInstance(instance_name.to_string()));
        }
        validate_description(description)?;

        let instance = self.instances.len() as u32;
        self.instances.push(ModelInstance {
            name: instance_name.to_string(),
            bodies: Vec::new(),
            joints: Vec::new(),
        });

        let first_body = self.bodies.len();
        for body in &description.bodies {
            self.push_body(body.name.clone(), instance, body.shape, body.inertia);
        }
        let body_index = |name: &str| {
            description
                .bodies
                .iter()
                .position(|b| b.name == name)
                .map(|i| BodyIndex(first_body + i))
        };

        for frame in &description.frames {
            if let Some(body) = body_index(&frame.body) {
                self.push_frame(frame.name.clone(), body, frame.pose);
            }
        }

        for joint in &description.joints {
            let (Some(parent), Some(child)) = (body_index(&joint.parent), body_index(&joint.child))
            else {
                continue;
            };
            let parent_name = format!("{}_frame_on_parent", joint.name);
            let parent_frame = self.push_frame(parent_name, parent, joint.parent_pose);
            let child_name = format!("{}_frame_on_child", joint.name);
            let child_frame = self.push_frame(child_name, child, joint.child_pose);
            self.push_joint(Joint {
                name: joint.name.clone(),
                instance,
                joint_type: joint.joint_type,
                parent_frame,
                child_frame,
                offset: RigidTransform::IDENTITY,
                axis: joint.axis,
                limits: joint.limits,
                state_index: None,
            });
        }

        debug!(
            world = %self.name,
            instance = instance_name,
            bodies = description.bodies.len(),
            joints = description.joints.len(),
            "loaded model"
        );
        Ok(self.instance_id(instance))
    }

    /// Adds a lone rigid body to an existing instance. Its body frame shares its name.
    pub fn add_rigid_body(
        &mut self,
        name: &str,
        instance: ModelInstanceId,
        inertia: SpatialInertia,
    ) -> Result<BodyIndex, WorldError> {
        self.ensure_mutable()?;
        let instance_index = self.check_instance(instance)?;
        if self.frame_index_by_name(name, instance_index).is_some() {
            return Err(WorldError::DuplicateName {
                model: self.instances[instance_index as usize].name.clone(),
                kind: "body",
                name: name.to_string(),
            });
        }
        Ok(self.push_body(name.to_string(), instance_index, None, inertia))
    }

    /// Rigidly attaches `child`'s body to `parent`'s body so that `X_PC` holds
    /// between the two frames.
    pub fn weld_frames(
        &mut self,
        parent: FrameId,
        child: FrameId,
        x_pc: RigidTransform,
    ) -> Result<JointIndex, WorldError> {
        self.ensure_mutable()?;
        self.check_frame(parent)?;
        self.check_frame(child)?;
        let parent_body = self.frames[parent.index as usize].body;
        let child_body = self.frames[child.index as usize].body;

        if child_body == self.world_body() {
            return Err(WorldError::WorldAsChild);
        }
        if self.parent_joint[child_body.0].is_some() {
            return Err(WorldError::AlreadyConnected {
                body: self.bodies[child_body.0].name.clone(),
            });
        }
        if self.ancestors(parent_body).any(|b| b == child_body) {
            return Err(WorldError::KinematicLoop {
                parent: self.bodies[parent_body.0].name.clone(),
                child: self.bodies[child_body.0].name.clone(),
            });
        }

        let name = format!(
            "{}_welds_to_{}",
            self.frames[child.index as usize].name, self.frames[parent.index as usize].name
        );
        debug!(world = %self.name, joint = %name, "welding frames");
        Ok(self.push_joint(Joint {
            name,
            instance: child.instance,
            joint_type: JointType::Fixed,
            parent_frame: parent.index,
            child_frame: child.index,
            offset: x_pc,
            axis: Vec3::ZERO,
            limits: None,
            state_index: None,
        }))
    }

    /// Closes the world for structural edits and allocates its joint state at zero.
    ///
    /// Finalizing is one-way; a second call fails.
    pub fn finalize(&mut self) -> Result<(), WorldError> {
        self.ensure_mutable()?;
        self.finalized = true;
        self.positions = vec![0.0; self.num_dofs];
        self.velocities = vec![0.0; self.num_dofs];
        self.actuation = vec![0.0; self.num_dofs];
        self.contact_forces = vec![0.0; self.num_dofs];
        info!(
            world = %self.name,
            instances = self.instances.len(),
            bodies = self.bodies.len(),
            dofs = self.num_dofs,
            "world finalized"
        );
        Ok(())
    }

    // --- Lookup --------------------------------------------------------------

    pub fn has_instance(&self, name: &str) -> bool {
        self.instances.iter().any(|i| i.name == name)
    }

    pub fn instance_by_name(&self, name: &str) -> Result<ModelInstanceId, WorldError> {
        self.instances
            .iter()
            .position(|i| i.name == name)
            .map(|i| self.instance_id(i as u32))
            .ok_or_else(|| WorldError::UnknownInstance(name.to_string()))
    }

    pub fn instance_name(&self, instance: ModelInstanceId) -> Result<&str, WorldError> {
        let index = self.check_instance(instance)?;
        Ok(&self.instances[index as usize].name)
    }

    pub fn frame_by_name(
        &self,
        name: &str,
        instance: ModelInstanceId,
    ) -> Result<FrameId, WorldError> {
        let instance_index = self.check_instance(instance)?;
        self.frame_index_by_name(name, instance_index)
            .map(|i| self.frame_id(instance_index, i))
            .ok_or_else(|| WorldError::UnknownFrame {
                name: name.to_string(),
                instance: self.instances[instance_index as usize].name.clone(),
            })
    }

    pub fn frame(&self, id: FrameId) -> Result<&Frame, WorldError> {
        self.check_frame(id)?;
        Ok(&self.frames[id.index as usize])
    }

    pub fn body(&self, index: BodyIndex) -> Option<&Body> {
        self.bodies.get(index.0)
    }

    /// The frame whose pose coincides with `body`'s origin.
    pub fn body_frame(&self, index: BodyIndex) -> Option<FrameId> {
        self.bodies
            .get(index.0)
            .map(|b| self.frame_id(b.instance, b.body_frame))
    }

    pub fn joint(&self, index: JointIndex) -> Option<&Joint> {
        self.joints.get(index.0)
    }

    /// Bodies of `instance`, in load order.
    pub fn instance_bodies(&self, instance: ModelInstanceId) -> Result<&[BodyIndex], WorldError> {
        let index = self.check_instance(instance)?;
        Ok(&self.instances[index as usize].bodies)
    }

    /// Joints of `instance` that contribute a degree of freedom, in load order.
    pub fn instance_dof_joints(
        &self,
        instance: ModelInstanceId,
    ) -> Result<Vec<JointIndex>, WorldError> {
        let index = self.check_instance(instance)?;
        Ok(self.instances[index as usize]
            .joints
            .iter()
            .copied()
            .filter(|j| self.joints[j.0].state_index.is_some())
            .collect())
    }

    pub fn instance_num_positions(&self, instance: ModelInstanceId) -> Result<usize, WorldError> {
        Ok(self.instance_dof_joints(instance)?.len())
    }

    pub fn num_positions(&self) -> usize {
        self.num_dofs
    }

    /// The joint connecting `body` to its parent, if any.
    pub fn parent_joint(&self, body: BodyIndex) -> Option<JointIndex> {
        self.parent_joint.get(body.0).copied().flatten()
    }

    /// Body carrying the joint's parent-side frame.
    pub fn joint_parent_body(&self, joint: JointIndex) -> Option<BodyIndex> {
        self.joints
            .get(joint.0)
            .map(|j| self.frames[j.parent_frame as usize].body)
    }

    /// Body carrying the joint's child-side frame.
    pub fn joint_child_body(&self, joint: JointIndex) -> Option<BodyIndex> {
        self.joints
            .get(joint.0)
            .map(|j| self.frames[j.child_frame as usize].body)
    }

    /// Pose of the joint's parent-side frame in the parent body frame.
    pub fn joint_parent_pose(&self, joint: JointIndex) -> Option<RigidTransform> {
        self.joints
            .get(joint.0)
            .map(|j| self.frames[j.parent_frame as usize].pose_in_body)
    }

    /// Pose of the joint's child-side frame in the child body frame.
    pub fn joint_child_pose(&self, joint: JointIndex) -> Option<RigidTransform> {
        self.joints
            .get(joint.0)
            .map(|j| self.frames[j.child_frame as usize].pose_in_body)
    }

    pub fn joint_by_name(
        &self,
        name: &str,
        instance: ModelInstanceId,
    ) -> Result<JointIndex, WorldError> {
        let instance_index = self.check_instance(instance)?;
        self.instances[instance_index as usize]
            .joints
            .iter()
            .copied()
            .find(|j| self.joints[j.0].name == name)
            .ok_or_else(|| WorldError::UnknownJoint {
                name: name.to_string(),
                instance: self.instances[instance_index as usize].name.clone(),
            })
    }

    /// Looks up a joint by name and requires it to be a single-axis rotation.
    pub fn revolute_joint(
        &self,
        name: &str,
        instance: ModelInstanceId,
    ) -> Result<JointIndex, WorldError> {
        self.joint_of_type(name, instance, JointType::Revolute)
    }

    /// Looks up a joint by name and requires it to be a single-axis translation.
    pub fn prismatic_joint(
        &self,
        name: &str,
        instance: ModelInstanceId,
    ) -> Result<JointIndex, WorldError> {
        self.joint_of_type(name, instance, JointType::Prismatic)
    }

    fn joint_of_type(
        &self,
        name: &str,
        instance: ModelInstanceId,
        expected: JointType,
    ) -> Result<JointIndex, WorldError> {
        let index = self.joint_by_name(name, instance)?;
        let actual = self.joints[index.0].joint_type;
        if actual != expected {
            return Err(WorldError::JointKind {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        Ok(index)
    }

    // --- State ---------------------------------------------------------------

    pub fn joint_position(&self, joint: JointIndex) -> Result<f32, WorldError> {
        let slot = self.state_slot(joint)?;
        Ok(self.positions[slot])
    }

    pub fn set_joint_position(&mut self, joint: JointIndex, value: f32) -> Result<(), WorldError> {
        let slot = self.state_slot(joint)?;
        self.positions[slot] = value;
        Ok(())
    }

    pub fn joint_velocity(&self, joint: JointIndex) -> Result<f32, WorldError> {
        let slot = self.state_slot(joint)?;
        Ok(self.velocities[slot])
    }

    pub fn set_joint_velocity(&mut self, joint: JointIndex, value: f32) -> Result<(), WorldError> {
        let slot = self.state_slot(joint)?;
        self.velocities[slot] = value;
        Ok(())
    }

    /// Continuous state of one instance: its positions followed by its velocities.
    pub fn instance_state(&self, instance: ModelInstanceId) -> Result<Vec<f32>, WorldError> {
        self.ensure_finalized()?;
        let joints = self.instance_dof_joints(instance)?;
        let slots: Vec<usize> = joints
            .iter()
            .filter_map(|j| self.joints[j.0].state_index)
            .collect();
        Ok(slots
            .iter()
            .map(|&s| self.positions[s])
            .chain(slots.iter().map(|&s| self.velocities[s]))
            .collect())
    }

    /// Overwrites one instance's continuous state (positions then velocities).
    pub fn set_instance_state(
        &mut self,
        instance: ModelInstanceId,
        state: &[f32],
    ) -> Result<(), WorldError> {
        self.ensure_finalized()?;
        let joints = self.instance_dof_joints(instance)?;
        if state.len() != 2 * joints.len() {
            return Err(WorldError::StateSize {
                instance: self.instance_name(instance)?.to_string(),
                expected: 2 * joints.len(),
                actual: state.len(),
            });
        }
        let (q, v) = state.split_at(joints.len());
        for ((joint, &qi), &vi) in joints.iter().zip(q).zip(v) {
            if let Some(slot) = self.joints[joint.0].state_index {
                self.positions[slot] = qi;
                self.velocities[slot] = vi;
            }
        }
        Ok(())
    }

    // --- Actuation and contact -----------------------------------------------

    /// Generalized forces applied to one instance's degrees of freedom, in the
    /// order of [`instance_dof_joints`](Self::instance_dof_joints).
    pub fn actuation(&self, instance: ModelInstanceId) -> Result<Vec<f32>, WorldError> {
        let slots = self.instance_slots(instance)?;
        Ok(slots.iter().map(|&s| self.actuation[s]).collect())
    }

    pub fn set_actuation(
        &mut self,
        instance: ModelInstanceId,
        forces: &[f32],
    ) -> Result<(), WorldError> {
        let slots = self.instance_slots(instance)?;
        self.check_state_size(instance, slots.len(), forces.len())?;
        for (&slot, &f) in slots.iter().zip(forces) {
            self.actuation[slot] = f;
        }
        Ok(())
    }

    /// Generalized forces the contacts exert on one instance. Zero until a
    /// simulation driver writes them back.
    pub fn generalized_contact_forces(
        &self,
        instance: ModelInstanceId,
    ) -> Result<Vec<f32>, WorldError> {
        let slots = self.instance_slots(instance)?;
        Ok(slots.iter().map(|&s| self.contact_forces[s]).collect())
    }

    pub fn set_generalized_contact_forces(
        &mut self,
        instance: ModelInstanceId,
        forces: &[f32],
    ) -> Result<(), WorldError> {
        let slots = self.instance_slots(instance)?;
        self.check_state_size(instance, slots.len(), forces.len())?;
        for (&slot, &f) in slots.iter().zip(forces) {
            self.contact_forces[slot] = f;
        }
        Ok(())
    }

    /// Contacts reported by the last simulation step. Empty until a driver
    /// writes some back.
    pub fn contact_results(&self) -> Result<&ContactResults, WorldError> {
        self.ensure_finalized()?;
        Ok(&self.contact_results)
    }

    /// Replaces the contact results. Every pair must name bodies of this world.
    pub fn set_contact_results(&mut self, results: ContactResults) -> Result<(), WorldError> {
        self.ensure_finalized()?;
        for pair in &results.pairs {
            for body in [pair.body_a, pair.body_b] {
                if body.0 >= self.bodies.len() {
                    return Err(self.foreign());
                }
            }
        }
        debug!(world = %self.name, contacts = results.pairs.len(), "contact results updated");
        self.contact_results = results;
        Ok(())
    }

    /// The full continuous state: all positions followed by all velocities.
    pub fn continuous_state(&self) -> Result<Vec<f32>, WorldError> {
        self.ensure_finalized()?;
        Ok(self
            .positions
            .iter()
            .chain(self.velocities.iter())
            .copied()
            .collect())
    }

    // --- Kinematics ----------------------------------------------------------

    /// Pose of `body` in the world frame at the current joint positions.
    ///
    /// Before finalize every joint is taken at zero travel. Bodies that are not
    /// connected to the world sit at the world origin.
    pub fn body_pose_in_world(&self, body: BodyIndex) -> RigidTransform {
        let mut chain = Vec::new();
        let mut current = body;
        while let Some(joint) = self.parent_joint(current) {
            chain.push(joint);
            current = self.frames[self.joints[joint.0].parent_frame as usize].body;
        }
        chain.iter().rev().fold(RigidTransform::IDENTITY, |x_wp, joint| {
            let joint = &self.joints[joint.0];
            let q = joint
                .state_index
                .and_then(|s| self.positions.get(s).copied())
                .unwrap_or(0.0);
            let x_pf = self.frames[joint.parent_frame as usize].pose_in_body;
            let x_cf = self.frames[joint.child_frame as usize].pose_in_body;
            x_wp * x_pf * joint.offset * joint.motion(q) * x_cf.inverse()
        })
    }

    pub fn frame_pose_in_world(&self, frame: FrameId) -> Result<RigidTransform, WorldError> {
        let frame = self.frame(frame)?;
        Ok(self.body_pose_in_world(frame.body) * frame.pose_in_body)
    }

    /// True when the frame's body is the world body or reaches it through welds only.
    pub fn frame_is_anchored(&self, frame: FrameId) -> Result<bool, WorldError> {
        let mut current = self.frame(frame)?.body;
        while current != self.world_body() {
            match self.parent_joint(current) {
                Some(joint) if self.joints[joint.0].joint_type == JointType::Fixed => {
                    current = self.frames[self.joints[joint.0].parent_frame as usize].body;
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// World poses keyed by `instance::body`, for visualizers.
    pub fn pose_bundle(&self) -> PoseBundle {
        PoseBundle {
            poses: self
                .geometry_poses()
                .into_iter()
                .map(|p| (format!("{}::{}", p.instance, p.body), p.pose))
                .collect(),
        }
    }

    /// World poses of every body except the world itself.
    pub fn geometry_poses(&self) -> Vec<GeometryPose> {
        (1..self.bodies.len())
            .map(|i| {
                let body = &self.bodies[i];
                GeometryPose {
                    instance: self.instances[body.instance as usize].name.clone(),
                    body: body.name.clone(),
                    shape: body.shape,
                    pose: self.body_pose_in_world(BodyIndex(i)),
                }
            })
            .collect()
    }

    // --- Internals -----------------------------------------------------------

    fn instance_id(&self, index: u32) -> ModelInstanceId {
        ModelInstanceId {
            world: self.id,
            index,
        }
    }

    fn frame_id(&self, instance: u32, index: u32) -> FrameId {
        FrameId {
            world: self.id,
            instance,
            index,
        }
    }

    fn ensure_mutable(&self) -> Result<(), WorldError> {
        if self.finalized {
            return Err(WorldError::Finalized {
                world: self.name.clone(),
            });
        }
        Ok(())
    }

    fn ensure_finalized(&self) -> Result<(), WorldError> {
        if !self.finalized {
            return Err(WorldError::NotFinalized {
                world: self.name.clone(),
            });
        }
        Ok(())
    }

    fn foreign(&self) -> WorldError {
        WorldError::ForeignHandle {
            world: self.name.clone(),
        }
    }

    fn check_instance(&self, instance: ModelInstanceId) -> Result<u32, WorldError> {
        if instance.world != self.id || instance.index as usize >= self.instances.len() {
            return Err(self.foreign());
        }
        Ok(instance.index)
    }

    fn check_frame(&self, frame: FrameId) -> Result<(), WorldError> {
        if frame.world != self.id || frame.index as usize >= self.frames.len() {
            return Err(self.foreign());
        }
        Ok(())
    }

    fn instance_slots(&self, instance: ModelInstanceId) -> Result<Vec<usize>, WorldError> {
        self.ensure_finalized()?;
        Ok(self
            .instance_dof_joints(instance)?
            .iter()
            .filter_map(|j| self.joints[j.0].state_index)
            .collect())
    }

    fn check_state_size(
        &self,
        instance: ModelInstanceId,
        expected: usize,
        actual: usize,
    ) -> Result<(), WorldError> {
        if actual != expected {
            return Err(WorldError::StateSize {
                instance: self.instance_name(instance)?.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn state_slot(&self, joint: JointIndex) -> Result<usize, WorldError> {
        self.ensure_finalized()?;
        let joint = self.joints.get(joint.0).ok_or_else(|| self.foreign())?;
        joint.state_index.ok_or_else(|| WorldError::JointKind {
            name: joint.name.clone(),
            expected: JointType::Revolute,
            actual: joint.joint_type,
        })
    }

    fn frame_index_by_name(&self, name: &str, instance: u32) -> Option<u32> {
        self.frames
            .iter()
            .position(|f| f.name == name && self.bodies[f.body.0].instance == instance)
            .map(|i| i as u32)
    }

    fn ancestors(&self, body: BodyIndex) -> impl Iterator<Item = BodyIndex> + '_ {
        std::iter::successors(Some(body), move |&b| {
            self.parent_joint(b)
                .map(|j| self.frames[self.joints[j.0].parent_frame as usize].body)
        })
    }

    fn push_body(
        &mut self,
        name: String,
        instance: u32,
        shape: Option<ShapePrimitive>,
        inertia: SpatialInertia,
    ) -> BodyIndex {
        let index = BodyIndex(self.bodies.len());
        let body_frame = self.frames.len() as u32;
        self.bodies.push(Body {
            name: name.clone(),
            instance,
            shape,
            inertia,
            body_frame,
        });
        self.parent_joint.push(None);
        self.frames.push(Frame {
            name,
            body: index,
            pose_in_body: RigidTransform::IDENTITY,
        });
        self.instances[instance as usize].bodies.push(index);
        index
    }

    fn push_frame(&mut self, name: String, body: BodyIndex, pose_in_body: RigidTransform) -> u32 {
        self.frames.push(Frame {
            name,
            body,
            pose_in_body,
        });
        (self.frames.len() - 1) as u32
    }

    fn push_joint(&mut self, mut joint: Joint) -> JointIndex {
        let index = JointIndex(self.joints.len());
        if joint.joint_type.dof() > 0 {
            joint.state_index = Some(self.num_dofs);
            self.num_dofs += joint.joint_type.dof();
        }
        let child_body = self.frames[joint.child_frame as usize].body;
        self.parent_joint[child_body.0] = Some(index);
        self.instances[joint.instance as usize].joints.push(index);
        self.joints.push(joint);
        index
    }
}

/// Pose of one body's geometry in the world frame.
#[derive(Clone, Debug)]
pub struct GeometryPose {
    pub instance: String,
    pub body: String,
    pub shape: Option<ShapePrimitive>,
    pub pose: RigidTransform,
}

impl fmt::Display for GeometryPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{} at {}", self.instance, self.body, self.pose.translation)
    }
}

/// One contact between two bodies, with the force on `body_b` in the world frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactPair {
    pub body_a: BodyIndex,
    pub body_b: BodyIndex,
    pub point: Vec3,
    pub force: Vec3,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContactResults {
    pub pairs: Vec<ContactPair>,
}

impl ContactResults {
    pub fn num_contacts(&self) -> usize {
        self.pairs.len()
    }

    /// Net force on `body` from every contact it takes part in.
    pub fn net_force_on(&self, body: BodyIndex) -> Vec3 {
        self.pairs
            .iter()
            .map(|p| {
                if p.body_b == body {
                    p.force
                } else if p.body_a == body {
                    -p.force
                } else {
                    Vec3::ZERO
                }
            })
            .sum()
    }
}

/// Body poses in the world frame, keyed by `instance::body`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseBundle {
    pub poses: BTreeMap<String, RigidTransform>,
}

impl PoseBundle {
    pub fn pose(&self, instance: &str, body: &str) -> Option<RigidTransform> {
        self.poses.get(&format!("{instance}::{body}")).copied()
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// Checks names and references of a description without touching any world.
fn validate_description(description: &ModelDescription) -> Result<(), WorldError> {
    let model = description.name.clone();
    let duplicate = |kind: &'static str, name: &str| WorldError::DuplicateName {
        model: model.clone(),
        kind,
        name: name.to_string(),
    };

    let mut frame_names = HashSet::new();
    for body in &description.bodies {
        if !frame_names.insert(body.name.as_str()) {
            return Err(duplicate("body", &body.name));
        }
    }
    let body_names: HashSet<&str> = description.bodies.iter().map(|b| b.name.as_str()).collect();
    let unknown = |context: String, body: &str| WorldError::UnknownBody {
        model: model.clone(),
        context,
        body: body.to_string(),
    };

    for frame in &description.frames {
        if !body_names.contains(frame.body.as_str()) {
            return Err(unknown(format!("frame `{}`", frame.name), &frame.body));
        }
        if !frame_names.insert(frame.name.as_str()) {
            return Err(duplicate("frame", &frame.name));
        }
    }

    let mut joint_names = HashSet::new();
    let mut parent_of = std::collections::HashMap::new();
    for joint in &description.joints {
        if !joint_names.insert(joint.name.as_str()) {
            return Err(duplicate("joint", &joint.name));
        }
        for body in [&joint.parent, &joint.child] {
            if !body_names.contains(body.as_str()) {
                return Err(unknown(format!("joint `{}`", joint.name), body));
            }
        }
        if parent_of
            .insert(joint.child.as_str(), joint.parent.as_str())
            .is_some()
        {
            return Err(WorldError::AlreadyConnected {
                body: joint.child.clone(),
            });
        }
    }

    for joint in &description.joints {
        let mut current = joint.parent.as_str();
        for _ in 0..=description.joints.len() {
            if current == joint.child {
                return Err(WorldError::KinematicLoop {
                    parent: joint.parent.clone(),
                    child: joint.child.clone(),
                });
            }
            match parent_of.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{BodyDescription, JointDescription};
    use std::f32::consts::FRAC_PI_2;

    fn hinge_pair() -> ModelDescription {
        let mut model = ModelDescription::new("pair");
        model.add_body(BodyDescription::from_shape("base", ShapePrimitive::Sphere(0.1), 100.0));
        model.add_body(BodyDescription::from_shape("arm", ShapePrimitive::Sphere(0.1), 100.0));
        model.add_joint(JointDescription {
            name: "hinge".into(),
            parent: "base".into(),
            child: "arm".into(),
            parent_pose: RigidTransform::from_translation(Vec3::new(0.0, 0.0, 1.0)),
            child_pose: RigidTransform::from_translation(Vec3::new(-1.0, 0.0, 0.0)),
            joint_type: JointType::Revolute,
            axis: Vec3::Z,
            limits: None,
        });
        model
    }

    fn loaded() -> (MultibodyWorld, ModelInstanceId) {
        let mut world = MultibodyWorld::new("test", 0.001, Vec3::new(0.0, 0.0, -9.81));
        let instance = world.add_model(&hinge_pair(), "pair").unwrap();
        let base = world.frame_by_name("base", instance).unwrap();
        world
            .weld_frames(world.world_frame(), base, RigidTransform::IDENTITY)
            .unwrap();
        (world, instance)
    }

    #[test]
    fn forward_kinematics_follows_joint_angle() {
        let (mut world, instance) = loaded();
        world.finalize().unwrap();
        let arm = world.frame_by_name("arm", instance).unwrap();
        let at_zero = world.frame_pose_in_world(arm).unwrap();
        assert!(at_zero.translation.abs_diff_eq(Vec3::new(1.0, 0.0, 1.0), 1e-6));

        let hinge = world.revolute_joint("hinge", instance).unwrap();
        world.set_joint_position(hinge, FRAC_PI_2).unwrap();
        let turned = world.frame_pose_in_world(arm).unwrap();
        assert!(turned.translation.abs_diff_eq(Vec3::new(0.0, 1.0, 1.0), 1e-6));
    }

    #[test]
    fn finalize_is_one_way() {
        let (mut world, instance) = loaded();
        world.finalize().unwrap();
        assert!(matches!(world.finalize(), Err(WorldError::Finalized { .. })));
        assert!(matches!(
            world.add_model(&hinge_pair(), "again"),
            Err(WorldError::Finalized { .. })
        ));
        assert_eq!(world.instance_state(instance).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn state_requires_finalize() {
        let (world, instance) = loaded();
        let hinge = world.joint_by_name("hinge", instance).unwrap();
        assert!(matches!(
            world.joint_position(hinge),
            Err(WorldError::NotFinalized { .. })
        ));
    }

    #[test]
    fn capability_checked_lookup_rejects_wrong_kind() {
        let (world, instance) = loaded();
        let err = world.prismatic_joint("hinge", instance).unwrap_err();
        assert!(matches!(
            err,
            WorldError::JointKind {
                expected: JointType::Prismatic,
                actual: JointType::Revolute,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_instance_and_double_weld_are_rejected() {
        let (mut world, instance) = loaded();
        assert!(matches!(
            world.add_model(&hinge_pair(), "pair"),
            Err(WorldError::DuplicateInstance(_))
        ));
        let base = world.frame_by_name("base", instance).unwrap();
        assert!(matches!(
            world.weld_frames(world.world_frame(), base, RigidTransform::IDENTITY),
            Err(WorldError::AlreadyConnected { .. })
        ));
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let (world, instance) = loaded();
        let other = MultibodyWorld::new("other", 0.0, Vec3::ZERO);
        let base = world.frame_by_name("base", instance).unwrap();
        assert!(matches!(other.frame(base), Err(WorldError::ForeignHandle { .. })));
    }

    #[test]
    fn anchored_only_through_welds() {
        let (world, instance) = loaded();
        let base = world.frame_by_name("base", instance).unwrap();
        let arm = world.frame_by_name("arm", instance).unwrap();
        assert!(world.frame_is_anchored(world.world_frame()).unwrap());
        assert!(world.frame_is_anchored(base).unwrap());
        assert!(!world.frame_is_anchored(arm).unwrap());
    }

    #[test]
    fn description_loops_are_rejected_before_loading() {
        let mut model = hinge_pair();
        model.add_joint(JointDescription {
            name: "back".into(),
            parent: "arm".into(),
            child: "base".into(),
            parent_pose: RigidTransform::IDENTITY,
            child_pose: RigidTransform::IDENTITY,
            joint_type: JointType::Fixed,
            axis: Vec3::Z,
            limits: None,
        });
        let mut world = MultibodyWorld::new("test", 0.0, Vec3::ZERO);
        assert!(matches!(
            world.add_model(&model, "loop"),
            Err(WorldError::KinematicLoop { .. })
        ));
        assert!(!world.has_instance("loop"));
    }

    #[test]
    fn actuation_is_sized_per_instance() {
        let (mut world, instance) = loaded();
        assert!(matches!(
            world.set_actuation(instance, &[1.0]),
            Err(WorldError::NotFinalized { .. })
        ));
        world.finalize().unwrap();

        assert_eq!(world.actuation(instance).unwrap(), vec![0.0]);
        world.set_actuation(instance, &[2.5]).unwrap();
        assert_eq!(world.actuation(instance).unwrap(), vec![2.5]);
        assert!(matches!(
            world.set_actuation(instance, &[1.0, 2.0]),
            Err(WorldError::StateSize {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn contact_forces_start_at_zero() {
        let (mut world, instance) = loaded();
        world.finalize().unwrap();
        assert_eq!(world.generalized_contact_forces(instance).unwrap(), vec![0.0]);
        assert_eq!(world.contact_results().unwrap().num_contacts(), 0);

        world.set_generalized_contact_forces(instance, &[-0.3]).unwrap();
        assert_eq!(world.generalized_contact_forces(instance).unwrap(), vec![-0.3]);
    }

    #[test]
    fn contact_results_sum_per_body() {
        let (mut world, instance) = loaded();
        world.finalize().unwrap();
        let base = world.frame(world.frame_by_name("base", instance).unwrap()).unwrap().body();
        let arm = world.frame(world.frame_by_name("arm", instance).unwrap()).unwrap().body();

        let push = Vec3::new(0.0, 0.0, 4.0);
        world
            .set_contact_results(ContactResults {
                pairs: vec![ContactPair {
                    body_a: base,
                    body_b: arm,
                    point: Vec3::new(1.0, 0.0, 1.0),
                    force: push,
                }],
            })
            .unwrap();

        let results = world.contact_results().unwrap();
        assert_eq!(results.net_force_on(arm), push);
        assert_eq!(results.net_force_on(base), -push);
        assert_eq!(results.net_force_on(world.world_body()), Vec3::ZERO);

        let stray = ContactResults {
            pairs: vec![ContactPair {
                body_a: base,
                body_b: BodyIndex(99),
                point: Vec3::ZERO,
                force: Vec3::ZERO,
            }],
        };
        assert!(matches!(
            world.set_contact_results(stray),
            Err(WorldError::ForeignHandle { .. })
        ));
        assert_eq!(world.contact_results().unwrap().num_contacts(), 1);
    }

    #[test]
    fn pose_bundle_names_every_body() {
        let (mut world, _) = loaded();
        world.finalize().unwrap();
        let bundle = world.pose_bundle();
        assert_eq!(bundle.len(), 2);
        let arm = bundle.pose("pair", "arm").unwrap();
        assert!(arm.translation.abs_diff_eq(Vec3::new(1.0, 0.0, 1.0), 1e-6));
        assert!(bundle.pose("pair", "missing").is_none());
    }
}
