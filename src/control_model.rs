//! The reduced model the manipulator controller computes dynamics against.
//!
//! It holds a fresh copy of the manipulator, welded the way the real one is, with
//! the whole end effector collapsed into one rigid body. Fingers, cameras and
//! furniture are left out.

use crate::composite::SubAssembly;
use crate::error::StationError;
use crate::inertia::SpatialInertia;
use crate::registry::{ModelRegistry, Role};
use crate::world::{BodyIndex, ModelInstanceId, MultibodyWorld, WorldError};
use tracing::{debug, info};

pub const CONTROL_MODEL_NAME: &str = "control_model";
pub const CONTROL_MANIPULATOR_NAME: &str = "manipulator";
pub const COMPOSITE_BODY_NAME: &str = "end_effector_equivalent";

/// External solver for the manipulator's inverse dynamics.
///
/// Given the model, joint positions `q`, velocities `v` and a desired acceleration,
/// returns the generalized forces that realize it.
pub trait InverseDynamics {
    fn inverse_dynamics(
        &self,
        model: &MultibodyWorld,
        positions: &[f32],
        velocities: &[f32],
        accelerations: &[f32],
    ) -> Result<Vec<f32>, WorldError>;
}

/// The finalized control world and the handles the controller needs from it.
#[derive(Clone, Debug)]
pub struct ControlModel {
    world: MultibodyWorld,
    manipulator: ModelInstanceId,
    end_effector_body: BodyIndex,
    composite: SpatialInertia,
}

impl ControlModel {
    /// Builds the control model for the manipulator and end effector held by
    /// `registry`, whose handles were issued by `plant`.
    ///
    /// Only reads `plant`; the gravity is copied from it.
    pub fn build(registry: &ModelRegistry, plant: &MultibodyWorld) -> Result<Self, StationError> {
        let manipulator = registry.manipulator().ok_or(StationError::MissingRole {
            role: Role::Manipulator,
        })?;
        let end_effector = registry.end_effector().ok_or(StationError::MissingRole {
            role: Role::EndEffector,
        })?;

        let manipulator_child = plant.frame(manipulator.child())?.name();
        let end_effector_parent = plant.frame(end_effector.parent())?.name();
        let end_effector_child = plant.frame(end_effector.child())?.name();

        // Collapse the end effector in a scratch world so the plant is never touched.
        let mut scratch = MultibodyWorld::new("end_effector_scratch", 0.0, plant.gravity());
        let scratch_instance = scratch.add_model(end_effector.description(), "end_effector")?;
        let assembly = SubAssembly::from_instance(&scratch, scratch_instance, end_effector_child)?;
        let composite = assembly.synthesize();
        // X_BC: the registered child frame in the composite body's frame.
        let x_bc = scratch
            .frame(scratch.frame_by_name(end_effector_child, scratch_instance)?)?
            .pose_in_body();

        let mut world = MultibodyWorld::new(CONTROL_MODEL_NAME, 0.0, plant.gravity());
        let instance = world.add_model(manipulator.description(), CONTROL_MANIPULATOR_NAME)?;
        let base = world.frame_by_name(manipulator_child, instance)?;
        world.weld_frames(world.world_frame(), base, manipulator.relative_transform())?;

        let body = world.add_rigid_body(COMPOSITE_BODY_NAME, instance, composite)?;
        let mount = world.frame_by_name(end_effector_parent, instance)?;
        let body_frame = world
            .body_frame(body)
            .ok_or_else(|| WorldError::UnknownFrame {
                name: COMPOSITE_BODY_NAME.to_string(),
                instance: CONTROL_MANIPULATOR_NAME.to_string(),
            })?;
        world.weld_frames(mount, body_frame, end_effector.relative_transform() * x_bc.inverse())?;
        debug!(
            mount = end_effector_parent,
            mass = composite.mass(),
            "welded composite end effector"
        );

        world.finalize()?;
        info!(dofs = world.num_positions(), "control model built");
        Ok(Self {
            world,
            manipulator: instance,
            end_effector_body: body,
            composite,
        })
    }

    pub fn world(&self) -> &MultibodyWorld {
        &self.world
    }

    pub fn manipulator(&self) -> ModelInstanceId {
        self.manipulator
    }

    pub fn end_effector_body(&self) -> BodyIndex {
        self.end_effector_body
    }

    /// Mass properties of the collapsed end effector about its body origin.
    pub fn composite(&self) -> SpatialInertia {
        self.composite
    }

    pub fn dof(&self) -> usize {
        self.world.num_positions()
    }
}
