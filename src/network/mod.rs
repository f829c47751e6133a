//! The assembled signal-flow network and its exported ports.
//!
//! A [`Network`] exists only once a station is built. It owns the finalized world,
//! the control model (inside the manipulator controller), the stateful blocks,
//! and the cameras, and it offers the direct state setters that keep the
//! interpolators' history consistent with the world.

pub mod assembler;
pub mod blocks;
pub mod diagram;

use crate::control_model::{ControlModel, InverseDynamics};
use crate::error::StationError;
use crate::registry::Role;
use crate::render::{CameraImages, RgbdCamera};
use crate::world::{
    ContactResults, GeometryPose, JointIndex, ModelInstanceId, MultibodyWorld, PoseBundle,
};
use blocks::{
    Adder, Demultiplexer, EndEffectorCommand, EndEffectorController, EndEffectorStateMap,
    InverseDynamicsController, PassThrough, StateInterpolator,
};
use diagram::{Diagram, ExportedPort, PortDirection};
use std::collections::BTreeMap;
use std::fmt;

pub use assembler::NetworkAssembler;

/// Names of the ports exported on the network boundary.
pub mod ports {
    pub const MANIPULATOR_POSITION: &str = "manipulator_position";
    pub const MANIPULATOR_FEEDFORWARD_TORQUE: &str = "manipulator_feedforward_torque";
    pub const END_EFFECTOR_POSITION: &str = "end_effector_position";
    pub const END_EFFECTOR_FORCE_LIMIT: &str = "end_effector_force_limit";

    pub const MANIPULATOR_POSITION_COMMANDED: &str = "manipulator_position_commanded";
    pub const MANIPULATOR_POSITION_MEASURED: &str = "manipulator_position_measured";
    pub const MANIPULATOR_VELOCITY_ESTIMATED: &str = "manipulator_velocity_estimated";
    pub const MANIPULATOR_STATE_ESTIMATED: &str = "manipulator_state_estimated";
    pub const MANIPULATOR_TORQUE_COMMANDED: &str = "manipulator_torque_commanded";
    pub const MANIPULATOR_TORQUE_MEASURED: &str = "manipulator_torque_measured";
    pub const MANIPULATOR_TORQUE_EXTERNAL: &str = "manipulator_torque_external";
    pub const END_EFFECTOR_STATE_MEASURED: &str = "end_effector_state_measured";
    pub const END_EFFECTOR_FORCE_MEASURED: &str = "end_effector_force_measured";
    pub const POSE_BUNDLE: &str = "pose_bundle";
    pub const CONTACT_RESULTS: &str = "contact_results";
    pub const PLANT_CONTINUOUS_STATE: &str = "plant_continuous_state";
    pub const GEOMETRY_POSES: &str = "geometry_poses";

    pub fn camera_rgb_image(camera: &str) -> String {
        format!("camera_{camera}_rgb_image")
    }

    pub fn camera_depth_image(camera: &str) -> String {
        format!("camera_{camera}_depth_image")
    }

    pub fn camera_label_image(camera: &str) -> String {
        format!("camera_{camera}_label_image")
    }
}

/// Build phase of a station's network. `Built` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkState {
    Unbuilt,
    Built,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unbuilt => "unbuilt",
            Self::Built => "built",
        })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ManipulatorChain {
    pub instance: ModelInstanceId,
    pub joints: Vec<JointIndex>,
    pub position: PassThrough,
    pub demux: Demultiplexer,
    pub interpolator: StateInterpolator,
    pub controller: InverseDynamicsController,
    pub feedforward: Adder,
}

#[derive(Clone, Debug)]
pub(crate) struct EndEffectorChain {
    pub instance: ModelInstanceId,
    pub left: JointIndex,
    pub right: JointIndex,
    pub controller: EndEffectorController,
    pub state_map: EndEffectorStateMap,
}

/// Everything the assembler produces before the world is finalized and moved in.
#[derive(Clone, Debug)]
pub(crate) struct NetworkParts {
    pub diagram: Diagram,
    pub manipulator: ManipulatorChain,
    pub end_effector: EndEffectorChain,
    pub cameras: BTreeMap<String, RgbdCamera>,
}

impl NetworkParts {
    pub fn into_network(self, world: MultibodyWorld) -> Network {
        Network {
            diagram: self.diagram,
            world,
            manipulator: self.manipulator,
            end_effector: self.end_effector,
            cameras: self.cameras,
        }
    }
}

/// The built station: a finalized world plus the controllers and cameras wired
/// around it.
#[derive(Clone, Debug)]
pub struct Network {
    diagram: Diagram,
    world: MultibodyWorld,
    manipulator: ManipulatorChain,
    end_effector: EndEffectorChain,
    cameras: BTreeMap<String, RgbdCamera>,
}

impl Network {
    pub fn diagram(&self) -> &Diagram {
        &self.diagram
    }

    pub fn world(&self) -> &MultibodyWorld {
        &self.world
    }

    /// Mutable access for a simulation driver writing integrated state back.
    ///
    /// Edits made here bypass the interpolators; use the position setters on
    /// [`Network`] to keep their history in step.
    pub fn world_mut(&mut self) -> &mut MultibodyWorld {
        &mut self.world
    }

    pub fn control_model(&self) -> &ControlModel {
        self.manipulator.controller.control_model()
    }

    pub fn manipulator_instance(&self) -> ModelInstanceId {
        self.manipulator.instance
    }

    pub fn end_effector_instance(&self) -> ModelInstanceId {
        self.end_effector.instance
    }

    pub fn manipulator_dof(&self) -> usize {
        self.manipulator.joints.len()
    }

    pub fn interpolator(&self) -> &StateInterpolator {
        &self.manipulator.interpolator
    }

    pub fn interpolator_mut(&mut self) -> &mut StateInterpolator {
        &mut self.manipulator.interpolator
    }

    pub fn manipulator_controller(&self) -> &InverseDynamicsController {
        &self.manipulator.controller
    }

    pub fn manipulator_controller_mut(&mut self) -> &mut InverseDynamicsController {
        &mut self.manipulator.controller
    }

    pub fn end_effector_controller(&self) -> &EndEffectorController {
        &self.end_effector.controller
    }

    pub fn end_effector_controller_mut(&mut self) -> &mut EndEffectorController {
        &mut self.end_effector.controller
    }

    pub fn input_port(&self, name: &str) -> Result<&ExportedPort, StationError> {
        self.diagram
            .input_port(name)
            .ok_or_else(|| StationError::UnknownPort {
                direction: PortDirection::Input,
                name: name.to_string(),
            })
    }

    pub fn output_port(&self, name: &str) -> Result<&ExportedPort, StationError> {
        self.diagram
            .output_port(name)
            .ok_or_else(|| StationError::UnknownPort {
                direction: PortDirection::Output,
                name: name.to_string(),
            })
    }

    // --- Direct state access -------------------------------------------------

    pub fn manipulator_position(&self) -> Result<Vec<f32>, StationError> {
        self.manipulator
            .joints
            .iter()
            .map(|&j| self.world.joint_position(j).map_err(StationError::from))
            .collect()
    }

    /// Sets the manipulator's joint positions and resets the interpolator history
    /// to match, so holding this position commands zero velocity.
    pub fn set_manipulator_position(&mut self, q: &[f32]) -> Result<(), StationError> {
        self.check_manipulator_len(q)?;
        self.manipulator.interpolator.set_initial_position(q)?;
        for (&joint, &value) in self.manipulator.joints.iter().zip(q) {
            self.world.set_joint_position(joint, value)?;
        }
        Ok(())
    }

    pub fn manipulator_velocity(&self) -> Result<Vec<f32>, StationError> {
        self.manipulator
            .joints
            .iter()
            .map(|&j| self.world.joint_velocity(j).map_err(StationError::from))
            .collect()
    }

    pub fn set_manipulator_velocity(&mut self, v: &[f32]) -> Result<(), StationError> {
        self.check_manipulator_len(v)?;
        for (&joint, &value) in self.manipulator.joints.iter().zip(v) {
            self.world.set_joint_velocity(joint, value)?;
        }
        Ok(())
    }

    /// Finger separation: right finger travel minus left finger travel.
    pub fn end_effector_position(&self) -> Result<f32, StationError> {
        Ok(self.world.joint_position(self.end_effector.right)?
            - self.world.joint_position(self.end_effector.left)?)
    }

    /// Opens the fingers symmetrically to `width` and resets the end-effector
    /// controller's history to match.
    pub fn set_end_effector_position(&mut self, width: f32) -> Result<(), StationError> {
        self.end_effector.controller.set_initial_position(width)?;
        self.world.set_joint_position(self.end_effector.right, width / 2.0)?;
        self.world.set_joint_position(self.end_effector.left, -width / 2.0)?;
        Ok(())
    }

    pub fn end_effector_velocity(&self) -> Result<f32, StationError> {
        Ok(self.world.joint_velocity(self.end_effector.right)?
            - self.world.joint_velocity(self.end_effector.left)?)
    }

    pub fn set_end_effector_velocity(&mut self, rate: f32) -> Result<(), StationError> {
        self.world.set_joint_velocity(self.end_effector.right, rate / 2.0)?;
        self.world.set_joint_velocity(self.end_effector.left, -rate / 2.0)?;
        Ok(())
    }

    // --- Output evaluation ---------------------------------------------------

    /// `manipulator_state_estimated`: the manipulator's `[q, v]`.
    pub fn manipulator_state_estimated(&self) -> Result<Vec<f32>, StationError> {
        Ok(self.world.instance_state(self.manipulator.instance)?)
    }

    /// `manipulator_position_measured`.
    pub fn manipulator_position_measured(&self) -> Result<Vec<f32>, StationError> {
        self.demuxed_state(0)
    }

    /// `manipulator_velocity_estimated`.
    pub fn manipulator_velocity_estimated(&self) -> Result<Vec<f32>, StationError> {
        self.demuxed_state(1)
    }

    /// `manipulator_torque_commanded` for the given inputs: the inverse-dynamics
    /// controller's torque tracking `position_command`, plus `feedforward`.
    pub fn manipulator_torque_commanded(
        &self,
        dynamics: &dyn InverseDynamics,
        position_command: &[f32],
        feedforward: &[f32],
    ) -> Result<Vec<f32>, StationError> {
        self.check_manipulator_len(position_command)?;
        self.check_manipulator_len(feedforward)?;
        let commanded = self.manipulator.position.output(position_command);
        let desired = self.manipulator.interpolator.desired_state(&commanded)?;
        let estimated = self.manipulator_state_estimated()?;
        let control = self.manipulator.controller.control(dynamics, &estimated, &desired)?;
        Ok(self.manipulator.feedforward.output(&[&control, feedforward]))
    }

    /// `end_effector_state_measured`: `[width, width rate]`.
    pub fn end_effector_state_measured(&self) -> Result<[f32; 2], StationError> {
        let state = self.world.instance_state(self.end_effector.instance)?;
        self.end_effector.state_map.output(&state)
    }

    /// The end-effector controller's output for the given inputs.
    pub fn end_effector_command(
        &self,
        desired_width: f32,
        force_limit: f32,
    ) -> Result<EndEffectorCommand, StationError> {
        let state = self.world.instance_state(self.end_effector.instance)?;
        self.end_effector
            .controller
            .output(&state, desired_width, force_limit)
    }

    /// Evaluates both controllers for the given inputs and writes their outputs
    /// to the world's actuation, where a simulation driver picks them up.
    pub fn actuate(
        &mut self,
        dynamics: &dyn InverseDynamics,
        position_command: &[f32],
        feedforward: &[f32],
        desired_width: f32,
        force_limit: f32,
    ) -> Result<(), StationError> {
        let torque = self.manipulator_torque_commanded(dynamics, position_command, feedforward)?;
        let grip = self.end_effector_command(desired_width, force_limit)?;
        self.world.set_actuation(self.manipulator.instance, &torque)?;
        self.world
            .set_actuation(self.end_effector.instance, &grip.generalized_force)?;
        Ok(())
    }

    /// `manipulator_torque_measured`: the torque last applied to the manipulator.
    pub fn manipulator_torque_measured(&self) -> Result<Vec<f32>, StationError> {
        Ok(self.world.actuation(self.manipulator.instance)?)
    }

    /// `manipulator_torque_external`: generalized contact forces on the manipulator.
    pub fn manipulator_torque_external(&self) -> Result<Vec<f32>, StationError> {
        Ok(self
            .world
            .generalized_contact_forces(self.manipulator.instance)?)
    }

    /// `end_effector_force_measured`: the grip force last applied to the fingers.
    pub fn end_effector_force_measured(&self) -> Result<f32, StationError> {
        let applied = self.world.actuation(self.end_effector.instance)?;
        self.end_effector.controller.layout().grip_force(&applied)
    }

    pub fn plant_continuous_state(&self) -> Result<Vec<f32>, StationError> {
        Ok(self.world.continuous_state()?)
    }

    pub fn geometry_poses(&self) -> Vec<GeometryPose> {
        self.world.geometry_poses()
    }

    pub fn pose_bundle(&self) -> PoseBundle {
        self.world.pose_bundle()
    }

    pub fn contact_results(&self) -> Result<&ContactResults, StationError> {
        Ok(self.world.contact_results()?)
    }

    /// Latches the period's commands into the stateful blocks.
    pub fn advance(
        &mut self,
        position_command: &[f32],
        desired_width: f32,
    ) -> Result<(), StationError> {
        self.check_manipulator_len(position_command)?;
        let desired = self.manipulator.interpolator.desired_state(position_command)?;
        let estimated = self.manipulator_state_estimated()?;
        let dt = self.manipulator.interpolator.time_step();
        self.manipulator.controller.advance(&estimated, &desired, dt)?;
        self.manipulator.interpolator.advance(position_command)?;
        self.end_effector.controller.advance(desired_width)
    }

    // --- Cameras -------------------------------------------------------------

    pub fn camera_names(&self) -> impl Iterator<Item = &str> {
        self.cameras.keys().map(String::as_str)
    }

    pub fn camera(&self, name: &str) -> Result<&RgbdCamera, StationError> {
        self.cameras
            .get(name)
            .ok_or_else(|| StationError::UnknownCamera(name.to_string()))
    }

    pub fn capture(&self, name: &str) -> Result<CameraImages, StationError> {
        Ok(self.camera(name)?.capture(&self.world)?)
    }

    fn demuxed_state(&self, index: usize) -> Result<Vec<f32>, StationError> {
        let state = self.manipulator_state_estimated()?;
        Ok(self
            .manipulator
            .demux
            .outputs(&state)
            .into_iter()
            .nth(index)
            .unwrap_or_default())
    }

    fn check_manipulator_len(&self, values: &[f32]) -> Result<(), StationError> {
        if values.len() != self.manipulator.joints.len() {
            return Err(StationError::CommandLength {
                role: Role::Manipulator,
                expected: self.manipulator.joints.len(),
                actual: values.len(),
            });
        }
        Ok(())
    }
}
