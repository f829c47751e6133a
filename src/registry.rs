//! Phase-tagged registration of the station's roles.
//!
//! The registry records which sub-assembly plays the manipulator, which plays the
//! end effector, and which cameras are mounted where, together with the gains
//! the controllers will use. It moves through [`RegistryState`] in one direction
//! only; every operation checks the current phase before touching anything, and
//! a rejected call leaves the registry exactly as it was.

use crate::blueprint::ModelDescription;
use crate::error::StationError;
use crate::render::CameraProperties;
use crate::transform::RigidTransform;
use crate::world::{FrameId, ModelInstanceId, MultibodyWorld};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registration phase. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryState {
    Empty,
    ManipulatorRegistered,
    EndEffectorRegistered,
    Finalized,
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::ManipulatorRegistered => "holding a manipulator",
            Self::EndEffectorRegistered => "holding a manipulator and an end effector",
            Self::Finalized => "finalized",
        })
    }
}

/// The part a sub-assembly plays in the station.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Manipulator,
    EndEffector,
    Sensor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manipulator => "manipulator",
            Self::EndEffector => "end effector",
            Self::Sensor => "sensor",
        })
    }
}

/// Which component of a gain set a validation error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GainField {
    Proportional,
    Integral,
    Derivative,
}

impl fmt::Display for GainField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Proportional => "proportional",
            Self::Integral => "integral",
            Self::Derivative => "derivative",
        })
    }
}

/// How a sub-assembly is attached to the rest of the world.
///
/// The description is shared so the control-model builder can load it again
/// into a world of its own.
#[derive(Clone, Debug)]
pub struct AttachmentDescriptor {
    model_identity: ModelInstanceId,
    description: Arc<ModelDescription>,
    parent: FrameId,
    child: FrameId,
    relative_transform: RigidTransform,
}

impl AttachmentDescriptor {
    /// `relative_transform` is `X_PC`, the child frame's pose in the parent frame.
    pub fn new(
        model_identity: ModelInstanceId,
        description: Arc<ModelDescription>,
        parent: FrameId,
        child: FrameId,
        relative_transform: RigidTransform,
    ) -> Self {
        Self {
            model_identity,
            description,
            parent,
            child,
            relative_transform,
        }
    }

    pub fn model_identity(&self) -> ModelInstanceId {
        self.model_identity
    }

    pub fn description(&self) -> &Arc<ModelDescription> {
        &self.description
    }

    pub fn parent(&self) -> FrameId {
        self.parent
    }

    pub fn child(&self) -> FrameId {
        self.child
    }

    pub fn relative_transform(&self) -> RigidTransform {
        self.relative_transform
    }
}

/// Per-joint PID gains for the manipulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    kp: Vec<f32>,
    ki: Vec<f32>,
    kd: Vec<f32>,
}

impl PidGains {
    pub fn new(kp: Vec<f32>, ki: Vec<f32>, kd: Vec<f32>) -> Self {
        Self { kp, ki, kd }
    }

    /// Derivative gains set for critical damping, `kd = 2 * sqrt(kp)`.
    pub fn critically_damped(kp: Vec<f32>, ki: Vec<f32>) -> Self {
        let kd = kp.iter().map(|k| 2.0 * k.max(0.0).sqrt()).collect();
        Self { kp, ki, kd }
    }

    /// The same critically damped gains on every one of `dof` joints.
    pub fn uniform(dof: usize, kp: f32, ki: f32) -> Self {
        Self::critically_damped(vec![kp; dof], vec![ki; dof])
    }

    pub fn proportional(&self) -> &[f32] {
        &self.kp
    }

    pub fn integral(&self) -> &[f32] {
        &self.ki
    }

    pub fn derivative(&self) -> &[f32] {
        &self.kd
    }

    pub fn dof(&self) -> usize {
        self.kp.len()
    }

    pub(crate) fn validate(&self, role: Role, dof: usize) -> Result<(), StationError> {
        for (field, values) in [
            (GainField::Proportional, &self.kp),
            (GainField::Integral, &self.ki),
            (GainField::Derivative, &self.kd),
        ] {
            validate_gains(role, field, values, dof)?;
        }
        Ok(())
    }
}

/// Scalar PD gains for the end effector's width controller.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PdGains {
    pub kp: f32,
    pub kd: f32,
}

impl PdGains {
    fn validate(&self) -> Result<(), StationError> {
        validate_gains(Role::EndEffector, GainField::Proportional, &[self.kp], 1)?;
        validate_gains(Role::EndEffector, GainField::Derivative, &[self.kd], 1)
    }
}

fn validate_gains(
    role: Role,
    field: GainField,
    values: &[f32],
    dof: usize,
) -> Result<(), StationError> {
    if values.len() != dof {
        return Err(StationError::GainLength {
            role,
            field,
            expected: dof,
            actual: values.len(),
        });
    }
    // NaN fails the comparison too.
    if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| !(**v >= 0.0)) {
        return Err(StationError::NegativeGain {
            role,
            field,
            index,
            value,
        });
    }
    Ok(())
}

/// Where a camera is mounted and how it sees.
#[derive(Clone, Debug)]
pub struct SensorDescriptor {
    pub parent: FrameId,
    /// `X_PC`: camera pose in the parent frame.
    pub relative_transform: RigidTransform,
    pub properties: CameraProperties,
}

#[derive(Clone, Debug)]
struct ManipulatorEntry {
    attachment: AttachmentDescriptor,
    dof: usize,
    gains: PidGains,
}

#[derive(Clone, Debug)]
struct EndEffectorEntry {
    attachment: AttachmentDescriptor,
    gains: PdGains,
}

/// Registry of the station's manipulator, end effector, and cameras.
#[derive(Clone, Debug)]
pub struct ModelRegistry {
    state: RegistryState,
    manipulator: Option<ManipulatorEntry>,
    end_effector: Option<EndEffectorEntry>,
    sensors: BTreeMap<String, SensorDescriptor>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            state: RegistryState::Empty,
            manipulator: None,
            end_effector: None,
            sensors: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    /// Registers the manipulator. Its parent frame must be `world`'s world frame,
    /// and the gains must cover every degree of freedom of its description.
    pub fn register_manipulator(
        &mut self,
        world: &MultibodyWorld,
        attachment: AttachmentDescriptor,
        gains: PidGains,
    ) -> Result<(), StationError> {
        match self.state {
            RegistryState::Empty => {}
            RegistryState::Finalized => return Err(self.out_of_sequence("register_manipulator")),
            _ => {
                return Err(StationError::AlreadyRegistered {
                    role: Role::Manipulator,
                });
            }
        }
        check_attachment(world, Role::Manipulator, &attachment)?;
        if attachment.parent != world.world_frame() {
            return Err(StationError::attachment(
                Role::Manipulator,
                format!(
                    "parent frame `{}` is not the world frame",
                    world.frame(attachment.parent)?.name()
                ),
            ));
        }
        let dof = attachment.description.num_dofs();
        gains.validate(Role::Manipulator, dof)?;

        debug!(
            instance = world.instance_name(attachment.model_identity)?,
            dof, "registered manipulator"
        );
        self.manipulator = Some(ManipulatorEntry {
            attachment,
            dof,
            gains,
        });
        self.state = RegistryState::ManipulatorRegistered;
        Ok(())
    }

    /// Registers the end effector. Its parent frame must belong to the
    /// manipulator's model instance.
    pub fn register_end_effector(
        &mut self,
        world: &MultibodyWorld,
        attachment: AttachmentDescriptor,
        gains: PdGains,
    ) -> Result<(), StationError> {
        self.check_end_effector_open()?;
        let manipulator = self.manipulator.as_ref().ok_or(StationError::MissingRole {
            role: Role::Manipulator,
        })?;
        check_attachment(world, Role::EndEffector, &attachment)?;
        if attachment.parent.model_instance() != manipulator.attachment.model_identity {
            return Err(StationError::attachment(
                Role::EndEffector,
                format!(
                    "parent frame `{}` does not belong to the manipulator `{}`",
                    world.frame(attachment.parent)?.name(),
                    world.instance_name(manipulator.attachment.model_identity)?
                ),
            ));
        }
        gains.validate()?;

        debug!(
            instance = world.instance_name(attachment.model_identity)?,
            parent = world.frame(attachment.parent)?.name(),
            "registered end effector"
        );
        self.end_effector = Some(EndEffectorEntry { attachment, gains });
        self.state = RegistryState::EndEffectorRegistered;
        Ok(())
    }

    /// Succeeds only while an end effector may still be registered: after the
    /// manipulator and before an end effector or finalize.
    pub fn check_end_effector_open(&self) -> Result<(), StationError> {
        match self.state {
            RegistryState::ManipulatorRegistered => Ok(()),
            RegistryState::EndEffectorRegistered => Err(StationError::AlreadyRegistered {
                role: Role::EndEffector,
            }),
            _ => Err(self.out_of_sequence("register_end_effector")),
        }
    }

    /// Registers a camera under `name`. Registering an existing name replaces the
    /// earlier camera.
    pub fn register_sensor(
        &mut self,
        world: &MultibodyWorld,
        name: &str,
        sensor: SensorDescriptor,
    ) -> Result<(), StationError> {
        self.ensure_open("register_sensor")?;
        world.frame(sensor.parent)?;
        sensor.properties.validate()?;
        if self.sensors.insert(name.to_string(), sensor).is_some() {
            warn!(camera = name, "camera re-registered; previous mount replaced");
        } else {
            debug!(camera = name, "registered camera");
        }
        Ok(())
    }

    pub fn set_manipulator_gains(&mut self, gains: PidGains) -> Result<(), StationError> {
        self.ensure_open("set_manipulator_gains")?;
        let entry = self.manipulator_entry_mut()?;
        gains.validate(Role::Manipulator, entry.dof)?;
        entry.gains = gains;
        Ok(())
    }

    pub fn set_manipulator_position_gains(&mut self, kp: Vec<f32>) -> Result<(), StationError> {
        self.replace_manipulator_field("set_manipulator_position_gains", |g| g.kp = kp)
    }

    pub fn set_manipulator_velocity_gains(&mut self, kd: Vec<f32>) -> Result<(), StationError> {
        self.replace_manipulator_field("set_manipulator_velocity_gains", |g| g.kd = kd)
    }

    pub fn set_manipulator_integral_gains(&mut self, ki: Vec<f32>) -> Result<(), StationError> {
        self.replace_manipulator_field("set_manipulator_integral_gains", |g| g.ki = ki)
    }

    pub fn set_end_effector_gains(&mut self, gains: PdGains) -> Result<(), StationError> {
        self.ensure_open("set_end_effector_gains")?;
        let entry = self.end_effector.as_mut().ok_or(StationError::MissingRole {
            role: Role::EndEffector,
        })?;
        gains.validate()?;
        entry.gains = gains;
        Ok(())
    }

    /// Closes registration. Requires both the manipulator and the end effector.
    pub fn finalize(&mut self) -> Result<(), StationError> {
        match self.state {
            RegistryState::EndEffectorRegistered => {}
            RegistryState::Finalized => return Err(self.out_of_sequence("finalize")),
            RegistryState::Empty => {
                return Err(StationError::MissingRole {
                    role: Role::Manipulator,
                });
            }
            RegistryState::ManipulatorRegistered => {
                return Err(StationError::MissingRole {
                    role: Role::EndEffector,
                });
            }
        }
        self.state = RegistryState::Finalized;
        info!(cameras = self.sensors.len(), "registry finalized");
        Ok(())
    }

    pub fn manipulator(&self) -> Option<&AttachmentDescriptor> {
        self.manipulator.as_ref().map(|m| &m.attachment)
    }

    pub fn manipulator_gains(&self) -> Option<&PidGains> {
        self.manipulator.as_ref().map(|m| &m.gains)
    }

    /// Degrees of freedom of the registered manipulator.
    pub fn manipulator_dof(&self) -> Option<usize> {
        self.manipulator.as_ref().map(|m| m.dof)
    }

    pub fn end_effector(&self) -> Option<&AttachmentDescriptor> {
        self.end_effector.as_ref().map(|e| &e.attachment)
    }

    pub fn end_effector_gains(&self) -> Option<PdGains> {
        self.end_effector.as_ref().map(|e| e.gains)
    }

    pub fn sensors(&self) -> &BTreeMap<String, SensorDescriptor> {
        &self.sensors
    }

    pub fn sensor(&self, name: &str) -> Option<&SensorDescriptor> {
        self.sensors.get(name)
    }

    fn out_of_sequence(&self, operation: &'static str) -> StationError {
        StationError::RegistrySequence {
            operation,
            state: self.state,
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), StationError> {
        if self.state == RegistryState::Finalized {
            return Err(self.out_of_sequence(operation));
        }
        Ok(())
    }

    fn manipulator_entry_mut(&mut self) -> Result<&mut ManipulatorEntry, StationError> {
        self.manipulator.as_mut().ok_or(StationError::MissingRole {
            role: Role::Manipulator,
        })
    }

    fn replace_manipulator_field(
        &mut self,
        operation: &'static str,
        edit: impl FnOnce(&mut PidGains),
    ) -> Result<(), StationError> {
        self.ensure_open(operation)?;
        let entry = self.manipulator_entry_mut()?;
        let mut candidate = entry.gains.clone();
        edit(&mut candidate);
        candidate.validate(Role::Manipulator, entry.dof)?;
        entry.gains = candidate;
        Ok(())
    }
}

/// Handles must come from `world`, and the child frame must belong to the
/// attached instance.
fn check_attachment(
    world: &MultibodyWorld,
    role: Role,
    attachment: &AttachmentDescriptor,
) -> Result<(), StationError> {
    let instance = world.instance_name(attachment.model_identity)?;
    world.frame(attachment.parent)?;
    let child = world.frame(attachment.child)?;
    if attachment.child.model_instance() != attachment.model_identity {
        return Err(StationError::attachment(
            role,
            format!("child frame `{}` is not part of `{instance}`", child.name()),
        ));
    }
    Ok(())
}
