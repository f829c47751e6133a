//! The user-facing station: register roles, finalize, build, then drive.

use crate::blueprint::ModelDescription;
use crate::config::StationConfig;
use crate::error::StationError;
use crate::network::blocks::EndEffectorCommand;
use crate::network::diagram::ExportedPort;
use crate::network::{Network, NetworkAssembler, NetworkState};
use crate::registry::{
    AttachmentDescriptor, ModelRegistry, PdGains, PidGains, RegistryState, SensorDescriptor,
};
use crate::render::{BlankRenderer, CameraImages, CameraProperties, RenderEngine};
use crate::transform::RigidTransform;
use crate::world::{FrameId, ModelInstanceId, MultibodyWorld, WorldError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// World name of the full simulation model.
pub const PLANT_NAME: &str = "plant";

#[derive(Clone, Debug)]
enum Assembly {
    Unbuilt(MultibodyWorld),
    Built(Box<Network>),
}

impl Assembly {
    /// The world, while registration is still possible.
    fn open_world(
        &self,
        operation: &'static str,
        state: RegistryState,
    ) -> Result<&MultibodyWorld, StationError> {
        match self {
            Self::Unbuilt(world) => Ok(world),
            Self::Built(_) => Err(StationError::RegistrySequence { operation, state }),
        }
    }

    fn network_mut(&mut self, operation: &'static str) -> Result<&mut Network, StationError> {
        match self {
            Self::Built(network) => Ok(network),
            Self::Unbuilt(_) => Err(StationError::NetworkSequence {
                operation,
                state: NetworkState::Unbuilt,
            }),
        }
    }
}

/// A fixed-topology workcell: one manipulator, one end effector on it, and any
/// number of cameras.
///
/// Roles are registered while the world is still open, the registry is then
/// finalized, and [`build`](Self::build) wires the network and closes the
/// world. Direct state access is only available after the build.
pub struct Station {
    config: StationConfig,
    registry: ModelRegistry,
    assembly: Assembly,
    renderer: Arc<dyn RenderEngine>,
}

impl Default for Station {
    fn default() -> Self {
        Self::new(StationConfig::default(), Arc::new(BlankRenderer))
    }
}

impl Station {
    pub fn new(config: StationConfig, renderer: Arc<dyn RenderEngine>) -> Self {
        let world = MultibodyWorld::new(PLANT_NAME, config.time_step, config.gravity);
        Self {
            config,
            registry: ModelRegistry::new(),
            assembly: Assembly::Unbuilt(world),
            renderer,
        }
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_state(&self) -> RegistryState {
        self.registry.state()
    }

    pub fn network_state(&self) -> NetworkState {
        match self.assembly {
            Assembly::Unbuilt(_) => NetworkState::Unbuilt,
            Assembly::Built(_) => NetworkState::Built,
        }
    }

    /// The world model, open before the build and finalized after it.
    pub fn world(&self) -> &MultibodyWorld {
        match &self.assembly {
            Assembly::Unbuilt(world) => world,
            Assembly::Built(network) => network.world(),
        }
    }

    /// The open world, for loading furniture or objects before the build.
    pub fn world_mut(&mut self) -> Result<&mut MultibodyWorld, StationError> {
        match &mut self.assembly {
            Assembly::Unbuilt(world) => Ok(world),
            Assembly::Built(_) => Err(StationError::NetworkSequence {
                operation: "world_mut",
                state: NetworkState::Built,
            }),
        }
    }

    pub fn network(&self) -> Result<&Network, StationError> {
        match &self.assembly {
            Assembly::Built(network) => Ok(network),
            Assembly::Unbuilt(_) => Err(StationError::NetworkSequence {
                operation: "network",
                state: NetworkState::Unbuilt,
            }),
        }
    }

    pub fn network_mut(&mut self) -> Result<&mut Network, StationError> {
        self.assembly.network_mut("network_mut")
    }

    // --- Registration --------------------------------------------------------

    /// Loads `description` as instance `name` and welds its frame `child_frame`
    /// to `parent` with `X_PC`.
    ///
    /// Everything is checked before the world is touched.
    pub fn add_and_weld_model(
        &mut self,
        description: &ModelDescription,
        name: &str,
        parent: FrameId,
        child_frame: &str,
        x_pc: RigidTransform,
    ) -> Result<ModelInstanceId, StationError> {
        let world = self.world_mut()?;
        if world.has_instance(name) {
            return Err(WorldError::DuplicateInstance(name.to_string()).into());
        }
        world.frame(parent)?;
        let has_frame = description.bodies.iter().any(|b| b.name == child_frame)
            || description.frames.iter().any(|f| f.name == child_frame);
        if !has_frame {
            return Err(WorldError::UnknownFrame {
                name: child_frame.to_string(),
                instance: name.to_string(),
            }
            .into());
        }

        let instance = world.add_model(description, name)?;
        let child = world.frame_by_name(child_frame, instance)?;
        world.weld_frames(parent, child, x_pc)?;
        debug!(instance = name, frame = child_frame, "added and welded model");
        Ok(instance)
    }

    pub fn register_manipulator(
        &mut self,
        attachment: AttachmentDescriptor,
        gains: PidGains,
    ) -> Result<(), StationError> {
        let world = self
            .assembly
            .open_world("register_manipulator", self.registry.state())?;
        self.registry.register_manipulator(world, attachment, gains)
    }

    /// Registers the end effector. Its instance must carry the two prismatic
    /// finger joints named in the configuration.
    pub fn register_end_effector(
        &mut self,
        attachment: AttachmentDescriptor,
        gains: PdGains,
    ) -> Result<(), StationError> {
        let world = self
            .assembly
            .open_world("register_end_effector", self.registry.state())?;
        self.registry.check_end_effector_open()?;
        let fingers = &self.config.end_effector;
        world.prismatic_joint(&fingers.left_finger_joint, attachment.model_identity())?;
        world.prismatic_joint(&fingers.right_finger_joint, attachment.model_identity())?;
        self.registry.register_end_effector(world, attachment, gains)
    }

    /// Mounts camera `name` on `parent` at `X_PC`. Reusing a name replaces the
    /// earlier camera.
    pub fn register_camera(
        &mut self,
        name: &str,
        parent: FrameId,
        x_pc: RigidTransform,
        properties: CameraProperties,
    ) -> Result<(), StationError> {
        let world = self
            .assembly
            .open_world("register_camera", self.registry.state())?;
        self.registry.register_sensor(
            world,
            name,
            SensorDescriptor {
                parent,
                relative_transform: x_pc,
                properties,
            },
        )
    }

    pub fn set_manipulator_gains(&mut self, gains: PidGains) -> Result<(), StationError> {
        self.registry.set_manipulator_gains(gains)
    }

    pub fn set_manipulator_position_gains(&mut self, kp: Vec<f32>) -> Result<(), StationError> {
        self.registry.set_manipulator_position_gains(kp)
    }

    pub fn set_manipulator_velocity_gains(&mut self, kd: Vec<f32>) -> Result<(), StationError> {
        self.registry.set_manipulator_velocity_gains(kd)
    }

    pub fn set_manipulator_integral_gains(&mut self, ki: Vec<f32>) -> Result<(), StationError> {
        self.registry.set_manipulator_integral_gains(ki)
    }

    pub fn set_end_effector_gains(&mut self, gains: PdGains) -> Result<(), StationError> {
        self.registry.set_end_effector_gains(gains)
    }

    /// Closes registration. The world stays open until [`build`](Self::build).
    pub fn finalize(&mut self) -> Result<(), StationError> {
        self.registry.finalize()
    }

    // --- Build ---------------------------------------------------------------

    /// Builds the control model, wires the network, finalizes the world, and
    /// hands the world to the network.
    ///
    /// Requires a finalized registry. On failure the station is unchanged.
    pub fn build(&mut self) -> Result<(), StationError> {
        let Assembly::Unbuilt(world) = &mut self.assembly else {
            return Err(StationError::NetworkSequence {
                operation: "build",
                state: NetworkState::Built,
            });
        };
        if self.registry.state() != RegistryState::Finalized {
            return Err(StationError::RegistrySequence {
                operation: "build",
                state: self.registry.state(),
            });
        }
        if world.is_finalized() {
            return Err(WorldError::Finalized {
                world: world.name().to_string(),
            }
            .into());
        }

        let parts =
            NetworkAssembler::new(&self.config, &self.registry, &self.renderer).assemble(world)?;
        world.finalize()?;

        let placeholder =
            MultibodyWorld::new(PLANT_NAME, self.config.time_step, self.config.gravity);
        let world = std::mem::replace(world, placeholder);
        self.assembly = Assembly::Built(Box::new(parts.into_network(world)));
        info!("station built");
        Ok(())
    }

    // --- After build ---------------------------------------------------------

    pub fn manipulator_position(&self) -> Result<Vec<f32>, StationError> {
        self.network()?.manipulator_position()
    }

    /// Sets joint positions and resets the position interpolator to match.
    pub fn set_manipulator_position(&mut self, q: &[f32]) -> Result<(), StationError> {
        self.assembly
            .network_mut("set_manipulator_position")?
            .set_manipulator_position(q)
    }

    pub fn manipulator_velocity(&self) -> Result<Vec<f32>, StationError> {
        self.network()?.manipulator_velocity()
    }

    pub fn set_manipulator_velocity(&mut self, v: &[f32]) -> Result<(), StationError> {
        self.assembly
            .network_mut("set_manipulator_velocity")?
            .set_manipulator_velocity(v)
    }

    /// Finger separation, right minus left.
    pub fn end_effector_position(&self) -> Result<f32, StationError> {
        self.network()?.end_effector_position()
    }

    pub fn set_end_effector_position(&mut self, width: f32) -> Result<(), StationError> {
        self.assembly
            .network_mut("set_end_effector_position")?
            .set_end_effector_position(width)
    }

    pub fn end_effector_velocity(&self) -> Result<f32, StationError> {
        self.network()?.end_effector_velocity()
    }

    pub fn set_end_effector_velocity(&mut self, rate: f32) -> Result<(), StationError> {
        self.assembly
            .network_mut("set_end_effector_velocity")?
            .set_end_effector_velocity(rate)
    }

    /// The end-effector controller's command toward `desired_width`, limited to the
    /// configured grip force.
    pub fn end_effector_command(
        &self,
        desired_width: f32,
    ) -> Result<EndEffectorCommand, StationError> {
        self.network()?
            .end_effector_command(desired_width, self.config.end_effector.force_limit)
    }

    /// Names of all registered cameras, in order.
    pub fn camera_names(&self) -> Vec<String> {
        self.registry.sensors().keys().cloned().collect()
    }

    /// World poses of the cameras whose mount is welded to the world. Cameras on
    /// moving bodies are left out.
    pub fn static_camera_poses_in_world(
        &self,
    ) -> Result<BTreeMap<String, RigidTransform>, StationError> {
        let world = self.world();
        let mut poses = BTreeMap::new();
        for (name, sensor) in self.registry.sensors() {
            if world.frame_is_anchored(sensor.parent)? {
                let x_wp = world.frame_pose_in_world(sensor.parent)?;
                poses.insert(name.clone(), x_wp * sensor.relative_transform);
            }
        }
        Ok(poses)
    }

    pub fn capture(&self, camera: &str) -> Result<CameraImages, StationError> {
        self.network()?.capture(camera)
    }

    pub fn input_port(&self, name: &str) -> Result<&ExportedPort, StationError> {
        self.network()?.input_port(name)
    }

    pub fn output_port(&self, name: &str) -> Result<&ExportedPort, StationError> {
        self.network()?.output_port(name)
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("registry", &self.registry.state())
            .field("network", &self.network_state())
            .field("cameras", &self.camera_names())
            .finish_non_exhaustive()
    }
}
