//! Wiring the station's blocks around the world.

use super::blocks::{
    Adder, Demultiplexer, EndEffectorController, EndEffectorStateMap, FingerLayout,
    InverseDynamicsController, PassThrough, StateInterpolator,
};
use super::diagram::{Block, BlockId, BlockKind, Diagram, ImageKind, PortSpec};
use super::{EndEffectorChain, ManipulatorChain, NetworkParts, ports};
use crate::config::StationConfig;
use crate::control_model::ControlModel;
use crate::error::StationError;
use crate::registry::{ModelRegistry, RegistryState, Role};
use crate::render::{RenderEngine, RgbdCamera};
use crate::world::{JointIndex, ModelInstanceId, MultibodyWorld, WorldError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const PLANT: &str = "plant";
const SCENE_GRAPH: &str = "scene_graph";
const QUERY_OBJECT: &str = "QueryObject";
const GEOMETRY_POSES: &str = "GeometryPoses";

/// Builds the station's block diagram from a finalized registry.
///
/// The assembler only reads the world; finalizing it and handing it to the
/// network is the caller's last step, so a failed assembly changes nothing.
pub struct NetworkAssembler<'a> {
    config: &'a StationConfig,
    registry: &'a ModelRegistry,
    renderer: &'a Arc<dyn RenderEngine>,
}

impl<'a> NetworkAssembler<'a> {
    pub fn new(
        config: &'a StationConfig,
        registry: &'a ModelRegistry,
        renderer: &'a Arc<dyn RenderEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            renderer,
        }
    }

    pub(crate) fn assemble(&self, world: &MultibodyWorld) -> Result<NetworkParts, StationError> {
        if self.registry.state() != RegistryState::Finalized {
            return Err(StationError::RegistrySequence {
                operation: "build",
                state: self.registry.state(),
            });
        }
        let manipulator = self.registry.manipulator().ok_or(StationError::MissingRole {
            role: Role::Manipulator,
        })?;
        let end_effector = self.registry.end_effector().ok_or(StationError::MissingRole {
            role: Role::EndEffector,
        })?;
        let gains = self
            .registry
            .manipulator_gains()
            .cloned()
            .ok_or(StationError::MissingRole {
                role: Role::Manipulator,
            })?;
        let ee_gains = self.registry.end_effector_gains().ok_or(StationError::MissingRole {
            role: Role::EndEffector,
        })?;

        let control_model = ControlModel::build(self.registry, world)?;

        let manipulator_instance = manipulator.model_identity();
        let joints = world.instance_dof_joints(manipulator_instance)?;
        let n = joints.len();

        let ee_instance = end_effector.model_identity();
        let ee_joints = world.instance_dof_joints(ee_instance)?;
        let m = ee_joints.len();
        let fingers = &self.config.end_effector;
        let left = world.prismatic_joint(&fingers.left_finger_joint, ee_instance)?;
        let right = world.prismatic_joint(&fingers.right_finger_joint, ee_instance)?;
        let layout = FingerLayout {
            left: slot_of(world, &ee_joints, left, ee_instance)?,
            right: slot_of(world, &ee_joints, right, ee_instance)?,
            dof: m,
        };

        let mut diagram = Diagram::new();

        let plant = diagram.add_block(
            Block::new(PLANT, BlockKind::World, false)
                .input(PortSpec::vector("manipulator_actuation", n))
                .input(PortSpec::vector("end_effector_actuation", m))
                .input(PortSpec::value("geometry_query", QUERY_OBJECT))
                .output(PortSpec::vector("manipulator_state", 2 * n))
                .output(PortSpec::vector("end_effector_state", 2 * m))
                .output(PortSpec::vector("continuous_state", 2 * world.num_positions()))
                .output(PortSpec::value("geometry_poses", GEOMETRY_POSES))
                .output(PortSpec::vector("manipulator_contact_forces", n))
                .output(PortSpec::value("contact_results", "ContactResults")),
        )?;
        let scene_graph = diagram.add_block(
            Block::new(SCENE_GRAPH, BlockKind::SceneGraph, true)
                .input(PortSpec::value("source_pose", GEOMETRY_POSES))
                .output(PortSpec::value("query", QUERY_OBJECT))
                .output(PortSpec::value("pose_bundle", "PoseBundle")),
        )?;
        diagram.connect((plant, "geometry_poses"), (scene_graph, "source_pose"))?;
        diagram.connect((scene_graph, "query"), (plant, "geometry_query"))?;
        diagram.export_output(ports::POSE_BUNDLE, (scene_graph, "pose_bundle"))?;
        diagram.export_output(ports::CONTACT_RESULTS, (plant, "contact_results"))?;
        diagram.export_output(ports::PLANT_CONTINUOUS_STATE, (plant, "continuous_state"))?;
        diagram.export_output(ports::GEOMETRY_POSES, (plant, "geometry_poses"))?;

        self.wire_manipulator(&mut diagram, plant, n)?;
        self.wire_end_effector(&mut diagram, plant, m)?;
        let cameras = self.wire_cameras(&mut diagram, scene_graph, world)?;

        diagram.check_complete()?;
        let order = diagram.evaluation_order()?;
        debug!(?order, "evaluation order");
        info!(
            blocks = diagram.num_blocks(),
            connections = diagram.num_connections(),
            cameras = cameras.len(),
            "network assembled"
        );

        let time_step = self.config.time_step;
        Ok(NetworkParts {
            diagram,
            manipulator: ManipulatorChain {
                instance: manipulator_instance,
                joints,
                position: PassThrough { size: n },
                demux: Demultiplexer {
                    input_size: 2 * n,
                    output_size: n,
                },
                interpolator: StateInterpolator::new(Role::Manipulator, n, time_step),
                controller: InverseDynamicsController::new(control_model, gains)?,
                feedforward: Adder { num_inputs: 2, size: n },
            },
            end_effector: EndEffectorChain {
                instance: ee_instance,
                left,
                right,
                controller: EndEffectorController::new(ee_gains, layout, time_step),
                state_map: EndEffectorStateMap { layout },
            },
            cameras,
        })
    }

    fn wire_manipulator(
        &self,
        diagram: &mut Diagram,
        plant: BlockId,
        n: usize,
    ) -> Result<(), StationError> {
        let position = diagram.add_block(
            Block::new("manipulator_position", BlockKind::PassThrough, true)
                .input(PortSpec::vector("u", n))
                .output(PortSpec::vector("y", n)),
        )?;
        diagram.export_input(ports::MANIPULATOR_POSITION, (position, "u"))?;
        diagram.export_output(ports::MANIPULATOR_POSITION_COMMANDED, (position, "y"))?;

        let demux = diagram.add_block(
            Block::new("manipulator_state_demux", BlockKind::Demultiplexer, true)
                .input(PortSpec::vector("u", 2 * n))
                .output(PortSpec::vector("y0", n))
                .output(PortSpec::vector("y1", n)),
        )?;
        diagram.connect((plant, "manipulator_state"), (demux, "u"))?;
        diagram.export_output(ports::MANIPULATOR_POSITION_MEASURED, (demux, "y0"))?;
        diagram.export_output(ports::MANIPULATOR_VELOCITY_ESTIMATED, (demux, "y1"))?;
        diagram.export_output(ports::MANIPULATOR_STATE_ESTIMATED, (plant, "manipulator_state"))?;

        let controller = diagram.add_block(
            Block::new("manipulator_controller", BlockKind::InverseDynamicsController, true)
                .input(PortSpec::vector("estimated_state", 2 * n))
                .input(PortSpec::vector("desired_state", 2 * n))
                .output(PortSpec::vector("control", n)),
        )?;
        diagram.connect((plant, "manipulator_state"), (controller, "estimated_state"))?;

        let adder = diagram.add_block(
            Block::new("feedforward_adder", BlockKind::Adder, true)
                .input(PortSpec::vector("u0", n))
                .input(PortSpec::vector("u1", n))
                .output(PortSpec::vector("sum", n)),
        )?;
        diagram.connect((controller, "control"), (adder, "u0"))?;
        diagram.export_input(ports::MANIPULATOR_FEEDFORWARD_TORQUE, (adder, "u1"))?;
        diagram.connect((adder, "sum"), (plant, "manipulator_actuation"))?;
        diagram.export_output(ports::MANIPULATOR_TORQUE_COMMANDED, (adder, "sum"))?;
        diagram.export_output(ports::MANIPULATOR_TORQUE_MEASURED, (adder, "sum"))?;
        diagram.export_output(
            ports::MANIPULATOR_TORQUE_EXTERNAL,
            (plant, "manipulator_contact_forces"),
        )?;

        let interpolator = diagram.add_block(
            Block::new("desired_state_from_position", BlockKind::StateInterpolator, true)
                .input(PortSpec::vector("position", n))
                .output(PortSpec::vector("state", 2 * n)),
        )?;
        diagram.connect((position, "y"), (interpolator, "position"))?;
        diagram.connect((interpolator, "state"), (controller, "desired_state"))?;
        debug!(dof = n, "wired manipulator control chain");
        Ok(())
    }

    fn wire_end_effector(
        &self,
        diagram: &mut Diagram,
        plant: BlockId,
        m: usize,
    ) -> Result<(), StationError> {
        let controller = diagram.add_block(
            Block::new("end_effector_controller", BlockKind::EndEffectorController, true)
                .input(PortSpec::vector("desired_position", 1))
                .input(PortSpec::vector("force_limit", 1))
                .input(PortSpec::vector("state", 2 * m))
                .output(PortSpec::vector("generalized_force", m))
                .output(PortSpec::vector("grip_force", 1)),
        )?;
        diagram.export_input(ports::END_EFFECTOR_POSITION, (controller, "desired_position"))?;
        diagram.export_input(ports::END_EFFECTOR_FORCE_LIMIT, (controller, "force_limit"))?;
        diagram.connect((plant, "end_effector_state"), (controller, "state"))?;
        diagram.connect((controller, "generalized_force"), (plant, "end_effector_actuation"))?;
        diagram.export_output(ports::END_EFFECTOR_FORCE_MEASURED, (controller, "grip_force"))?;

        let state_map = diagram.add_block(
            Block::new("end_effector_state_map", BlockKind::EndEffectorStateMap, true)
                .input(PortSpec::vector("finger_state", 2 * m))
                .output(PortSpec::vector("state", 2)),
        )?;
        diagram.connect((plant, "end_effector_state"), (state_map, "finger_state"))?;
        diagram.export_output(ports::END_EFFECTOR_STATE_MEASURED, (state_map, "state"))?;
        debug!(dof = m, "wired end-effector control chain");
        Ok(())
    }

    fn wire_cameras(
        &self,
        diagram: &mut Diagram,
        scene_graph: BlockId,
        world: &MultibodyWorld,
    ) -> Result<BTreeMap<String, RgbdCamera>, StationError> {
        let mut cameras = BTreeMap::new();
        for (name, sensor) in self.registry.sensors() {
            let parent = world.frame(sensor.parent)?;
            let camera = diagram.add_block(
                Block::new(format!("camera_{name}"), BlockKind::RgbdCamera, true)
                    .input(PortSpec::value("query", QUERY_OBJECT))
                    .output(PortSpec::image("color_image", ImageKind::Color))
                    .output(PortSpec::image("depth_image", ImageKind::Depth))
                    .output(PortSpec::image("label_image", ImageKind::Label)),
            )?;
            diagram.connect((scene_graph, "query"), (camera, "query"))?;
            diagram.export_output(&ports::camera_rgb_image(name), (camera, "color_image"))?;
            diagram.export_output(&ports::camera_depth_image(name), (camera, "depth_image"))?;
            diagram.export_output(&ports::camera_label_image(name), (camera, "label_image"))?;

            cameras.insert(
                name.clone(),
                RgbdCamera::new(
                    name.clone(),
                    parent.body(),
                    parent.pose_in_body() * sensor.relative_transform,
                    sensor.properties,
                    Arc::clone(self.renderer),
                ),
            );
            debug!(camera = %name, "wired camera");
        }
        Ok(cameras)
    }
}

/// Position of `joint` among an instance's degree-of-freedom joints.
fn slot_of(
    world: &MultibodyWorld,
    joints: &[JointIndex],
    joint: JointIndex,
    instance: ModelInstanceId,
) -> Result<usize, WorldError> {
    joints.iter().position(|&j| j == joint).ok_or_else(|| {
        let name = world.joint(joint).map_or("<unknown>", |j| j.name());
        WorldError::UnknownJoint {
            name: name.to_string(),
            instance: world.instance_name(instance).unwrap_or("<unknown>").to_string(),
        }
    })
}
