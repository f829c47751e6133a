// tests/station_lifecycle.rs
use glam::Vec3;
use std::sync::Arc;
use workcell_station::network::blocks::InverseDynamicsController;
use workcell_station::network::diagram::PortKind;
use workcell_station::network::ports;
use workcell_station::presets::{self, ARM_BASE_LINK, GRIPPER_BODY};
use workcell_station::registry::GainField;
use workcell_station::world::WorldError;
use workcell_station::{
    AttachmentDescriptor, InverseDynamics, ModelInstanceId, MultibodyWorld, NetworkState, PdGains,
    PidGains, RegistryState, RigidTransform, Role, Station, StationError,
};

/// Unit mass matrix, no bias: torque equals the commanded acceleration.
struct UnitInertia;

impl InverseDynamics for UnitInertia {
    fn inverse_dynamics(
        &self,
        _model: &MultibodyWorld,
        _positions: &[f32],
        _velocities: &[f32],
        accelerations: &[f32],
    ) -> Result<Vec<f32>, WorldError> {
        Ok(accelerations.to_vec())
    }
}

/// Returns only as many torques as it is given positions for, minus one.
struct ShortSolver;

impl InverseDynamics for ShortSolver {
    fn inverse_dynamics(
        &self,
        _model: &MultibodyWorld,
        positions: &[f32],
        _velocities: &[f32],
        _accelerations: &[f32],
    ) -> Result<Vec<f32>, WorldError> {
        Ok(vec![0.0; positions.len() - 1])
    }
}

/// A station holding only the arm, welded at the world origin and registered.
fn station_with_arm() -> (Station, ModelInstanceId) {
    let mut station = Station::default();
    let world_frame = station.world().world_frame();
    let arm = Arc::new(presets::seven_dof_arm());
    let instance = station
        .add_and_weld_model(&arm, "arm", world_frame, ARM_BASE_LINK, RigidTransform::IDENTITY)
        .unwrap();
    let base = station.world().frame_by_name(ARM_BASE_LINK, instance).unwrap();
    station
        .register_manipulator(
            AttachmentDescriptor::new(instance, arm, world_frame, base, RigidTransform::IDENTITY),
            PidGains::uniform(7, 100.0, 1.0),
        )
        .unwrap();
    (station, instance)
}

fn default_station() -> Station {
    let mut station = Station::default();
    presets::setup_default_station(&mut station).unwrap();
    station
}

fn built_station() -> Station {
    let mut station = default_station();
    station.finalize().unwrap();
    station.build().unwrap();
    station
}

#[test]
fn test_default_station_builds() {
    let station = built_station();

    assert_eq!(station.registry_state(), RegistryState::Finalized);
    assert_eq!(station.network_state(), NetworkState::Built);
    assert!(station.world().is_finalized());
    assert_eq!(station.camera_names(), vec!["0", "1", "2"]);

    let network = station.network().unwrap();
    assert_eq!(network.manipulator_dof(), 7);
    assert_eq!(network.control_model().dof(), 7);
}

#[test]
fn test_ports_are_exported_with_sizes() {
    let station = built_station();

    let position = station.input_port(ports::MANIPULATOR_POSITION).unwrap();
    assert_eq!(position.kind, PortKind::Vector(7));
    let width = station.input_port(ports::END_EFFECTOR_POSITION).unwrap();
    assert_eq!(width.kind, PortKind::Vector(1));

    let state = station.output_port(ports::MANIPULATOR_STATE_ESTIMATED).unwrap();
    assert_eq!(state.kind, PortKind::Vector(14));
    let gripper_state = station.output_port(ports::END_EFFECTOR_STATE_MEASURED).unwrap();
    assert_eq!(gripper_state.kind, PortKind::Vector(2));

    for camera in ["0", "1", "2"] {
        assert!(station.output_port(&ports::camera_rgb_image(camera)).is_ok());
        assert!(station.output_port(&ports::camera_depth_image(camera)).is_ok());
        assert!(station.output_port(&ports::camera_label_image(camera)).is_ok());
    }

    assert!(matches!(
        station.output_port("camera_3_rgb_image"),
        Err(StationError::UnknownPort { .. })
    ));
    // An output name is not an input.
    assert!(station.input_port(ports::MANIPULATOR_STATE_ESTIMATED).is_err());
}

#[test]
fn test_build_before_finalize_is_rejected() {
    let mut station = default_station();

    let err = station.build().unwrap_err();
    assert!(matches!(
        err,
        StationError::RegistrySequence {
            operation: "build",
            state: RegistryState::EndEffectorRegistered
        }
    ));

    // Nothing moved: the world is still open and the network unbuilt.
    assert_eq!(station.network_state(), NetworkState::Unbuilt);
    assert!(!station.world().is_finalized());
    assert!(station.world_mut().is_ok());
}

#[test]
fn test_build_twice_is_rejected() {
    let mut station = built_station();
    assert!(matches!(
        station.build(),
        Err(StationError::NetworkSequence {
            operation: "build",
            state: NetworkState::Built
        })
    ));
}

#[test]
fn test_direct_access_requires_build() {
    let mut station = default_station();
    station.finalize().unwrap();

    assert!(matches!(
        station.manipulator_position(),
        Err(StationError::NetworkSequence {
            state: NetworkState::Unbuilt,
            ..
        })
    ));
    assert!(station.set_end_effector_position(0.02).is_err());
    assert!(station.capture("0").is_err());
}

#[test]
fn test_registration_closes_after_finalize() {
    let mut station = default_station();
    station.finalize().unwrap();

    let world_frame = station.world().world_frame();
    let err = station
        .register_camera("late", world_frame, RigidTransform::IDENTITY, Default::default())
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::RegistrySequence {
            state: RegistryState::Finalized,
            ..
        }
    ));
    assert!(station.set_manipulator_position_gains(vec![1.0; 7]).is_err());
    assert!(station.finalize().is_err());
}

#[test]
fn test_end_effector_before_manipulator_is_rejected() {
    let mut station = Station::default();
    let world_frame = station.world().world_frame();
    let gripper = Arc::new(presets::parallel_gripper());
    let instance = station
        .add_and_weld_model(
            &gripper,
            "gripper",
            world_frame,
            GRIPPER_BODY,
            RigidTransform::IDENTITY,
        )
        .unwrap();
    let palm = station.world().frame_by_name(GRIPPER_BODY, instance).unwrap();

    let attachment =
        AttachmentDescriptor::new(instance, gripper, world_frame, palm, RigidTransform::IDENTITY);
    let err = station
        .register_end_effector(attachment, PdGains { kp: 2000.0, kd: 5.0 })
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::RegistrySequence {
            state: RegistryState::Empty,
            ..
        }
    ));
    assert_eq!(station.registry_state(), RegistryState::Empty);
}

#[test]
fn test_finalize_needs_both_roles() {
    let mut station = Station::default();
    assert!(matches!(
        station.finalize(),
        Err(StationError::MissingRole {
            role: Role::Manipulator
        })
    ));

    let world_frame = station.world().world_frame();
    let arm = Arc::new(presets::seven_dof_arm());
    let instance = station
        .add_and_weld_model(&arm, "arm", world_frame, ARM_BASE_LINK, RigidTransform::IDENTITY)
        .unwrap();
    let base = station.world().frame_by_name(ARM_BASE_LINK, instance).unwrap();
    station
        .register_manipulator(
            AttachmentDescriptor::new(instance, arm, world_frame, base, RigidTransform::IDENTITY),
            PidGains::uniform(7, 100.0, 1.0),
        )
        .unwrap();

    assert!(matches!(
        station.finalize(),
        Err(StationError::MissingRole {
            role: Role::EndEffector
        })
    ));
    assert_eq!(station.registry_state(), RegistryState::ManipulatorRegistered);
}

#[test]
fn test_manipulator_must_hang_off_the_world() {
    let mut station = Station::default();
    let world_frame = station.world().world_frame();
    let table = station
        .add_and_weld_model(
            &presets::table(),
            "table",
            world_frame,
            presets::TABLE_TOP,
            presets::table_pose(),
        )
        .unwrap();
    let table_top = station.world().frame_by_name(presets::TABLE_TOP, table).unwrap();

    let arm = Arc::new(presets::seven_dof_arm());
    let instance = station
        .add_and_weld_model(&arm, "arm", table_top, ARM_BASE_LINK, RigidTransform::IDENTITY)
        .unwrap();
    let base = station.world().frame_by_name(ARM_BASE_LINK, instance).unwrap();

    let err = station
        .register_manipulator(
            AttachmentDescriptor::new(instance, arm, table_top, base, RigidTransform::IDENTITY),
            PidGains::uniform(7, 100.0, 1.0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::Attachment {
            role: Role::Manipulator,
            ..
        }
    ));
}

#[test]
fn test_frames_from_another_world_are_rejected() {
    let mut station = Station::default();
    let mut other = MultibodyWorld::new("other", 0.0, Vec3::ZERO);
    let arm = Arc::new(presets::seven_dof_arm());
    let foreign_instance = other.add_model(&arm, "arm").unwrap();
    let foreign_base = other.frame_by_name(ARM_BASE_LINK, foreign_instance).unwrap();

    let world_frame = station.world().world_frame();
    let err = station
        .register_manipulator(
            AttachmentDescriptor::new(
                foreign_instance,
                arm,
                world_frame,
                foreign_base,
                RigidTransform::IDENTITY,
            ),
            PidGains::uniform(7, 100.0, 1.0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::World(WorldError::ForeignHandle { .. })
    ));
}

#[test]
fn test_bad_gains_leave_previous_gains() {
    let mut station = default_station();

    let mut kp = vec![50.0; 7];
    kp[3] = -1.0;
    let err = station.set_manipulator_position_gains(kp).unwrap_err();
    assert!(matches!(
        err,
        StationError::NegativeGain {
            role: Role::Manipulator,
            field: GainField::Proportional,
            index: 3,
            ..
        }
    ));

    let err = station.set_manipulator_velocity_gains(vec![1.0; 6]).unwrap_err();
    assert!(matches!(
        err,
        StationError::GainLength {
            field: GainField::Derivative,
            expected: 7,
            actual: 6,
            ..
        }
    ));

    let err = station.set_manipulator_integral_gains(vec![f32::NAN; 7]).unwrap_err();
    assert!(matches!(err, StationError::NegativeGain { index: 0, .. }));

    let gains = station.registry().manipulator_gains().unwrap();
    assert_eq!(gains.proportional(), &[100.0; 7]);
    assert_eq!(gains.integral(), &[1.0; 7]);

    // A valid update goes through.
    station.set_manipulator_position_gains(vec![50.0; 7]).unwrap();
    let gains = station.registry().manipulator_gains().unwrap();
    assert_eq!(gains.proportional(), &[50.0; 7]);
}

#[test]
fn test_camera_reregistration_replaces_mount() {
    let mut station = default_station();
    let world_frame = station.world().world_frame();
    let moved = RigidTransform::from_translation(Vec3::new(1.0, 2.0, 3.0));

    station
        .register_camera("0", world_frame, moved, Default::default())
        .unwrap();

    assert_eq!(station.camera_names().len(), 3);
    let poses = station.static_camera_poses_in_world().unwrap();
    assert!(poses["0"].abs_diff_eq(&moved, 1e-6));
}

#[test]
fn test_static_camera_poses_match_layout() {
    let station = built_station();
    let poses = station.static_camera_poses_in_world().unwrap();
    let expected = presets::default_camera_poses();

    assert_eq!(poses.len(), expected.len());
    for (name, pose) in &expected {
        assert!(poses[name].abs_diff_eq(pose, 1e-5), "camera {name}");
    }
}

#[test]
fn test_wrist_camera_is_not_static() {
    let mut station = default_station();
    let gripper = station.registry().end_effector().unwrap().child();
    station
        .register_camera("wrist", gripper, RigidTransform::IDENTITY, Default::default())
        .unwrap();

    let poses = station.static_camera_poses_in_world().unwrap();
    assert!(!poses.contains_key("wrist"));
    assert_eq!(poses.len(), 3);
}

#[test]
fn test_capture_uses_camera_resolution() {
    let station = built_station();
    let images = station.capture("1").unwrap();

    let properties = station.config().camera;
    assert_eq!(images.color.width, properties.width);
    assert_eq!(images.depth.height, properties.height);
    assert_eq!(images.label.data.len(), (properties.width * properties.height) as usize);

    assert!(matches!(
        station.capture("9"),
        Err(StationError::UnknownCamera(name)) if name == "9"
    ));
}

#[test]
fn test_manipulator_position_round_trip() {
    let mut station = built_station();
    let q = [0.1, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7];

    station.set_manipulator_position(&q).unwrap();
    assert_eq!(station.manipulator_position().unwrap(), q.to_vec());

    let v = [1.0; 7];
    station.set_manipulator_velocity(&v).unwrap();
    assert_eq!(station.manipulator_velocity().unwrap(), v.to_vec());

    assert!(matches!(
        station.set_manipulator_position(&[0.0; 6]),
        Err(StationError::CommandLength {
            role: Role::Manipulator,
            expected: 7,
            actual: 6
        })
    ));
}

#[test]
fn test_setting_position_resets_interpolator() {
    let mut station = built_station();
    let q = [0.3; 7];

    // Through the station: the interpolator agrees, so holding q is at rest.
    station.set_manipulator_position(&q).unwrap();
    let desired = station.network().unwrap().interpolator().desired_state(&q).unwrap();
    assert!(desired[7..].iter().all(|&v| v == 0.0));

    // Writing the world directly leaves the interpolator's history behind.
    let network = station.network_mut().unwrap();
    let instance = network.manipulator_instance();
    let joints = network.world().instance_dof_joints(instance).unwrap();
    for &joint in &joints {
        network.world_mut().set_joint_position(joint, 0.5).unwrap();
    }
    let desired = network.interpolator().desired_state(&[0.5; 7]).unwrap();
    let dt = station.config().time_step;
    for &v in &desired[7..] {
        assert!((v - 0.2 / dt).abs() < 1e-2);
    }
}

#[test]
fn test_torque_follows_feedforward_at_rest() {
    let mut station = built_station();
    let q = [0.2; 7];
    station.set_manipulator_position(&q).unwrap();

    let feedforward = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
    let torque = station
        .network()
        .unwrap()
        .manipulator_torque_commanded(&UnitInertia, &q, &feedforward)
        .unwrap();
    for (t, f) in torque.iter().zip(feedforward) {
        assert!((t - f).abs() < 1e-4);
    }
}

#[test]
fn test_torque_tracks_position_error() {
    let mut station = built_station();
    station.set_manipulator_position(&[0.0; 7]).unwrap();

    let mut command = [0.0; 7];
    command[0] = 0.01;
    let torque = station
        .network()
        .unwrap()
        .manipulator_torque_commanded(&UnitInertia, &command, &[0.0; 7])
        .unwrap();

    // kp * e + kd * e / dt with kp = 100 and kd = 2 * sqrt(kp) = 20.
    let dt = station.config().time_step;
    let expected = 100.0 * 0.01 + 20.0 * 0.01 / dt;
    assert!((torque[0] - expected).abs() < 1e-2);
    assert!(torque[1..].iter().all(|t| t.abs() < 1e-6));
}

#[test]
fn test_end_effector_width_round_trip() {
    let mut station = built_station();

    station.set_end_effector_position(0.05).unwrap();
    assert!((station.end_effector_position().unwrap() - 0.05).abs() < 1e-6);

    station.set_end_effector_velocity(0.1).unwrap();
    assert!((station.end_effector_velocity().unwrap() - 0.1).abs() < 1e-6);

    let measured = station.network().unwrap().end_effector_state_measured().unwrap();
    assert!((measured[0] - 0.05).abs() < 1e-6);
    assert!((measured[1] - 0.1).abs() < 1e-6);
}

#[test]
fn test_end_effector_grip_is_force_limited() {
    let mut station = built_station();
    station.set_end_effector_position(0.0).unwrap();

    let network = station.network().unwrap();
    let command = network.end_effector_command(0.1, 40.0).unwrap();
    assert!((command.grip_force - 40.0).abs() < 1e-4);

    let relaxed = network.end_effector_command(0.0, 40.0).unwrap();
    assert!(relaxed.grip_force.abs() < 1e-6);

    // Closing hard pushes the fingers toward each other at the configured limit.
    let closing = station.end_effector_command(-0.1).unwrap();
    assert!((closing.grip_force + station.config().end_effector.force_limit).abs() < 1e-4);
    let [left, right] = [closing.generalized_force[0], closing.generalized_force[1]];
    assert!(right < 0.0 && left > 0.0);
}

#[test]
fn test_advance_latches_commands() {
    let mut station = built_station();
    station.set_manipulator_position(&[0.0; 7]).unwrap();

    let command = [0.1; 7];
    station.network_mut().unwrap().advance(&command, 0.04).unwrap();

    let network = station.network().unwrap();
    assert_eq!(network.interpolator().previous_position(), &command);
    assert_eq!(
        network.end_effector_controller().interpolator().previous_position(),
        &[0.04]
    );
    // The position error of 0.1 was integrated over one period.
    let dt = station.config().time_step;
    for &e in network.manipulator_controller().integral() {
        assert!((e - 0.1 * dt).abs() < 1e-6);
    }
}

#[test]
fn test_second_manipulator_is_rejected() {
    let (mut station, _) = station_with_arm();
    let world_frame = station.world().world_frame();
    let arm = Arc::new(presets::seven_dof_arm());
    let shifted = RigidTransform::from_translation(Vec3::new(0.0, 1.0, 0.0));
    let second = station
        .add_and_weld_model(&arm, "second_arm", world_frame, ARM_BASE_LINK, shifted)
        .unwrap();
    let base = station.world().frame_by_name(ARM_BASE_LINK, second).unwrap();

    let err = station
        .register_manipulator(
            AttachmentDescriptor::new(second, arm, world_frame, base, shifted),
            PidGains::uniform(7, 100.0, 1.0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::AlreadyRegistered {
            role: Role::Manipulator
        }
    ));
    assert_eq!(station.registry_state(), RegistryState::ManipulatorRegistered);
}

#[test]
fn test_second_end_effector_is_rejected() {
    let mut station = default_station();
    let arm = station.registry().manipulator().unwrap().model_identity();
    let flange = station.world().frame_by_name(presets::ARM_FLANGE, arm).unwrap();
    let gripper = Arc::new(presets::parallel_gripper());
    let spare = station
        .add_and_weld_model(&gripper, "spare", flange, GRIPPER_BODY, presets::gripper_mount())
        .unwrap();
    let palm = station.world().frame_by_name(GRIPPER_BODY, spare).unwrap();

    let err = station
        .register_end_effector(
            AttachmentDescriptor::new(spare, gripper, flange, palm, presets::gripper_mount()),
            PdGains { kp: 200.0, kd: 5.0 },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::AlreadyRegistered {
            role: Role::EndEffector
        }
    ));
    let gripper = station.world().instance_by_name("gripper").unwrap();
    let registered = station.registry().end_effector().unwrap();
    assert_eq!(registered.model_identity(), gripper);
}

#[test]
fn test_end_effector_must_hang_off_the_manipulator() {
    let (mut station, _) = station_with_arm();
    let world_frame = station.world().world_frame();
    let gripper = Arc::new(presets::parallel_gripper());
    let instance = station
        .add_and_weld_model(
            &gripper,
            "gripper",
            world_frame,
            GRIPPER_BODY,
            RigidTransform::IDENTITY,
        )
        .unwrap();
    let palm = station.world().frame_by_name(GRIPPER_BODY, instance).unwrap();

    let attachment =
        AttachmentDescriptor::new(instance, gripper, world_frame, palm, RigidTransform::IDENTITY);
    let err = station
        .register_end_effector(attachment, PdGains { kp: 200.0, kd: 5.0 })
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::Attachment {
            role: Role::EndEffector,
            ..
        }
    ));
    assert_eq!(station.registry_state(), RegistryState::ManipulatorRegistered);
    assert!(station.registry().end_effector().is_none());
}

#[test]
fn test_sequence_is_checked_before_finger_joints() {
    // The table has no finger joints, so only the sequencing check can fire first.
    let mut station = Station::default();
    let world_frame = station.world().world_frame();
    let table = Arc::new(presets::table());
    let instance = station
        .add_and_weld_model(&table, "table", world_frame, presets::TABLE_TOP, presets::table_pose())
        .unwrap();
    let top = station.world().frame_by_name(presets::TABLE_TOP, instance).unwrap();
    let attachment = || {
        AttachmentDescriptor::new(instance, table.clone(), world_frame, top, presets::table_pose())
    };
    let gains = PdGains { kp: 200.0, kd: 5.0 };

    assert!(matches!(
        station.register_end_effector(attachment(), gains),
        Err(StationError::RegistrySequence {
            state: RegistryState::Empty,
            ..
        })
    ));

    let mut finalized = default_station();
    finalized.finalize().unwrap();
    let world_frame = finalized.world().world_frame();
    let table = finalized.world().instance_by_name("table").unwrap();
    let top = finalized.world().frame_by_name(presets::TABLE_TOP, table).unwrap();
    let descriptor = AttachmentDescriptor::new(
        table,
        Arc::new(presets::table()),
        world_frame,
        top,
        presets::table_pose(),
    );
    assert!(matches!(
        finalized.register_end_effector(descriptor, gains),
        Err(StationError::RegistrySequence {
            state: RegistryState::Finalized,
            ..
        })
    ));
}

#[test]
fn test_manipulator_gains_must_cover_every_joint() {
    let mut station = Station::default();
    let world_frame = station.world().world_frame();
    let arm = Arc::new(presets::seven_dof_arm());
    let instance = station
        .add_and_weld_model(&arm, "arm", world_frame, ARM_BASE_LINK, RigidTransform::IDENTITY)
        .unwrap();
    let base = station.world().frame_by_name(ARM_BASE_LINK, instance).unwrap();

    let err = station
        .register_manipulator(
            AttachmentDescriptor::new(instance, arm, world_frame, base, RigidTransform::IDENTITY),
            PidGains::uniform(6, 100.0, 1.0),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::GainLength {
            role: Role::Manipulator,
            field: GainField::Proportional,
            expected: 7,
            actual: 6,
        }
    ));
    assert_eq!(station.registry_state(), RegistryState::Empty);
}

#[test]
fn test_bad_end_effector_gains_leave_previous_gains() {
    let mut station = default_station();
    let before = station.registry().end_effector_gains().unwrap();

    let err = station
        .set_end_effector_gains(PdGains { kp: -1.0, kd: 5.0 })
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::NegativeGain {
            role: Role::EndEffector,
            field: GainField::Proportional,
            ..
        }
    ));

    let err = station
        .set_end_effector_gains(PdGains {
            kp: 100.0,
            kd: f32::NAN,
        })
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::NegativeGain {
            field: GainField::Derivative,
            ..
        }
    ));
    assert_eq!(station.registry().end_effector_gains().unwrap(), before);

    station
        .set_end_effector_gains(PdGains { kp: 150.0, kd: 4.0 })
        .unwrap();
    assert_eq!(
        station.registry().end_effector_gains().unwrap(),
        PdGains { kp: 150.0, kd: 4.0 }
    );
}

#[test]
fn test_actuation_is_read_back_as_measured() {
    let mut station = built_station();
    station.set_manipulator_position(&[0.0; 7]).unwrap();
    station.set_end_effector_position(0.0).unwrap();

    let network = station.network_mut().unwrap();
    assert_eq!(network.manipulator_torque_measured().unwrap(), vec![0.0; 7]);
    assert_eq!(network.end_effector_force_measured().unwrap(), 0.0);

    let command = [0.01, 0.0, 0.0, 0.0, 0.0, 0.0, -0.01];
    let feedforward = [0.5; 7];
    let commanded = network
        .manipulator_torque_commanded(&UnitInertia, &command, &feedforward)
        .unwrap();
    network
        .actuate(&UnitInertia, &command, &feedforward, 0.5, 40.0)
        .unwrap();

    assert_eq!(network.manipulator_torque_measured().unwrap(), commanded);
    let grip = network.end_effector_force_measured().unwrap();
    assert!((grip - 40.0).abs() < 1e-3);
}

#[test]
fn test_contact_outputs_start_empty() {
    let station = built_station();
    let network = station.network().unwrap();

    assert_eq!(network.manipulator_torque_external().unwrap(), vec![0.0; 7]);
    assert_eq!(network.contact_results().unwrap().num_contacts(), 0);

    // Arm, gripper fingers, and cupboard doors.
    let state = network.plant_continuous_state().unwrap();
    assert_eq!(state.len(), 2 * (7 + 2 + 2));

    let bundle = network.pose_bundle();
    assert_eq!(bundle.len(), network.geometry_poses().len());
    let world = network.world();
    let gripper = world.instance_by_name("gripper").unwrap();
    let palm = world.frame_by_name(GRIPPER_BODY, gripper).unwrap();
    let expected = world.frame_pose_in_world(palm).unwrap();
    assert!(bundle.pose("gripper", GRIPPER_BODY).unwrap().abs_diff_eq(&expected, 1e-6));
}

#[test]
fn test_controller_checks_gain_and_torque_sizes() {
    let station = built_station();
    let network = station.network().unwrap();

    let model = network.control_model().clone();
    let err = InverseDynamicsController::new(model, PidGains::uniform(6, 100.0, 1.0)).unwrap_err();
    assert!(matches!(
        err,
        StationError::GainLength {
            expected: 7,
            actual: 6,
            ..
        }
    ));

    let err = network
        .manipulator_torque_commanded(&ShortSolver, &[0.0; 7], &[0.0; 7])
        .unwrap_err();
    assert!(matches!(
        err,
        StationError::CommandLength {
            role: Role::Manipulator,
            expected: 7,
            actual: 6,
        }
    ));
}
