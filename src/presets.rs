//! Procedurally built default models and the default station layout.

use crate::blueprint::{
    BodyDescription, JointDescription, JointLimit, JointType, ModelDescription, ShapePrimitive,
};
use crate::chain::{ChainBuilder, ChainConfig};
use crate::error::StationError;
use crate::registry::{AttachmentDescriptor, PdGains, PidGains};
use crate::station::Station;
use crate::transform::RigidTransform;
use glam::{Quat, Vec3};
use std::collections::BTreeMap;
use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;
use tracing::info;

pub const ARM_BASE_LINK: &str = "arm_link_0";
pub const ARM_FLANGE: &str = "arm_flange";
pub const GRIPPER_BODY: &str = "body";
pub const TABLE_TOP: &str = "table_top";
pub const CUPBOARD_BODY: &str = "cupboard_body";

const CUPBOARD_WIDTH: f32 = 0.6;
const CUPBOARD_DEPTH: f32 = 0.3;
const CUPBOARD_HEIGHT: f32 = 0.815;
const PANEL: f32 = 0.016;

/// Length, radius, joint range (rad), effort (Nm) and speed (rad/s) of links 1..=7.
const ARM_LINKS: [(f32, f32, f32, f32, f32); 7] = [
    (0.2025, 0.060, 2.967, 320.0, 1.483),
    (0.2045, 0.060, 2.094, 320.0, 1.483),
    (0.2155, 0.055, 2.967, 176.0, 1.745),
    (0.1845, 0.055, 2.094, 176.0, 1.309),
    (0.2155, 0.050, 2.967, 110.0, 2.269),
    (0.0810, 0.045, 2.094, 40.0, 2.356),
    (0.0450, 0.040, 3.054, 40.0, 2.356),
];

/// A seven-joint revolute arm standing along `+Z`.
///
/// Joints `arm_joint_1..=7` alternate between twisting about the link axis and
/// bending across it. The flange frame `arm_flange` sits at the tip of
/// `arm_link_7` with its `+Y` pointing out of the arm.
pub fn seven_dof_arm() -> ModelDescription {
    let config = ChainConfig {
        density: 2000.0,
        ..ChainConfig::default()
    };
    let mut chain = ChainBuilder::new("arm", config).pitch(FRAC_PI_2).link(
        ARM_BASE_LINK,
        ShapePrimitive::Cylinder {
            radius: 0.07,
            height: 0.1575,
        },
    );
    for (i, &(length, radius, range, effort, speed)) in ARM_LINKS.iter().enumerate() {
        let number = i + 1;
        let axis = if number % 2 == 1 { Vec3::Y } else { Vec3::X };
        chain = chain
            .joint(format!("arm_joint_{number}"), JointType::Revolute, axis)
            .limits(-range, range, effort, speed)
            .link(
                format!("arm_link_{number}"),
                ShapePrimitive::Cylinder {
                    radius,
                    height: length,
                },
            );
    }
    chain.frame(ARM_FLANGE).build()
}

/// A parallel-jaw gripper: a palm named `body` with two fingers on prismatic
/// joints along the palm's `X`. At zero travel both fingers meet at the center.
pub fn parallel_gripper() -> ModelDescription {
    let config = ChainConfig {
        density: 1200.0,
        ..ChainConfig::default()
    };
    let finger = ShapePrimitive::Box(Vec3::new(0.008, 0.04, 0.01));
    ChainBuilder::new("gripper", config)
        .link(GRIPPER_BODY, ShapePrimitive::Box(Vec3::new(0.073, 0.025, 0.0365)))
        .push()
        .joint("left_finger_sliding_joint", JointType::Prismatic, Vec3::X)
        .limits(-0.055, 0.0, 80.0, 0.42)
        .link("left_finger", finger)
        .pop()
        .push()
        .joint("right_finger_sliding_joint", JointType::Prismatic, Vec3::X)
        .limits(0.0, 0.055, 80.0, 0.42)
        .link("right_finger", finger)
        .pop()
        .build()
}

/// A fixed table top, 0.8 m × 0.6 m, centered on its own origin.
pub fn table() -> ModelDescription {
    let mut model = ModelDescription::new("table");
    model.add_body(BodyDescription::from_shape(
        TABLE_TOP,
        ShapePrimitive::Box(Vec3::new(0.4, 0.3, 0.0127)),
        700.0,
    ));
    model
}

/// A two-door cupboard, 0.6 m wide, 0.3 m deep, and 0.815 m tall, centered on
/// its origin.
///
/// The body `cupboard_body` is the middle shelf. Top, bottom, side walls, and
/// the back are welded around it; the open side faces `+X`, closed by doors on
/// `left_door_hinge` and `right_door_hinge` that swing outward.
pub fn cupboard() -> ModelDescription {
    let (half_w, half_d, half_h, half_t) = (
        CUPBOARD_WIDTH / 2.0,
        CUPBOARD_DEPTH / 2.0,
        CUPBOARD_HEIGHT / 2.0,
        PANEL / 2.0,
    );
    let density = 700.0;
    let shelf = ShapePrimitive::Box(Vec3::new(half_d, half_w, half_t));
    let wall = ShapePrimitive::Box(Vec3::new(half_d, half_t, half_h));
    let door = ShapePrimitive::Box(Vec3::new(half_t, half_w / 2.0, half_h));

    let mut model = ModelDescription::new("cupboard");
    model.add_body(BodyDescription::from_shape(CUPBOARD_BODY, shelf, density));

    let panels = [
        ("top", shelf, Vec3::new(0.0, 0.0, half_h - half_t)),
        ("bottom", shelf, Vec3::new(0.0, 0.0, half_t - half_h)),
        ("left_wall", wall, Vec3::new(0.0, half_w - half_t, 0.0)),
        ("right_wall", wall, Vec3::new(0.0, half_t - half_w, 0.0)),
        (
            "back",
            ShapePrimitive::Box(Vec3::new(half_t, half_w, half_h)),
            Vec3::new(half_t - half_d, 0.0, 0.0),
        ),
    ];
    for (name, shape, at) in panels {
        model.add_body(BodyDescription::from_shape(name, shape, density));
        model.add_joint(JointDescription {
            name: format!("{name}_weld"),
            parent: CUPBOARD_BODY.to_string(),
            child: name.to_string(),
            parent_pose: RigidTransform::from_translation(at),
            child_pose: RigidTransform::IDENTITY,
            joint_type: JointType::Fixed,
            axis: Vec3::Z,
            limits: None,
        });
    }

    // Each door hangs from a hinge on its outer edge and spans half the width.
    let doors = [
        ("left", 1.0, (0.0, FRAC_PI_2)),
        ("right", -1.0, (-FRAC_PI_2, 0.0)),
    ];
    for (side, sign, (min, max)) in doors {
        let name = format!("{side}_door");
        model.add_body(BodyDescription::from_shape(name.clone(), door, density));
        let hinge = Vec3::new(half_d + half_t, sign * half_w, 0.0);
        model.add_joint(JointDescription {
            name: format!("{side}_door_hinge"),
            parent: CUPBOARD_BODY.to_string(),
            child: name,
            parent_pose: RigidTransform::from_translation(hinge),
            child_pose: RigidTransform::from_translation(Vec3::new(0.0, sign * half_w / 2.0, 0.0)),
            joint_type: JointType::Revolute,
            axis: Vec3::Z,
            limits: Some(JointLimit {
                min,
                max,
                effort: 0.0,
                velocity: 0.0,
            }),
        });
    }
    model
}

/// Cupboard pose in the world: beyond the far edge of the table, turned to face
/// the arm, resting slightly above the table surface.
pub fn cupboard_pose() -> RigidTransform {
    let table_center_x = table_pose().translation.x;
    let table_top_z = table_pose().translation.z;
    RigidTransform::new(
        Quat::from_rotation_z(PI),
        Vec3::new(
            table_center_x + 0.43 + 0.15,
            0.0,
            0.02 + CUPBOARD_HEIGHT / 2.0 + table_top_z,
        ),
    )
}

/// Table pose in the world; its top surface lies in the `z = 0` plane.
pub fn table_pose() -> RigidTransform {
    RigidTransform::from_translation(Vec3::new(0.3257, 0.0, -0.0127))
}

/// Gripper palm pose in the arm's flange frame: a quarter turn about the flange
/// axis, with the palm's base flush against the flange.
pub fn gripper_mount() -> RigidTransform {
    RigidTransform::new(Quat::from_rotation_y(FRAC_PI_2), Vec3::new(0.0, 0.025, 0.0))
}

/// World poses of the three fixed cameras of the default station.
pub fn default_camera_poses() -> BTreeMap<String, RigidTransform> {
    BTreeMap::from([
        (
            "0".to_string(),
            RigidTransform::from_rpy(
                1.69101,
                0.176488,
                0.432721,
                Vec3::new(-0.233066, -0.451461, 0.466761),
            ),
        ),
        (
            "1".to_string(),
            RigidTransform::from_rpy(
                -1.68974,
                0.20245,
                -0.706783,
                Vec3::new(-0.197236, 0.468471, 0.436499),
            ),
        ),
        (
            "2".to_string(),
            RigidTransform::from_rpy(
                0.0438918,
                1.03776,
                -3.13612,
                Vec3::new(0.786905, -0.0284378, 1.04287),
            ),
        ),
    ])
}

/// Populates an empty station with the table and cupboard, the arm at the world
/// origin, the gripper on the arm's flange, and the three fixed cameras. Gains
/// come from the station's configuration.
///
/// The registry is left open so callers can still adjust gains or cameras
/// before finalizing.
pub fn setup_default_station(station: &mut Station) -> Result<(), StationError> {
    let world_frame = station.world().world_frame();

    station.add_and_weld_model(&table(), "table", world_frame, TABLE_TOP, table_pose())?;
    station.add_and_weld_model(
        &cupboard(),
        "cupboard",
        world_frame,
        CUPBOARD_BODY,
        cupboard_pose(),
    )?;

    let arm = Arc::new(seven_dof_arm());
    let arm_instance = station.add_and_weld_model(
        &arm,
        "arm",
        world_frame,
        ARM_BASE_LINK,
        RigidTransform::IDENTITY,
    )?;
    let arm_base = station.world().frame_by_name(ARM_BASE_LINK, arm_instance)?;
    let flange = station.world().frame_by_name(ARM_FLANGE, arm_instance)?;

    let gripper = Arc::new(parallel_gripper());
    let gripper_instance =
        station.add_and_weld_model(&gripper, "gripper", flange, GRIPPER_BODY, gripper_mount())?;
    let palm = station.world().frame_by_name(GRIPPER_BODY, gripper_instance)?;

    let config = station.config().clone();
    station.register_manipulator(
        AttachmentDescriptor::new(
            arm_instance,
            arm.clone(),
            world_frame,
            arm_base,
            RigidTransform::IDENTITY,
        ),
        PidGains::uniform(arm.num_dofs(), config.manipulator.kp, config.manipulator.ki),
    )?;
    station.register_end_effector(
        AttachmentDescriptor::new(gripper_instance, gripper, flange, palm, gripper_mount()),
        PdGains {
            kp: config.end_effector.kp,
            kd: config.end_effector.kd,
        },
    )?;

    for (name, pose) in default_camera_poses() {
        station.register_camera(&name, world_frame, pose, config.camera)?;
    }
    info!("default station populated");
    Ok(())
}
