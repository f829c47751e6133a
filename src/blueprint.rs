use crate::inertia::SpatialInertia;
use crate::transform::RigidTransform;
use bevy_heavy::ComputeMassProperties3d;
use bevy_math::primitives::{Capsule3d, Cuboid, Cylinder, Sphere};
use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// The engine-agnostic description of one loadable model: named rigid bodies,
/// named frames fixed to those bodies, and the joints connecting them.
///
/// This is what an external description loader hands to the world. Bodies and
/// joints are referenced by name so the same description can be loaded into
/// several independent worlds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Default instance name used when the caller does not supply one.
    pub name: String,

    /// All rigid bodies, in declaration order. The first body is the model's root.
    pub bodies: Vec<BodyDescription>,

    /// Extra named frames attached to bodies.
    pub frames: Vec<FrameDescription>,

    /// All kinematic connections between bodies.
    pub joints: Vec<JointDescription>,
}

impl ModelDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_body(&mut self, body: BodyDescription) {
        self.bodies.push(body);
    }

    pub fn add_frame(&mut self, frame: FrameDescription) {
        self.frames.push(frame);
    }

    pub fn add_joint(&mut self, joint: JointDescription) {
        self.joints.push(joint);
    }

    pub fn body(&self, name: &str) -> Option<&BodyDescription> {
        self.bodies.iter().find(|b| b.name == name)
    }

    pub fn joint(&self, name: &str) -> Option<&JointDescription> {
        self.joints.iter().find(|j| j.name == name)
    }

    /// Joints that contribute a degree of freedom, in declaration order.
    pub fn actuated_joints(&self) -> impl Iterator<Item = &JointDescription> {
        self.joints.iter().filter(|j| j.joint_type.dof() > 0)
    }

    /// Number of degrees of freedom contributed by the model's joints.
    pub fn num_dofs(&self) -> usize {
        self.joints.iter().map(|j| j.joint_type.dof()).sum()
    }

    /// Total mass of all bodies.
    pub fn total_mass(&self) -> f32 {
        self.bodies.iter().map(|b| b.inertia.mass()).sum()
    }
}

/// A single rigid body of a model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BodyDescription {
    /// Name, unique within the model.
    pub name: String,

    /// Geometric shape, if the body has one. Bodies given explicit inertia may omit it.
    pub shape: Option<ShapePrimitive>,

    /// Density in kg/m³ used to derive mass properties from the shape.
    pub density: f32,

    /// Mass properties about the body origin, expressed in the body frame.
    pub inertia: SpatialInertia,
}

impl BodyDescription {
    /// A body whose mass properties are computed from its shape via `bevy_heavy`.
    /// The shape is centered at the body origin.
    pub fn from_shape(name: impl Into<String>, shape: ShapePrimitive, density: f32) -> Self {
        Self {
            name: name.into(),
            shape: Some(shape),
            density,
            inertia: shape.spatial_inertia(density),
        }
    }

    /// A body with explicitly supplied mass properties and no geometry.
    pub fn with_inertia(name: impl Into<String>, inertia: SpatialInertia) -> Self {
        Self {
            name: name.into(),
            shape: None,
            density: 0.0,
            inertia,
        }
    }
}

/// A named frame rigidly attached to a body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameDescription {
    pub name: String,
    /// Name of the body the frame is fixed to.
    pub body: String,
    /// Pose of the frame in the body frame.
    pub pose: RigidTransform,
}

/// Supported geometric primitives for body segments.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum ShapePrimitive {
    /// A box defined by half-extents (x, y, z).
    Box(Vec3),
    /// A cylinder defined by radius and height (aligned along Y axis).
    Cylinder { radius: f32, height: f32 },
    /// A sphere defined by radius.
    Sphere(f32),
    /// A capsule defined by radius and height (aligned along Y axis).
    Capsule { radius: f32, height: f32 },
}

/// A type-erased wrapper so we can call [`ComputeMassProperties3d`] on any variant.
#[derive(Clone, Copy, Debug)]
pub enum BevyPrimitive {
    Cuboid(Cuboid),
    Cylinder(Cylinder),
    Sphere(Sphere),
    Capsule(Capsule3d),
}

impl ComputeMassProperties3d for BevyPrimitive {
    fn mass(&self, density: f32) -> f32 {
        match self {
            Self::Cuboid(s) => s.mass(density),
            Self::Cylinder(s) => s.mass(density),
            Self::Sphere(s) => s.mass(density),
            Self::Capsule(s) => s.mass(density),
        }
    }

    fn unit_principal_angular_inertia(&self) -> Vec3 {
        match self {
            Self::Cuboid(s) => s.unit_principal_angular_inertia(),
            Self::Cylinder(s) => s.unit_principal_angular_inertia(),
            Self::Sphere(s) => s.unit_principal_angular_inertia(),
            Self::Capsule(s) => s.unit_principal_angular_inertia(),
        }
    }

    fn center_of_mass(&self) -> Vec3 {
        match self {
            Self::Cuboid(s) => s.center_of_mass(),
            Self::Cylinder(s) => s.center_of_mass(),
            Self::Sphere(s) => s.center_of_mass(),
            Self::Capsule(s) => s.center_of_mass(),
        }
    }
}

impl ShapePrimitive {
    /// Convert to the corresponding `bevy_math` primitive for mass-property computation.
    pub fn to_bevy_primitive(self) -> BevyPrimitive {
        match self {
            Self::Box(half_extents) => BevyPrimitive::Cuboid(Cuboid {
                half_size: half_extents,
            }),
            Self::Cylinder { radius, height } => {
                BevyPrimitive::Cylinder(Cylinder::new(radius, height))
            }
            Self::Sphere(r) => BevyPrimitive::Sphere(Sphere::new(r)),
            Self::Capsule { radius, height } => {
                BevyPrimitive::Capsule(Capsule3d::new(radius, height))
            }
        }
    }

    /// Mass properties of the shape about its own center, in its own frame.
    ///
    /// All supported primitives are symmetric about their local axes, so the
    /// principal inertia frame coincides with the shape frame.
    pub fn spatial_inertia(self, density: f32) -> SpatialInertia {
        let primitive = self.to_bevy_primitive();
        let mass = primitive.mass(density);
        SpatialInertia::from_com_inertia(
            mass,
            primitive.center_of_mass(),
            Mat3::from_diagonal(primitive.unit_principal_angular_inertia() * mass),
        )
    }

    /// Extent of the shape along its local Y (growth) axis.
    pub fn length_along_y(self) -> f32 {
        match self {
            Self::Box(half_extents) => half_extents.y * 2.0,
            Self::Cylinder { height, .. } => height,
            Self::Sphere(r) => r * 2.0,
            Self::Capsule { radius, height } => height + radius * 2.0,
        }
    }
}

/// A kinematic connection between two bodies of the same model.
///
/// The joint frame `J` is fixed to the parent at `parent_pose` and to the child at
/// `child_pose`; both coincide when the joint sits at zero travel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JointDescription {
    /// Name, unique within the model.
    pub name: String,

    /// The parent body (the one closer to the root).
    pub parent: String,

    /// The child body.
    pub child: String,

    /// Pose of the joint frame in the parent body frame.
    pub parent_pose: RigidTransform,

    /// Pose of the joint frame in the child body frame.
    pub child_pose: RigidTransform,

    /// The type of mechanical connection.
    pub joint_type: JointType,

    /// The axis of rotation/translation, expressed in the joint frame.
    pub axis: Vec3,

    /// Physical limits of the joint.
    pub limits: Option<JointLimit>,
}

/// Types of mechanical joints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointType {
    /// Fixed connection (welded).
    Fixed,
    /// Rotates around a single axis (e.g., knee, elbow).
    Revolute,
    /// Slides along a single axis (linear actuator, gripper finger).
    Prismatic,
}

impl JointType {
    /// Number of degrees of freedom the joint contributes.
    pub fn dof(self) -> usize {
        match self {
            Self::Fixed => 0,
            Self::Revolute | Self::Prismatic => 1,
        }
    }
}

impl std::fmt::Display for JointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fixed => "fixed",
            Self::Revolute => "revolute",
            Self::Prismatic => "prismatic",
        };
        f.write_str(name)
    }
}

/// Limits for a joint's motion.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct JointLimit {
    /// Minimum angle (radians) or distance (meters).
    pub min: f32,
    /// Maximum angle (radians) or distance (meters).
    pub max: f32,
    /// Maximum torque (Nm) or force (N) the joint motor can apply.
    pub effort: f32,
    /// Maximum velocity (rad/s or m/s).
    pub velocity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sphere_inertia_matches_closed_form() {
        let density = 1000.0;
        let r = 0.1;
        let m = ShapePrimitive::Sphere(r).spatial_inertia(density);
        let expected_mass = density * 4.0 / 3.0 * std::f32::consts::PI * r * r * r;
        assert_relative_eq!(m.mass(), expected_mass, max_relative = 1e-4);
        let i = m.rotational_inertia();
        assert_relative_eq!(i.x_axis.x, 0.4 * expected_mass * r * r, max_relative = 1e-3);
        assert_relative_eq!(i.x_axis.y, 0.0);
        assert_eq!(m.center_of_mass(), Vec3::ZERO);
    }

    #[test]
    fn dof_counts_only_moving_joints() {
        let mut model = ModelDescription::new("pair");
        model.add_body(BodyDescription::from_shape("a", ShapePrimitive::Sphere(0.1), 100.0));
        model.add_body(BodyDescription::from_shape("b", ShapePrimitive::Sphere(0.1), 100.0));
        model.add_body(BodyDescription::from_shape("c", ShapePrimitive::Sphere(0.1), 100.0));
        for (name, parent, child, joint_type) in [
            ("ab", "a", "b", JointType::Revolute),
            ("bc", "b", "c", JointType::Fixed),
        ] {
            model.add_joint(JointDescription {
                name: name.into(),
                parent: parent.into(),
                child: child.into(),
                parent_pose: RigidTransform::IDENTITY,
                child_pose: RigidTransform::IDENTITY,
                joint_type,
                axis: Vec3::Z,
                limits: None,
            });
        }
        assert_eq!(model.num_dofs(), 1);
        assert_eq!(model.actuated_joints().count(), 1);
    }
}
