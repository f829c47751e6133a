//! Collapsing a sub-assembly into one equivalent rigid body.
//!
//! A sub-assembly is a base body plus satellites, each attached to the base by a
//! joint sitting at zero travel. The composite is only valid at that reference
//! configuration, which is all the control model needs.

use crate::inertia::SpatialInertia;
use crate::transform::RigidTransform;
use crate::world::{Body, BodyIndex, ModelInstanceId, MultibodyWorld, WorldError};
use tracing::{debug, warn};

/// A body attached to the base of a [`SubAssembly`].
#[derive(Clone, Debug)]
pub struct Satellite {
    pub name: String,
    /// Mass properties about the satellite's origin, in the satellite frame `F`.
    pub inertia: SpatialInertia,
    /// `X_GP`: pose of the joint's parent-side frame in the base frame `G`.
    pub parent_side: RigidTransform,
    /// `X_FC`: pose of the joint's child-side frame in the satellite frame `F`.
    pub child_side: RigidTransform,
}

impl Satellite {
    /// `X_GF`: pose of the satellite in the base frame with the joint at zero travel,
    /// where the parent-side and child-side frames coincide.
    pub fn pose_in_base(&self) -> RigidTransform {
        self.parent_side * self.child_side.inverse()
    }

    /// The satellite's mass properties about the base origin, in the base frame.
    pub fn inertia_about_base(&self) -> SpatialInertia {
        let x_gf = self.pose_in_base();
        self.inertia
            .reexpress(x_gf.rotation)
            .shift(-x_gf.translation)
    }
}

/// A base body and the satellites hanging off it.
#[derive(Clone, Debug)]
pub struct SubAssembly {
    /// Mass properties of the base about its origin, in the base frame.
    pub base: SpatialInertia,
    pub satellites: Vec<Satellite>,
}

impl SubAssembly {
    pub fn new(base: SpatialInertia) -> Self {
        Self {
            base,
            satellites: Vec::new(),
        }
    }

    pub fn with_satellite(mut self, satellite: Satellite) -> Self {
        self.satellites.push(satellite);
        self
    }

    /// Collects the sub-assembly rooted at the body carrying `base_frame` inside
    /// `instance`: the base body plus every body of the instance attached to it
    /// by a single joint.
    pub fn from_instance(
        world: &MultibodyWorld,
        instance: ModelInstanceId,
        base_frame: &str,
    ) -> Result<Self, WorldError> {
        let frame = world.frame_by_name(base_frame, instance)?;
        let base_body = world.frame(frame)?.body();
        let mut assembly = Self::new(lookup_body(world, base_body)?.inertia());

        for &body in world.instance_bodies(instance)? {
            if body == base_body {
                continue;
            }
            let data = lookup_body(world, body)?;
            let Some(joint) = world.parent_joint(body) else {
                warn!(body = data.name(), "body is detached from the base; skipped");
                continue;
            };
            if world.joint_parent_body(joint) != Some(base_body) {
                warn!(body = data.name(), "body is not attached directly to the base; skipped");
                continue;
            }
            let missing = || foreign_handle(world);
            let x_gp = world.joint_parent_pose(joint).ok_or_else(missing)?;
            let x_fc = world.joint_child_pose(joint).ok_or_else(missing)?;
            let offset = world.joint(joint).ok_or_else(missing)?.offset();
            assembly.satellites.push(Satellite {
                name: data.name().to_string(),
                inertia: data.inertia(),
                parent_side: x_gp * offset,
                child_side: x_fc,
            });
        }
        Ok(assembly)
    }

    /// Total mass of base and satellites.
    pub fn total_mass(&self) -> f32 {
        self.base.mass() + self.satellites.iter().map(|s| s.inertia.mass()).sum::<f32>()
    }

    /// The single rigid body equivalent to the whole sub-assembly, about the base
    /// origin and expressed in the base frame.
    pub fn synthesize(&self) -> SpatialInertia {
        let composite = self
            .satellites
            .iter()
            .fold(self.base, |acc, satellite| acc + satellite.inertia_about_base());
        debug!(
            satellites = self.satellites.len(),
            mass = composite.mass(),
            "synthesized composite body"
        );
        composite
    }
}

fn lookup_body(world: &MultibodyWorld, body: BodyIndex) -> Result<&Body, WorldError> {
    world.body(body).ok_or_else(|| foreign_handle(world))
}

fn foreign_handle(world: &MultibodyWorld) -> WorldError {
    WorldError::ForeignHandle {
        world: world.name().to_string(),
    }
}
