//! Spatial inertia algebra.
//!
//! A [`SpatialInertia`] bundles mass, center of mass, and rotational inertia, all
//! referred to one point and expressed in one frame. Every operation here returns
//! a new value with the three fields transformed together.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Mass properties of a rigid body about a reference point `P`, expressed in a frame `F`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialInertia {
    mass: f32,
    /// Position of the center of mass measured from `P`, expressed in `F`.
    center_of_mass: Vec3,
    /// Rotational inertia about `P`, expressed in `F`.
    rotational_inertia: Mat3,
}

impl Default for SpatialInertia {
    fn default() -> Self {
        Self::ZERO
    }
}

/// `|r|² E - r rᵀ`: the inertia of a unit point mass at `r` about the origin.
fn parallel_axis_term(r: Vec3) -> Mat3 {
    Mat3::from_diagonal(Vec3::splat(r.length_squared()))
        - Mat3::from_cols(r * r.x, r * r.y, r * r.z)
}

impl SpatialInertia {
    pub const ZERO: Self = Self {
        mass: 0.0,
        center_of_mass: Vec3::ZERO,
        rotational_inertia: Mat3::ZERO,
    };

    /// Creates a tuple from values already referred to the same point and frame.
    ///
    /// `rotational_inertia` is about the reference point, not about the center of
    /// mass. Callers are responsible for `mass >= 0` and a symmetric tensor.
    pub fn new(mass: f32, center_of_mass: Vec3, rotational_inertia: Mat3) -> Self {
        debug_assert!(mass >= 0.0, "negative mass {mass}");
        Self {
            mass,
            center_of_mass,
            rotational_inertia,
        }
    }

    /// Creates a tuple about the frame origin from the inertia about the center of mass.
    pub fn from_com_inertia(mass: f32, center_of_mass: Vec3, inertia_about_com: Mat3) -> Self {
        Self::new(
            mass,
            center_of_mass,
            inertia_about_com + parallel_axis_term(center_of_mass) * mass,
        )
    }

    /// A point mass located at `position`.
    pub fn point_mass(mass: f32, position: Vec3) -> Self {
        Self::from_com_inertia(mass, position, Mat3::ZERO)
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    pub fn rotational_inertia(&self) -> Mat3 {
        self.rotational_inertia
    }

    /// Rotational inertia about the center of mass, in the same frame.
    pub fn inertia_about_com(&self) -> Mat3 {
        self.rotational_inertia - parallel_axis_term(self.center_of_mass) * self.mass
    }

    /// Re-expresses the tuple in a new frame `E`, given the rotation `R_EF`.
    ///
    /// The reference point does not move.
    pub fn reexpress(&self, rotation: Quat) -> Self {
        let r = Mat3::from_quat(rotation);
        Self {
            mass: self.mass,
            center_of_mass: r * self.center_of_mass,
            rotational_inertia: r * self.rotational_inertia * r.transpose(),
        }
    }

    /// Moves the reference point from `P` to `Q`, where `displacement` is the
    /// position of `Q` measured from `P` in the tuple's frame.
    pub fn shift(&self, displacement: Vec3) -> Self {
        let com_from_q = self.center_of_mass - displacement;
        Self {
            mass: self.mass,
            center_of_mass: com_from_q,
            rotational_inertia: self.rotational_inertia
                - parallel_axis_term(self.center_of_mass) * self.mass
                + parallel_axis_term(com_from_q) * self.mass,
        }
    }

    /// Sums two tuples referred to the same point and frame.
    ///
    /// Both operands must already agree on point and frame; bring them into
    /// agreement with [`reexpress`](Self::reexpress) and [`shift`](Self::shift)
    /// first. When the combined mass is zero the center of mass of `self` is kept.
    pub fn compose(&self, other: &Self) -> Self {
        let mass = self.mass + other.mass;
        let center_of_mass = if mass > 0.0 {
            (self.center_of_mass * self.mass + other.center_of_mass * other.mass) / mass
        } else {
            self.center_of_mass
        };
        Self {
            mass,
            center_of_mass,
            rotational_inertia: self.rotational_inertia + other.rotational_inertia,
        }
    }

    /// Returns true if all three fields agree within `max_abs_diff`.
    pub fn abs_diff_eq(&self, other: &Self, max_abs_diff: f32) -> bool {
        (self.mass - other.mass).abs() <= max_abs_diff
            && self
                .center_of_mass
                .abs_diff_eq(other.center_of_mass, max_abs_diff)
            && self
                .rotational_inertia
                .abs_diff_eq(other.rotational_inertia, max_abs_diff)
    }
}

impl Add for SpatialInertia {
    type Output = SpatialInertia;

    fn add(self, rhs: SpatialInertia) -> SpatialInertia {
        self.compose(&rhs)
    }
}

impl AddAssign for SpatialInertia {
    fn add_assign(&mut self, rhs: SpatialInertia) {
        *self = self.compose(&rhs);
    }
}
