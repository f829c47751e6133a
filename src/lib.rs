//! # workcell-station
//!
//! A fixed-topology manipulation workcell: one position-controlled arm, one
//! parallel-jaw gripper mounted on it, and any number of RGB-D cameras.
//!
//! Models are described engine-agnostically ([`ModelDescription`]), loaded into a
//! [`MultibodyWorld`], and registered with a [`Station`] under the roles they play.
//! Building the station derives a control model for the arm, in which the gripper
//! is collapsed into a single rigid body of equivalent [`SpatialInertia`], and
//! wires the control network with its named input and output ports.
//!
//! ```no_run
//! use workcell_station::{presets, Station};
//!
//! let mut station = Station::default();
//! presets::setup_default_station(&mut station)?;
//! station.finalize()?;
//! station.build()?;
//! station.set_manipulator_position(&[0.0; 7])?;
//! # Ok::<(), workcell_station::StationError>(())
//! ```

pub mod blueprint;
pub mod chain;
pub mod composite;
pub mod config;
pub mod control_model;
pub mod error;
pub mod inertia;
pub mod network;
pub mod presets;
pub mod registry;
pub mod render;
pub mod station;
pub mod transform;
pub mod world;

pub use blueprint::{
    BodyDescription, FrameDescription, JointDescription, JointLimit, JointType, ModelDescription,
    ShapePrimitive,
};
pub use chain::{ChainBuilder, ChainConfig};
pub use composite::{Satellite, SubAssembly};
pub use config::StationConfig;
pub use control_model::{ControlModel, InverseDynamics};
pub use error::StationError;
pub use inertia::SpatialInertia;
pub use network::{Network, NetworkAssembler, NetworkState};
pub use registry::{AttachmentDescriptor, ModelRegistry, PdGains, PidGains, RegistryState, Role};
pub use render::{BlankRenderer, CameraImages, CameraProperties, RenderEngine, RgbdCamera};
pub use station::Station;
pub use transform::RigidTransform;
pub use world::{FrameId, ModelInstanceId, MultibodyWorld, WorldError};
