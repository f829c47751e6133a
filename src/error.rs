//! Error types for station assembly.

use crate::network::diagram::{DiagramError, PortDirection};
use crate::network::NetworkState;
use crate::registry::{GainField, RegistryState, Role};
use crate::render::RenderError;
use crate::world::WorldError;
use thiserror::Error;

/// Errors raised while registering, finalizing, building, or driving a station.
///
/// Every failure aborts the call that raised it and leaves the station as it was.
#[derive(Debug, Error)]
pub enum StationError {
    /// An operation was called in a registry phase that forbids it.
    #[error("`{operation}` is not allowed while the registry is {state}")]
    RegistrySequence {
        operation: &'static str,
        state: RegistryState,
    },

    /// An operation was called in a network phase that forbids it.
    #[error("`{operation}` is not allowed while the network is {state}")]
    NetworkSequence {
        operation: &'static str,
        state: NetworkState,
    },

    #[error("{role} is already registered")]
    AlreadyRegistered { role: Role },

    #[error("{role} was never registered")]
    MissingRole { role: Role },

    #[error("{role} {field} gain[{index}] is {value}; gains must be non-negative")]
    NegativeGain {
        role: Role,
        field: GainField,
        index: usize,
        value: f32,
    },

    #[error("{role} {field} gains have {actual} entries, expected {expected}")]
    GainLength {
        role: Role,
        field: GainField,
        expected: usize,
        actual: usize,
    },

    /// An attachment references a frame or instance outside the registered structure.
    #[error("{role} attachment: {reason}")]
    Attachment { role: Role, reason: String },

    /// A direct state command has the wrong number of entries.
    #[error("{role} command has {actual} entries, expected {expected}")]
    CommandLength {
        role: Role,
        expected: usize,
        actual: usize,
    },

    #[error("no camera named `{0}`")]
    UnknownCamera(String),

    #[error("no exported {direction} port named `{name}`")]
    UnknownPort {
        direction: PortDirection,
        name: String,
    },

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Diagram(#[from] DiagramError),
}

impl StationError {
    pub(crate) fn attachment(role: Role, reason: impl Into<String>) -> Self {
        Self::Attachment {
            role,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let err = StationError::NegativeGain {
            role: Role::Manipulator,
            field: GainField::Proportional,
            index: 3,
            value: -2.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("manipulator"));
        assert!(msg.contains("proportional"));
        assert!(msg.contains("[3]"));
        assert!(msg.contains("-2.5"));
    }

    #[test]
    fn sequencing_message_names_the_state() {
        let err = StationError::RegistrySequence {
            operation: "register_end_effector",
            state: RegistryState::Empty,
        };
        let msg = err.to_string();
        assert!(msg.contains("register_end_effector"));
        assert!(msg.contains("empty"));
    }
}
