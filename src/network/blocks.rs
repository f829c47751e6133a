//! Numeric behavior of the blocks the assembler wires together.
//!
//! Stateless blocks map inputs to outputs. The two stateful ones, the
//! [`StateInterpolator`] and the [`EndEffectorController`], latch the previous
//! command once per period through `advance` and expose `set_initial_position`
//! so a direct state edit can reset that history.

use crate::control_model::{ControlModel, InverseDynamics};
use crate::error::StationError;
use crate::registry::{PdGains, PidGains, Role};

/// Gains that keep the two fingers centered on the end-effector body.
pub const CENTERING_KP: f32 = 2000.0;
pub const CENTERING_KD: f32 = 5.0;

fn check_len(role: Role, expected: usize, values: &[f32]) -> Result<(), StationError> {
    if values.len() != expected {
        return Err(StationError::CommandLength {
            role,
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct PassThrough {
    pub size: usize,
}

impl PassThrough {
    pub fn output(&self, u: &[f32]) -> Vec<f32> {
        u.to_vec()
    }
}

/// Splits one vector into equal consecutive pieces.
#[derive(Clone, Copy, Debug)]
pub struct Demultiplexer {
    pub input_size: usize,
    pub output_size: usize,
}

impl Demultiplexer {
    pub fn num_outputs(&self) -> usize {
        self.input_size / self.output_size.max(1)
    }

    pub fn outputs(&self, u: &[f32]) -> Vec<Vec<f32>> {
        u.chunks(self.output_size.max(1)).map(<[f32]>::to_vec).collect()
    }
}

/// Element-wise sum of equally sized inputs.
#[derive(Clone, Copy, Debug)]
pub struct Adder {
    pub num_inputs: usize,
    pub size: usize,
}

impl Adder {
    pub fn output(&self, inputs: &[&[f32]]) -> Vec<f32> {
        let mut sum = vec![0.0; self.size];
        for input in inputs {
            for (s, x) in sum.iter_mut().zip(input.iter()) {
                *s += x;
            }
        }
        sum
    }
}

/// Turns a position command into a desired state `[q, v]` by differencing it
/// against the command latched at the previous period.
#[derive(Clone, Debug)]
pub struct StateInterpolator {
    role: Role,
    time_step: f32,
    previous: Vec<f32>,
}

impl StateInterpolator {
    pub fn new(role: Role, dof: usize, time_step: f32) -> Self {
        Self {
            role,
            time_step,
            previous: vec![0.0; dof],
        }
    }

    pub fn dof(&self) -> usize {
        self.previous.len()
    }

    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    pub fn previous_position(&self) -> &[f32] {
        &self.previous
    }

    /// Overwrites the history so a constant command at `position` yields zero velocity.
    pub fn set_initial_position(&mut self, position: &[f32]) -> Result<(), StationError> {
        check_len(self.role, self.dof(), position)?;
        self.previous.copy_from_slice(position);
        Ok(())
    }

    /// `[q, (q - q_prev) / dt]`. A zero period yields zero velocity.
    pub fn desired_state(&self, position: &[f32]) -> Result<Vec<f32>, StationError> {
        check_len(self.role, self.dof(), position)?;
        let velocity = position.iter().zip(&self.previous).map(|(q, p)| {
            if self.time_step > 0.0 {
                (q - p) / self.time_step
            } else {
                0.0
            }
        });
        Ok(position.iter().copied().chain(velocity).collect())
    }

    /// Latches `position` as the previous command. Called once per period.
    pub fn advance(&mut self, position: &[f32]) -> Result<(), StationError> {
        self.set_initial_position(position)
    }
}

/// PID on joint state, mapped to torques through the control model's inverse
/// dynamics.
#[derive(Clone, Debug)]
pub struct InverseDynamicsController {
    model: ControlModel,
    gains: PidGains,
    integral: Vec<f32>,
}

impl InverseDynamicsController {
    /// Fails when `gains` do not cover every degree of freedom of `model` or
    /// hold a negative component.
    pub fn new(model: ControlModel, gains: PidGains) -> Result<Self, StationError> {
        gains.validate(Role::Manipulator, model.dof())?;
        let integral = vec![0.0; gains.dof()];
        Ok(Self {
            model,
            gains,
            integral,
        })
    }

    pub fn dof(&self) -> usize {
        self.gains.dof()
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn control_model(&self) -> &ControlModel {
        &self.model
    }

    /// Accumulated position error.
    pub fn integral(&self) -> &[f32] {
        &self.integral
    }

    /// `kp (q_d - q) + kd (v_d - v) + ki ∫(q_d - q)` per joint.
    pub fn acceleration_command(
        &self,
        estimated: &[f32],
        desired: &[f32],
    ) -> Result<Vec<f32>, StationError> {
        let n = self.dof();
        check_len(Role::Manipulator, 2 * n, estimated)?;
        check_len(Role::Manipulator, 2 * n, desired)?;
        let (q, v) = estimated.split_at(n);
        let (qd, vd) = desired.split_at(n);
        let (kp, ki, kd) = (
            self.gains.proportional(),
            self.gains.integral(),
            self.gains.derivative(),
        );
        Ok((0..n)
            .map(|i| kp[i] * (qd[i] - q[i]) + kd[i] * (vd[i] - v[i]) + ki[i] * self.integral[i])
            .collect())
    }

    /// Joint torques realizing the PID acceleration on the control model.
    pub fn control(
        &self,
        dynamics: &dyn InverseDynamics,
        estimated: &[f32],
        desired: &[f32],
    ) -> Result<Vec<f32>, StationError> {
        let acceleration = self.acceleration_command(estimated, desired)?;
        let (q, v) = estimated.split_at(self.dof());
        let torque = dynamics.inverse_dynamics(self.model.world(), q, v, &acceleration)?;
        check_len(Role::Manipulator, self.dof(), &torque)?;
        Ok(torque)
    }

    /// Integrates the position error over one period of `dt` seconds.
    pub fn advance(
        &mut self,
        estimated: &[f32],
        desired: &[f32],
        dt: f32,
    ) -> Result<(), StationError> {
        let n = self.dof();
        check_len(Role::Manipulator, 2 * n, estimated)?;
        check_len(Role::Manipulator, 2 * n, desired)?;
        for (i, acc) in self.integral.iter_mut().enumerate() {
            *acc += (desired[i] - estimated[i]) * dt;
        }
        Ok(())
    }

    pub fn reset_integral(&mut self) {
        self.integral.iter_mut().for_each(|x| *x = 0.0);
    }
}

/// Output of the end-effector controller for one evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct EndEffectorCommand {
    /// Force on every degree of freedom of the end effector.
    pub generalized_force: Vec<f32>,
    /// Grip force after the force limit is applied.
    pub grip_force: f32,
}

/// Which entries of the end effector's state are the two fingers.
#[derive(Clone, Copy, Debug)]
pub struct FingerLayout {
    pub left: usize,
    pub right: usize,
    /// Degrees of freedom of the whole end effector.
    pub dof: usize,
}

impl FingerLayout {
    /// Grip force carried by a generalized force on the end effector's dofs.
    pub fn grip_force(&self, generalized_force: &[f32]) -> Result<f32, StationError> {
        check_len(Role::EndEffector, self.dof, generalized_force)?;
        Ok(generalized_force[self.right] - generalized_force[self.left])
    }

    /// `[width, width rate, center, center rate]` from the end effector's `[q, v]`.
    fn measure(&self, state: &[f32]) -> Result<[f32; 4], StationError> {
        check_len(Role::EndEffector, 2 * self.dof, state)?;
        let (q, v) = state.split_at(self.dof);
        Ok([
            q[self.right] - q[self.left],
            v[self.right] - v[self.left],
            q[self.right] + q[self.left],
            v[self.right] + v[self.left],
        ])
    }
}

/// PD control of the finger separation, limited in force, plus a term that
/// keeps the fingers symmetric about the body.
#[derive(Clone, Debug)]
pub struct EndEffectorController {
    gains: PdGains,
    layout: FingerLayout,
    interpolator: StateInterpolator,
}

impl EndEffectorController {
    pub fn new(gains: PdGains, layout: FingerLayout, time_step: f32) -> Self {
        Self {
            gains,
            layout,
            interpolator: StateInterpolator::new(Role::EndEffector, 1, time_step),
        }
    }

    pub fn gains(&self) -> PdGains {
        self.gains
    }

    pub fn layout(&self) -> FingerLayout {
        self.layout
    }

    pub fn interpolator(&self) -> &StateInterpolator {
        &self.interpolator
    }

    pub fn set_initial_position(&mut self, width: f32) -> Result<(), StationError> {
        self.interpolator.set_initial_position(&[width])
    }

    pub fn output(
        &self,
        state: &[f32],
        desired_width: f32,
        force_limit: f32,
    ) -> Result<EndEffectorCommand, StationError> {
        let [width, rate, center, center_rate] = self.layout.measure(state)?;
        let desired = self.interpolator.desired_state(&[desired_width])?;
        let limit = force_limit.max(0.0);
        let grip = (self.gains.kp * (desired[0] - width) + self.gains.kd * (desired[1] - rate))
            .clamp(-limit, limit);
        let centering = -CENTERING_KP * center - CENTERING_KD * center_rate;

        let mut generalized_force = vec![0.0; self.layout.dof];
        generalized_force[self.layout.right] = 0.5 * (grip + centering);
        generalized_force[self.layout.left] = 0.5 * (centering - grip);
        Ok(EndEffectorCommand {
            generalized_force,
            grip_force: grip,
        })
    }

    pub fn advance(&mut self, desired_width: f32) -> Result<(), StationError> {
        self.interpolator.advance(&[desired_width])
    }
}

/// Reduces the finger state to `[width, width rate]`.
#[derive(Clone, Copy, Debug)]
pub struct EndEffectorStateMap {
    pub layout: FingerLayout,
}

impl EndEffectorStateMap {
    pub fn output(&self, state: &[f32]) -> Result<[f32; 2], StationError> {
        let [width, rate, ..] = self.layout.measure(state)?;
        Ok([width, rate])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LAYOUT: FingerLayout = FingerLayout {
        left: 0,
        right: 1,
        dof: 2,
    };

    #[test]
    fn interpolator_differences_against_history() {
        let mut interp = StateInterpolator::new(Role::Manipulator, 2, 0.5);
        let state = interp.desired_state(&[1.0, -1.0]).unwrap();
        assert_eq!(state, vec![1.0, -1.0, 2.0, -2.0]);

        interp.advance(&[1.0, -1.0]).unwrap();
        let state = interp.desired_state(&[1.0, -1.0]).unwrap();
        assert_eq!(&state[2..], &[0.0, 0.0]);

        assert!(matches!(
            interp.set_initial_position(&[1.0]),
            Err(StationError::CommandLength { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn demultiplexer_and_adder() {
        let demux = Demultiplexer {
            input_size: 4,
            output_size: 2,
        };
        assert_eq!(demux.num_outputs(), 2);
        assert_eq!(demux.outputs(&[1.0, 2.0, 3.0, 4.0]), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let adder = Adder { num_inputs: 2, size: 2 };
        assert_eq!(adder.output(&[&[1.0, 2.0], &[0.5, -2.0]]), vec![1.5, 0.0]);
    }

    #[test]
    fn grip_force_is_limited_and_symmetric() {
        let gains = PdGains { kp: 2000.0, kd: 5.0 };
        let mut ctrl = EndEffectorController::new(gains, LAYOUT, 0.002);
        ctrl.set_initial_position(0.1).unwrap();
        // Fingers closed and centered; commanded fully open.
        let cmd = ctrl.output(&[0.0, 0.0, 0.0, 0.0], 0.1, 40.0).unwrap();
        assert_relative_eq!(cmd.grip_force, 40.0);
        assert_relative_eq!(cmd.generalized_force[1], 20.0);
        assert_relative_eq!(cmd.generalized_force[0], -20.0);
    }

    #[test]
    fn off_center_fingers_are_pushed_back() {
        let ctrl = EndEffectorController::new(PdGains { kp: 0.0, kd: 0.0 }, LAYOUT, 0.002);
        let cmd = ctrl.output(&[0.01, 0.03, 0.0, 0.0], 0.0, 40.0).unwrap();
        assert_relative_eq!(cmd.grip_force, 0.0);
        assert!(cmd.generalized_force[0] < 0.0);
        assert!(cmd.generalized_force[1] < 0.0);
    }

    #[test]
    fn state_map_reports_width() {
        let map = EndEffectorStateMap { layout: LAYOUT };
        let [width, rate] = map.output(&[-0.02, 0.03, -0.1, 0.1]).unwrap();
        assert_relative_eq!(width, 0.05);
        assert_relative_eq!(rate, 0.2);
    }

    #[test]
    fn grip_force_is_read_back_from_applied_forces() {
        let ctrl = EndEffectorController::new(PdGains { kp: 200.0, kd: 5.0 }, LAYOUT, 0.002);
        let cmd = ctrl.output(&[-0.01, 0.01, 0.0, 0.0], 0.05, 40.0).unwrap();
        assert_relative_eq!(LAYOUT.grip_force(&cmd.generalized_force).unwrap(), cmd.grip_force);
        assert!(LAYOUT.grip_force(&[1.0]).is_err());
    }
}
