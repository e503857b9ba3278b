//! Classic control environments

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

use cartpole_rl_core::{
    ActionSpace, DiscreteAction, DiscreteSpace, Environment, EnvironmentConfig, RLError, Result,
    Reward, Step, StepInfo, VectorObservation,
};

/// Width of the text track drawn by [`CartPoleEnv::render`]
const TRACK_WIDTH: usize = 61;

/// Physical constants of the cart-pole system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartPoleConfig {
    /// Gravitational acceleration (m/s^2)
    pub gravity: f64,
    /// Mass of the cart (kg)
    pub mass_cart: f64,
    /// Mass of the pole (kg)
    pub mass_pole: f64,
    /// Half the pole's length (m)
    pub length: f64,
    /// Magnitude of the force applied by an action (N)
    pub force_mag: f64,
    /// Seconds between state updates
    pub tau: f64,
    /// Cart position at which the episode terminates
    pub x_threshold: f64,
    /// Pole angle (radians) at which the episode terminates
    pub theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            x_threshold: 2.4,
            theta_threshold: 12.0 * 2.0 * PI / 360.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CartPoleState {
    x: f64,         // Cart position
    x_dot: f64,     // Cart velocity
    theta: f64,     // Pole angle
    theta_dot: f64, // Pole angular velocity
}

/// CartPole environment
///
/// A pole is attached by an un-actuated joint to a cart moving along a
/// frictionless track. Action 0 pushes the cart left and action 1 pushes it
/// right. Every step earns a reward of 1; the episode terminates once the pole
/// leans more than 12 degrees or the cart leaves the track. There is no time
/// limit.
pub struct CartPoleEnv {
    /// Current state
    state: CartPoleState,
    /// Physical constants
    config: CartPoleConfig,
    /// Render mode and seed
    env_config: EnvironmentConfig,
    /// Step count in the current episode
    steps: usize,
    /// Steps taken after the episode already terminated
    steps_beyond_terminated: Option<usize>,
    rng: StdRng,
}

impl CartPoleEnv {
    /// Number of features in an observation
    pub const OBSERVATION_DIM: usize = 4;
    /// Number of discrete actions
    pub const ACTIONS: usize = 2;

    /// Create a new CartPole environment with the default physics
    pub fn new(config: EnvironmentConfig) -> Result<Self> {
        Self::with_physics(config, CartPoleConfig::default())
    }

    /// Create a new CartPole environment with custom physics
    pub fn with_physics(env_config: EnvironmentConfig, config: CartPoleConfig) -> Result<Self> {
        if config.tau <= 0.0 || config.length <= 0.0 || config.mass_cart + config.mass_pole <= 0.0 {
            return Err(RLError::Config(
                "cart-pole tau, length and total mass must be positive".to_string(),
            ));
        }

        let rng = match env_config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            state: CartPoleState::default(),
            config,
            env_config,
            steps: 0,
            steps_beyond_terminated: None,
            rng,
        })
    }

    /// Steps taken since the last reset
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation {
            data: vec![
                self.state.x,
                self.state.x_dot,
                self.state.theta,
                self.state.theta_dot,
            ],
        }
    }

    fn is_terminated(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold
            || self.state.theta.abs() > self.config.theta_threshold
    }

    /// One line of text showing the cart on its track
    fn frame(&self) -> String {
        let span = 2.0 * self.config.x_threshold;
        let position = ((self.state.x + self.config.x_threshold) / span).clamp(0.0, 1.0);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let column = (position * (TRACK_WIDTH - 1) as f64).round() as usize;

        let pole = if self.state.theta > 0.035 {
            '/'
        } else if self.state.theta < -0.035 {
            '\\'
        } else {
            '|'
        };

        let track: String = (0..TRACK_WIDTH)
            .map(|i| if i == column { pole } else { '-' })
            .collect();

        format!(
            "[{track}] x={:+.3} theta={:+.3}",
            self.state.x, self.state.theta
        )
    }
}

#[async_trait]
impl Environment for CartPoleEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;

    fn observation_dim(&self) -> usize {
        Self::OBSERVATION_DIM
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(Self::ACTIONS)) // 0: push left, 1: push right
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.state = CartPoleState {
            x: self.rng.gen_range(-0.05..0.05),
            x_dot: self.rng.gen_range(-0.05..0.05),
            theta: self.rng.gen_range(-0.05..0.05),
            theta_dot: self.rng.gen_range(-0.05..0.05),
        };
        self.steps = 0;
        self.steps_beyond_terminated = None;

        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let force = match action.0 {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            other => return Err(RLError::InvalidAction(format!("Invalid action: {other}"))),
        };

        let cos_theta = self.state.theta.cos();
        let sin_theta = self.state.theta.sin();

        let total_mass = self.config.mass_cart + self.config.mass_pole;
        let pole_mass_length = self.config.mass_pole * self.config.length;

        let temp =
            (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.config.gravity * sin_theta - cos_theta * temp)
            / (self.config.length
                * (4.0 / 3.0 - self.config.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        // Explicit Euler: positions move with the pre-update velocities
        let dt = self.config.tau;
        self.state.x += dt * self.state.x_dot;
        self.state.x_dot += dt * x_acc;
        self.state.theta += dt * self.state.theta_dot;
        self.state.theta_dot += dt * theta_acc;

        self.steps += 1;

        let done = self.is_terminated();
        let reward = match self.steps_beyond_terminated {
            None if done => {
                self.steps_beyond_terminated = Some(0);
                debug!(steps = self.steps, "cart-pole terminated");
                1.0
            }
            None => 1.0,
            Some(ref mut beyond) => {
                if *beyond == 0 {
                    warn!("step() called after the episode terminated; call reset() first");
                }
                *beyond += 1;
                0.0
            }
        };

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(reward),
            done,
            truncated: false,
            info: StepInfo::default(),
        })
    }

    async fn render(&self) -> Result<()> {
        if self.env_config.renders_for_human() {
            println!("{}", self.frame());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[tokio::test]
    async fn test_reset_is_near_upright() {
        let mut env = CartPoleEnv::new(EnvironmentConfig::seeded(3)).unwrap();
        let (obs, _info) = env.reset().await.unwrap();

        assert_eq!(obs.data.len(), CartPoleEnv::OBSERVATION_DIM);
        assert!(obs.data.iter().all(|v| v.abs() < 0.05));
        assert_eq!(env.steps(), 0);
    }

    #[tokio::test]
    async fn test_seeded_resets_are_reproducible() {
        let mut a = CartPoleEnv::new(EnvironmentConfig::seeded(11)).unwrap();
        let mut b = CartPoleEnv::new(EnvironmentConfig::seeded(11)).unwrap();

        let (obs_a, _) = a.reset().await.unwrap();
        let (obs_b, _) = b.reset().await.unwrap();
        assert_eq!(obs_a, obs_b);

        let step_a = a.step(DiscreteAction(1)).await.unwrap();
        let step_b = b.step(DiscreteAction(1)).await.unwrap();
        assert_eq!(step_a.observation, step_b.observation);
    }

    #[tokio::test]
    async fn test_single_step_from_rest() {
        let mut env = CartPoleEnv::new(EnvironmentConfig::seeded(0)).unwrap();
        env.state = CartPoleState::default();

        let step = env.step(DiscreteAction(1)).await.unwrap();
        let obs = step.observation.data;

        // Position integrates the old (zero) velocity
        assert_abs_diff_eq!(obs[0], 0.0);
        assert_abs_diff_eq!(obs[1], 0.195_122, epsilon = 1e-5);
        assert_abs_diff_eq!(obs[2], 0.0);
        assert_abs_diff_eq!(obs[3], -0.292_683, epsilon = 1e-5);
        assert_abs_diff_eq!(step.reward.value(), 1.0);
        assert!(!step.done);
        assert!(!step.truncated);
    }

    #[tokio::test]
    async fn test_constant_push_terminates() {
        let mut env = CartPoleEnv::new(EnvironmentConfig::seeded(5)).unwrap();
        env.reset().await.unwrap();

        let mut steps = 0;
        loop {
            let step = env.step(DiscreteAction(0)).await.unwrap();
            steps += 1;
            assert_abs_diff_eq!(step.reward.value(), 1.0);
            if step.done {
                break;
            }
            assert!(steps < 200, "pushing one way must topple the pole");
        }

        // Stepping past termination yields no reward
        let after = env.step(DiscreteAction(0)).await.unwrap();
        assert!(after.done);
        assert_abs_diff_eq!(after.reward.value(), 0.0);
    }

    #[tokio::test]
    async fn test_invalid_action_is_rejected() {
        let mut env = CartPoleEnv::new(EnvironmentConfig::seeded(1)).unwrap();
        env.reset().await.unwrap();

        let err = env.step(DiscreteAction(2)).await.unwrap_err();
        assert!(matches!(err, RLError::InvalidAction(_)));
    }

    #[test]
    fn test_invalid_physics_rejected() {
        let physics = CartPoleConfig {
            tau: 0.0,
            ..CartPoleConfig::default()
        };
        assert!(CartPoleEnv::with_physics(EnvironmentConfig::default(), physics).is_err());
    }

    #[test]
    fn test_frame_places_cart_on_track() {
        let mut env = CartPoleEnv::new(EnvironmentConfig::seeded(2)).unwrap();
        env.state = CartPoleState::default();
        let centered = env.frame();
        assert_eq!(centered.chars().nth(1 + TRACK_WIDTH / 2), Some('|'));

        env.state.x = 2.4;
        env.state.theta = 0.1;
        let right = env.frame();
        assert_eq!(right.chars().nth(TRACK_WIDTH), Some('/'));
    }
}
