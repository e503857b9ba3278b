//! Reinforcement learning environments for the CartPole DQN agent
//!
//! Provides the classic cart-pole balancing task behind the
//! [`cartpole_rl_core::Environment`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classic;

pub use classic::{CartPoleConfig, CartPoleEnv};

// Re-export core types
pub use cartpole_rl_core::{
    Action, ActionSpace, DiscreteAction, Environment, EnvironmentConfig, Observation, Reward,
    Step, VectorObservation,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::CartPoleEnv;
    pub use cartpole_rl_core::prelude::*;
}
