//! Deep Q-learning agent and training loop for CartPole
//!
//! This crate provides:
//! - [`ReplayMemory`], a bounded store of past transitions
//! - [`MlpQNetwork`], a small fully connected Q-value approximator
//! - [`DqnAgent`], an epsilon-greedy learner built on the two
//! - [`Trainer`], the episode loop that drives an agent through an environment

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dqn;
pub mod memory;
pub mod network;
pub mod trainer;

// Re-export agents
pub use dqn::{DqnAgent, DqnConfig, DEFAULT_WEIGHT_PATH};

// Re-export components
pub use memory::{ReplayMemory, Transition};
pub use network::{Activation, MlpConfig, MlpQNetwork, QNetwork};
pub use trainer::{RunMode, RunSummary, Trainer, TrainerConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DqnAgent, DqnConfig, RunMode, Trainer, TrainerConfig};
    pub use cartpole_rl_core::prelude::*;
}
