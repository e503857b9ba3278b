//! Core reinforcement learning traits and types for the CartPole DQN agent
//!
//! This crate provides the seams between the learner and the world it acts
//! in: the [`Environment`] a simulator implements and the [`Agent`] a
//! training loop drives.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod agent;
pub mod environment;
pub mod error;
pub mod observation;
pub mod reward;

// Re-export core traits and types
pub use action::{Action, ActionSpace, DiscreteAction, DiscreteSpace};
pub use agent::Agent;
pub use environment::{Environment, EnvironmentConfig, Step, StepInfo};
pub use error::{RLError, Result};
pub use observation::{Observation, VectorObservation};
pub use reward::Reward;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSpace, Agent, DiscreteAction, Environment, Observation, Result, Reward, Step,
        VectorObservation,
    };
}
