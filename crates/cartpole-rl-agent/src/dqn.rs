//! Deep Q-Network (DQN) agent implementation

use async_trait::async_trait;
use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use cartpole_rl_core::{
    Action, ActionSpace, Agent, DiscreteAction, DiscreteSpace, Observation, RLError, Result,
    Reward, VectorObservation,
};

use crate::memory::{ReplayMemory, Transition};
use crate::network::{MlpConfig, MlpQNetwork, QNetwork};

/// Default location of the persisted weights
pub const DEFAULT_WEIGHT_PATH: &str = "cartpole_weight.json";

/// DQN-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    /// Discount factor for bootstrapped targets
    pub gamma: f64,
    /// Initial exploration rate
    pub exploration_rate: f64,
    /// Floor the exploration rate decays to
    pub exploration_min: f64,
    /// Multiplicative decay applied after every learning step
    pub exploration_decay: f64,
    /// Replay memory capacity
    pub memory_capacity: usize,
    /// Passes over each sampled batch
    pub fit_epochs: usize,
    /// Where weights are loaded from and saved to
    pub weight_path: PathBuf,
    /// Seed for exploration and replay sampling
    pub seed: Option<u64>,
    /// Function approximator layout
    pub network: MlpConfig,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            exploration_rate: 1.0,
            exploration_min: 0.01,
            exploration_decay: 0.996,
            memory_capacity: 2000,
            fit_epochs: 3,
            weight_path: PathBuf::from(DEFAULT_WEIGHT_PATH),
            seed: None,
            network: MlpConfig::default(),
        }
    }
}

impl DqnConfig {
    /// Reject values that would break the agent's invariants
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(RLError::Config(format!("{name} must be within [0, 1], got {value}")))
            }
        };

        unit("gamma", self.gamma)?;
        unit("exploration_rate", self.exploration_rate)?;
        unit("exploration_min", self.exploration_min)?;
        if self.exploration_decay <= 0.0 || self.exploration_decay > 1.0 {
            return Err(RLError::Config(format!(
                "exploration_decay must be within (0, 1], got {}",
                self.exploration_decay
            )));
        }
        if self.memory_capacity == 0 {
            return Err(RLError::Config("memory_capacity must be positive".into()));
        }
        if self.fit_epochs == 0 {
            return Err(RLError::Config("fit_epochs must be positive".into()));
        }
        self.network.validate()
    }
}

/// Epsilon-greedy DQN agent with experience replay.
///
/// Owns its Q-network and replay memory outright. Learning happens only in
/// [`Agent::replay`]; acting and remembering never touch the network's
/// parameters.
pub struct DqnAgent<N = MlpQNetwork> {
    config: DqnConfig,
    network: N,
    memory: ReplayMemory,
    epsilon: f64,
    action_space: DiscreteSpace,
    rng: StdRng,
}

impl DqnAgent<MlpQNetwork> {
    /// Build an agent around a fresh MLP, restoring saved weights if the
    /// configured weight file exists.
    pub async fn new(state_size: usize, action_size: usize, config: DqnConfig) -> Result<Self> {
        config.validate()?;
        let network = MlpQNetwork::new(state_size, action_size, config.network.clone())?;
        let mut agent = Self::with_network(network, config)?;

        if tokio::fs::try_exists(&agent.config.weight_path).await? {
            agent.load().await?;
        } else {
            info!(
                path = %agent.config.weight_path.display(),
                "no saved weights, starting from random initialization"
            );
        }

        Ok(agent)
    }
}

impl<N: QNetwork> DqnAgent<N> {
    /// Wrap an existing network; nothing is loaded from disk.
    pub fn with_network(network: N, config: DqnConfig) -> Result<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            memory: ReplayMemory::new(config.memory_capacity),
            epsilon: config.exploration_rate,
            action_space: DiscreteSpace::new(network.output_dim()),
            network,
            config,
            rng,
        })
    }

    /// Current exploration rate
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Override the exploration rate, clamped to [0, 1]
    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    /// Width of the state vector
    #[must_use]
    pub fn state_size(&self) -> usize {
        self.network.input_dim()
    }

    /// Number of discrete actions
    #[must_use]
    pub fn action_size(&self) -> usize {
        self.action_space.n()
    }

    /// Stored experience
    #[must_use]
    pub fn memory(&self) -> &ReplayMemory {
        &self.memory
    }

    /// The Q-network
    #[must_use]
    pub fn network(&self) -> &N {
        &self.network
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &DqnConfig {
        &self.config
    }

    fn to_state<O: Observation>(&self, observation: &O) -> Result<Array1<f64>> {
        let expected = self.state_size();
        if observation.dim() != expected {
            return Err(RLError::DimensionMismatch {
                expected,
                actual: observation.dim(),
            });
        }
        Ok(Array1::from(observation.to_vec()))
    }

    /// Inputs and regression targets for one replay batch.
    ///
    /// Each target row is the network's current prediction with only the
    /// taken action's entry replaced by the one-step bootstrapped return, so
    /// the loss only pulls on the action that was actually tried.
    fn build_targets(&self, batch: &[&Transition]) -> Result<(Array2<f64>, Array2<f64>)> {
        let width = self.state_size();
        let mut states = Array2::zeros((batch.len(), width));
        let mut next_states = Array2::zeros((batch.len(), width));
        for (row, transition) in batch.iter().enumerate() {
            states.row_mut(row).assign(&transition.state);
            next_states.row_mut(row).assign(&transition.next_state);
        }

        let mut targets = self.network.predict_batch(states.view())?;
        let next_values = self.network.predict_batch(next_states.view())?;

        for (row, transition) in batch.iter().enumerate() {
            let target = if transition.terminal {
                transition.reward
            } else {
                let best_next = next_values
                    .row(row)
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                transition.reward + self.config.gamma * best_next
            };
            targets[[row, transition.action]] = target;
        }

        Ok((states, targets))
    }

    fn decay_exploration(&mut self) {
        if self.epsilon > self.config.exploration_min {
            self.epsilon = (self.epsilon * self.config.exploration_decay)
                .max(self.config.exploration_min);
        }
    }
}

/// Index of the largest value; the first one wins ties
fn argmax(values: &Array1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[async_trait]
impl<N: QNetwork> Agent for DqnAgent<N> {
    type Observation = VectorObservation;
    type Action = DiscreteAction;

    fn act(&mut self, observation: &Self::Observation) -> Result<Self::Action> {
        let state = self.to_state(observation)?;
        if self.rng.gen::<f64>() < self.epsilon {
            return Ok(self.action_space.sample(&mut self.rng));
        }

        let values = self.network.predict(state.view())?;
        Ok(DiscreteAction::from_index(argmax(&values)))
    }

    fn remember(
        &mut self,
        observation: &Self::Observation,
        action: &Self::Action,
        reward: Reward,
        next_observation: &Self::Observation,
        done: bool,
    ) -> Result<()> {
        if !self.action_space.contains(action) {
            return Err(RLError::InvalidAction(format!(
                "action {} outside 0..{}",
                action.index(),
                self.action_size()
            )));
        }

        let transition = Transition {
            state: self.to_state(observation)?,
            action: action.index(),
            reward: reward.value(),
            next_state: self.to_state(next_observation)?,
            terminal: done,
        };
        self.memory.push(transition);
        Ok(())
    }

    fn replay(&mut self, batch_size: usize) -> Result<Option<f64>> {
        if batch_size == 0 {
            return Ok(None);
        }
        let Some(batch) = self.memory.sample(batch_size, &mut self.rng) else {
            return Ok(None);
        };

        let (states, targets) = self.build_targets(&batch)?;
        let loss = self
            .network
            .fit(states.view(), targets.view(), self.config.fit_epochs)?;
        self.decay_exploration();

        debug!(loss, epsilon = self.epsilon, batch_size, "replay step");
        Ok(Some(loss))
    }

    async fn save(&self) -> Result<()> {
        self.network.save(&self.config.weight_path).await?;
        info!(path = %self.config.weight_path.display(), "saved agent weights");
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        self.network.load(&self.config.weight_path).await?;
        self.epsilon = self.config.exploration_min;
        info!(
            path = %self.config.weight_path.display(),
            epsilon = self.epsilon,
            "restored agent weights"
        );
        Ok(())
    }
}
