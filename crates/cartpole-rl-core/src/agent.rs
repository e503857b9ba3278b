//! Agent traits

use async_trait::async_trait;

use crate::{Action, Observation, Reward};

/// A learning agent driven step by step from the outside.
///
/// The driver owns the episode loop: it asks for an action, feeds back the
/// resulting transition through [`Agent::remember`], and calls
/// [`Agent::replay`] when it wants the agent to learn. Persistence goes
/// through a location fixed at construction time.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Observation type
    type Observation: Observation;
    /// Action type
    type Action: Action;

    /// Select an action given an observation
    fn act(&mut self, observation: &Self::Observation) -> crate::Result<Self::Action>;

    /// Record one transition for later learning
    fn remember(
        &mut self,
        observation: &Self::Observation,
        action: &Self::Action,
        reward: Reward,
        next_observation: &Self::Observation,
        done: bool,
    ) -> crate::Result<()>;

    /// Run one learning step over `batch_size` remembered transitions.
    ///
    /// Returns `Ok(None)` when there is not enough experience yet.
    fn replay(&mut self, batch_size: usize) -> crate::Result<Option<f64>>;

    /// Persist the learned parameters
    async fn save(&self) -> crate::Result<()>;

    /// Restore previously persisted parameters
    async fn load(&mut self) -> crate::Result<()>;
}
