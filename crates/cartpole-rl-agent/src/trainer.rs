//! Episode-driven training loop

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};

use cartpole_rl_core::{Agent, Environment, RLError, Result, Reward};

/// How a run uses its episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One rendered episode, no learning
    Evaluation,
    /// Many episodes with a replay step after each
    Training,
}

/// Training loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Episodes to run in training mode
    pub episodes: usize,
    /// Transitions per replay step
    pub batch_size: usize,
    /// Hard cap on steps within one episode
    pub max_episode_steps: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            episodes: 10_000,
            batch_size: 128,
            max_episode_steps: 100_000,
        }
    }
}

impl TrainerConfig {
    /// Reject values that would make the loop meaningless
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RLError::Config("batch_size must be positive".into()));
        }
        if self.max_episode_steps == 0 {
            return Err(RLError::Config("max_episode_steps must be positive".into()));
        }
        Ok(())
    }
}

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Episodes completed
    pub episodes: usize,
    /// Environment steps across all episodes
    pub total_steps: usize,
    /// Longest episode
    pub best_score: usize,
    /// Stopped by the shutdown signal
    pub interrupted: bool,
    /// Training was switched off by the step cap
    pub training_disabled: bool,
}

impl RunSummary {
    fn record(&mut self, score: usize) {
        self.episodes += 1;
        self.total_steps += score;
        self.best_score = self.best_score.max(score);
    }
}

/// Drives an agent through episodes of an environment.
///
/// The agent's weights are saved exactly once per run, whether the episodes
/// finish, the run is interrupted, or a collaborator fails.
pub struct Trainer<E, A> {
    env: E,
    agent: A,
    config: TrainerConfig,
    mode: RunMode,
    render: bool,
    summary: RunSummary,
}

impl<E, A> Trainer<E, A>
where
    E: Environment,
    A: Agent<Observation = E::Observation, Action = E::Action>,
{
    /// Create a new training loop
    pub fn new(env: E, agent: A, mode: RunMode, config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            env,
            agent,
            config,
            mode,
            render: mode == RunMode::Evaluation,
            summary: RunSummary::default(),
        })
    }

    /// Current mode; training can fall back to evaluation mid-run
    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// The agent being driven
    #[must_use]
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// The environment being driven
    #[must_use]
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Give back the environment and agent
    pub fn into_parts(self) -> (E, A) {
        (self.env, self.agent)
    }

    /// Run to completion, then save the agent
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.run_until(std::future::pending()).await
    }

    /// Run until done or until `shutdown` resolves, then save the agent and
    /// close the environment.
    ///
    /// `shutdown` is polled once before any work and again before every
    /// step, so it is noticed mid-episode; an environment call already in
    /// flight is allowed to finish. A failure from the loop takes precedence
    /// over a failure to save, which takes precedence over a failure to close.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let outcome = self.run_episodes(&mut shutdown).await;

        let saved = self.agent.save().await;
        let closed = self.env.close().await;

        let interrupted = match outcome {
            Ok(interrupted) => interrupted,
            Err(err) => {
                if let Err(save_err) = saved {
                    error!(error = %save_err, "saving weights after a failed run also failed");
                }
                if let Err(close_err) = closed {
                    error!(error = %close_err, "closing the environment after a failed run failed");
                }
                return Err(err);
            }
        };
        saved?;
        closed?;

        if interrupted {
            warn!(episodes = self.summary.episodes, "run interrupted");
            self.summary.interrupted = true;
        }
        info!(
            episodes = self.summary.episodes,
            total_steps = self.summary.total_steps,
            best_score = self.summary.best_score,
            "run finished"
        );
        Ok(self.summary.clone())
    }

    /// Returns whether the run was interrupted
    async fn run_episodes<F>(&mut self, shutdown: &mut Pin<&mut F>) -> Result<bool>
    where
        F: Future<Output = ()>,
    {
        info!(mode = ?self.mode, episodes = self.config.episodes, "starting run");

        for index in 0..self.config.episodes {
            let Episode::Finished { steps, reward } = self.run_episode(shutdown).await? else {
                return Ok(true);
            };
            println!("Episode {index}# Score: {steps}");
            debug!(episode = index, steps, reward = reward.value(), "episode finished");
            self.summary.record(steps);

            match self.mode {
                RunMode::Training => {
                    if let Some(loss) = self.agent.replay(self.config.batch_size)? {
                        debug!(episode = index, loss, "learned from replay");
                    }
                }
                RunMode::Evaluation => break,
            }
        }

        Ok(false)
    }

    async fn run_episode<F>(&mut self, shutdown: &mut Pin<&mut F>) -> Result<Episode>
    where
        F: Future<Output = ()>,
    {
        if shutdown_requested(shutdown.as_mut()).await {
            return Ok(Episode::Interrupted);
        }

        let (mut state, _info) = self.env.reset().await?;
        if self.render {
            self.env.render().await?;
        }

        let mut steps = 0;
        let mut reward = Reward::default();
        loop {
            if shutdown_requested(shutdown.as_mut()).await {
                return Ok(Episode::Interrupted);
            }

            let action = self.agent.act(&state)?;
            let step = self.env.step(action.clone()).await?;
            self.agent.remember(&state, &action, step.reward, &step.observation, step.done)?;
            state = step.observation;
            reward += step.reward;
            steps += 1;

            if self.render {
                self.env.render().await?;
            }
            if step.done {
                break;
            }
            if steps >= self.config.max_episode_steps {
                if self.mode == RunMode::Training {
                    warn!(steps, "step cap reached, training disabled for the rest of the run");
                    self.mode = RunMode::Evaluation;
                    self.summary.training_disabled = true;
                } else {
                    warn!(steps, "step cap reached");
                }
                break;
            }
        }

        Ok(Episode::Finished { steps, reward })
    }
}

/// How an episode ended
enum Episode {
    Finished { steps: usize, reward: Reward },
    Interrupted,
}

/// Poll `shutdown` once without waiting on it.
///
/// Yields first so a current-thread runtime gets to drive its signal
/// handling between steps.
async fn shutdown_requested<F>(shutdown: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::task::yield_now().await;
    tokio::select! {
        biased;
        () = shutdown => true,
        () = std::future::ready(()) => false,
    }
}
