// CartPole DQN
// Trains a Deep Q-Network to balance a pole, or replays the saved one

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cartpole_rl_agent::{DqnAgent, RunMode, Trainer};
use cartpole_rl_core::{ActionSpace, Environment};
use cartpole_rl_env::CartPoleEnv;

mod config;

use config::RunConfig;

#[derive(Parser)]
#[command(name = "cartpole-dqn")]
#[command(about = "Balance a pole on a cart with a Deep Q-Network", version)]
struct Cli {
    /// Learn over many episodes instead of watching a single one
    #[arg(long)]
    train: bool,

    /// TOML file with [agent], [trainer] and [environment] tables
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.train {
            RunMode::Training
        } else {
            RunMode::Evaluation
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Episode lines and frames own stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli.mode();

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if mode == RunMode::Evaluation && config.environment.render_mode.is_none() {
        config.environment.render_mode = Some("human".to_string());
    }

    let env = CartPoleEnv::new(config.environment).context("Failed to create CartPole")?;
    let agent = DqnAgent::new(env.observation_dim(), env.action_space().n(), config.agent)
        .await
        .context("Failed to create agent")?;

    let mut trainer =
        Trainer::new(env, agent, mode, config.trainer).context("Failed to create trainer")?;

    // Polled before the first step, which installs the SIGINT handler
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    let summary = trainer.run_until(shutdown).await.context("Run failed")?;
    info!(
        episodes = summary.episodes,
        best_score = summary.best_score,
        interrupted = summary.interrupted,
        training_disabled = summary.training_disabled,
        "done"
    );

    Ok(())
}
