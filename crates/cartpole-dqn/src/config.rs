//! Run configuration loaded from an optional TOML file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use cartpole_rl_agent::{DqnConfig, TrainerConfig};
use cartpole_rl_core::EnvironmentConfig;

/// Everything a run needs, each table falling back to its defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub agent: DqnConfig,
    pub trainer: TrainerConfig,
    pub environment: EnvironmentConfig,
}

impl RunConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse TOML text and validate it
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.agent.validate().context("Invalid [agent] table")?;
        self.trainer.validate().context("Invalid [trainer] table")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = RunConfig::parse("").unwrap();
        assert_eq!(config.agent, DqnConfig::default());
        assert_eq!(config.trainer, TrainerConfig::default());
        assert!(config.environment.seed.is_none());
    }

    #[test]
    fn test_tables_override_fields() {
        let config = RunConfig::parse(
            r#"
            [agent]
            gamma = 0.95
            weight_path = "weights/run1.json"

            [agent.network]
            hidden_dims = [64, 32]

            [trainer]
            episodes = 250

            [environment]
            seed = 7
            "#,
        )
        .unwrap();

        assert!((config.agent.gamma - 0.95).abs() < f64::EPSILON);
        assert_eq!(config.agent.weight_path, PathBuf::from("weights/run1.json"));
        assert_eq!(config.agent.network.hidden_dims, vec![64, 32]);
        assert_eq!(config.agent.memory_capacity, 2000);
        assert_eq!(config.trainer.episodes, 250);
        assert_eq!(config.trainer.batch_size, 128);
        assert_eq!(config.environment.seed, Some(7));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = RunConfig::parse(
            r#"
            [trainer]
            batch_size = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[trainer]\nmax_episode_steps = 500").unwrap();

        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.trainer.max_episode_steps, 500);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunConfig::load(dir.path().join("absent.toml")).is_err());
    }
}
