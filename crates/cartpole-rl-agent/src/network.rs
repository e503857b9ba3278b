//! Action-value function approximators
//!
//! The agent only ever talks to a [`QNetwork`]: a map from a state to one
//! estimated value per discrete action, which can be fitted toward targets
//! and persisted to a single file. [`MlpQNetwork`] is the dense
//! multi-layer perceptron used by default.

use async_trait::async_trait;
use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, Axis, Dimension, Zip};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use cartpole_rl_core::{RLError, Result};

/// Function approximator for Q-values
#[async_trait]
pub trait QNetwork: Send + Sync {
    /// Width of the state vector
    fn input_dim(&self) -> usize;

    /// Number of actions scored
    fn output_dim(&self) -> usize;

    /// Estimated value of each action in `state`
    fn predict(&self, state: ArrayView1<f64>) -> Result<Array1<f64>> {
        let values = self.predict_batch(state.insert_axis(Axis(0)))?;
        Ok(values.row(0).to_owned())
    }

    /// Row-wise [`QNetwork::predict`] over a batch of states
    fn predict_batch(&self, states: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Train toward `targets` for `epochs` passes over the batch.
    ///
    /// Returns the mean squared error of the final pass.
    fn fit(
        &mut self,
        states: ArrayView2<f64>,
        targets: ArrayView2<f64>,
        epochs: usize,
    ) -> Result<f64>;

    /// Write the parameters to `path`, replacing any existing file
    async fn save(&self, path: &Path) -> Result<()>;

    /// Replace the parameters with those stored at `path`
    async fn load(&mut self, path: &Path) -> Result<()>;
}

/// Hidden-layer nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// max(0, x)
    Relu,
    /// Hyperbolic tangent
    Tanh,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => z.mapv(|v| v.max(0.0)),
            Self::Tanh => z.mapv(f64::tanh),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Self::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
        }
    }
}

/// MLP Q-network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    /// Hidden layer sizes
    pub hidden_dims: Vec<usize>,
    /// Activation function for hidden layers
    pub activation: Activation,
    /// Adam step size
    pub learning_rate: f64,
    /// Rows per gradient step inside `fit`
    pub batch_size: usize,
    /// Seed for weight init and shuffling
    pub seed: Option<u64>,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_dims: vec![24, 24],
            activation: Activation::Relu,
            learning_rate: 1e-3,
            batch_size: 32,
            seed: None,
        }
    }
}

impl MlpConfig {
    /// Reject configurations that cannot train
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dims.is_empty() {
            return Err(RLError::Config("network needs at least one hidden layer".into()));
        }
        if self.hidden_dims.contains(&0) {
            return Err(RLError::Config("hidden layer sizes must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(RLError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(RLError::Config("fit batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Adam optimizer state for one network
#[derive(Debug, Clone)]
struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: i32,
    m_w: Vec<Array2<f64>>,
    v_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_b: Vec<Array1<f64>>,
}

impl Adam {
    fn new(lr: f64, weights: &[Array2<f64>], biases: &[Array1<f64>]) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            t: 0,
            m_w: weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            v_w: weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            m_b: biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
            v_b: biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
        }
    }

    fn step(
        &mut self,
        weights: &mut [Array2<f64>],
        biases: &mut [Array1<f64>],
        grad_w: &[Array2<f64>],
        grad_b: &[Array1<f64>],
    ) {
        self.t = self.t.saturating_add(1);
        let step = AdamStep {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            bias1: 1.0 - self.beta1.powi(self.t),
            bias2: 1.0 - self.beta2.powi(self.t),
        };

        for i in 0..weights.len() {
            step.apply(&mut weights[i], &mut self.m_w[i], &mut self.v_w[i], &grad_w[i]);
            step.apply(&mut biases[i], &mut self.m_b[i], &mut self.v_b[i], &grad_b[i]);
        }
    }
}

/// Hyperparameters of a single Adam update, bias corrections included
#[derive(Debug, Clone, Copy)]
struct AdamStep {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    bias1: f64,
    bias2: f64,
}

impl AdamStep {
    fn apply<D: Dimension>(
        self,
        param: &mut Array<f64, D>,
        m: &mut Array<f64, D>,
        v: &mut Array<f64, D>,
        grad: &Array<f64, D>,
    ) {
        Zip::from(param)
            .and(m)
            .and(v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                *p -= self.lr * (*m / self.bias1) / ((*v / self.bias2).sqrt() + self.eps);
            });
    }
}

/// On-disk layout of an [`MlpQNetwork`]
#[derive(Debug, Serialize, Deserialize)]
struct MlpWeights {
    layer_sizes: Vec<usize>,
    activation: Activation,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
}

/// Dense feed-forward Q-network trained with mean squared error
pub struct MlpQNetwork {
    config: MlpConfig,
    /// Input, hidden and output widths
    layer_sizes: Vec<usize>,
    /// Weights for each layer, shaped (fan_in, fan_out)
    weights: Vec<Array2<f64>>,
    /// Biases for each layer
    biases: Vec<Array1<f64>>,
    optimizer: Adam,
    rng: StdRng,
}

impl MlpQNetwork {
    /// Create a randomly initialized network
    pub fn new(input_dim: usize, output_dim: usize, config: MlpConfig) -> Result<Self> {
        config.validate()?;
        if input_dim == 0 || output_dim == 0 {
            return Err(RLError::Config(
                "network input and output widths must be positive".into(),
            ));
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut layer_sizes = Vec::with_capacity(config.hidden_dims.len() + 2);
        layer_sizes.push(input_dim);
        layer_sizes.extend_from_slice(&config.hidden_dims);
        layer_sizes.push(output_dim);

        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        let mut biases = Vec::with_capacity(layer_sizes.len() - 1);
        for pair in layer_sizes.windows(2) {
            weights.push(Self::xavier_init(pair[0], pair[1], &mut rng));
            biases.push(Array1::zeros(pair[1]));
        }

        let optimizer = Adam::new(config.learning_rate, &weights, &biases);

        Ok(Self {
            config,
            layer_sizes,
            weights,
            biases,
            optimizer,
            rng,
        })
    }

    /// Xavier initialization for weights
    fn xavier_init(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Array2<f64> {
        #[allow(clippy::cast_precision_loss)]
        let limit = (6.0 / (in_dim + out_dim) as f64).sqrt();
        Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-limit..limit))
    }

    /// Input, hidden and output widths
    #[must_use]
    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    /// Network configuration
    #[must_use]
    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    fn check_width(&self, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(RLError::DimensionMismatch { expected, actual })
        }
    }

    /// Forward pass keeping every layer's pre-activation and activation
    fn forward_trace(&self, input: &Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let last = self.weights.len() - 1;
        let mut pre_activations = Vec::with_capacity(self.weights.len());
        let mut activations = Vec::with_capacity(self.weights.len() + 1);
        activations.push(input.clone());

        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[i].dot(w) + b;
            // Output layer is linear
            let a = if i == last {
                z.clone()
            } else {
                self.config.activation.apply(&z)
            };
            pre_activations.push(z);
            activations.push(a);
        }

        (pre_activations, activations)
    }

    /// One gradient step on a mini-batch; returns its loss
    fn train_batch(&mut self, states: &Array2<f64>, targets: &Array2<f64>) -> Result<f64> {
        let (pre_activations, activations) = self.forward_trace(states);
        let Some(output) = activations.last() else {
            return Err(RLError::Computation("network has no layers".into()));
        };

        let diff = output - targets;
        #[allow(clippy::cast_precision_loss)]
        let count = diff.len() as f64;
        let loss = diff.mapv(|d| d * d).sum() / count;
        if !loss.is_finite() {
            return Err(RLError::Computation(format!("training loss diverged: {loss}")));
        }

        let layers = self.weights.len();
        let mut grad_w = Vec::with_capacity(layers);
        let mut grad_b = Vec::with_capacity(layers);
        let mut delta = diff * (2.0 / count);

        for layer in (0..layers).rev() {
            grad_w.push(activations[layer].t().dot(&delta));
            grad_b.push(delta.sum_axis(Axis(0)));
            if layer > 0 {
                let upstream = delta.dot(&self.weights[layer].t());
                delta = upstream * self.config.activation.derivative(&pre_activations[layer - 1]);
            }
        }
        grad_w.reverse();
        grad_b.reverse();

        self.optimizer
            .step(&mut self.weights, &mut self.biases, &grad_w, &grad_b);

        Ok(loss)
    }
}

#[async_trait]
impl QNetwork for MlpQNetwork {
    fn input_dim(&self) -> usize {
        self.layer_sizes[0]
    }

    fn output_dim(&self) -> usize {
        self.layer_sizes[self.layer_sizes.len() - 1]
    }

    fn predict_batch(&self, states: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_width(self.input_dim(), states.ncols())?;

        let last = self.weights.len() - 1;
        let mut hidden = states.to_owned();
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            hidden = hidden.dot(w) + b;
            if i < last {
                hidden = self.config.activation.apply(&hidden);
            }
        }
        Ok(hidden)
    }

    fn fit(
        &mut self,
        states: ArrayView2<f64>,
        targets: ArrayView2<f64>,
        epochs: usize,
    ) -> Result<f64> {
        self.check_width(self.input_dim(), states.ncols())?;
        self.check_width(self.output_dim(), targets.ncols())?;
        self.check_width(states.nrows(), targets.nrows())?;

        let rows = states.nrows();
        if rows == 0 {
            return Ok(0.0);
        }

        let mut order: Vec<usize> = (0..rows).collect();
        let mut epoch_loss = 0.0;
        for _ in 0..epochs {
            order.shuffle(&mut self.rng);
            let mut weighted = 0.0;
            for chunk in order.chunks(self.config.batch_size) {
                let x = states.select(Axis(0), chunk);
                let y = targets.select(Axis(0), chunk);
                #[allow(clippy::cast_precision_loss)]
                let share = chunk.len() as f64;
                weighted += self.train_batch(&x, &y)? * share;
            }
            #[allow(clippy::cast_precision_loss)]
            let total = rows as f64;
            epoch_loss = weighted / total;
        }

        Ok(epoch_loss)
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = MlpWeights {
            layer_sizes: self.layer_sizes.clone(),
            activation: self.config.activation,
            weights: self.weights.clone(),
            biases: self.biases.clone(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Stage next to the target so an interrupted write never clobbers it
        let Some(file_name) = path.file_name() else {
            return Err(RLError::Config(format!(
                "weight path {} has no file name",
                path.display()
            )));
        };
        let mut staging = file_name.to_os_string();
        staging.push(".tmp");
        let staging = path.with_file_name(staging);

        let json = serde_json::to_string(&snapshot)?;
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, path).await?;
        debug!(path = %path.display(), "wrote network weights");
        Ok(())
    }

    async fn load(&mut self, path: &Path) -> Result<()> {
        let json = tokio::fs::read_to_string(path).await?;
        let snapshot: MlpWeights = serde_json::from_str(&json)?;

        self.check_width(self.layer_sizes.len(), snapshot.layer_sizes.len())?;
        for (&expected, &actual) in self.layer_sizes.iter().zip(&snapshot.layer_sizes) {
            self.check_width(expected, actual)?;
        }
        self.check_width(self.weights.len(), snapshot.weights.len())?;
        self.check_width(self.biases.len(), snapshot.biases.len())?;
        for (mine, theirs) in self.weights.iter().zip(&snapshot.weights) {
            if mine.dim() != theirs.dim() {
                return Err(RLError::DimensionMismatch {
                    expected: mine.len(),
                    actual: theirs.len(),
                });
            }
        }
        for (mine, theirs) in self.biases.iter().zip(&snapshot.biases) {
            self.check_width(mine.len(), theirs.len())?;
        }

        self.weights = snapshot.weights;
        self.biases = snapshot.biases;
        self.config.activation = snapshot.activation;
        self.optimizer = Adam::new(self.config.learning_rate, &self.weights, &self.biases);
        debug!(path = %path.display(), "loaded network weights");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn seeded(seed: u64) -> MlpConfig {
        MlpConfig {
            seed: Some(seed),
            ..MlpConfig::default()
        }
    }

    #[test]
    fn test_predict_shape() {
        let net = MlpQNetwork::new(4, 2, seeded(1)).unwrap();
        let values = net.predict(arr1(&[0.1, 0.2, 0.3, 0.4]).view()).unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(net.layer_sizes(), &[4, 24, 24, 2]);
    }

    #[test]
    fn test_predict_batch_matches_single_rows() {
        let net = MlpQNetwork::new(3, 2, seeded(2)).unwrap();
        let states = arr2(&[[0.1, -0.2, 0.3], [1.0, 0.5, -0.5]]);
        let batch = net.predict_batch(states.view()).unwrap();

        for (row, state) in states.rows().into_iter().enumerate() {
            let single = net.predict(state).unwrap();
            for action in 0..2 {
                assert_abs_diff_eq!(batch[[row, action]], single[action], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_wrong_width_rejected() {
        let net = MlpQNetwork::new(4, 2, seeded(3)).unwrap();
        let err = net.predict(arr1(&[0.1, 0.2]).view()).unwrap_err();
        assert!(matches!(
            err,
            RLError::DimensionMismatch { expected: 4, actual: 2 }
        ));
    }

    #[test]
    fn test_requires_hidden_layer() {
        let config = MlpConfig {
            hidden_dims: vec![],
            ..MlpConfig::default()
        };
        assert!(matches!(
            MlpQNetwork::new(4, 2, config),
            Err(RLError::Config(_))
        ));
    }

    #[test]
    fn test_fit_reduces_loss() {
        let mut net = MlpQNetwork::new(2, 2, seeded(4)).unwrap();
        let states = arr2(&[[0.0, 1.0], [1.0, 0.0], [0.5, 0.5], [1.0, 1.0]]);
        let targets = arr2(&[[1.0, 0.0], [0.0, 1.0], [0.5, 0.5], [1.0, 1.0]]);

        let first = net.fit(states.view(), targets.view(), 1).unwrap();
        let mut last = first;
        for _ in 0..300 {
            last = net.fit(states.view(), targets.view(), 3).unwrap();
        }

        assert!(last < first * 0.25, "loss went from {first} to {last}");
    }

    #[test]
    fn test_tanh_network_fits() {
        let config = MlpConfig {
            activation: Activation::Tanh,
            hidden_dims: vec![16],
            ..seeded(13)
        };
        let mut net = MlpQNetwork::new(2, 1, config).unwrap();
        let states = arr2(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
        let targets = arr2(&[[0.0], [0.5], [0.5], [1.0]]);

        let first = net.fit(states.view(), targets.view(), 1).unwrap();
        let mut last = first;
        for _ in 0..500 {
            last = net.fit(states.view(), targets.view(), 3).unwrap();
        }

        assert!(last < first * 0.5, "loss went from {first} to {last}");
    }

    #[test]
    fn test_fit_shape_mismatch() {
        let mut net = MlpQNetwork::new(2, 2, seeded(5)).unwrap();
        let states = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let targets = arr2(&[[1.0, 0.0]]);
        assert!(net.fit(states.view(), targets.view(), 1).is_err());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weights.json");

        let trained = MlpQNetwork::new(4, 2, seeded(6)).unwrap();
        trained.save(&path).await.unwrap();

        let mut restored = MlpQNetwork::new(4, 2, seeded(7)).unwrap();
        let state = arr1(&[0.3, -0.1, 0.05, 0.2]);
        assert_ne!(
            trained.predict(state.view()).unwrap(),
            restored.predict(state.view()).unwrap()
        );

        restored.load(&path).await.unwrap();
        assert_eq!(restored.weights, trained.weights);
        assert_eq!(restored.biases, trained.biases);
        assert_eq!(
            restored.predict(state.view()).unwrap(),
            trained.predict(state.view()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        let staging = dir.path().join("weights.json.tmp");
        tokio::fs::write(&path, "{\"truncated\": ").await.unwrap();
        tokio::fs::write(&staging, "leftover").await.unwrap();

        let net = MlpQNetwork::new(4, 2, seeded(11)).unwrap();
        net.save(&path).await.unwrap();

        assert!(!staging.exists());
        let mut restored = MlpQNetwork::new(4, 2, seeded(12)).unwrap();
        restored.load(&path).await.unwrap();
        assert_eq!(restored.weights, net.weights);
    }

    #[tokio::test]
    async fn test_load_rejects_other_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");

        MlpQNetwork::new(4, 3, seeded(8))
            .unwrap()
            .save(&path)
            .await
            .unwrap();

        let mut net = MlpQNetwork::new(4, 2, seeded(9)).unwrap();
        let err = net.load(&path).await.unwrap_err();
        assert!(matches!(
            err,
            RLError::DimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = MlpQNetwork::new(4, 2, seeded(10)).unwrap();
        let err = net.load(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, RLError::Io(_)));
    }
}
