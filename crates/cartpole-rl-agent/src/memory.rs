//! Experience replay memory

use ndarray::Array1;
use rand::{seq::index, Rng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One step of experience: what was seen, what was done, what followed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Observation before acting
    pub state: Array1<f64>,
    /// Index of the action taken
    pub action: usize,
    /// Reward received
    pub reward: f64,
    /// Observation after acting
    pub next_state: Array1<f64>,
    /// Whether `next_state` ended the episode
    pub terminal: bool,
}

/// Bounded FIFO buffer of transitions.
///
/// Once `capacity` is reached every push evicts the oldest transition.
#[derive(Debug, Clone)]
pub struct ReplayMemory {
    /// Buffer storage, oldest first
    buffer: VecDeque<Transition>,
    /// Maximum capacity
    capacity: usize,
}

impl ReplayMemory {
    /// Create a new replay memory
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a transition, evicting the oldest one when full
    pub fn push(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Draw `batch_size` distinct transitions uniformly at random.
    ///
    /// Returns `None` when fewer than `batch_size` transitions are stored.
    pub fn sample<R>(&self, batch_size: usize, rng: &mut R) -> Option<Vec<&Transition>>
    where
        R: Rng + ?Sized,
    {
        if self.buffer.len() < batch_size {
            return None;
        }

        let batch = index::sample(rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect();

        Some(batch)
    }

    /// Iterate over stored transitions, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    /// Get the current size of the memory
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if memory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of transitions retained
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the memory
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn transition(i: usize) -> Transition {
        #[allow(clippy::cast_precision_loss)]
        let x = i as f64;
        Transition {
            state: arr1(&[x, 0.0, 0.0, 0.0]),
            action: i % 2,
            reward: x,
            next_state: arr1(&[x + 1.0, 0.0, 0.0, 0.0]),
            terminal: false,
        }
    }

    #[test]
    fn test_push_beyond_capacity_evicts_oldest() {
        let mut memory = ReplayMemory::new(5);
        for i in 0..12 {
            memory.push(transition(i));
        }

        assert_eq!(memory.len(), 5);
        // 12 pushes into capacity 5: index 7 is the oldest survivor
        let rewards: Vec<f64> = memory.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_sample_refused_when_short() {
        let mut memory = ReplayMemory::new(100);
        let mut rng = StdRng::seed_from_u64(0);
        for i in 0..31 {
            memory.push(transition(i));
        }

        assert!(memory.sample(32, &mut rng).is_none());
        assert_eq!(memory.len(), 31);
    }

    #[test]
    fn test_sample_is_distinct_and_sized() {
        let mut memory = ReplayMemory::new(100);
        let mut rng = StdRng::seed_from_u64(42);
        for i in 0..50 {
            memory.push(transition(i));
        }

        for _ in 0..20 {
            let batch = memory.sample(32, &mut rng).unwrap();
            assert_eq!(batch.len(), 32);

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ids: HashSet<usize> = batch.iter().map(|t| t.reward as usize).collect();
            assert_eq!(ids.len(), 32);
        }
        assert_eq!(memory.len(), 50);
    }

    #[test]
    fn test_sample_whole_memory() {
        let mut memory = ReplayMemory::new(8);
        let mut rng = StdRng::seed_from_u64(9);
        for i in 0..8 {
            memory.push(transition(i));
        }

        let batch = memory.sample(8, &mut rng).unwrap();
        assert_eq!(batch.len(), 8);
    }

    #[test]
    fn test_clear() {
        let mut memory = ReplayMemory::new(4);
        memory.push(transition(0));
        assert!(!memory.is_empty());

        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.capacity(), 4);
    }
}
