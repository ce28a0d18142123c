//! Rolling average of finesse values for display.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Mean and spread over the current window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinesseStatistics {
    /// Mean finesse
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Values in the window
    pub sample_count: usize,
}

/// Keeps the last `window` positive finesse values.
///
/// Zero (inconclusive fit) and negative values are skipped so they do not drag the
/// average down.
#[derive(Debug, Clone)]
pub struct FinesseAverager {
    window: usize,
    history: VecDeque<f64>,
}

impl FinesseAverager {
    /// Averager over at most `window` values (at least one)
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    /// Adds a value; returns whether it was accepted
    pub fn push(&mut self, finesse: f64) -> bool {
        if !finesse.is_finite() || finesse <= 0.0 {
            return false;
        }
        self.history.push_back(finesse);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
        true
    }

    /// `None` while the window is empty
    pub fn statistics(&self) -> Option<FinesseStatistics> {
        if self.history.is_empty() {
            return None;
        }
        let n = self.history.len() as f64;
        let mean = self.history.iter().sum::<f64>() / n;
        let variance = self.history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Some(FinesseStatistics {
            mean,
            std_dev: variance.sqrt(),
            sample_count: self.history.len(),
        })
    }

    /// Values currently held
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Nothing accepted yet
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Maximum number of values
    pub fn window(&self) -> usize {
        self.window
    }

    /// Drop every value
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
