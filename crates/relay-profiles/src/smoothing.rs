//! Caller-invoked smoothing helpers.
//!
//! The relay never smooths on its own; subscribers that want steadier values
//! (e.g. a UI gauge fed by a heart-rate strap) keep one of these per channel.

use std::collections::VecDeque;

/// Exponential moving average: `y = alpha * x + (1 - alpha) * y_prev`.
#[derive(Debug, Clone)]
pub struct ExponentialSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl ExponentialSmoother {
    /// `alpha` is clamped to `(0, 1]`; 1 disables smoothing.
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() { alpha.clamp(f64::EPSILON, 1.0) } else { 1.0 };
        Self { alpha, value: None }
    }

    /// Feed a sample and return the smoothed value. The first sample passes
    /// through unchanged.
    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Mean of the last `window` samples.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl MovingAverage {
    /// A zero `window` is treated as 1.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, sample: f64) -> f64 {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
