use ndarray::Array2;

use crate::error::HarnessError;
use crate::trial::TrialRecord;

/// Discrete motor-imagery decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Argmax over `[left, right]` class scores; ties go left.
    pub fn from_scores(scores: [f32; 2]) -> Self {
        if scores[0] >= scores[1] {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

/// Opaque classifier boundary. The pretrained network maps one float32
/// window to two class scores; `fine_tune` is the online variant's periodic
/// batch hook and may be a no-op.
pub trait Classifier {
    fn classify(&self, window: &Array2<f32>) -> [f32; 2];

    fn fine_tune(&mut self, _batch: &[TrialRecord]) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// Converts a processed f64 window into the f32 tensor the model consumes.
pub fn model_input(window: &Array2<f64>) -> Array2<f32> {
    window.mapv(|v| v as f32)
}

/// Log band-power contrast between two electrode groups.
///
/// Stands in for the external network during bring-up: motor imagery lowers
/// band power over the contralateral hemisphere, so the group with less
/// power votes for the opposite side.
pub struct BandPowerClassifier {
    left_channels: Vec<usize>,
    right_channels: Vec<usize>,
}

impl BandPowerClassifier {
    pub fn new(left_channels: Vec<usize>, right_channels: Vec<usize>) -> Self {
        Self {
            left_channels,
            right_channels,
        }
    }

    /// Lower channel indices as the left group, upper as the right, which
    /// matches the default montage order on Cyton-style boards.
    pub fn split(channel_count: usize) -> Self {
        let half = channel_count / 2;
        Self::new((0..half).collect(), (half..channel_count).collect())
    }
}

impl Classifier for BandPowerClassifier {
    fn classify(&self, window: &Array2<f32>) -> [f32; 2] {
        let left = group_log_power(window, &self.left_channels);
        let right = group_log_power(window, &self.right_channels);
        // Less power on the right hemisphere votes "left", and vice versa.
        let (el, er) = ((-right).exp(), (-left).exp());
        let sum = el + er;
        if sum.is_finite() && sum > 0.0 {
            [el / sum, er / sum]
        } else {
            [0.5, 0.5]
        }
    }
}

fn group_log_power(window: &Array2<f32>, channels: &[usize]) -> f32 {
    let powers: Vec<f32> = channels
        .iter()
        .filter(|&&ch| ch < window.nrows())
        .map(|&ch| log_band_power(&window.row(ch).to_vec()))
        .collect();
    if powers.is_empty() {
        return 0.0;
    }
    powers.iter().sum::<f32>() / powers.len() as f32
}

/// Log of the windowed variance. The mean subtraction removes residual DC;
/// the epsilon keeps a dead channel from producing -inf.
fn log_band_power(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    let variance = samples
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f32>()
        / samples.len() as f32;
    (variance + 1e-6).ln()
}
