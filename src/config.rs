use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Acquisition and filtering options for one session.
///
/// `sampling_rate_hz` comes from the board; everything else defaults to the
/// motor-imagery chain: 1-50 Hz band-pass plus a 60 Hz mains notch, a 14 s
/// feature window and 17 s of raw history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sampling_rate_hz: f64,
    pub window_seconds: f64,
    pub raw_retention_seconds: f64,
    pub lowcut_hz: f64,
    pub highcut_hz: f64,
    pub notch_hz: f64,
    pub notch_q: f64,
}

impl PipelineConfig {
    pub fn for_rate(sampling_rate_hz: f64) -> Self {
        Self {
            sampling_rate_hz,
            window_seconds: 14.0,
            raw_retention_seconds: 17.0,
            lowcut_hz: 1.0,
            highcut_hz: 50.0,
            notch_hz: 60.0,
            notch_q: 30.0,
        }
    }

    /// Samples in one feature window, rounded down to whole samples.
    pub fn window_samples(&self) -> usize {
        (self.window_seconds * self.sampling_rate_hz) as usize
    }

    pub fn raw_retention_samples(&self) -> usize {
        (self.raw_retention_seconds * self.sampling_rate_hz) as usize
    }

    /// The processed buffer keeps twice the window so a full window is still
    /// available right after a trim.
    pub fn processed_retention_samples(&self) -> usize {
        2 * self.window_samples()
    }

    /// Rejects parameter sets the filter design cannot honor. Called once at
    /// session setup; the per-ingest path assumes a validated config.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if !(self.sampling_rate_hz > 0.0) {
            return Err(HarnessError::Config(format!(
                "sampling rate must be positive, got {}",
                self.sampling_rate_hz
            )));
        }
        let nyquist = self.sampling_rate_hz / 2.0;
        if self.lowcut_hz <= 0.0 || self.lowcut_hz >= self.highcut_hz {
            return Err(HarnessError::Config(format!(
                "band-pass corners must satisfy 0 < lowcut < highcut, got [{}, {}]",
                self.lowcut_hz, self.highcut_hz
            )));
        }
        if self.highcut_hz >= nyquist {
            return Err(HarnessError::Config(format!(
                "highcut {} Hz violates Nyquist ({} Hz at {} Hz sampling)",
                self.highcut_hz, nyquist, self.sampling_rate_hz
            )));
        }
        if self.notch_hz >= nyquist {
            return Err(HarnessError::Config(format!(
                "notch {} Hz violates Nyquist ({} Hz at {} Hz sampling)",
                self.notch_hz, nyquist, self.sampling_rate_hz
            )));
        }
        if self.notch_q <= 0.0 {
            return Err(HarnessError::Config(format!(
                "notch quality factor must be positive, got {}",
                self.notch_q
            )));
        }
        if self.window_seconds <= 0.0 || self.raw_retention_seconds <= 0.0 {
            return Err(HarnessError::Config(
                "window and retention durations must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_at_common_rates() {
        for rate in [125.0, 250.0] {
            assert!(PipelineConfig::for_rate(rate).validate().is_ok());
        }
    }

    #[test]
    fn nyquist_violation_is_a_config_error() {
        // 50 Hz highcut needs more than 100 Hz sampling.
        let config = PipelineConfig::for_rate(100.0);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(PipelineConfig::for_rate(0.0).validate().is_err());
        assert!(PipelineConfig::for_rate(-125.0).validate().is_err());
    }

    #[test]
    fn window_samples_round_down() {
        let mut config = PipelineConfig::for_rate(125.0);
        config.window_seconds = 7.0;
        assert_eq!(config.window_samples(), 875);
        assert_eq!(config.processed_retention_samples(), 1750);
        config.window_seconds = 0.99;
        assert_eq!(config.window_samples(), 123);
    }
}
