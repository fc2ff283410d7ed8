use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Instant;

use ndarray::Array2;
use rand::Rng;

use crate::error::HarnessError;

/// Streaming acquisition boundary.
///
/// `poll` must never block: it returns whatever arrived since the last call
/// as a channels x k matrix, k >= 0. `stop` releases the underlying stream
/// and is idempotent; it runs on every termination path.
pub trait SignalSource {
    fn poll(&mut self) -> Result<Array2<f64>, HarnessError>;
    fn sampling_rate_hz(&self) -> f64;
    fn channel_count(&self) -> usize;
    fn stop(&mut self) -> Result<(), HarnessError>;
}

/// In-memory source for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Array2<f64>>,
    sampling_rate_hz: f64,
    channel_count: usize,
    stopped: bool,
}

impl ManualSource {
    pub fn new(
        channel_count: usize,
        sampling_rate_hz: f64,
        bursts: impl IntoIterator<Item = Array2<f64>>,
    ) -> Self {
        Self {
            queue: bursts.into_iter().collect(),
            sampling_rate_hz,
            channel_count,
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl SignalSource for ManualSource {
    fn poll(&mut self) -> Result<Array2<f64>, HarnessError> {
        if self.stopped {
            return Err(HarnessError::Stream(
                "poll on a stopped source".to_owned(),
            ));
        }
        Ok(self
            .queue
            .pop_front()
            .unwrap_or_else(|| Array2::zeros((self.channel_count, 0))))
    }

    fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn stop(&mut self) -> Result<(), HarnessError> {
        self.stopped = true;
        Ok(())
    }
}

/// Synthetic board substitute: per-channel sine beds plus noise, paced by the
/// wall clock so polls return variable-size bursts the way a real driver
/// does. Mirrors the development path of running against a synthetic board
/// instead of hardware.
pub struct SyntheticSource {
    channel_count: usize,
    sampling_rate_hz: f64,
    started_at: Instant,
    sample_index: u64,
    stopped: bool,
}

impl SyntheticSource {
    pub fn new(channel_count: usize, sampling_rate_hz: f64) -> Self {
        Self {
            channel_count,
            sampling_rate_hz,
            started_at: Instant::now(),
            sample_index: 0,
            stopped: false,
        }
    }
}

impl SignalSource for SyntheticSource {
    fn poll(&mut self) -> Result<Array2<f64>, HarnessError> {
        if self.stopped {
            return Err(HarnessError::Stream(
                "poll on a stopped source".to_owned(),
            ));
        }
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let target = (elapsed * self.sampling_rate_hz) as u64;
        let pending = target.saturating_sub(self.sample_index) as usize;
        if pending == 0 {
            return Ok(Array2::zeros((self.channel_count, 0)));
        }

        let mut rng = rand::thread_rng();
        let start = self.sample_index;
        let rate = self.sampling_rate_hz;
        let burst = Array2::from_shape_fn((self.channel_count, pending), |(ch, i)| {
            let t = (start + i as u64) as f64 / rate;
            let freq = 8.0 + ch as f64 * 0.5;
            10.0 * (2.0 * PI * freq * t).sin() + rng.gen_range(-2.0..2.0)
        });
        self.sample_index = target;
        Ok(burst)
    }

    fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn stop(&mut self) -> Result<(), HarnessError> {
        self.stopped = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_replays_then_runs_dry() {
        let mut source = ManualSource::new(
            2,
            125.0,
            vec![Array2::from_elem((2, 4), 1.0), Array2::from_elem((2, 9), 2.0)],
        );
        assert_eq!(source.poll().unwrap().dim(), (2, 4));
        assert_eq!(source.poll().unwrap().dim(), (2, 9));
        // Dry polls return empty bursts, not errors.
        assert_eq!(source.poll().unwrap().dim(), (2, 0));
        assert_eq!(source.poll().unwrap().dim(), (2, 0));
    }

    #[test]
    fn stopped_source_refuses_polls() {
        let mut source = ManualSource::new(2, 125.0, vec![]);
        source.stop().unwrap();
        assert!(source.is_stopped());
        assert!(matches!(source.poll(), Err(HarnessError::Stream(_))));
        // stop stays idempotent
        source.stop().unwrap();
    }

    #[test]
    fn synthetic_source_produces_monotonic_bursts() {
        let mut source = SyntheticSource::new(16, 125.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let first = source.poll().unwrap();
        assert_eq!(first.nrows(), 16);
        assert!(first.ncols() > 0);
        // An immediate re-poll has little or nothing new.
        let second = source.poll().unwrap();
        assert!(second.ncols() <= 2);
    }
}
