use ndarray::{s, Array1, Array2, ArrayView2};

use crate::config::PipelineConfig;
use crate::error::HarnessError;
use crate::filter::{acquisition_chain, FilterChain};

/// Rolling raw/processed sample store for one acquisition session.
///
/// Both matrices are channels x time. Every ingested column is filtered into
/// exactly one processed column; trimming only ever discards the oldest end.
/// Filtering re-runs over the whole retained raw history on each ingest so
/// the causal chain always starts from a consistent origin, which is what
/// makes bursty arrival (k = 0 on most polls, large after a gap) safe.
pub struct RollingBuffer {
    raw: Array2<f64>,
    processed: Array2<f64>,
    chain: FilterChain,
    channel_count: usize,
    sampling_rate_hz: f64,
    raw_retention: usize,
    processed_retention: usize,
}

impl RollingBuffer {
    pub fn new(channel_count: usize, config: &PipelineConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        if channel_count == 0 {
            return Err(HarnessError::Config(
                "channel count must be positive".to_owned(),
            ));
        }
        Ok(Self {
            raw: Array2::zeros((channel_count, 0)),
            processed: Array2::zeros((channel_count, 0)),
            chain: acquisition_chain(config),
            channel_count,
            sampling_rate_hz: config.sampling_rate_hz,
            raw_retention: config.raw_retention_samples(),
            processed_retention: config.processed_retention_samples(),
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    pub fn raw_samples(&self) -> usize {
        self.raw.ncols()
    }

    pub fn processed_samples(&self) -> usize {
        self.processed.ncols()
    }

    pub fn raw(&self) -> ArrayView2<'_, f64> {
        self.raw.view()
    }

    pub fn processed(&self) -> ArrayView2<'_, f64> {
        self.processed.view()
    }

    /// Appends one burst of new samples (channels x k, k >= 0), re-filters the
    /// accumulated history per channel and trims both buffers to their
    /// retention caps.
    ///
    /// All-or-nothing: the candidate matrices are built in full before either
    /// buffer is replaced, so a failed call leaves the pre-call state intact.
    pub fn ingest(&mut self, new: ArrayView2<'_, f64>) -> Result<(), HarnessError> {
        if new.ncols() == 0 {
            return Ok(());
        }
        if new.nrows() != self.channel_count {
            return Err(HarnessError::ChannelMismatch {
                expected: self.channel_count,
                actual: new.nrows(),
            });
        }

        let kept = self.raw.ncols();
        let mut raw = Array2::zeros((self.channel_count, kept + new.ncols()));
        raw.slice_mut(s![.., ..kept]).assign(&self.raw);
        raw.slice_mut(s![.., kept..]).assign(&new);

        // Channels are filtered independently; the chain state is zeroed per
        // pass, so there is no cross-channel coupling.
        let mut processed = Array2::zeros(raw.dim());
        for ch in 0..self.channel_count {
            let series = raw.row(ch).to_vec();
            let filtered = self.chain.apply(&series);
            processed.row_mut(ch).assign(&Array1::from(filtered));
        }

        self.raw = tail_columns(raw, self.raw_retention);
        self.processed = tail_columns(processed, self.processed_retention);
        Ok(())
    }

    /// The most recent `duration_seconds` of processed data as an owned copy,
    /// or the whole (shorter) buffer during the startup ramp.
    pub fn window(&self, duration_seconds: f64) -> Array2<f64> {
        let want = (duration_seconds * self.sampling_rate_hz) as usize;
        let have = self.processed.ncols();
        let take = want.min(have);
        self.processed.slice(s![.., have - take..]).to_owned()
    }
}

fn tail_columns(matrix: Array2<f64>, cap: usize) -> Array2<f64> {
    let len = matrix.ncols();
    if len <= cap {
        matrix
    } else {
        matrix.slice(s![.., len - cap..]).to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: f64, window_seconds: f64, raw_retention_seconds: f64) -> PipelineConfig {
        let mut config = PipelineConfig::for_rate(rate);
        config.window_seconds = window_seconds;
        config.raw_retention_seconds = raw_retention_seconds;
        // Keep the chain inside Nyquist at low test rates.
        if config.highcut_hz >= rate / 2.0 {
            config.lowcut_hz = 0.5;
            config.highcut_hz = rate * 0.35;
            config.notch_hz = rate * 0.4;
        }
        config
    }

    fn burst(channels: usize, len: usize, offset: usize) -> Array2<f64> {
        Array2::from_shape_fn((channels, len), |(ch, i)| {
            let n = (offset + i) as f64;
            (0.35 * n + ch as f64).sin()
        })
    }

    #[test]
    fn empty_burst_is_a_noop() {
        let mut buffer = RollingBuffer::new(4, &config(125.0, 7.0, 17.0)).unwrap();
        buffer.ingest(Array2::zeros((4, 0)).view()).unwrap();
        assert_eq!(buffer.raw_samples(), 0);
        assert_eq!(buffer.processed_samples(), 0);
    }

    #[test]
    fn channel_mismatch_is_rejected_without_mutation() {
        let mut buffer = RollingBuffer::new(4, &config(125.0, 7.0, 17.0)).unwrap();
        buffer.ingest(burst(4, 10, 0).view()).unwrap();
        let err = buffer.ingest(burst(3, 10, 10).view()).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ChannelMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(buffer.raw_samples(), 10);
        assert_eq!(buffer.processed_samples(), 10);
    }

    #[test]
    fn retention_caps_hold_after_any_burst_sequence() {
        // fs 10: window 1 s -> processed cap 20, raw retention 3 s -> 30.
        let config = config(10.0, 1.0, 3.0);
        let mut buffer = RollingBuffer::new(2, &config).unwrap();
        let mut offset = 0;
        for len in [3usize, 0, 25, 7, 40, 1, 60] {
            buffer.ingest(burst(2, len, offset).view()).unwrap();
            offset += len;
            assert!(buffer.raw_samples() <= config.raw_retention_samples());
            assert!(buffer.processed_samples() <= config.processed_retention_samples());
        }
        assert_eq!(buffer.raw_samples(), 30);
        assert_eq!(buffer.processed_samples(), 20);
    }

    #[test]
    fn window_degrades_gracefully_then_fills() {
        let mut buffer = RollingBuffer::new(8, &config(125.0, 7.0, 17.0)).unwrap();
        assert_eq!(buffer.window(7.0).dim(), (8, 0));

        buffer.ingest(burst(8, 10, 0).view()).unwrap();
        buffer.ingest(burst(8, 0, 10).view()).unwrap();
        buffer.ingest(burst(8, 25, 10).view()).unwrap();
        // Only 35 of the 875 requested samples exist yet.
        assert_eq!(buffer.window(7.0).dim(), (8, 35));

        buffer.ingest(burst(8, 900, 35).view()).unwrap();
        assert_eq!(buffer.window(7.0).dim(), (8, 875));
    }

    #[test]
    fn bursts_commit_in_arrival_order() {
        let config = config(125.0, 7.0, 17.0);
        let mut split = RollingBuffer::new(2, &config).unwrap();
        split.ingest(burst(2, 11, 0).view()).unwrap();
        split.ingest(burst(2, 5, 11).view()).unwrap();
        split.ingest(burst(2, 17, 16).view()).unwrap();

        let mut whole = RollingBuffer::new(2, &config).unwrap();
        whole.ingest(burst(2, 33, 0).view()).unwrap();

        // Raw history is untouched by filtering, so the two schedules must
        // agree exactly; processed must match in shape and column order.
        assert_eq!(split.raw(), whole.raw());
        assert_eq!(split.processed_samples(), whole.processed_samples());
    }

    #[test]
    fn processed_is_the_filtered_raw_history() {
        let config = config(125.0, 7.0, 17.0);
        let mut buffer = RollingBuffer::new(3, &config).unwrap();
        buffer.ingest(burst(3, 120, 0).view()).unwrap();

        let mut chain = acquisition_chain(&config);
        for ch in 0..3 {
            let expected = chain.apply(&buffer.raw().row(ch).to_vec());
            let actual = buffer.processed().row(ch).to_vec();
            assert_eq!(expected, actual);
        }
    }
}
