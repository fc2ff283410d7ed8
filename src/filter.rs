use std::f64::consts::PI;

use crate::config::PipelineConfig;

/// One filtering stage, designed against a concrete sampling rate.
#[derive(Clone, Copy, Debug)]
pub enum FilterKind {
    Lowpass { cutoff_hz: f64, q: f64 },
    Highpass { cutoff_hz: f64, q: f64 },
    Bandpass { low_hz: f64, high_hz: f64 },
    Notch { freq_hz: f64, q: f64 },
}

#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }

    fn reset(&mut self) {
        self.state = BiquadState::default();
    }

    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
}

/// Causal biquad cascade.
///
/// [`FilterChain::apply`] zeroes the section state before every pass, so the
/// output at sample t depends only on inputs at and before t and every pass
/// over the accumulated history shares the same origin.
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    sections: Vec<BiquadFilter>,
}

impl FilterChain {
    pub fn from_kinds(sample_rate_hz: f64, kinds: &[FilterKind]) -> Self {
        let sections = kinds
            .iter()
            .map(|kind| design_section(sample_rate_hz, *kind))
            .collect();
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Filters a full series causally. Output length equals input length;
    /// the first few samples carry the usual startup transient.
    pub fn apply(&mut self, series: &[f64]) -> Vec<f64> {
        for section in &mut self.sections {
            section.reset();
        }
        series.iter().map(|&v| self.process_sample(v)).collect()
    }

    fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }
}

/// The acquisition chain: band-pass then mains notch.
pub fn acquisition_chain(config: &PipelineConfig) -> FilterChain {
    FilterChain::from_kinds(
        config.sampling_rate_hz,
        &[
            FilterKind::Bandpass {
                low_hz: config.lowcut_hz,
                high_hz: config.highcut_hz,
            },
            FilterKind::Notch {
                freq_hz: config.notch_hz,
                q: config.notch_q,
            },
        ],
    )
}

fn design_section(sample_rate_hz: f64, kind: FilterKind) -> BiquadFilter {
    let coeffs = match kind {
        FilterKind::Lowpass { cutoff_hz, q } => lowpass(cutoff_hz, sample_rate_hz, q),
        FilterKind::Highpass { cutoff_hz, q } => highpass(cutoff_hz, sample_rate_hz, q),
        FilterKind::Bandpass { low_hz, high_hz } => {
            // Geometric center, Q set by the corner spacing.
            let center = (low_hz * high_hz).sqrt();
            let q = (center / (high_hz - low_hz)).clamp(0.1, 100.0);
            bandpass(center, sample_rate_hz, q)
        }
        FilterKind::Notch { freq_hz, q } => notch(freq_hz, sample_rate_hz, q),
    };
    BiquadFilter::new(coeffs)
}

fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn bandpass(center_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * center_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = alpha;
    let b1 = 0.0;
    let b2 = -alpha;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn notch(center_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * center_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = 1.0;
    let b1 = -2.0 * cos_w0;
    let b2 = 1.0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}
