use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

pub const TRIAL_EXTENSION: &str = "trial";

/// Per-session subject record, gathered once by the questionnaire screens
/// and attached unchanged to every trial of the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub subject_id: String,
    pub first_name: String,
    pub last_name: String,
    pub session_number: u32,
    /// Physiological self-report answers (caffeine, meals, exercise, ...).
    pub self_report: BTreeMap<String, String>,
}

impl SessionMetadata {
    pub fn new(
        subject_id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        session_number: u32,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            session_number,
            self_report: BTreeMap::new(),
        }
    }

    /// Directory name holding this session's artifacts.
    pub fn session_dir_name(&self) -> String {
        format!(
            "{}_{}_Session{}",
            self.first_name, self.last_name, self.session_number
        )
    }
}

/// One labeled trial: a processed window snapshot plus its session context.
/// Immutable once written; persisted as a single MessagePack unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub label: String,
    pub trial_index: u32,
    pub metadata: SessionMetadata,
    channel_count: usize,
    samples_per_channel: usize,
    /// Row-major, channel_count x samples_per_channel.
    samples: Vec<f64>,
}

impl TrialRecord {
    pub fn from_window(
        label: impl Into<String>,
        trial_index: u32,
        metadata: SessionMetadata,
        window: ArrayView2<'_, f64>,
    ) -> Self {
        Self {
            label: label.into(),
            trial_index,
            metadata,
            channel_count: window.nrows(),
            samples_per_channel: window.ncols(),
            samples: window.iter().copied().collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn window(&self) -> Result<Array2<f64>, HarnessError> {
        Array2::from_shape_vec(
            (self.channel_count, self.samples_per_channel),
            self.samples.clone(),
        )
        .map_err(|err| HarnessError::Artifact(format!("corrupt trial payload: {err}")))
    }

    pub fn artifact_name(&self) -> String {
        artifact_name(&self.label, self.trial_index)
    }
}

/// Deterministic artifact file name for a (label, trial_index) pair.
pub fn artifact_name(label: &str, trial_index: u32) -> String {
    format!("{label}_{trial_index}.{TRIAL_EXTENSION}")
}

pub fn encode(record: &TrialRecord) -> Result<Vec<u8>, HarnessError> {
    Ok(rmp_serde::to_vec_named(record)?)
}

pub fn decode(bytes: &[u8]) -> Result<TrialRecord, HarnessError> {
    let record: TrialRecord = rmp_serde::from_slice(bytes)?;
    if record.samples.len() != record.channel_count * record.samples_per_channel {
        return Err(HarnessError::Artifact(format!(
            "corrupt trial payload: {} samples for {} x {}",
            record.samples.len(),
            record.channel_count,
            record.samples_per_channel
        )));
    }
    Ok(record)
}
