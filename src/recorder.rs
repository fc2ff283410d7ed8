use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::ArrayView2;

use crate::error::HarnessError;
use crate::trial::{artifact_name, encode, SessionMetadata, TrialRecord};

/// Why a candidate window was not persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// NaN or infinity somewhere in the window.
    NonFinite,
    /// A channel was exactly constant across the window, the signature of a
    /// disconnected electrode.
    FlatChannel(usize),
    /// No samples at all (the buffer had not filled yet).
    Empty,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NonFinite => write!(f, "window contains non-finite values"),
            RejectReason::FlatChannel(ch) => write!(f, "channel {ch} is flat"),
            RejectReason::Empty => write!(f, "window is empty"),
        }
    }
}

/// Result of a `record` call. Rejection is an expected, recoverable outcome
/// during a live session, so it is a variant here rather than an error.
#[derive(Debug)]
pub enum TrialOutcome {
    Saved { path: PathBuf, record: TrialRecord },
    Rejected(RejectReason),
}

/// Writes labeled trial windows into an existing session directory.
///
/// Artifacts land atomically (same-directory temp file, then rename), one
/// file per (label, trial_index); re-recording the same pair overwrites in
/// place. Counters keep the session auditable: every candidate window is
/// either recorded or rejected.
pub struct TrialRecorder {
    session_dir: PathBuf,
    metadata: SessionMetadata,
    recorded: u32,
    rejected: u32,
}

impl TrialRecorder {
    /// The directory must already exist; creating it is session-setup work.
    pub fn new(session_dir: impl Into<PathBuf>, metadata: SessionMetadata) -> Self {
        Self {
            session_dir: session_dir.into(),
            metadata,
            recorded: 0,
            rejected: 0,
        }
    }

    pub fn record(
        &mut self,
        window: ArrayView2<'_, f64>,
        label: &str,
        trial_index: u32,
    ) -> Result<TrialOutcome, HarnessError> {
        if let Some(reason) = validate_window(&window) {
            self.rejected += 1;
            log::warn!("trial {trial_index} ({label}) rejected: {reason}");
            return Ok(TrialOutcome::Rejected(reason));
        }

        let record = TrialRecord::from_window(label, trial_index, self.metadata.clone(), window);
        let bytes = encode(&record)?;
        let name = artifact_name(label, trial_index);
        let final_path = self.session_dir.join(&name);
        let tmp_path = self.session_dir.join(format!(".{name}.tmp"));
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &final_path)?;
        self.recorded += 1;
        log::info!(
            "trial {trial_index} ({label}) saved to {}",
            final_path.display()
        );
        Ok(TrialOutcome::Saved {
            path: final_path,
            record,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn recorded(&self) -> u32 {
        self.recorded
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }
}

fn validate_window(window: &ArrayView2<'_, f64>) -> Option<RejectReason> {
    if window.ncols() == 0 {
        return Some(RejectReason::Empty);
    }
    if window.iter().any(|v| !v.is_finite()) {
        return Some(RejectReason::NonFinite);
    }
    for (ch, row) in window.outer_iter().enumerate() {
        let first = row[0];
        if row.iter().all(|&v| v == first) {
            return Some(RejectReason::FlatChannel(ch));
        }
    }
    None
}
