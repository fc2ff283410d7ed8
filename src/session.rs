use crate::buffer::RollingBuffer;
use crate::classifier::{model_input, Classifier, Direction};
use crate::config::PipelineConfig;
use crate::error::HarnessError;
use crate::recorder::{RejectReason, TrialOutcome, TrialRecorder};
use crate::source::SignalSource;
use crate::trial::TrialRecord;

/// Session phases. Only `RecordingTrial` ends in a `record` call; every
/// phase may read the live window for feedback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AcquiringFocus,
    CueingDirection,
    RecordingTrial,
    Resting,
    SessionComplete,
}

/// Wall-clock lengths of the timed phases, in seconds.
#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    pub focus_seconds: f64,
    pub cue_seconds: f64,
    pub record_seconds: f64,
    pub rest_seconds: f64,
}

impl Default for SessionTiming {
    fn default() -> Self {
        // Focus bars, arrow cue, loading bar, rest.
        Self {
            focus_seconds: 2.0,
            cue_seconds: 2.0,
            record_seconds: 7.0,
            rest_seconds: 3.0,
        }
    }
}

/// What a tick produced, for the presentation layer to render.
#[derive(Debug)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    Cue(Direction),
    Feedback { decision: Direction, scores: [f32; 2] },
    TrialSaved { label: &'static str, trial_index: u32 },
    TrialRejected { reason: RejectReason, trial_index: u32 },
    FineTuned { trials: usize },
}

/// Drives one acquisition session through the trial state machine.
///
/// The controller polls the source on every tick regardless of phase so the
/// rolling buffers stay warm, sequences alternating left/right cues, records
/// a window at the end of each `RecordingTrial` phase, and guarantees the
/// source stop/release sequence on completion, fault and abort paths alike.
/// Trial rejection never blocks progression: the stimulus has already
/// played, so the slot is skipped and the session moves on.
pub struct SessionController<S: SignalSource> {
    source: S,
    buffer: RollingBuffer,
    recorder: TrialRecorder,
    classifier: Option<Box<dyn Classifier>>,
    config: PipelineConfig,
    timing: SessionTiming,
    total_trials: u32,
    fine_tune_batch: usize,
    pending_batch: Vec<TrialRecord>,
    trial_index: u32,
    cue: Direction,
    phase: SessionPhase,
    phase_elapsed: f64,
}

impl<S: SignalSource> SessionController<S> {
    pub fn new(
        source: S,
        config: PipelineConfig,
        timing: SessionTiming,
        recorder: TrialRecorder,
        total_trials: u32,
    ) -> Result<Self, HarnessError> {
        let buffer = RollingBuffer::new(source.channel_count(), &config)?;
        Ok(Self {
            source,
            buffer,
            recorder,
            classifier: None,
            config,
            timing,
            total_trials,
            fine_tune_batch: 3,
            pending_batch: Vec::new(),
            trial_index: 1,
            cue: Direction::Left,
            phase: SessionPhase::Idle,
            phase_elapsed: 0.0,
        })
    }

    /// Online variant: live feedback each tick of a trial, and a fine-tune
    /// call after every `fine_tune_batch` recorded trials.
    pub fn with_classifier(
        mut self,
        classifier: Box<dyn Classifier>,
        fine_tune_batch: usize,
    ) -> Self {
        self.classifier = Some(classifier);
        self.fine_tune_batch = fine_tune_batch.max(1);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn buffer(&self) -> &RollingBuffer {
        &self.buffer
    }

    pub fn recorder(&self) -> &TrialRecorder {
        &self.recorder
    }

    /// Leaves `Idle` once the operator starts the session.
    pub fn start(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.phase == SessionPhase::Idle {
            self.goto(SessionPhase::AcquiringFocus, &mut events);
        }
        events
    }

    /// Advances the session by `dt_seconds` of wall clock. Polls the source,
    /// ingests whatever arrived, then walks the phase table.
    pub fn tick(&mut self, dt_seconds: f64) -> Result<Vec<SessionEvent>, HarnessError> {
        let mut events = Vec::new();
        if self.phase == SessionPhase::SessionComplete {
            return Ok(events);
        }

        match self.source.poll() {
            Ok(burst) => self.buffer.ingest(burst.view())?,
            Err(err) => {
                // Mid-session stream fault: still run the stop/release
                // sequence before propagating.
                if let Err(stop_err) = self.source.stop() {
                    log::warn!("stop after stream fault also failed: {stop_err}");
                }
                self.goto(SessionPhase::SessionComplete, &mut events);
                return Err(err);
            }
        }

        if self.phase == SessionPhase::Idle {
            return Ok(events);
        }
        self.phase_elapsed += dt_seconds;

        if self.phase == SessionPhase::RecordingTrial {
            if let Some(classifier) = &self.classifier {
                let window = self.buffer.window(self.config.window_seconds);
                if window.ncols() > 0 {
                    let scores = classifier.classify(&model_input(&window));
                    events.push(SessionEvent::Feedback {
                        decision: Direction::from_scores(scores),
                        scores,
                    });
                }
            }
        }

        match self.phase {
            SessionPhase::AcquiringFocus if self.phase_elapsed >= self.timing.focus_seconds => {
                self.goto(SessionPhase::CueingDirection, &mut events);
                events.push(SessionEvent::Cue(self.cue));
            }
            SessionPhase::CueingDirection if self.phase_elapsed >= self.timing.cue_seconds => {
                self.goto(SessionPhase::RecordingTrial, &mut events);
            }
            SessionPhase::RecordingTrial if self.phase_elapsed >= self.timing.record_seconds => {
                self.finish_trial(&mut events)?;
                // Always rest, whether the trial was saved or rejected.
                self.goto(SessionPhase::Resting, &mut events);
            }
            SessionPhase::Resting if self.phase_elapsed >= self.timing.rest_seconds => {
                if self.trial_index > self.total_trials {
                    self.goto(SessionPhase::SessionComplete, &mut events);
                    self.source.stop()?;
                } else {
                    self.cue = self.cue.opposite();
                    self.goto(SessionPhase::CueingDirection, &mut events);
                    events.push(SessionEvent::Cue(self.cue));
                }
            }
            _ => {}
        }
        Ok(events)
    }

    fn finish_trial(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), HarnessError> {
        let window = self.buffer.window(self.config.window_seconds);
        let label = self.cue.label();
        match self.recorder.record(window.view(), label, self.trial_index)? {
            TrialOutcome::Saved { record, .. } => {
                events.push(SessionEvent::TrialSaved {
                    label,
                    trial_index: self.trial_index,
                });
                self.maybe_fine_tune(record, events);
            }
            TrialOutcome::Rejected(reason) => {
                events.push(SessionEvent::TrialRejected {
                    reason,
                    trial_index: self.trial_index,
                });
            }
        }
        self.trial_index += 1;
        Ok(())
    }

    fn maybe_fine_tune(&mut self, record: TrialRecord, events: &mut Vec<SessionEvent>) {
        let Some(classifier) = &mut self.classifier else {
            return;
        };
        self.pending_batch.push(record);
        if self.pending_batch.len() < self.fine_tune_batch {
            return;
        }
        // Fine-tune failures are non-fatal; the batch is dropped either way
        // because the artifacts are already on disk for offline training.
        match classifier.fine_tune(&self.pending_batch) {
            Ok(()) => events.push(SessionEvent::FineTuned {
                trials: self.pending_batch.len(),
            }),
            Err(err) => log::warn!("fine-tune failed: {err}"),
        }
        self.pending_batch.clear();
    }

    /// Idempotent shutdown for abort paths.
    pub fn shutdown(&mut self) -> Result<(), HarnessError> {
        self.source.stop()
    }

    fn goto(&mut self, phase: SessionPhase, events: &mut Vec<SessionEvent>) {
        self.phase = phase;
        self.phase_elapsed = 0.0;
        events.push(SessionEvent::PhaseChanged(phase));
    }
}
