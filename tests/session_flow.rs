use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array2;

use mindrig::classifier::Classifier;
use mindrig::config::PipelineConfig;
use mindrig::error::HarnessError;
use mindrig::recorder::TrialRecorder;
use mindrig::session::{SessionController, SessionEvent, SessionPhase, SessionTiming};
use mindrig::source::{ManualSource, SignalSource};
use mindrig::trial::{decode, SessionMetadata, TrialRecord};
use mindrig::Direction;

const CHANNELS: usize = 4;
const RATE: f64 = 125.0;

fn fast_timing() -> SessionTiming {
    SessionTiming {
        focus_seconds: 0.02,
        cue_seconds: 0.02,
        record_seconds: 0.05,
        rest_seconds: 0.02,
    }
}

fn short_config() -> PipelineConfig {
    let mut config = PipelineConfig::for_rate(RATE);
    config.window_seconds = 0.2;
    config.raw_retention_seconds = 1.0;
    config
}

fn sine_bursts(count: usize, burst_len: usize) -> Vec<Array2<f64>> {
    (0..count)
        .map(|j| {
            Array2::from_shape_fn((CHANNELS, burst_len), |(ch, i)| {
                (0.9 * (j * burst_len + i) as f64 + ch as f64).sin() * 20.0
            })
        })
        .collect()
}

/// Wraps a source and records whether `stop` ever ran.
struct TrackedSource {
    inner: ManualSource,
    stopped: Arc<AtomicBool>,
}

impl TrackedSource {
    fn new(inner: ManualSource) -> (Self, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                stopped: Arc::clone(&stopped),
            },
            stopped,
        )
    }
}

impl SignalSource for TrackedSource {
    fn poll(&mut self) -> Result<Array2<f64>, HarnessError> {
        self.inner.poll()
    }

    fn sampling_rate_hz(&self) -> f64 {
        self.inner.sampling_rate_hz()
    }

    fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }

    fn stop(&mut self) -> Result<(), HarnessError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.inner.stop()
    }
}

/// Fails mid-stream after a fixed number of polls.
struct FaultySource {
    polls_left: usize,
    stopped: Arc<AtomicBool>,
}

impl SignalSource for FaultySource {
    fn poll(&mut self) -> Result<Array2<f64>, HarnessError> {
        if self.polls_left == 0 {
            return Err(HarnessError::Stream("board went away".to_owned()));
        }
        self.polls_left -= 1;
        Ok(Array2::from_elem((CHANNELS, 3), 1.0))
    }

    fn sampling_rate_hz(&self) -> f64 {
        RATE
    }

    fn channel_count(&self) -> usize {
        CHANNELS
    }

    fn stop(&mut self) -> Result<(), HarnessError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingClassifier {
    fine_tunes: Arc<AtomicUsize>,
}

impl Classifier for CountingClassifier {
    fn classify(&self, _window: &Array2<f32>) -> [f32; 2] {
        [0.7, 0.3]
    }

    fn fine_tune(&mut self, batch: &[TrialRecord]) -> Result<(), HarnessError> {
        assert!(!batch.is_empty());
        self.fine_tunes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn drive_to_completion<S: SignalSource>(
    controller: &mut SessionController<S>,
) -> Vec<SessionEvent> {
    let mut events = controller.start();
    for _ in 0..2000 {
        events.extend(controller.tick(0.01).expect("tick failed"));
        if controller.phase() == SessionPhase::SessionComplete {
            return events;
        }
    }
    panic!("session did not complete");
}

#[test]
fn session_completes_and_persists_alternating_labels() {
    let dir = tempfile::tempdir().unwrap();
    let (source, stopped) =
        TrackedSource::new(ManualSource::new(CHANNELS, RATE, sine_bursts(300, 5)));
    let recorder = TrialRecorder::new(dir.path(), SessionMetadata::new("eid", "A", "B", 1));
    let mut controller =
        SessionController::new(source, short_config(), fast_timing(), recorder, 4).unwrap();

    let events = drive_to_completion(&mut controller);

    assert_eq!(controller.recorder().recorded(), 4);
    assert_eq!(controller.recorder().rejected(), 0);
    assert!(stopped.load(Ordering::SeqCst));

    let cues: Vec<Direction> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Cue(direction) => Some(*direction),
            _ => None,
        })
        .collect();
    assert_eq!(
        cues,
        vec![
            Direction::Left,
            Direction::Right,
            Direction::Left,
            Direction::Right
        ]
    );

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["left_1.trial", "left_3.trial", "right_2.trial", "right_4.trial"]
    );

    let record = decode(&fs::read(dir.path().join("left_1.trial")).unwrap()).unwrap();
    assert_eq!(record.label, "left");
    assert_eq!(record.trial_index, 1);
    assert_eq!(record.channel_count(), CHANNELS);
    // 0.2 s at 125 Hz
    assert_eq!(record.samples_per_channel(), 25);
    assert_eq!(record.metadata.subject_id, "eid");

    // A tick after completion is a quiet no-op.
    assert!(controller.tick(0.01).unwrap().is_empty());
}

#[test]
fn rejected_trials_do_not_block_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let bursts: Vec<Array2<f64>> = (0..300)
        .map(|_| Array2::from_elem((CHANNELS, 5), f64::NAN))
        .collect();
    let (source, stopped) = TrackedSource::new(ManualSource::new(CHANNELS, RATE, bursts));
    let recorder = TrialRecorder::new(dir.path(), SessionMetadata::new("eid", "A", "B", 1));
    let mut controller =
        SessionController::new(source, short_config(), fast_timing(), recorder, 3).unwrap();

    drive_to_completion(&mut controller);

    assert_eq!(controller.recorder().recorded(), 0);
    assert_eq!(controller.recorder().rejected(), 3);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(stopped.load(Ordering::SeqCst));
}

#[test]
fn source_that_never_produces_rejects_empty_windows() {
    let dir = tempfile::tempdir().unwrap();
    let (source, stopped) = TrackedSource::new(ManualSource::new(CHANNELS, RATE, vec![]));
    let recorder = TrialRecorder::new(dir.path(), SessionMetadata::new("eid", "A", "B", 1));
    let mut controller =
        SessionController::new(source, short_config(), fast_timing(), recorder, 2).unwrap();

    drive_to_completion(&mut controller);

    assert_eq!(controller.recorder().recorded(), 0);
    assert_eq!(controller.recorder().rejected(), 2);
    assert!(stopped.load(Ordering::SeqCst));
}

#[test]
fn stream_fault_still_releases_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let stopped = Arc::new(AtomicBool::new(false));
    let source = FaultySource {
        polls_left: 10,
        stopped: Arc::clone(&stopped),
    };
    let recorder = TrialRecorder::new(dir.path(), SessionMetadata::new("eid", "A", "B", 1));
    let mut controller =
        SessionController::new(source, short_config(), fast_timing(), recorder, 3).unwrap();

    controller.start();
    let mut fault = None;
    for _ in 0..100 {
        match controller.tick(0.01) {
            Ok(_) => {}
            Err(err) => {
                fault = Some(err);
                break;
            }
        }
    }
    assert!(matches!(fault, Some(HarnessError::Stream(_))));
    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(controller.phase(), SessionPhase::SessionComplete);
}

#[test]
fn online_variant_feeds_back_and_fine_tunes_in_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (source, _stopped) =
        TrackedSource::new(ManualSource::new(CHANNELS, RATE, sine_bursts(300, 5)));
    let recorder = TrialRecorder::new(dir.path(), SessionMetadata::new("eid", "A", "B", 1));
    let fine_tunes = Arc::new(AtomicUsize::new(0));
    let classifier = CountingClassifier {
        fine_tunes: Arc::clone(&fine_tunes),
    };
    let mut controller =
        SessionController::new(source, short_config(), fast_timing(), recorder, 4)
            .unwrap()
            .with_classifier(Box::new(classifier), 2);

    let events = drive_to_completion(&mut controller);

    assert_eq!(controller.recorder().recorded(), 4);
    // 4 saved trials in batches of 2.
    assert_eq!(fine_tunes.load(Ordering::SeqCst), 2);
    assert!(events
        .iter()
        .any(|event| matches!(event, SessionEvent::Feedback { decision, .. }
            if *decision == Direction::Left)));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, SessionEvent::FineTuned { trials: 2 }))
            .count(),
        2
    );
}
