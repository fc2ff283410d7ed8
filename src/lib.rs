pub mod brainflow;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod filter;
pub mod recorder;
pub mod session;
pub mod source;
pub mod trial;

pub use brainflow::{BoardId, BrainFlowSource};
pub use buffer::RollingBuffer;
pub use classifier::{BandPowerClassifier, Classifier, Direction};
pub use config::PipelineConfig;
pub use error::HarnessError;
pub use filter::{FilterChain, FilterKind};
pub use recorder::{RejectReason, TrialOutcome, TrialRecorder};
pub use session::{SessionController, SessionEvent, SessionPhase, SessionTiming};
pub use source::{ManualSource, SignalSource, SyntheticSource};
pub use trial::{SessionMetadata, TrialRecord};
