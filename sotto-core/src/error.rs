use thiserror::Error;

/// All errors produced by sotto-core.
#[derive(Debug, Error)]
pub enum SottoError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("cannot build a spectrum plan for window size {0}")]
    SpectrumPlan(usize),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SottoError>;
