//! Error taxonomy for the tap-to-tone pipeline

use thiserror::Error;

use crate::audio::tester::TesterState;

/// Errors produced by capture, analysis and statistics
#[derive(Error, Debug)]
pub enum TapToToneError {
    /// The capture device could not be opened or started
    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A trial window did not contain both a tap and a tone
    #[error("Insufficient events: expected a tap and a tone, found {found}")]
    InsufficientEvents { found: usize },

    /// Mean, last value or deviation requested from an empty statistic
    #[error("Statistics query on zero observations")]
    EmptyStatisticsQuery,

    /// A capture-clocked operation was requested while capture is stopped
    #[error("Audio capture is not running")]
    CaptureNotRunning,

    /// The tester was asked to schedule analysis outside of recording
    #[error("Tester is not recording (state: {state:?})")]
    NotRecording { state: TesterState },
}

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, TapToToneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TapToToneError::InsufficientEvents { found: 1 };
        assert_eq!(
            err.to_string(),
            "Insufficient events: expected a tap and a tone, found 1"
        );

        let err = TapToToneError::DeviceUnavailable("no input".to_string());
        assert!(err.to_string().contains("no input"));

        let err = TapToToneError::NotRecording {
            state: TesterState::Idle,
        };
        assert!(err.to_string().contains("Idle"));
    }
}
