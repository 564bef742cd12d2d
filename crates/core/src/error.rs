/// Result alias that carries the custom [`DuetError`] type.
pub type Result<T> = std::result::Result<T, DuetError>;

/// Coarse classification of a [`DuetError`], used by the notification
/// channel to decide how loudly an error should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Connection,
    Transport,
    Remote,
    Playback,
    InvalidState,
    Config,
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum DuetError {
    /// A prompt was empty or exceeded the character limit. Nothing was sent.
    #[error("{0}")]
    Validation(String),
    /// The transport channel did not open within the polling window.
    #[error("{0}")]
    Connection(String),
    /// The transport channel reported a low-level failure.
    #[error("{0}")]
    Transport(String),
    /// The remote service sent an `error` message.
    #[error("{0}")]
    Remote(String),
    /// An audio clip failed to load or play. Never fatal to the session.
    #[error("{0}")]
    Playback(String),
    /// The requested transition is not defined for the current state.
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl DuetError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport<T: Into<String>>(msg: T) -> Self {
        Self::Transport(msg.into())
    }

    pub fn playback<T: Into<String>>(msg: T) -> Self {
        Self::Playback(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Transport(_) | Self::Json(_) => ErrorKind::Transport,
            Self::Remote(_) => ErrorKind::Remote,
            Self::Playback(_) | Self::InvalidInput(_) | Self::Fft(_) => ErrorKind::Playback,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Config(_) | Self::Io(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_failures_classify_as_transport() {
        let err: DuetError = serde_json::from_str::<u8>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn displays_the_wrapped_message() {
        let err = DuetError::validation("prompt too long");
        assert_eq!(err.to_string(), "prompt too long");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
