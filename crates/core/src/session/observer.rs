use std::fmt;

use crate::{DuetError, EntityId, TranscriptEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One-line audio status shown next to the transport controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    Ready,
    Starting,
    Loading,
    Speaking(EntityId),
    Error,
    Muted,
    Volume(u8),
    Stopped,
}

impl fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Audio Ready"),
            Self::Starting => f.write_str("Starting conversation..."),
            Self::Loading => f.write_str("Loading audio..."),
            Self::Speaking(entity) => write!(f, "{entity} speaking..."),
            Self::Error => f.write_str("Audio Error"),
            Self::Muted => f.write_str("Audio Muted"),
            Self::Volume(percent) => write!(f, "Volume: {percent}%"),
            Self::Stopped => f.write_str("Conversation stopped"),
        }
    }
}

/// Which user controls are currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
    /// Prompt and per-entity settings inputs.
    pub inputs_enabled: bool,
}

/// Receives every user-visible side effect of the session. All methods default
/// to no-ops.
pub trait SessionObserver {
    fn connection_changed(&mut self, _state: ConnectionState) {}
    fn audio_status(&mut self, _status: AudioStatus) {}
    fn transcript_appended(&mut self, _index: usize, _entry: &TranscriptEntry) {}
    fn speaking_changed(&mut self, _index: usize, _entry: &TranscriptEntry) {}
    fn transcript_cleared(&mut self) {}
    fn controls_changed(&mut self, _controls: Controls) {}
    fn loading_changed(&mut self, _visible: bool) {}
    /// The single notification channel for every error kind.
    fn notify_error(&mut self, _error: &DuetError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
