//! Core library for the Duet dialogue client.
//!
//! Two configured speakers hold a conversation generated by a remote service.
//! This crate owns everything between the wire and the screen: the
//! [`Session`] state machine, the JSON protocol, single-clip playback
//! control, the per-entity speaking indicator and its amplitude analysis.
//! Devices, sockets and drawing surfaces are reached through small traits so
//! the state machine can be driven deterministically in tests.

pub mod analysis;
pub mod config;
pub mod entity;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod timeline;
pub mod transcript;
pub mod transport;
pub mod visual;

pub use analysis::{downmix, AmplitudeAnalyser, AmplitudeFrame, ClipAnalysis};
pub use config::{
    prompt_gauge, prompt_hints, validate_entities, AppConfig, AudioConfig, EntityConfig, PromptGauge,
    ResponseLength, TimingConfig, Voice, MAX_PROMPT_CHARS, PROMPT_WARNING_CHARS,
};
pub use entity::{EntityId, EntityPair};
pub use error::{DuetError, ErrorKind, Result};
pub use playback::{
    AudioOutput, ClipId, PlaybackController, PlaybackEvent, PlaybackEventKind, PlaybackHandle,
};
pub use protocol::{ClientCommand, ServerEvent, TurnEvent};
pub use runtime::SessionDriver;
pub use session::{
    AudioStatus, ConnectionState, Controls, NoopObserver, Session, SessionInput,
    SessionObserver, SessionParts, SessionState, UserCommand,
};
pub use timeline::{ScheduledEvent, Scheduler, TimerKind, TimerToken};
pub use transcript::{Transcript, TranscriptEntry};
pub use transport::{ChannelState, Transport, TransportEvent, WsTransport};
pub use visual::{
    AmplitudeFeed, LoopPhase, NullRenderer, RadialPulse, Renderer, SilentFeed, VisualFrame,
    VisualStrategy, VisualizationTrigger, WaveFill,
};
