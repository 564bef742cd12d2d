//! Single-clip playback lifecycle.
//!
//! The [`PlaybackController`] owns at most one [`PlaybackHandle`]. Starting a
//! new clip tears the previous one down first. Lifecycle events coming back
//! from the [`AudioOutput`] are matched against the active handle so that
//! events from a discarded clip never reach the session.

use std::collections::VecDeque;

use crate::{EntityId, Result};

/// Identifies one clip handed to the audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipId(u64);

impl ClipId {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEventKind {
    Loading,
    Playable,
    Started,
    Ended,
    Failed(String),
}

impl PlaybackEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackEvent {
    pub clip: ClipId,
    pub kind: PlaybackEventKind,
}

impl PlaybackEvent {
    pub fn new(clip: ClipId, kind: PlaybackEventKind) -> Self {
        Self { clip, kind }
    }
}

/// External audio-output capability.
///
/// `play` only starts the work; progress is reported asynchronously as
/// [`PlaybackEvent`]s tagged with the same [`ClipId`].
pub trait AudioOutput {
    /// Prepares the device. Called once, right before the first clip.
    fn initialize(&mut self) -> Result<()>;
    fn play(&mut self, clip: ClipId, source: &str, volume: f32) -> Result<()>;
    fn set_volume(&mut self, clip: ClipId, volume: f32);
    /// Halts the clip and rewinds it. Must tolerate unknown clips.
    fn stop(&mut self, clip: ClipId);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackHandle {
    pub clip: ClipId,
    pub entity: EntityId,
    pub source: String,
    pub started: bool,
}

pub struct PlaybackController {
    output: Box<dyn AudioOutput>,
    initialized: bool,
    active: Option<PlaybackHandle>,
    volume: f32,
    next_clip: u64,
    pending: VecDeque<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(output: Box<dyn AudioOutput>, volume: f32) -> Self {
        Self {
            output,
            initialized: false,
            active: None,
            volume: volume.clamp(0.0, 1.0),
            next_clip: 0,
            pending: VecDeque::new(),
        }
    }

    /// Initializes the output on first use. Repeated calls are no-ops once it
    /// succeeded.
    pub fn ensure_initialized(&mut self) -> Result<()> {
        if !self.initialized {
            self.output.initialize()?;
            self.initialized = true;
            tracing::debug!("audio output initialized");
        }
        Ok(())
    }

    /// Starts a new clip, discarding any active one. Failures are queued as a
    /// `Failed` event rather than returned.
    pub fn play(&mut self, entity: EntityId, source: &str) -> ClipId {
        self.stop();

        let clip = ClipId(self.next_clip);
        self.next_clip += 1;
        self.active = Some(PlaybackHandle {
            clip,
            entity,
            source: source.to_string(),
            started: false,
        });

        let result = self
            .ensure_initialized()
            .and_then(|_| self.output.play(clip, source, self.volume));
        if let Err(err) = result {
            tracing::warn!(clip = clip.0, %entity, error = %err, "playback rejected");
            self.pending
                .push_back(PlaybackEvent::new(clip, PlaybackEventKind::Failed(err.to_string())));
        }
        clip
    }

    /// Sets the volume for the active clip and every later one.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(handle) = &self.active {
            self.output.set_volume(handle.clip, self.volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Immediately halts and forgets the active clip, if any.
    pub fn stop(&mut self) -> Option<PlaybackHandle> {
        let handle = self.active.take()?;
        self.output.stop(handle.clip);
        self.pending.retain(|event| event.clip != handle.clip);
        Some(handle)
    }

    pub fn active(&self) -> Option<&PlaybackHandle> {
        self.active.as_ref()
    }

    /// Filters an event from the output. Returns the owning entity and the
    /// event kind when it belongs to the active clip. Terminal events release
    /// the handle.
    pub fn accept(&mut self, event: PlaybackEvent) -> Option<(EntityId, PlaybackEventKind)> {
        let handle = self.active.as_mut().filter(|handle| handle.clip == event.clip);
        let Some(handle) = handle else {
            tracing::trace!(clip = event.clip.0, kind = ?event.kind, "dropping stale playback event");
            return None;
        };

        let entity = handle.entity;
        if event.kind == PlaybackEventKind::Started {
            handle.started = true;
        }
        if event.kind.is_terminal() {
            self.active = None;
        }
        Some((entity, event.kind))
    }

    /// Next locally generated event (e.g. a rejected `play`).
    pub fn take_pending(&mut self) -> Option<PlaybackEvent> {
        self.pending.pop_front()
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("initialized", &self.initialized)
            .field("active", &self.active)
            .field("volume", &self.volume)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::DuetError;

    #[derive(Debug, Clone, PartialEq)]
    pub enum OutputCall {
        Initialize,
        Play(ClipId, String, f32),
        Volume(ClipId, f32),
        Stop(ClipId),
    }

    /// Audio output that records calls and can be told to reject requests.
    #[derive(Clone, Default)]
    pub struct RecordingOutput {
        pub calls: Rc<RefCell<Vec<OutputCall>>>,
        pub reject_play: Rc<RefCell<bool>>,
        pub reject_init: Rc<RefCell<bool>>,
    }

    impl RecordingOutput {
        pub fn calls(&self) -> Vec<OutputCall> {
            self.calls.borrow().clone()
        }

        pub fn playing(&self) -> Vec<ClipId> {
            let mut live = Vec::new();
            for call in self.calls.borrow().iter() {
                match call {
                    OutputCall::Play(clip, ..) => live.push(*clip),
                    OutputCall::Stop(clip) => live.retain(|c| c != clip),
                    _ => {}
                }
            }
            live
        }
    }

    impl AudioOutput for RecordingOutput {
        fn initialize(&mut self) -> Result<()> {
            self.calls.borrow_mut().push(OutputCall::Initialize);
            if *self.reject_init.borrow() {
                return Err(DuetError::playback("no output device"));
            }
            Ok(())
        }

        fn play(&mut self, clip: ClipId, source: &str, volume: f32) -> Result<()> {
            if *self.reject_play.borrow() {
                return Err(DuetError::playback("play() rejected"));
            }
            self.calls
                .borrow_mut()
                .push(OutputCall::Play(clip, source.to_string(), volume));
            Ok(())
        }

        fn set_volume(&mut self, clip: ClipId, volume: f32) {
            self.calls.borrow_mut().push(OutputCall::Volume(clip, volume));
        }

        fn stop(&mut self, clip: ClipId) {
            self.calls.borrow_mut().push(OutputCall::Stop(clip));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{OutputCall, RecordingOutput};
    use super::*;

    fn controller() -> (PlaybackController, RecordingOutput) {
        let output = RecordingOutput::default();
        (PlaybackController::new(Box::new(output.clone()), 0.8), output)
    }

    #[test]
    fn initializes_once_on_first_play() {
        let (mut playback, output) = controller();
        assert!(output.calls().is_empty());

        playback.play(EntityId::One, "a.mp3");
        playback.play(EntityId::Two, "b.mp3");

        let inits = output
            .calls()
            .iter()
            .filter(|call| **call == OutputCall::Initialize)
            .count();
        assert_eq!(inits, 1);
    }

    #[test]
    fn new_clip_replaces_previous_one() {
        let (mut playback, output) = controller();
        let first = playback.play(EntityId::One, "a.mp3");
        let second = playback.play(EntityId::One, "b.mp3");

        assert_eq!(output.playing(), vec![second]);
        assert_eq!(playback.active().map(|h| h.clip), Some(second));
        assert!(playback
            .accept(PlaybackEvent::new(first, PlaybackEventKind::Ended))
            .is_none());
    }

    #[test]
    fn terminal_events_release_the_handle() {
        let (mut playback, _) = controller();
        let clip = playback.play(EntityId::Two, "a.mp3");

        let started = playback.accept(PlaybackEvent::new(clip, PlaybackEventKind::Started));
        assert_eq!(started, Some((EntityId::Two, PlaybackEventKind::Started)));
        assert!(playback.active().unwrap().started);

        let ended = playback.accept(PlaybackEvent::new(clip, PlaybackEventKind::Ended));
        assert_eq!(ended, Some((EntityId::Two, PlaybackEventKind::Ended)));
        assert!(playback.active().is_none());
        assert!(playback
            .accept(PlaybackEvent::new(clip, PlaybackEventKind::Ended))
            .is_none());
    }

    #[test]
    fn rejected_play_is_reported_as_failed_event() {
        let (mut playback, output) = controller();
        *output.reject_play.borrow_mut() = true;

        let clip = playback.play(EntityId::One, "a.mp3");
        let event = playback.take_pending().expect("failure should be queued");
        assert_eq!(event.clip, clip);
        assert!(matches!(event.kind, PlaybackEventKind::Failed(_)));
        assert!(playback.take_pending().is_none());
    }

    #[test]
    fn failed_initialization_is_retried_on_next_play() {
        let (mut playback, output) = controller();
        *output.reject_init.borrow_mut() = true;
        playback.play(EntityId::One, "a.mp3");
        assert!(playback.take_pending().is_some());

        *output.reject_init.borrow_mut() = false;
        playback.play(EntityId::One, "b.mp3");
        assert!(playback.take_pending().is_none());
    }

    #[test]
    fn volume_applies_to_active_clip_and_is_remembered() {
        let (mut playback, output) = controller();
        playback.set_volume(1.5);
        assert_eq!(playback.volume(), 1.0);

        let clip = playback.play(EntityId::One, "a.mp3");
        playback.set_volume(0.25);
        assert!(output.calls().contains(&OutputCall::Volume(clip, 0.25)));
        assert!(output
            .calls()
            .contains(&OutputCall::Play(clip, "a.mp3".into(), 1.0)));
    }

    #[test]
    fn stop_without_clip_is_a_no_op() {
        let (mut playback, output) = controller();
        assert!(playback.stop().is_none());
        assert!(output.calls().is_empty());
    }
}
