//! Dialogue session state machine.
//!
//! The [`Session`] is the only owner of the transport, the playback
//! controller, the visualization loops and the timer queue. Every input
//! (transport event, playback event, user command, expired timer) is handled
//! to completion before the next one, in arrival order. Side effects are
//! reported to the injected [`SessionObserver`].

mod observer;

use std::time::Instant;

pub use observer::{AudioStatus, ConnectionState, Controls, NoopObserver, SessionObserver};

use crate::{
    validate_entities, AmplitudeFeed, AppConfig, AudioOutput, ChannelState, ClientCommand,
    ClipId, DuetError, EntityConfig, EntityId, EntityPair, PlaybackController, PlaybackEvent,
    PlaybackEventKind, Renderer, Result, Scheduler, ServerEvent, TimerKind, TimerToken,
    TimingConfig, Transcript, Transport, TransportEvent, TurnEvent, VisualizationTrigger,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingTurn,
    Speaking,
    /// Stopped by the user; starting again is blocked until the cooldown ends.
    Stopping,
    /// Ended by a remote error; cleared by acknowledging it or starting again.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Start(EntityPair<EntityConfig>),
    Stop,
    /// Stops when running, starts otherwise.
    Toggle(EntityPair<EntityConfig>),
    ToggleMute,
    /// Volume in percent, `0..=100`.
    SetVolume(u8),
    AcknowledgeError,
    Shutdown,
}

/// Everything the session reacts to, apart from its own timers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Transport(TransportEvent),
    Playback(PlaybackEvent),
    User(UserCommand),
}

/// External collaborators injected into a [`Session`].
pub struct SessionParts {
    pub transport: Box<dyn Transport>,
    pub output: Box<dyn AudioOutput>,
    pub renderer: Box<dyn Renderer>,
    pub feed: Box<dyn AmplitudeFeed>,
    pub observer: Box<dyn SessionObserver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnAudio {
    Clip(ClipId),
    Silent(TimerToken),
}

/// The turn awaiting its `audio_finished` acknowledgement.
#[derive(Debug, Clone, Copy)]
struct ActiveTurn {
    entity: EntityId,
    audio: TurnAudio,
}

#[derive(Debug)]
struct PendingStart {
    entities: EntityPair<EntityConfig>,
    attempts: u32,
    token: TimerToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Visualizations are cleared at once.
    Hard,
    /// Visualizations fade out.
    Soft,
}

pub struct Session {
    timing: TimingConfig,
    state: SessionState,
    connection: ConnectionState,
    active: bool,
    muted: bool,
    transport: Box<dyn Transport>,
    playback: PlaybackController,
    visuals: VisualizationTrigger,
    observer: Box<dyn SessionObserver>,
    transcript: Transcript,
    scheduler: Scheduler,
    pending_start: Option<PendingStart>,
    turn: Option<ActiveTurn>,
    cooldown: Option<TimerToken>,
    status_reset: Option<TimerToken>,
}

impl Session {
    pub fn new(config: &AppConfig, parts: SessionParts) -> Self {
        Self {
            timing: config.timing.clone(),
            state: SessionState::Idle,
            connection: ConnectionState::Disconnected,
            active: false,
            muted: config.audio.muted,
            transport: parts.transport,
            playback: PlaybackController::new(parts.output, config.audio.volume),
            visuals: VisualizationTrigger::new(parts.renderer, parts.feed, &config.timing),
            observer: parts.observer,
            transcript: Transcript::new(),
            scheduler: Scheduler::new(),
            pending_start: None,
            turn: None,
            cooldown: None,
            status_reset: None,
        }
    }

    pub fn handle(&mut self, input: SessionInput, now: Instant) {
        match input {
            SessionInput::Transport(event) => self.on_transport_event(event, now),
            SessionInput::Playback(event) => self.on_playback_event(event, now),
            SessionInput::User(command) => self.on_user_command(command, now),
        }
        self.drain_playback(now);
    }

    /// Runs every timer whose deadline is at or before `now`.
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some(event) = self.scheduler.pop_due(now) {
            match event.kind {
                TimerKind::ConnectPoll => self.poll_connection(event.token, now),
                TimerKind::SilentTurn => self.on_silent_turn_elapsed(event.token),
                TimerKind::RestartCooldown => self.on_cooldown_elapsed(event.token),
                TimerKind::Frame(entity) => {
                    self.visuals
                        .on_frame(entity, event.token, now, &mut self.scheduler)
                }
                TimerKind::StatusReset => self.on_status_reset(event.token),
            }
            self.drain_playback(now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Validates the prompts and starts a conversation, connecting first if
    /// needed. Errors are also reported to the observer.
    pub fn start_session(&mut self, entities: EntityPair<EntityConfig>, now: Instant) -> Result<()> {
        let result = self.try_start(entities, now);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "start rejected");
            self.observer.notify_error(err);
        }
        result
    }

    /// Stops the conversation immediately. Always permitted.
    pub fn stop_session(&mut self, now: Instant) {
        tracing::info!(state = ?self.state, "stopping conversation");
        if self.transport.state() == ChannelState::Open {
            if let Err(err) = self.transport.send(&ClientCommand::Stop) {
                tracing::warn!(error = %err, "could not send stop");
            }
        }
        self.teardown(Teardown::Hard);
        self.state = SessionState::Stopping;
        if let Some(previous) = self.cooldown.take() {
            self.scheduler.cancel(previous);
        }
        self.cooldown = Some(self.scheduler.schedule(
            now,
            self.timing.restart_cooldown(),
            TimerKind::RestartCooldown,
        ));
        self.emit_controls();
    }

    pub fn on_turn_event(&mut self, turn: TurnEvent, now: Instant) {
        if !self.active {
            return;
        }
        if self.turn.is_some() {
            tracing::warn!("turn arrived before the previous one finished");
            self.finish_turn();
        }

        let TurnEvent {
            entity,
            text,
            audio_ref,
        } = turn;
        let index = self.transcript.append(entity, text);
        if let Some(entry) = self.transcript.get(index) {
            self.observer.transcript_appended(index, entry);
        }
        self.observer.loading_changed(false);

        match audio_ref.filter(|_| !self.muted) {
            Some(source) => {
                tracing::info!(%entity, %source, "playing turn");
                let clip = self.playback.play(entity, &source);
                self.turn = Some(ActiveTurn {
                    entity,
                    audio: TurnAudio::Clip(clip),
                });
                self.state = SessionState::Speaking;
            }
            None => {
                tracing::debug!(%entity, "silent turn");
                let token =
                    self.scheduler
                        .schedule(now, self.timing.silent_turn(), TimerKind::SilentTurn);
                self.turn = Some(ActiveTurn {
                    entity,
                    audio: TurnAudio::Silent(token),
                });
                self.mark_speaking(entity, true);
                self.state = SessionState::AwaitingTurn;
            }
        }
    }

    pub fn on_playback_event(&mut self, event: PlaybackEvent, now: Instant) {
        let Some((entity, kind)) = self.playback.accept(event) else {
            return;
        };

        match kind {
            PlaybackEventKind::Loading => self.observer.audio_status(AudioStatus::Loading),
            PlaybackEventKind::Playable => {
                self.observer.audio_status(AudioStatus::Speaking(entity))
            }
            PlaybackEventKind::Started => {
                self.mark_speaking(entity, true);
                self.visuals.start(entity, now, &mut self.scheduler);
            }
            PlaybackEventKind::Ended => {
                self.observer.audio_status(AudioStatus::Ready);
                self.finish_turn();
            }
            PlaybackEventKind::Failed(reason) => {
                tracing::warn!(%entity, %reason, "playback failed; continuing silently");
                self.observer.audio_status(AudioStatus::Error);
                self.observer.notify_error(&DuetError::playback(format!(
                    "Audio for {entity} could not be played: {reason}"
                )));
                self.finish_turn();
            }
        }
    }

    /// The service confirmed the conversation ended. Never sends `stop`.
    pub fn on_remote_stopped(&mut self) {
        tracing::debug!(active = self.active, "remote stop confirmed");
        self.teardown(Teardown::Soft);
        self.state = match self.state {
            SessionState::Stopping if self.cooldown.is_some() => SessionState::Stopping,
            SessionState::Error => SessionState::Error,
            _ => SessionState::Idle,
        };
        self.emit_controls();
    }

    pub fn on_remote_error(&mut self, message: Option<String>) {
        let message = message.unwrap_or_else(|| "An unknown error occurred".to_string());
        tracing::warn!(%message, "remote error");
        self.teardown(Teardown::Soft);
        self.state = SessionState::Error;
        self.emit_controls();
        self.observer.notify_error(&DuetError::Remote(message));
    }

    /// The channel went away. Treated as a remote stop; never reconnects.
    pub fn on_transport_closed(&mut self) {
        self.set_connection(ConnectionState::Disconnected);
        if self.pending_start.is_some() {
            // the next poll reports the failed connect
            return;
        }
        self.on_remote_stopped();
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        tracing::info!(muted = self.muted, "mute toggled");
        let status = if self.muted {
            AudioStatus::Muted
        } else {
            AudioStatus::Ready
        };
        self.observer.audio_status(status);
        if self.muted
            && matches!(
                self.turn,
                Some(ActiveTurn {
                    audio: TurnAudio::Clip(_),
                    ..
                })
            )
        {
            self.finish_turn();
        }
    }

    /// Applies the volume and shows it on the status line until the status
    /// reset delay passes.
    pub fn set_volume(&mut self, percent: u8, now: Instant) {
        let percent = percent.min(100);
        self.playback.set_volume(f32::from(percent) / 100.0);
        self.observer.audio_status(AudioStatus::Volume(percent));
        if let Some(previous) = self.status_reset.take() {
            self.scheduler.cancel(previous);
        }
        self.status_reset = Some(self.scheduler.schedule(
            now,
            self.timing.status_reset(),
            TimerKind::StatusReset,
        ));
    }

    pub fn acknowledge_error(&mut self) {
        if self.state == SessionState::Error {
            self.state = SessionState::Idle;
            self.emit_controls();
        }
    }

    /// Stops anything in progress and closes the channel.
    pub fn shutdown(&mut self, now: Instant) {
        if self.active || self.state == SessionState::Connecting {
            self.stop_session(now);
        }
        self.visuals.hard_stop_all(&mut self.scheduler);
        self.transport.close();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn volume(&self) -> f32 {
        self.playback.volume()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn visuals(&self) -> &VisualizationTrigger {
        &self.visuals
    }

    pub fn controls(&self) -> Controls {
        let running = self.active || self.state == SessionState::Connecting;
        Controls {
            start_enabled: !running && self.cooldown.is_none(),
            stop_enabled: running,
            inputs_enabled: !running,
        }
    }

    fn on_user_command(&mut self, command: UserCommand, now: Instant) {
        match command {
            UserCommand::Start(entities) => {
                let _ = self.start_session(entities, now);
            }
            UserCommand::Stop => self.stop_session(now),
            UserCommand::Toggle(entities) => {
                if self.active || self.state == SessionState::Connecting {
                    self.stop_session(now);
                } else {
                    let _ = self.start_session(entities, now);
                }
            }
            UserCommand::ToggleMute => self.toggle_mute(),
            UserCommand::SetVolume(percent) => self.set_volume(percent, now),
            UserCommand::AcknowledgeError => self.acknowledge_error(),
            UserCommand::Shutdown => self.shutdown(now),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Opened => self.set_connection(ConnectionState::Connected),
            TransportEvent::Message(text) => match ServerEvent::parse(&text) {
                Ok(event) => self.on_server_event(event, now),
                Err(err) => tracing::warn!(error = %err, "ignoring malformed message"),
            },
            TransportEvent::Error(detail) => {
                tracing::warn!(%detail, "transport error");
                self.observer.notify_error(&DuetError::transport(
                    "Connection error. Please check your network and try again.",
                ));
            }
            TransportEvent::Closed => self.on_transport_closed(),
        }
    }

    fn on_server_event(&mut self, event: ServerEvent, now: Instant) {
        if !self.active && event != ServerEvent::Stopped {
            tracing::debug!(kind = event.name(), "dropping message while inactive");
            return;
        }

        match event {
            ServerEvent::Speaking(turn) => self.on_turn_event(turn, now),
            ServerEvent::FinishedSpeaking => self.observer.loading_changed(false),
            ServerEvent::Stopped => self.on_remote_stopped(),
            ServerEvent::Error { message } => self.on_remote_error(message),
            ServerEvent::Unknown(kind) => {
                tracing::warn!(%kind, "ignoring unrecognised message type")
            }
        }
    }

    fn try_start(&mut self, entities: EntityPair<EntityConfig>, now: Instant) -> Result<()> {
        let entities = validate_entities(entities)?;
        if self.cooldown.is_some() {
            return Err(DuetError::InvalidState(
                "The previous conversation is still stopping. Try again in a moment.",
            ));
        }
        if !matches!(self.state, SessionState::Idle | SessionState::Error) {
            return Err(DuetError::InvalidState(
                "A conversation is already running. Stop it first.",
            ));
        }

        if self.connection == ConnectionState::Connected
            && self.transport.state() == ChannelState::Open
        {
            self.begin_conversation(entities);
            return Ok(());
        }

        self.transport
            .open()
            .map_err(|err| DuetError::Connection(format!("Failed to connect to server: {err}")))?;
        self.set_connection(ConnectionState::Connecting);
        self.state = SessionState::Connecting;
        let token = self.scheduler.schedule(
            now,
            self.timing.connect_poll_interval(),
            TimerKind::ConnectPoll,
        );
        self.pending_start = Some(PendingStart {
            entities,
            attempts: 0,
            token,
        });
        self.emit_controls();
        Ok(())
    }

    fn poll_connection(&mut self, token: TimerToken, now: Instant) {
        let Some(pending) = self.pending_start.as_mut() else {
            return;
        };
        if pending.token != token {
            return;
        }
        pending.attempts += 1;

        match self.transport.state() {
            ChannelState::Open => {
                if let Some(pending) = self.pending_start.take() {
                    self.set_connection(ConnectionState::Connected);
                    self.begin_conversation(pending.entities);
                }
            }
            ChannelState::Opening if pending.attempts < self.timing.connect_poll_attempts => {
                pending.token = self.scheduler.schedule(
                    now,
                    self.timing.connect_poll_interval(),
                    TimerKind::ConnectPoll,
                );
            }
            state => {
                tracing::warn!(attempts = pending.attempts, ?state, "transport did not open");
                self.fail_connection();
            }
        }
    }

    fn fail_connection(&mut self) {
        self.pending_start = None;
        self.transport.close();
        self.set_connection(ConnectionState::Disconnected);
        self.state = SessionState::Idle;
        self.emit_controls();
        self.observer
            .notify_error(&DuetError::Connection("Failed to connect to server.".into()));
    }

    fn begin_conversation(&mut self, entities: EntityPair<EntityConfig>) {
        tracing::info!("starting conversation");
        self.active = true;
        self.transcript.clear();
        self.observer.transcript_cleared();
        self.observer.loading_changed(true);
        self.state = SessionState::AwaitingTurn;
        self.emit_controls();
        self.observer.audio_status(AudioStatus::Starting);

        if let Err(err) = self.transport.send(&ClientCommand::Start(entities)) {
            tracing::warn!(error = %err, "could not send start");
            self.teardown(Teardown::Soft);
            self.state = SessionState::Idle;
            self.emit_controls();
            self.observer.notify_error(&err);
        }
    }

    fn on_silent_turn_elapsed(&mut self, token: TimerToken) {
        let current = self.turn.map(|turn| turn.audio);
        if current == Some(TurnAudio::Silent(token)) {
            self.finish_turn();
        }
    }

    fn on_cooldown_elapsed(&mut self, token: TimerToken) {
        if self.cooldown != Some(token) {
            return;
        }
        self.cooldown = None;
        if self.state == SessionState::Stopping {
            self.state = SessionState::Idle;
        }
        self.emit_controls();
    }

    fn on_status_reset(&mut self, token: TimerToken) {
        if self.status_reset != Some(token) {
            return;
        }
        self.status_reset = None;
        let playing = self.playback.active().is_some_and(|handle| handle.started);
        if !playing {
            self.observer.audio_status(AudioStatus::Ready);
        }
    }

    /// Ends the in-flight turn and acknowledges it. Does nothing when no turn
    /// is in flight, so each turn is acknowledged at most once.
    fn finish_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        match turn.audio {
            TurnAudio::Clip(_) => {
                self.playback.stop();
            }
            TurnAudio::Silent(token) => {
                self.scheduler.cancel(token);
            }
        }
        self.mark_speaking(turn.entity, false);
        self.visuals.stop(turn.entity);
        self.send_audio_finished();
        if self.active {
            self.state = SessionState::AwaitingTurn;
        }
    }

    fn send_audio_finished(&mut self) {
        if self.transport.state() != ChannelState::Open {
            tracing::debug!("channel closed; skipping turn acknowledgement");
            return;
        }
        if let Err(err) = self.transport.send(&ClientCommand::AudioFinished) {
            tracing::warn!(error = %err, "could not acknowledge turn");
        }
    }

    fn teardown(&mut self, mode: Teardown) {
        self.pending_start = None;
        self.scheduler.cancel_session_timers();
        if let Some(turn) = self.turn.take() {
            self.mark_speaking(turn.entity, false);
        }
        self.playback.stop();
        match mode {
            Teardown::Hard => self.visuals.hard_stop_all(&mut self.scheduler),
            Teardown::Soft => self.visuals.stop_all(),
        }
        self.active = false;
        self.observer.loading_changed(false);
        self.observer.audio_status(AudioStatus::Stopped);
    }

    fn drain_playback(&mut self, now: Instant) {
        while let Some(event) = self.playback.take_pending() {
            self.on_playback_event(event, now);
        }
    }

    fn mark_speaking(&mut self, entity: EntityId, speaking: bool) {
        if let Some(index) = self.transcript.set_speaking(entity, speaking) {
            if let Some(entry) = self.transcript.get(index) {
                self.observer.speaking_changed(index, entry);
            }
        }
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            self.connection = state;
            self.observer.connection_changed(state);
        }
    }

    fn emit_controls(&mut self) {
        let controls = self.controls();
        self.observer.controls_changed(controls);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("connection", &self.connection)
            .field("active", &self.active)
            .field("muted", &self.muted)
            .field("transcript", &self.transcript.len())
            .field("pending_timers", &self.scheduler.len())
            .finish()
    }
}
