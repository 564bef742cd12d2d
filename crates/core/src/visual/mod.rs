//! Per-entity "is speaking" indicator.
//!
//! Each entity has at most one redraw loop. A loop is a chain of
//! [`TimerKind::Frame`] timers on the shared [`Scheduler`]; restarting a loop
//! cancels the pending frame before scheduling a new one. A soft stop fades
//! the indicator out frame by frame, a hard stop clears it at once.

mod strategy;

use std::time::{Duration, Instant};

pub use strategy::{RadialPulse, VisualStrategy, WaveFill};

use crate::{
    AmplitudeFrame, EntityId, EntityPair, Scheduler, TimerKind, TimerToken, TimingConfig,
};

/// What the renderer needs to draw one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualFrame {
    pub entity: EntityId,
    pub opacity: f32,
    pub level: AmplitudeFrame,
    /// Seconds since the loop started, for time-based motion.
    pub elapsed: f32,
}

/// External drawing surface.
pub trait Renderer {
    fn draw(&mut self, frame: &VisualFrame);
    fn clear(&mut self, entity: EntityId);
}

/// Live amplitude source for the clip that is currently playing.
pub trait AmplitudeFeed {
    fn sample(&mut self, entity: EntityId) -> AmplitudeFrame;
}

/// Feed that always reports silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFeed;

impl AmplitudeFeed for SilentFeed {
    fn sample(&mut self, _entity: EntityId) -> AmplitudeFrame {
        AmplitudeFrame::default()
    }
}

/// Renderer that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn draw(&mut self, _frame: &VisualFrame) {}

    fn clear(&mut self, _entity: EntityId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Running,
    Fading,
}

#[derive(Debug, Clone, Copy)]
struct VisualLoop {
    phase: LoopPhase,
    token: TimerToken,
    started_at: Instant,
}

pub struct VisualizationTrigger {
    renderer: Box<dyn Renderer>,
    feed: Box<dyn AmplitudeFeed>,
    loops: EntityPair<Option<VisualLoop>>,
    opacity: EntityPair<f32>,
    frame_interval: Duration,
    fade_step: f32,
}

impl VisualizationTrigger {
    pub fn new(
        renderer: Box<dyn Renderer>,
        feed: Box<dyn AmplitudeFeed>,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            renderer,
            feed,
            loops: EntityPair::default(),
            opacity: EntityPair::default(),
            frame_interval: timing.frame_interval(),
            fade_step: timing.fade_step.clamp(0.001, 1.0),
        }
    }

    /// Starts (or restarts) the entity's redraw loop. The first frame is drawn
    /// immediately.
    pub fn start(&mut self, entity: EntityId, now: Instant, scheduler: &mut Scheduler) {
        if let Some(previous) = self.loops[entity].take() {
            scheduler.cancel(previous.token);
            tracing::debug!(%entity, "restarting visualization loop");
        }
        let token = scheduler.schedule(now, self.frame_interval, TimerKind::Frame(entity));
        self.loops[entity] = Some(VisualLoop {
            phase: LoopPhase::Running,
            token,
            started_at: now,
        });
        self.draw_running(entity, now);
    }

    /// Begins fading the indicator out. The loop ends once fully transparent.
    pub fn stop(&mut self, entity: EntityId) {
        if let Some(visual) = self.loops[entity].as_mut() {
            visual.phase = LoopPhase::Fading;
        }
    }

    /// Ends the loop and clears the indicator without fading.
    pub fn hard_stop(&mut self, entity: EntityId, scheduler: &mut Scheduler) {
        if let Some(visual) = self.loops[entity].take() {
            scheduler.cancel(visual.token);
        }
        self.opacity[entity] = 0.0;
        self.renderer.clear(entity);
    }

    pub fn hard_stop_all(&mut self, scheduler: &mut Scheduler) {
        for entity in EntityId::ALL {
            self.hard_stop(entity, scheduler);
        }
    }

    pub fn stop_all(&mut self) {
        for entity in EntityId::ALL {
            self.stop(entity);
        }
    }

    /// Advances the loop that owns `token`. Frames from replaced loops are
    /// ignored.
    pub fn on_frame(
        &mut self,
        entity: EntityId,
        token: TimerToken,
        now: Instant,
        scheduler: &mut Scheduler,
    ) {
        let Some(visual) = self.loops[entity] else {
            return;
        };
        if visual.token != token {
            return;
        }

        match visual.phase {
            LoopPhase::Running => {
                self.draw_running(entity, now);
                self.reschedule(entity, now, scheduler);
            }
            LoopPhase::Fading => {
                let opacity = (self.opacity[entity] - self.fade_step * 2.0).max(0.0);
                self.opacity[entity] = opacity;
                if opacity > 0.0 {
                    self.draw(entity, now, visual.started_at);
                    self.reschedule(entity, now, scheduler);
                } else {
                    self.loops[entity] = None;
                    self.renderer.clear(entity);
                }
            }
        }
    }

    pub fn phase(&self, entity: EntityId) -> Option<LoopPhase> {
        self.loops[entity].map(|visual| visual.phase)
    }

    pub fn is_active(&self, entity: EntityId) -> bool {
        self.loops[entity].is_some()
    }

    pub fn opacity(&self, entity: EntityId) -> f32 {
        self.opacity[entity]
    }

    fn draw_running(&mut self, entity: EntityId, now: Instant) {
        self.opacity[entity] = (self.opacity[entity] + self.fade_step).min(1.0);
        if let Some(visual) = self.loops[entity] {
            self.draw(entity, now, visual.started_at);
        }
    }

    fn draw(&mut self, entity: EntityId, now: Instant, started_at: Instant) {
        let frame = VisualFrame {
            entity,
            opacity: self.opacity[entity],
            level: self.feed.sample(entity),
            elapsed: now.saturating_duration_since(started_at).as_secs_f32(),
        };
        self.renderer.draw(&frame);
    }

    fn reschedule(&mut self, entity: EntityId, now: Instant, scheduler: &mut Scheduler) {
        if let Some(visual) = self.loops[entity].as_mut() {
            visual.token = scheduler.schedule(now, self.frame_interval, TimerKind::Frame(entity));
        }
    }
}

impl std::fmt::Debug for VisualizationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizationTrigger")
            .field("loops", &self.loops)
            .field("opacity", &self.opacity)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingRenderer, RenderCall};
    use super::*;

    fn trigger() -> (VisualizationTrigger, RecordingRenderer, Scheduler) {
        let renderer = RecordingRenderer::default();
        let trigger = VisualizationTrigger::new(
            Box::new(renderer.clone()),
            Box::new(SilentFeed),
            &TimingConfig::default(),
        );
        (trigger, renderer, Scheduler::new())
    }

    /// Fires every due frame up to `until`, returning how many fired.
    fn run_frames(
        trigger: &mut VisualizationTrigger,
        scheduler: &mut Scheduler,
        until: Instant,
    ) -> usize {
        let mut fired = 0;
        while let Some(event) = scheduler.pop_due(until) {
            if let TimerKind::Frame(entity) = event.kind {
                trigger.on_frame(entity, event.token, event.due, scheduler);
                fired += 1;
            }
        }
        fired
    }

    #[test]
    fn start_draws_immediately_and_keeps_one_loop() {
        let (mut trigger, renderer, mut scheduler) = trigger();
        let t0 = Instant::now();

        trigger.start(EntityId::One, t0, &mut scheduler);
        trigger.start(EntityId::One, t0, &mut scheduler);

        assert_eq!(scheduler.len(), 1);
        assert_eq!(renderer.calls().len(), 2);
        assert_eq!(trigger.phase(EntityId::One), Some(LoopPhase::Running));
    }

    #[test]
    fn fade_out_ramps_down_then_clears() {
        let (mut trigger, renderer, mut scheduler) = trigger();
        let t0 = Instant::now();
        trigger.start(EntityId::Two, t0, &mut scheduler);
        run_frames(&mut trigger, &mut scheduler, t0 + Duration::from_millis(500));
        assert!((trigger.opacity(EntityId::Two) - 1.0).abs() < 1e-4);

        trigger.stop(EntityId::Two);
        assert_eq!(renderer.clears(EntityId::Two), 0);
        let fired = run_frames(&mut trigger, &mut scheduler, t0 + Duration::from_secs(2));

        assert!(fired >= 9, "fade took {fired} frames");
        assert_eq!(renderer.clears(EntityId::Two), 1);
        assert!(!trigger.is_active(EntityId::Two));
        assert!(scheduler.is_empty());
        assert_eq!(trigger.opacity(EntityId::Two), 0.0);
    }

    #[test]
    fn hard_stop_clears_without_waiting() {
        let (mut trigger, renderer, mut scheduler) = trigger();
        let t0 = Instant::now();
        trigger.start(EntityId::One, t0, &mut scheduler);

        trigger.hard_stop(EntityId::One, &mut scheduler);

        assert_eq!(renderer.calls().last(), Some(&RenderCall::Clear(EntityId::One)));
        assert!(scheduler.is_empty());
        assert_eq!(trigger.opacity(EntityId::One), 0.0);
        assert!(!trigger.is_active(EntityId::One));
    }

    #[test]
    fn loops_are_independent_per_entity() {
        let (mut trigger, _, mut scheduler) = trigger();
        let t0 = Instant::now();
        trigger.start(EntityId::One, t0, &mut scheduler);
        trigger.start(EntityId::Two, t0, &mut scheduler);
        trigger.hard_stop(EntityId::One, &mut scheduler);

        assert!(trigger.is_active(EntityId::Two));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn stop_without_loop_is_a_no_op() {
        let (mut trigger, renderer, _) = trigger();
        trigger.stop(EntityId::One);
        assert!(renderer.calls().is_empty());
    }
}
