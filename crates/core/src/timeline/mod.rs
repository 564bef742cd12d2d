use std::time::{Duration, Instant};

use crate::EntityId;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Checks whether the transport finished opening.
    ConnectPoll,
    /// Ends a turn that carried no audio.
    SilentTurn,
    /// Re-enables starting after a user stop.
    RestartCooldown,
    /// Next redraw of an entity's visualization.
    Frame(EntityId),
    /// Puts a transient status line back to "ready" when nothing is playing.
    StatusReset,
}

impl TimerKind {
    /// Timers that belong to a running conversation and must not outlive it.
    pub fn is_session_bound(self) -> bool {
        matches!(self, Self::ConnectPoll | Self::SilentTurn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub token: TimerToken,
    pub due: Instant,
    pub kind: TimerKind,
}

/// Single-threaded timer queue. Events fire in deadline order; events with the
/// same deadline fire in the order they were scheduled.
#[derive(Debug, Default)]
pub struct Scheduler {
    events: Vec<ScheduledEvent>,
    next_token: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, kind: TimerKind) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        let due = now + delay;
        let position = self.events.partition_point(|event| event.due <= due);
        self.events.insert(position, ScheduledEvent { token, due, kind });
        token
    }

    /// Removes a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.token != token);
        before != self.events.len()
    }

    pub fn cancel_where(&mut self, mut predicate: impl FnMut(TimerKind) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|event| !predicate(event.kind));
        before - self.events.len()
    }

    pub fn cancel_session_timers(&mut self) -> usize {
        self.cancel_where(TimerKind::is_session_bound)
    }

    #[cfg(test)]
    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.events.iter().any(|event| event.token == token)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.events.first().map(|event| event.due)
    }

    /// Pops the earliest event whose deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<ScheduledEvent> {
        if self.events.first()?.due <= now {
            Some(self.events.remove(0))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
