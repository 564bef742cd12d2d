use std::{
    io::Write,
    time::{Duration, Instant},
};

use duet_core::{EntityId, EntityPair, Renderer, VisualFrame, VisualStrategy};

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const COLUMNS: usize = 32;
/// Terminals can't keep up with a 60 Hz redraw; one line per entity every
/// `REFRESH` is plenty.
const REFRESH: Duration = Duration::from_millis(120);

/// Draws the speaking indicator as a one-line level meter on stderr.
pub struct TerminalRenderer {
    strategy: Box<dyn VisualStrategy>,
    last_drawn: EntityPair<Option<Instant>>,
}

impl TerminalRenderer {
    pub fn new(strategy: Box<dyn VisualStrategy>) -> Self {
        tracing::debug!(strategy = strategy.name(), "terminal meter enabled");
        Self {
            strategy,
            last_drawn: EntityPair::default(),
        }
    }

    fn line(&self, frame: &VisualFrame) -> String {
        let bars: String = self
            .strategy
            .levels(frame, COLUMNS)
            .into_iter()
            .map(bar)
            .collect();
        format!("{:<9}{bars}", frame.entity.to_string())
    }
}

fn bar(level: f32) -> char {
    if level <= 0.0 {
        return ' ';
    }
    let index = (level.clamp(0.0, 1.0) * (BARS.len() - 1) as f32).round() as usize;
    BARS[index]
}

impl Renderer for TerminalRenderer {
    fn draw(&mut self, frame: &VisualFrame) {
        let now = Instant::now();
        if let Some(last) = self.last_drawn[frame.entity] {
            if now.duration_since(last) < REFRESH {
                return;
            }
        }
        self.last_drawn[frame.entity] = Some(now);

        let line = self.line(frame);
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
    }

    fn clear(&mut self, entity: EntityId) {
        self.last_drawn[entity] = None;
    }
}
