use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use duet_core::{AmplitudeFeed, AmplitudeFrame, ClipAnalysis, EntityId};

#[derive(Debug)]
struct LiveClip {
    key: u64,
    analysis: ClipAnalysis,
    started: Instant,
}

/// Amplitude of the clip that is currently audible, looked up by playback
/// position in its pre-computed analysis. The audio thread publishes each clip
/// as it starts; only one clip is ever audible, so every entity samples it.
#[derive(Debug, Clone, Default)]
pub struct ClipFeed {
    current: Arc<Mutex<Option<LiveClip>>>,
}

impl ClipFeed {
    pub fn begin(&self, key: u64, analysis: ClipAnalysis, started: Instant) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(LiveClip {
                key,
                analysis,
                started,
            });
        }
    }

    /// Forgets the clip unless a newer one already replaced it.
    pub fn end(&self, key: u64) {
        if let Ok(mut current) = self.current.lock() {
            if current.as_ref().is_some_and(|clip| clip.key == key) {
                *current = None;
            }
        }
    }

    fn sample_at(&self, now: Instant) -> AmplitudeFrame {
        let Ok(current) = self.current.lock() else {
            return AmplitudeFrame::default();
        };
        current
            .as_ref()
            .map(|clip| {
                let position = now.saturating_duration_since(clip.started).as_secs_f32();
                clip.analysis.sample_at(position)
            })
            .unwrap_or_default()
    }
}

impl AmplitudeFeed for ClipFeed {
    fn sample(&mut self, _entity: EntityId) -> AmplitudeFrame {
        self.sample_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn loud_then_quiet() -> ClipAnalysis {
        let rate = 8_000;
        let mut samples: Vec<f32> = (0..rate).map(|i| (i as f32 * 0.3).sin() * 0.8).collect();
        samples.extend(std::iter::repeat(0.0).take(rate as usize));
        ClipAnalysis::analyse(&samples, rate, 256, 0.0).unwrap()
    }

    #[test]
    fn follows_playback_position() {
        let feed = ClipFeed::default();
        let started = Instant::now();
        feed.begin(3, loud_then_quiet(), started);

        let loud = feed.sample_at(started + Duration::from_millis(500));
        let quiet = feed.sample_at(started + Duration::from_millis(1800));
        assert!(loud.rms > quiet.rms);
    }

    #[test]
    fn only_the_current_clip_can_end_the_feed() {
        let mut feed = ClipFeed::default();
        let started = Instant::now();
        feed.begin(1, loud_then_quiet(), started);
        feed.begin(2, loud_then_quiet(), started);

        feed.end(1);
        let later = started + Duration::from_millis(500);
        assert!(feed.sample_at(later).rms > 0.0);

        feed.end(2);
        assert_eq!(feed.sample(EntityId::Two), AmplitudeFrame::default());
    }
}
