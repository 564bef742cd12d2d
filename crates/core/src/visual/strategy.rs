use std::f32::consts::PI;

use super::VisualFrame;

/// Turns a [`VisualFrame`] into `columns` heights in `[0, 1]`, already scaled
/// by the frame's opacity. Renderers decide how to paint them.
pub trait VisualStrategy: Send {
    fn name(&self) -> &'static str;
    fn levels(&self, frame: &VisualFrame, columns: usize) -> Vec<f32>;
}

/// Layered sine "water level" that swells with the audio intensity.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaveFill;

impl VisualStrategy for WaveFill {
    fn name(&self) -> &'static str {
        "wave"
    }

    fn levels(&self, frame: &VisualFrame, columns: usize) -> Vec<f32> {
        let intensity = frame.level.intensity;
        let time = frame.elapsed;
        let amplitude = 8.0 + intensity * 12.0;
        let radius = 50.0;

        (0..columns)
            .map(|column| {
                let progress = column as f32 / columns.saturating_sub(1).max(1) as f32;
                let wave = (progress * PI * 4.0 + time * 2.0).sin() * amplitude * 0.6
                    + (progress * PI * 6.0 + time * 1.5).sin() * amplitude * 0.3
                    + (progress * PI * 8.0 + time * 2.5).sin() * amplitude * 0.2
                    + (progress * PI * 10.0 + time * 4.0).sin() * intensity * 8.0;
                let fill = 0.5 + wave / (2.0 * radius);
                fill.clamp(0.0, 1.0) * frame.opacity
            })
            .collect()
    }
}

/// Radial pulse: a ring whose radius breathes with the rms level and ripples
/// around its circumference with the spectral centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadialPulse;

impl VisualStrategy for RadialPulse {
    fn name(&self) -> &'static str {
        "radial"
    }

    fn levels(&self, frame: &VisualFrame, columns: usize) -> Vec<f32> {
        let base = 0.35 + frame.level.rms.min(1.0) * 0.4;
        let ripple = 0.1 + frame.level.spectral_centroid * 0.15;
        let lobes = 3.0 + (frame.level.intensity * 5.0).round();

        (0..columns)
            .map(|column| {
                let angle = column as f32 / columns.max(1) as f32 * 2.0 * PI;
                let radius = base + (angle * lobes + frame.elapsed * 3.0).sin() * ripple;
                radius.clamp(0.0, 1.0) * frame.opacity
            })
            .collect()
    }
}
