use std::{cmp::Ordering, f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{DuetError, Result};

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
/// Bins averaged into the low-band intensity that drives the indicators.
const LOW_BAND_BINS: usize = 32;

/// Audio features for one analysis block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeFrame {
    pub time: f32,
    pub rms: f32,
    /// Loudest smoothed low-band bin mapped onto `[0, 1]` over the
    /// -100..-30 dB window.
    pub intensity: f32,
    /// Normalised [0, 1] spectral centroid where 1.0 is the Nyquist frequency.
    pub spectral_centroid: f32,
}

/// Block-wise amplitude analyser with per-bin temporal smoothing.
pub struct AmplitudeAnalyser {
    sample_rate: u32,
    block_size: usize,
    smoothing: f32,
    smoothed: Vec<f32>,
    processed_samples: usize,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl AmplitudeAnalyser {
    pub fn new(sample_rate: u32, block_size: usize, smoothing: f32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            block_size: block_size.max(2),
            smoothing: smoothing.clamp(0.0, 1.0),
            smoothed: Vec::new(),
            processed_samples: 0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn reset(&mut self) {
        self.smoothed.clear();
        self.processed_samples = 0;
    }

    /// Analyses one block of mono samples. Short blocks are zero-padded.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AmplitudeFrame> {
        if samples.is_empty() {
            return Err(DuetError::InvalidInput(
                "analysis requires at least one sample",
            ));
        }

        let sample_rate = self.sample_rate as f32;
        let used = samples.len().min(self.block_size);
        let start_time = self.processed_samples as f32 / sample_rate;
        let time = start_time + used as f32 / sample_rate * 0.5;
        let rms = compute_rms(&samples[..used]);

        let block_size = self.block_size;
        let smoothing = self.smoothing;
        let fft = prepare_fft(&mut self.fft_planner, &mut self.fft, block_size);
        for (index, slot) in fft.input.iter_mut().enumerate() {
            let sample = samples.get(index).copied().unwrap_or(0.0);
            *slot = sample * hann_value(index, block_size);
        }
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        if self.smoothed.len() != fft.spectrum.len() {
            self.smoothed = vec![0.0; fft.spectrum.len()];
        }
        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let bin_hz = sample_rate / block_size as f32;
        for (i, (bin, smoothed)) in fft.spectrum.iter().zip(self.smoothed.iter_mut()).enumerate() {
            let magnitude = bin.norm() / block_size as f32;
            *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
        }

        let intensity = self
            .smoothed
            .iter()
            .take(LOW_BAND_BINS)
            .map(|magnitude| decibel_level(*magnitude))
            .fold(0.0_f32, f32::max);
        let nyquist = sample_rate * 0.5;
        let spectral_centroid = if magnitude_sum <= f32::EPSILON {
            0.0
        } else {
            (weighted_sum / magnitude_sum / nyquist).clamp(0.0, 1.0)
        };

        self.processed_samples += used;
        Ok(AmplitudeFrame {
            time,
            rms,
            intensity,
            spectral_centroid,
        })
    }
}

fn prepare_fft<'a>(
    planner: &mut RealFftPlanner<f32>,
    slot: &'a mut Option<FftResources>,
    size: usize,
) -> &'a mut FftResources {
    let fft = match slot.take() {
        Some(fft) if fft.size == size => fft,
        _ => {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        }
    };
    slot.insert(fft)
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AmplitudeAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmplitudeAnalyser")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("smoothing", &self.smoothing)
            .field("processed_samples", &self.processed_samples)
            .finish()
    }
}

/// Pre-computed amplitude timeline for a decoded clip, sampled by playback
/// position while the clip plays.
#[derive(Debug, Clone, Default)]
pub struct ClipAnalysis {
    frames: Vec<AmplitudeFrame>,
    duration: f32,
}

impl ClipAnalysis {
    pub fn analyse(
        mono: &[f32],
        sample_rate: u32,
        block_size: usize,
        smoothing: f32,
    ) -> Result<Self> {
        let mut analyser = AmplitudeAnalyser::new(sample_rate, block_size, smoothing);
        let frames = mono
            .chunks(analyser.block_size())
            .map(|block| analyser.process_block(block))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            frames,
            duration: mono.len() as f32 / sample_rate.max(1) as f32,
        })
    }

    pub fn frames(&self) -> &[AmplitudeFrame] {
        &self.frames
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    /// Returns the frame at or before `time`, or a silent frame before the
    /// first block.
    pub fn sample_at(&self, time: f32) -> AmplitudeFrame {
        match self
            .frames
            .binary_search_by(|frame| frame.time.partial_cmp(&time).unwrap_or(Ordering::Equal))
        {
            Ok(index) => self.frames[index],
            Err(0) => AmplitudeFrame {
                time,
                ..Default::default()
            },
            Err(index) => self.frames[index - 1],
        }
    }
}

/// Averages interleaved channels into a mono signal.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn decibel_level(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return 0.0;
    }
    let db = 20.0 * magnitude.log10();
    ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silence_has_no_intensity() {
        let mut analyser = AmplitudeAnalyser::new(48_000, 256, 0.8);
        let frame = analyser.process_block(&[0.0; 256]).unwrap();
        assert_eq!(frame.rms, 0.0);
        assert_eq!(frame.intensity, 0.0);
        assert_eq!(frame.spectral_centroid, 0.0);
    }

    #[test]
    fn low_tone_raises_intensity_gradually() {
        let mut analyser = AmplitudeAnalyser::new(8_000, 256, 0.8);
        let block = tone(250.0, 8_000, 256);
        let first = analyser.process_block(&block).unwrap();
        let mut last = first;
        for _ in 0..20 {
            last = analyser.process_block(&block).unwrap();
        }
        assert!(first.intensity > 0.0);
        assert!(last.intensity >= first.intensity);
        assert!(last.intensity <= 1.0);
        assert!((last.rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05);
    }

    #[test]
    fn rejects_empty_blocks() {
        let mut analyser = AmplitudeAnalyser::new(48_000, 256, 0.8);
        assert!(analyser.process_block(&[]).is_err());
    }

    #[test]
    fn clip_analysis_samples_previous_frame() {
        let samples = tone(200.0, 1_000, 2_000);
        let clip = ClipAnalysis::analyse(&samples, 1_000, 250, 0.8).unwrap();
        assert_eq!(clip.frames().len(), 8);
        assert!((clip.duration() - 2.0).abs() < f32::EPSILON);

        let frame = clip.sample_at(1.3);
        assert!(frame.time <= 1.3);
        assert_eq!(clip.sample_at(0.0).rms, 0.0);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }
}
