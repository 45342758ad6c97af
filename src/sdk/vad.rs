//! Energy-based voice activity detection.
//!
//! A [`Vad`] is loaded once per process and hands out one [`VadStream`] per
//! audio input. Streams segment PCM16 frames into utterances.

use super::room::AudioFrame;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct VadOptions {
    /// Normalised RMS (0.0 to 1.0) at or above which a frame counts as speech.
    pub activation_threshold: f32,
    /// Speech must last this long before an utterance starts.
    pub min_speech_duration: Duration,
    /// Silence this long ends an utterance.
    pub min_silence_duration: Duration,
    /// Audio kept from before the detected start.
    pub prefix_padding_duration: Duration,
    /// Utterances are cut off at this length.
    pub max_buffered_speech: Duration,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            activation_threshold: 0.01,
            min_speech_duration: Duration::from_millis(50),
            min_silence_duration: Duration::from_millis(550),
            prefix_padding_duration: Duration::from_millis(500),
            max_buffered_speech: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vad {
    options: VadOptions,
}

impl Vad {
    /// Load with default options.
    #[must_use]
    pub fn load() -> Self {
        Self { options: VadOptions::default() }
    }

    /// # Errors
    /// Returns [`Error::Config`] if the threshold is outside `(0, 1]` or the
    /// buffer limit cannot hold the prefix padding.
    #[allow(clippy::result_large_err)]
    pub fn load_with(options: VadOptions) -> Result<Self> {
        if !(options.activation_threshold > 0.0 && options.activation_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "VAD activation threshold must be in (0, 1], got {}",
                options.activation_threshold
            )));
        }
        if options.max_buffered_speech.is_zero()
            || options.max_buffered_speech < options.prefix_padding_duration
        {
            return Err(Error::Config(
                "VAD max buffered speech must be non-zero and at least the prefix padding".to_string(),
            ));
        }
        Ok(Self { options })
    }

    #[must_use]
    pub const fn options(&self) -> &VadOptions {
        &self.options
    }

    #[must_use]
    pub fn stream(&self) -> VadStream {
        VadStream::new(self.options.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VadEvent {
    StartOfSpeech,
    /// The finished utterance, prefix padding included.
    EndOfSpeech(AudioFrame),
}

#[derive(Debug)]
pub struct VadStream {
    options: VadOptions,
    sample_rate: u32,
    num_channels: u32,
    prefix: VecDeque<i16>,
    utterance: Vec<i16>,
    in_candidate: bool,
    speaking: bool,
    speech: Duration,
    silence: Duration,
    buffered: Duration,
}

impl VadStream {
    fn new(options: VadOptions) -> Self {
        Self {
            options,
            sample_rate: 0,
            num_channels: 1,
            prefix: VecDeque::new(),
            utterance: Vec::new(),
            in_candidate: false,
            speaking: false,
            speech: Duration::ZERO,
            silence: Duration::ZERO,
            buffered: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn push_frame(&mut self, frame: &AudioFrame) -> Vec<VadEvent> {
        let mut events = Vec::new();
        if frame.data.is_empty() || frame.sample_rate == 0 {
            return events;
        }
        if frame.sample_rate != self.sample_rate || frame.num_channels != self.num_channels {
            self.reset();
            self.sample_rate = frame.sample_rate;
            self.num_channels = frame.num_channels.max(1);
        }

        let duration = frame_duration(frame);
        let is_speech = rms(&frame.data) >= self.options.activation_threshold;

        if !self.in_candidate {
            if is_speech {
                self.in_candidate = true;
                self.utterance = self.prefix.drain(..).collect();
                self.buffered = self.prefix_duration(self.utterance.len());
                self.utterance.extend_from_slice(&frame.data);
                self.buffered += duration;
                self.speech = duration;
                self.silence = Duration::ZERO;
                if self.speech >= self.options.min_speech_duration {
                    self.speaking = true;
                    events.push(VadEvent::StartOfSpeech);
                }
            } else {
                self.push_prefix(&frame.data);
            }
            return events;
        }

        self.utterance.extend_from_slice(&frame.data);
        self.buffered += duration;
        if is_speech {
            self.speech += duration;
            self.silence = Duration::ZERO;
        } else {
            self.silence += duration;
        }

        if !self.speaking {
            if !is_speech {
                // Too short to be speech: fall back to padding.
                let samples = std::mem::take(&mut self.utterance);
                self.in_candidate = false;
                self.push_prefix(&samples);
            } else if self.speech >= self.options.min_speech_duration {
                self.speaking = true;
                events.push(VadEvent::StartOfSpeech);
            }
            return events;
        }

        if self.silence >= self.options.min_silence_duration
            || self.buffered >= self.options.max_buffered_speech
        {
            events.push(VadEvent::EndOfSpeech(self.finish()));
        }
        events
    }

    /// End any utterance in progress (e.g. when the input closes).
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.speaking { Some(self.finish()) } else { None }
    }

    fn finish(&mut self) -> AudioFrame {
        let data = std::mem::take(&mut self.utterance);
        tracing::trace!(samples = data.len(), "utterance complete");
        self.in_candidate = false;
        self.speaking = false;
        self.speech = Duration::ZERO;
        self.silence = Duration::ZERO;
        self.buffered = Duration::ZERO;
        AudioFrame::new(data, self.sample_rate, self.num_channels)
    }

    fn reset(&mut self) {
        self.prefix.clear();
        self.utterance.clear();
        self.in_candidate = false;
        self.speaking = false;
        self.speech = Duration::ZERO;
        self.silence = Duration::ZERO;
        self.buffered = Duration::ZERO;
    }

    fn push_prefix(&mut self, samples: &[i16]) {
        self.prefix.extend(samples.iter().copied());
        let max = self.prefix_capacity();
        while self.prefix.len() > max {
            self.prefix.pop_front();
        }
    }

    fn prefix_capacity(&self) -> usize {
        let per_second = u128::from(self.sample_rate) * u128::from(self.num_channels);
        let samples = per_second * self.options.prefix_padding_duration.as_millis() / 1000;
        usize::try_from(samples).unwrap_or(usize::MAX)
    }

    fn prefix_duration(&self, samples: usize) -> Duration {
        let per_second = u64::from(self.sample_rate) * u64::from(self.num_channels);
        if per_second == 0 {
            return Duration::ZERO;
        }
        let samples = u64::try_from(samples).unwrap_or(u64::MAX);
        Duration::from_micros(samples.saturating_mul(1_000_000) / per_second)
    }
}

fn frame_duration(frame: &AudioFrame) -> Duration {
    let samples = u64::try_from(frame.samples_per_channel()).unwrap_or(u64::MAX);
    Duration::from_micros(samples.saturating_mul(1_000_000) / u64::from(frame.sample_rate))
}

/// Root-mean-square level of PCM16 samples, normalised to `0.0..=1.0`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples
        .iter()
        .map(|&sample| {
            let normalised = f64::from(sample) / f64::from(i16::MAX);
            normalised * normalised
        })
        .sum();
    #[allow(clippy::cast_possible_truncation)]
    let level = (energy / samples.len() as f64).sqrt() as f32;
    level
}
