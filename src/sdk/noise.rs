//! Per-participant input noise cancellation.

use super::room::{AudioFrame, Participant, ParticipantKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseCancellation {
    /// Background voice cancellation for wideband microphone audio.
    Bvc,
    /// Variant tuned for narrowband telephony audio.
    BvcTelephony,
}

impl NoiseCancellation {
    /// Telephony callers get [`Self::BvcTelephony`]; everyone else [`Self::Bvc`].
    #[must_use]
    pub const fn for_participant(participant: &Participant) -> Self {
        match participant.kind {
            ParticipantKind::Sip => Self::BvcTelephony,
            _ => Self::Bvc,
        }
    }

    const fn gate(self) -> i32 {
        match self {
            Self::Bvc => 300,
            Self::BvcTelephony => 600,
        }
    }

    /// Remove DC offset, then zero samples below the gate level.
    pub fn apply(self, frame: &mut AudioFrame) {
        if frame.data.is_empty() {
            return;
        }
        let sum: i64 = frame.data.iter().map(|&s| i64::from(s)).sum();
        let len = i64::try_from(frame.data.len()).unwrap_or(i64::MAX);
        let mean = sum / len;
        let gate = self.gate();
        for sample in &mut frame.data {
            let centred = (i64::from(*sample) - mean)
                .clamp(i64::from(i16::MIN), i64::from(i16::MAX));
            let centred = i32::try_from(centred).unwrap_or_default();
            *sample = if centred.abs() < gate {
                0
            } else {
                i16::try_from(centred).unwrap_or(if centred < 0 { i16::MIN } else { i16::MAX })
            };
        }
    }
}

/// Picks the cancellation profile for a participant.
pub type NoiseSelector = std::sync::Arc<dyn Fn(&Participant) -> NoiseCancellation + Send + Sync>;
