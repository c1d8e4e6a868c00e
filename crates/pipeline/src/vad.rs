//! Voice-activity detection
//!
//! Energy classifier over fixed 30 ms frames with debounced edge
//! detection and a pre-speech ring buffer. The gate is a pure
//! synchronous state machine; the controller drives it with whatever
//! PCM arrives and reacts to the emitted edges.

use std::collections::VecDeque;

use voiceline_config::VadSettings;
use voiceline_core::audio::{frame_energy, FRAME_MS, FRAME_SAMPLES};

/// Mean-absolute-amplitude thresholds indexed by aggressiveness 0..=3.
/// Higher aggressiveness demands more energy to classify a frame as
/// speech.
const ENERGY_THRESHOLDS: [f32; 4] = [120.0, 220.0, 350.0, 550.0];

/// Output of pushing audio through the gate, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum VadOutput {
    /// Speech onset confirmed. Followed immediately by the buffered
    /// pre-speech frames.
    SpeechStart,
    /// A frame to forward to the transcription stream.
    Frame(Vec<i16>),
    /// Utterance end confirmed after the debounce window.
    SpeechEnd,
}

/// Debounced energy gate with pre-speech capture.
pub struct VoiceGate {
    threshold: f32,
    start_frames: usize,
    end_frames: usize,
    pre_speech_frames: usize,
    /// Partial-frame assembly buffer.
    samples: Vec<i16>,
    /// Ring of recent non-speech frames, flushed on speech onset so word
    /// onsets are not cropped.
    ring: VecDeque<Vec<i16>>,
    speaking: bool,
    speech_run: usize,
    silence_run: usize,
}

impl VoiceGate {
    pub fn new(settings: &VadSettings) -> Self {
        let aggressiveness = settings.aggressiveness.min(3) as usize;
        Self {
            threshold: ENERGY_THRESHOLDS[aggressiveness],
            start_frames: settings.start_frames,
            end_frames: settings.end_frames,
            pre_speech_frames: (settings.pre_speech_ms / FRAME_MS).max(1) as usize,
            samples: Vec::with_capacity(FRAME_SAMPLES * 2),
            ring: VecDeque::new(),
            speaking: false,
            speech_run: 0,
            silence_run: 0,
        }
    }

    /// Whether the gate currently considers speech active.
    pub fn speaking(&self) -> bool {
        self.speaking
    }

    /// Feed PCM samples; returns the ordered outputs for every complete
    /// 30 ms frame they closed.
    pub fn push(&mut self, samples: &[i16]) -> Vec<VadOutput> {
        self.samples.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.samples.len() >= FRAME_SAMPLES {
            let frame: Vec<i16> = self.samples.drain(..FRAME_SAMPLES).collect();
            self.process_frame(frame, &mut out);
        }
        out
    }

    fn process_frame(&mut self, frame: Vec<i16>, out: &mut Vec<VadOutput>) {
        let is_speech = frame_energy(&frame) > self.threshold;
        if is_speech {
            self.speech_run += 1;
            self.silence_run = 0;
        } else {
            self.silence_run += 1;
            self.speech_run = 0;
        }

        if !self.speaking {
            self.ring.push_back(frame);
            while self.ring.len() > self.pre_speech_frames.max(self.start_frames) {
                self.ring.pop_front();
            }

            if self.speech_run >= self.start_frames {
                self.speaking = true;
                self.silence_run = 0;
                out.push(VadOutput::SpeechStart);
                // Flush the ring in arrival order; it already contains
                // the frames that confirmed the onset.
                for buffered in self.ring.drain(..) {
                    out.push(VadOutput::Frame(buffered));
                }
            }
        } else {
            out.push(VadOutput::Frame(frame));
            if self.silence_run >= self.end_frames {
                self.speaking = false;
                self.speech_run = 0;
                self.silence_run = 0;
                out.push(VadOutput::SpeechEnd);
            }
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.ring.clear();
        self.speaking = false;
        self.speech_run = 0;
        self.silence_run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> VadSettings {
        VadSettings {
            aggressiveness: 2,
            start_frames: 3,
            end_frames: 27,
            pre_speech_ms: 150,
        }
    }

    fn loud_frame() -> Vec<i16> {
        vec![5000i16; FRAME_SAMPLES]
    }

    fn quiet_frame() -> Vec<i16> {
        vec![0i16; FRAME_SAMPLES]
    }

    fn count_frames(out: &[VadOutput]) -> usize {
        out.iter()
            .filter(|o| matches!(o, VadOutput::Frame(_)))
            .count()
    }

    #[test]
    fn onset_requires_consecutive_speech_frames() {
        let mut gate = VoiceGate::new(&settings());

        // Two speech frames, then silence: debounced away.
        let mut out = gate.push(&loud_frame());
        out.extend(gate.push(&loud_frame()));
        out.extend(gate.push(&quiet_frame()));
        assert!(out.is_empty());
        assert!(!gate.speaking());

        // Three consecutive speech frames confirm the onset.
        let mut out = Vec::new();
        for _ in 0..3 {
            out.extend(gate.push(&loud_frame()));
        }
        assert_eq!(out[0], VadOutput::SpeechStart);
        assert!(gate.speaking());
    }

    #[test]
    fn onset_flushes_pre_speech_ring_in_order() {
        let mut gate = VoiceGate::new(&settings());

        // Fill the ring with distinguishable quiet frames.
        for tag in 0..5i16 {
            let mut frame = quiet_frame();
            frame[0] = tag;
            assert!(gate.push(&frame).is_empty());
        }

        let mut out = Vec::new();
        for _ in 0..3 {
            out.extend(gate.push(&loud_frame()));
        }

        assert_eq!(out[0], VadOutput::SpeechStart);
        // 150 ms of pre-roll (5 frames) minus room taken by the three
        // onset frames, then the onset frames themselves.
        let frames: Vec<&Vec<i16>> = out
            .iter()
            .filter_map(|o| match o {
                VadOutput::Frame(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 5);
        // Oldest surviving pre-roll frames come first.
        assert_eq!(frames[0][0], 3);
        assert_eq!(frames[1][0], 4);
        assert_eq!(frames[2][0], 5000);
    }

    #[test]
    fn end_fires_exactly_at_the_debounce_threshold() {
        let mut gate = VoiceGate::new(&settings());
        for _ in 0..3 {
            gate.push(&loud_frame());
        }
        assert!(gate.speaking());

        // One frame short of the threshold: still speaking.
        let mut out = Vec::new();
        for _ in 0..26 {
            out.extend(gate.push(&quiet_frame()));
        }
        assert!(gate.speaking());
        assert!(!out.contains(&VadOutput::SpeechEnd));

        // The 27th closes the utterance, exactly once.
        let out = gate.push(&quiet_frame());
        assert_eq!(out.last(), Some(&VadOutput::SpeechEnd));
        assert!(!gate.speaking());
        let ends = out.iter().filter(|o| **o == VadOutput::SpeechEnd).count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn speech_resuming_before_threshold_cancels_the_end() {
        let mut gate = VoiceGate::new(&settings());
        for _ in 0..3 {
            gate.push(&loud_frame());
        }

        for _ in 0..26 {
            gate.push(&quiet_frame());
        }
        let out = gate.push(&loud_frame());
        assert!(!out.contains(&VadOutput::SpeechEnd));
        assert!(gate.speaking());

        // The debounce window starts over.
        let mut out = Vec::new();
        for _ in 0..27 {
            out.extend(gate.push(&quiet_frame()));
        }
        assert_eq!(out.last(), Some(&VadOutput::SpeechEnd));
    }

    #[test]
    fn frames_keep_flowing_through_short_pauses() {
        let mut gate = VoiceGate::new(&settings());
        for _ in 0..3 {
            gate.push(&loud_frame());
        }

        // Silence inside the utterance is still forwarded to STT.
        let out = gate.push(&quiet_frame());
        assert_eq!(count_frames(&out), 1);
    }

    #[test]
    fn partial_buffers_assemble_into_frames() {
        let mut gate = VoiceGate::new(&settings());
        let loud = loud_frame();

        // Feed 1.5 frames; only one complete frame is classified.
        assert!(gate.push(&loud[..FRAME_SAMPLES / 2]).is_empty());
        assert!(gate.push(&loud).is_empty());
        // Remaining half frame completes two classified frames total; a
        // third completes the onset.
        let mut out = gate.push(&loud[..FRAME_SAMPLES / 2]);
        out.extend(gate.push(&loud));
        assert!(out.iter().any(|o| *o == VadOutput::SpeechStart));
    }

    #[test]
    fn aggressiveness_raises_the_bar() {
        let mut permissive = VoiceGate::new(&VadSettings {
            aggressiveness: 0,
            ..settings()
        });
        let mut strict = VoiceGate::new(&VadSettings {
            aggressiveness: 3,
            ..settings()
        });

        let moderate = vec![200i16; FRAME_SAMPLES];
        let mut permissive_out = Vec::new();
        let mut strict_out = Vec::new();
        for _ in 0..3 {
            permissive_out.extend(permissive.push(&moderate));
            strict_out.extend(strict.push(&moderate));
        }
        assert!(permissive_out.contains(&VadOutput::SpeechStart));
        assert!(strict_out.is_empty());
    }
}
