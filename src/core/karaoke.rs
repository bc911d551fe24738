//! Karaoke type tagging from OCR text detections and motion.
//!
//! This is a decision rule, not a similarity function: it assigns a type
//! label to items whose declared type could not be normalised.

use crate::config::KaraokeSettings;
use serde::{Deserialize, Serialize};

/// Axis-aligned text box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl TextBox {
    pub fn center_y(&self) -> f64 {
        (self.y1 + self.y2) / 2.0
    }
}

/// OCR output for one sampled frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameText {
    /// Per-detection OCR confidences.
    #[serde(default)]
    pub confidences: Vec<f64>,
    #[serde(default)]
    pub boxes: Vec<TextBox>,
}

impl FrameText {
    pub fn mean_confidence(&self) -> f64 {
        if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f64>() / self.confidences.len() as f64
        }
    }
}

/// Text detections sampled from one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaraokeEvidence {
    pub frame_height: u32,
    pub frames: Vec<FrameText>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KaraokeKind {
    MvKaraoke,
    MidiKaraoke,
    Video,
    Audio,
}

impl KaraokeKind {
    pub fn label(self) -> &'static str {
        match self {
            KaraokeKind::MvKaraoke => "MV Karaoke",
            KaraokeKind::MidiKaraoke => "Midi Karaoke",
            KaraokeKind::Video => "Video",
            KaraokeKind::Audio => "Audio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KaraokeVerdict {
    pub has_text: bool,
    pub text_confidence: f64,
    pub is_bottom_region: bool,
    pub optical_flow: f64,
    pub kind: KaraokeKind,
}

pub struct KaraokeClassifier {
    settings: KaraokeSettings,
    flow_threshold: f64,
}

impl KaraokeClassifier {
    pub fn new(settings: KaraokeSettings, flow_threshold: f64) -> Self {
        Self {
            settings,
            flow_threshold,
        }
    }

    pub fn classify(&self, evidence: &KaraokeEvidence, optical_flow: f64) -> KaraokeVerdict {
        let frames = &evidence.frames;
        let with_text = frames
            .iter()
            .filter(|f| f.mean_confidence() > self.settings.text_confidence)
            .count();
        let text_confidence = if frames.is_empty() {
            0.0
        } else {
            frames.iter().map(FrameText::mean_confidence).sum::<f64>() / frames.len() as f64
        };

        let has_text = !frames.is_empty()
            && with_text as f64 >= frames.len() as f64 * self.settings.min_text_frame_ratio;
        let is_bottom_region = self.is_text_in_bottom_region(evidence);
        let kind = self.kind(has_text, is_bottom_region, optical_flow);

        log::info!(
            "Karaoke detection: type={}, text={}, bottom={}, flow={:.2}",
            kind.label(),
            has_text,
            is_bottom_region,
            optical_flow
        );

        KaraokeVerdict {
            has_text,
            text_confidence,
            is_bottom_region,
            optical_flow,
            kind,
        }
    }

    /// More than half of all text boxes are centred in the lyric region.
    pub fn is_text_in_bottom_region(&self, evidence: &KaraokeEvidence) -> bool {
        let boxes: Vec<&TextBox> = evidence.frames.iter().flat_map(|f| &f.boxes).collect();
        if boxes.is_empty() {
            return false;
        }
        let cutoff = evidence.frame_height as f64 * self.settings.text_region_start;
        let bottom = boxes.iter().filter(|b| b.center_y() >= cutoff).count();
        bottom as f64 / boxes.len() as f64 > 0.5
    }

    fn kind(&self, has_text: bool, is_bottom: bool, optical_flow: f64) -> KaraokeKind {
        if has_text && is_bottom {
            if optical_flow > self.flow_threshold {
                KaraokeKind::MvKaraoke
            } else {
                KaraokeKind::MidiKaraoke
            }
        } else if optical_flow > self.flow_threshold / 2.0 {
            KaraokeKind::Video
        } else {
            KaraokeKind::Audio
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lyric_frame(y: f64) -> FrameText {
        FrameText {
            confidences: vec![0.9, 0.8],
            boxes: vec![TextBox {
                x1: 100.0,
                y1: y,
                x2: 600.0,
                y2: y + 40.0,
            }],
        }
    }

    fn evidence(frames: Vec<FrameText>) -> KaraokeEvidence {
        KaraokeEvidence {
            frame_height: 720,
            frames,
        }
    }

    fn classifier() -> KaraokeClassifier {
        KaraokeClassifier::new(KaraokeSettings::default(), 5.0)
    }

    #[test]
    fn test_mv_and_midi_karaoke() {
        let mut frames = vec![lyric_frame(600.0); 4];
        frames.extend(vec![FrameText::default(); 6]);
        let evidence = evidence(frames);

        assert_eq!(classifier().classify(&evidence, 12.0).kind, KaraokeKind::MvKaraoke);
        assert_eq!(classifier().classify(&evidence, 1.0).kind, KaraokeKind::MidiKaraoke);
    }

    #[test]
    fn test_text_frame_ratio() {
        // 2 of 10 frames carry text: below the 30% requirement
        let mut frames = vec![lyric_frame(600.0); 2];
        frames.extend(vec![FrameText::default(); 8]);
        let verdict = classifier().classify(&evidence(frames), 12.0);
        assert!(!verdict.has_text);
        assert_eq!(verdict.kind, KaraokeKind::Video);
    }

    #[test]
    fn test_top_text_is_not_karaoke() {
        let frames = vec![lyric_frame(50.0); 10];
        let verdict = classifier().classify(&evidence(frames), 3.0);
        assert!(verdict.has_text);
        assert!(!verdict.is_bottom_region);
        // flow 3.0 > 5.0 / 2
        assert_eq!(verdict.kind, KaraokeKind::Video);
    }

    #[test]
    fn test_static_without_text_is_audio() {
        let verdict = classifier().classify(&evidence(vec![FrameText::default(); 5]), 1.0);
        assert_eq!(verdict.kind, KaraokeKind::Audio);
        assert_eq!(verdict.text_confidence, 0.0);
    }

    #[test]
    fn test_low_confidence_frames_do_not_count() {
        let frame = FrameText {
            confidences: vec![0.3, 0.4],
            ..lyric_frame(600.0)
        };
        let verdict = classifier().classify(&evidence(vec![frame; 10]), 12.0);
        assert!(!verdict.has_text);
    }

    #[test]
    fn test_labels() {
        assert_eq!(KaraokeKind::MvKaraoke.label(), "MV Karaoke");
        assert_eq!(KaraokeKind::MidiKaraoke.label(), "Midi Karaoke");
    }
}
