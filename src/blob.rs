//! Decoded audio chunks and subtitle cues.

use serde::Serialize;

use crate::video::{UNSET_TIME, format_significant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    U8,
    S16,
    F32,
    D64,
}

impl SampleFormat {
    pub fn sample_bits(self) -> i32 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::S16 => 16,
            SampleFormat::F32 => 32,
            SampleFormat::D64 => 64,
        }
    }

    pub fn sample_bytes(self) -> usize {
        self.sample_bits() as usize / 8
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::F32 => "f32",
            SampleFormat::D64 => "d64",
        }
    }
}

/// A chunk of interleaved audio samples.
#[derive(Debug, Clone, Serialize)]
pub struct AudioBlob {
    pub channels: i32,
    pub rate: i32,
    pub sample_format: SampleFormat,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Microseconds; [`UNSET_TIME`] when unknown.
    pub presentation_time: i64,
}

impl Default for AudioBlob {
    fn default() -> Self {
        Self {
            channels: -1,
            rate: -1,
            sample_format: SampleFormat::U8,
            data: Vec::new(),
            presentation_time: UNSET_TIME,
        }
    }
}

impl AudioBlob {
    pub fn is_valid(&self) -> bool {
        self.channels > 0 && self.rate > 0
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn sample_bits(&self) -> i32 {
        self.sample_format.sample_bits()
    }

    /// Bytes per interleaved sample frame (one sample for every channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels.max(0) as usize * self.sample_format.sample_bytes()
    }

    pub fn sample_frames(&self) -> usize {
        match self.frame_bytes() {
            0 => 0,
            bytes => self.data.len() / bytes,
        }
    }

    /// Playback duration of the blob's payload in microseconds.
    pub fn duration_us(&self) -> i64 {
        if self.rate <= 0 {
            return 0;
        }
        self.sample_frames() as i64 * 1_000_000 / self.rate as i64
    }

    pub fn metadata_only(&self) -> AudioBlob {
        AudioBlob {
            data: Vec::new(),
            ..self.clone()
        }
    }

    /// E.g. `2-48000-s16`.
    pub fn format_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.channels,
            self.rate,
            self.sample_format.name()
        )
    }

    /// E.g. `2 channels, 48 kHz, 16 bit`.
    pub fn format_info(&self) -> String {
        format!(
            "{} channels, {} kHz, {} bit",
            self.channels,
            format_significant(self.rate as f64 / 1e3, 6),
            self.sample_bits()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[default]
    Text,
}

/// One subtitle cue.
#[derive(Debug, Clone, Serialize)]
pub struct SubtitleBox {
    pub format: SubtitleFormat,
    /// ISO 639 code, empty when unknown.
    pub language: String,
    pub text: String,
    pub presentation_start_time: i64,
    pub presentation_stop_time: i64,
}

impl Default for SubtitleBox {
    fn default() -> Self {
        Self {
            format: SubtitleFormat::Text,
            language: String::new(),
            text: String::new(),
            presentation_start_time: UNSET_TIME,
            presentation_stop_time: UNSET_TIME,
        }
    }
}

impl SubtitleBox {
    /// E.g. `en-text`, or `unknown-text` without a language.
    pub fn format_name(&self) -> String {
        let language = if self.language.is_empty() {
            "unknown"
        } else {
            self.language.as_str()
        };
        match self.format {
            SubtitleFormat::Text => format!("{language}-text"),
        }
    }

    /// E.g. `en (text format)`, or `Unknown (text format)`.
    pub fn format_info(&self) -> String {
        let language = if self.language.is_empty() {
            "Unknown"
        } else {
            self.language.as_str()
        };
        match self.format {
            SubtitleFormat::Text => format!("{language} (text format)"),
        }
    }

    pub fn is_visible_at(&self, time: i64) -> bool {
        time >= self.presentation_start_time && time < self.presentation_stop_time
    }
}

/// The cues shown together over one time span. An empty list clears the
/// screen for its span.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubtitleList {
    pub boxes: Vec<SubtitleBox>,
}

impl SubtitleList {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn presentation_start_time(&self) -> i64 {
        self.boxes
            .iter()
            .map(|b| b.presentation_start_time)
            .min()
            .unwrap_or(UNSET_TIME)
    }

    pub fn presentation_stop_time(&self) -> i64 {
        self.boxes
            .iter()
            .map(|b| b.presentation_stop_time)
            .max()
            .unwrap_or(UNSET_TIME)
    }
}
