//! Decoder backends.
//!
//! A [`Backend`] recognizes and opens one kind of source; each opened source
//! is a [`Decoder`] that enumerates its streams and yields decoded units one
//! at a time. The rest of the crate only talks to these traits, so the
//! in-memory backend can stand in for real media in tests.

pub mod memory;
pub mod srt;
pub mod wav;
pub mod y4m;

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::blob::{AudioBlob, SubtitleBox, SubtitleList};
use crate::error::{MediaError, MediaResult};
use crate::video::VideoFrame;

/// Number of leading bytes handed to [`Backend::probe`].
pub const PROBE_SIZE: usize = 64;

/// Static description of one stream inside a source.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamInfo {
    Video {
        /// Metadata-only frame describing what reads will produce.
        template: VideoFrame,
        frame_rate: (i32, i32),
        /// Microseconds.
        duration: i64,
    },
    Audio {
        template: AudioBlob,
        duration: i64,
    },
    Subtitles {
        template: SubtitleBox,
    },
}

impl StreamInfo {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamInfo::Video { .. } => StreamKind::Video,
            StreamInfo::Audio { .. } => StreamKind::Audio,
            StreamInfo::Subtitles { .. } => StreamKind::Subtitles,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitles,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitles => "subtitles",
        }
    }
}

/// An opened source.
///
/// Stream indices are positions in [`Decoder::streams`]. Reads return
/// `Ok(None)` at end of stream.
pub trait Decoder: Send {
    fn url(&self) -> &str;

    /// Container metadata as (name, value) pairs.
    fn tags(&self) -> &[(String, String)] {
        &[]
    }

    fn streams(&self) -> &[StreamInfo];

    /// Decodes the next frame. The returned frame already has its view
    /// dimensions set.
    fn read_video_frame(&mut self, stream: usize) -> MediaResult<Option<VideoFrame>> {
        Err(not_a(self.url(), stream, StreamKind::Video))
    }

    /// Decodes roughly `size` bytes of audio, rounded down to whole sample
    /// frames. The final blob of a stream may be shorter.
    fn read_audio_blob(&mut self, stream: usize, size: usize) -> MediaResult<Option<AudioBlob>> {
        let _ = size;
        Err(not_a(self.url(), stream, StreamKind::Audio))
    }

    fn read_subtitle_list(&mut self, stream: usize) -> MediaResult<Option<SubtitleList>> {
        Err(not_a(self.url(), stream, StreamKind::Subtitles))
    }

    /// Repositions all streams to the closest random access point at or
    /// before `pos` microseconds.
    fn seek(&mut self, pos: i64) -> MediaResult<()>;

    fn close(&mut self) {}
}

fn not_a(url: &str, stream: usize, kind: StreamKind) -> MediaError {
    MediaError::usage(format!("{url}: stream {stream} is not a {} stream", kind.name()))
}

/// Factory for decoders of one source kind.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend can open `url`, given its first bytes (empty if
    /// `url` is not a readable file).
    fn probe(&self, url: &str, header: &[u8]) -> bool;

    fn open(&self, url: &str) -> MediaResult<Box<dyn Decoder>>;
}

/// Ordered set of backends; the first one whose probe succeeds wins.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every file-based backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(y4m::Y4mBackend);
        registry.register(wav::WavBackend);
        registry.register(srt::SrtBackend);
        registry
    }

    pub fn register<B>(&mut self, backend: B)
    where
        B: Backend + 'static,
    {
        self.backends.push(Arc::new(backend));
    }

    pub fn known_backends(&self) -> Vec<&'static str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    /// Picks the backend responsible for `url`.
    pub fn select(&self, url: &str) -> MediaResult<Arc<dyn Backend>> {
        let (header, read_error) = match read_header(url) {
            Ok(header) => (header, None),
            Err(err) => (Vec::new(), Some(err)),
        };
        if let Some(backend) = self
            .backends
            .iter()
            .find(|backend| backend.probe(url, &header))
        {
            debug!(url, backend = backend.name(), "Selected decoder backend");
            return Ok(backend.clone());
        }
        match read_error {
            Some(err) => Err(MediaError::io(url, err)),
            None => Err(MediaError::format(
                url,
                format!(
                    "unrecognized media format. Known backends: {}",
                    self.known_backends().join(", ")
                ),
            )),
        }
    }

    pub fn open(&self, url: &str) -> MediaResult<Box<dyn Decoder>> {
        self.select(url)?.open(url)
    }
}

fn read_header(url: &str) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(url)?;
    let mut header = Vec::with_capacity(PROBE_SIZE);
    file.by_ref()
        .take(PROBE_SIZE as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Converts a time in microseconds into a count of `rate` units per second,
/// rounding down and clamping negatives to zero.
pub(crate) fn us_to_units(pos: i64, num: i64, den: i64) -> u64 {
    if pos <= 0 || num <= 0 || den <= 0 {
        return 0;
    }
    (pos as i128 * num as i128 / (den as i128 * 1_000_000)) as u64
}

/// Inverse of [`us_to_units`].
pub(crate) fn units_to_us(units: u64, num: i64, den: i64) -> i64 {
    if num <= 0 {
        return 0;
    }
    (units as i128 * den as i128 * 1_000_000 / num as i128) as i64
}
