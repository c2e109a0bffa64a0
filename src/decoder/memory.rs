//! Sources held entirely in memory.
//!
//! Used to drive the decode pipeline without media files: callers register a
//! [`MemorySource`] under a URL and open it like any other source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::blob::{AudioBlob, SubtitleBox, SubtitleList};
use crate::decoder::{Backend, Decoder, StreamInfo, units_to_us, us_to_units};
use crate::error::{MediaError, MediaResult};
use crate::video::VideoFrame;

pub const URL_SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
pub struct MemoryFrame {
    pub frame: VideoFrame,
    /// Whether seeking may land on this frame.
    pub keyframe: bool,
}

#[derive(Debug, Clone)]
pub enum MemoryStream {
    Video {
        template: VideoFrame,
        frame_rate: (i32, i32),
        frames: Vec<MemoryFrame>,
        /// Index of a frame whose decode fails.
        fail_at: Option<usize>,
    },
    Audio {
        template: AudioBlob,
        /// Interleaved samples starting at time zero.
        data: Vec<u8>,
    },
    Subtitles {
        template: SubtitleBox,
        cues: Vec<SubtitleBox>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub tags: Vec<(String, String)>,
    pub streams: Vec<MemoryStream>,
    /// Artificial per-unit decode latency.
    pub decode_delay: Option<Duration>,
}

impl MemorySource {
    fn stream_info(&self) -> Vec<StreamInfo> {
        self.streams
            .iter()
            .map(|stream| match stream {
                MemoryStream::Video {
                    template,
                    frame_rate,
                    frames,
                    ..
                } => {
                    let mut template = template.metadata_only();
                    template.set_view_dimensions();
                    StreamInfo::Video {
                        template,
                        frame_rate: *frame_rate,
                        duration: units_to_us(
                            frames.len() as u64,
                            frame_rate.0 as i64,
                            frame_rate.1 as i64,
                        ),
                    }
                }
                MemoryStream::Audio { template, data } => {
                    let duration = match template.frame_bytes() {
                        0 => 0,
                        bytes => units_to_us((data.len() / bytes) as u64, template.rate as i64, 1),
                    };
                    StreamInfo::Audio {
                        template: template.metadata_only(),
                        duration,
                    }
                }
                MemoryStream::Subtitles { template, .. } => StreamInfo::Subtitles {
                    template: template.clone(),
                },
            })
            .collect()
    }
}

/// Backend serving registered [`MemorySource`]s. Clones share one table.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    sources: Arc<Mutex<HashMap<String, Arc<MemorySource>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` under `memory://<name>` and returns that URL.
    pub fn insert(&self, name: &str, source: MemorySource) -> String {
        let url = format!("{URL_SCHEME}{name}");
        if let Ok(mut sources) = self.sources.lock() {
            sources.insert(url.clone(), Arc::new(source));
        }
        url
    }

    fn get(&self, url: &str) -> Option<Arc<MemorySource>> {
        self.sources
            .lock()
            .ok()
            .and_then(|sources| sources.get(url).cloned())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn probe(&self, url: &str, _header: &[u8]) -> bool {
        url.starts_with(URL_SCHEME) && self.get(url).is_some()
    }

    fn open(&self, url: &str) -> MediaResult<Box<dyn Decoder>> {
        let source = self
            .get(url)
            .ok_or_else(|| MediaError::format(url, "no such in-memory source"))?;
        let streams = source.stream_info();
        let positions = vec![0; streams.len()];
        Ok(Box::new(MemoryDecoder {
            url: url.to_string(),
            source,
            streams,
            positions,
        }))
    }
}

struct MemoryDecoder {
    url: String,
    source: Arc<MemorySource>,
    streams: Vec<StreamInfo>,
    /// Frame index, byte offset, or cue index, depending on the stream kind.
    positions: Vec<usize>,
}

impl MemoryDecoder {
    fn stream(&self, stream: usize) -> MediaResult<&MemoryStream> {
        self.source.streams.get(stream).ok_or_else(|| {
            MediaError::usage(format!("{}: no stream with index {stream}", self.url))
        })
    }

    fn simulate_work(&self) {
        if let Some(delay) = self.source.decode_delay {
            std::thread::sleep(delay);
        }
    }
}

impl Decoder for MemoryDecoder {
    fn url(&self) -> &str {
        &self.url
    }

    fn tags(&self) -> &[(String, String)] {
        &self.source.tags
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_video_frame(&mut self, stream: usize) -> MediaResult<Option<VideoFrame>> {
        let position = self.positions.get(stream).copied().unwrap_or(0);
        let MemoryStream::Video {
            frames, fail_at, ..
        } = self.stream(stream)?
        else {
            return Err(MediaError::usage(format!(
                "{}: stream {stream} is not a video stream",
                self.url
            )));
        };
        if *fail_at == Some(position) {
            return Err(MediaError::decode(
                &self.url,
                format!("corrupt frame {position}"),
            ));
        }
        let Some(entry) = frames.get(position) else {
            return Ok(None);
        };
        let mut frame = entry.frame.clone();
        frame.set_view_dimensions();
        self.simulate_work();
        self.positions[stream] = position + 1;
        Ok(Some(frame))
    }

    fn read_audio_blob(&mut self, stream: usize, size: usize) -> MediaResult<Option<AudioBlob>> {
        let position = self.positions.get(stream).copied().unwrap_or(0);
        let MemoryStream::Audio { template, data } = self.stream(stream)? else {
            return Err(MediaError::usage(format!(
                "{}: stream {stream} is not an audio stream",
                self.url
            )));
        };
        let frame_bytes = template.frame_bytes().max(1);
        if position >= data.len() {
            return Ok(None);
        }
        let wanted = (size / frame_bytes).max(1) * frame_bytes;
        let end = (position + wanted).min(data.len());
        let blob = AudioBlob {
            data: data[position..end].to_vec(),
            presentation_time: units_to_us(
                (position / frame_bytes) as u64,
                template.rate as i64,
                1,
            ),
            ..template.metadata_only()
        };
        self.simulate_work();
        self.positions[stream] = end;
        Ok(Some(blob))
    }

    fn read_subtitle_list(&mut self, stream: usize) -> MediaResult<Option<SubtitleList>> {
        let position = self.positions.get(stream).copied().unwrap_or(0);
        let MemoryStream::Subtitles { cues, .. } = self.stream(stream)? else {
            return Err(MediaError::usage(format!(
                "{}: stream {stream} is not a subtitles stream",
                self.url
            )));
        };
        let Some(cue) = cues.get(position) else {
            return Ok(None);
        };
        let list = SubtitleList {
            boxes: vec![cue.clone()],
        };
        self.simulate_work();
        self.positions[stream] = position + 1;
        Ok(Some(list))
    }

    fn seek(&mut self, pos: i64) -> MediaResult<()> {
        let source = self.source.clone();
        for (index, stream) in source.streams.iter().enumerate() {
            self.positions[index] = match stream {
                MemoryStream::Video { frames, .. } => frames
                    .iter()
                    .rposition(|f| f.keyframe && f.frame.presentation_time <= pos)
                    .unwrap_or(0),
                MemoryStream::Audio { template, data } => {
                    let frame_bytes = template.frame_bytes().max(1);
                    let frames = us_to_units(pos, template.rate as i64, 1) as usize;
                    (frames * frame_bytes).min(data.len())
                }
                MemoryStream::Subtitles { cues, .. } => cues
                    .iter()
                    .position(|cue| cue.presentation_stop_time > pos)
                    .unwrap_or(cues.len()),
            };
        }
        Ok(())
    }
}
