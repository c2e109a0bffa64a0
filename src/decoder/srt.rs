//! SubRip (`.srt`) text subtitles.

use std::path::Path;

use tracing::{debug, warn};

use crate::blob::{SubtitleBox, SubtitleFormat, SubtitleList};
use crate::decoder::{Backend, Decoder, StreamInfo};
use crate::error::{MediaError, MediaResult};

pub struct SrtBackend;

impl Backend for SrtBackend {
    fn name(&self) -> &'static str {
        "srt"
    }

    fn probe(&self, url: &str, header: &[u8]) -> bool {
        let by_extension = Path::new(url)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("srt"));
        let text = String::from_utf8_lossy(header);
        let text = text.trim_start_matches('\u{feff}').trim_start();
        let by_content =
            text.starts_with(|c: char| c.is_ascii_digit()) && text.contains("-->");
        by_extension || by_content
    }

    fn open(&self, url: &str) -> MediaResult<Box<dyn Decoder>> {
        let bytes = std::fs::read(url).map_err(|err| MediaError::io(url, err))?;
        let text = String::from_utf8_lossy(&bytes);
        let language = language_from_path(url);
        let cues = parse_cues(&text, &language);
        if cues.is_empty() {
            return Err(MediaError::format(url, "no subtitle cues found"));
        }
        debug!(url, cues = cues.len(), language = language.as_str(), "Parsed subtitles");
        let template = SubtitleBox {
            format: SubtitleFormat::Text,
            language,
            ..SubtitleBox::default()
        };
        Ok(Box::new(SrtDecoder {
            url: url.to_string(),
            streams: vec![StreamInfo::Subtitles { template }],
            cues,
            next: 0,
        }))
    }
}

/// `movie.en.srt` carries language `en`.
fn language_from_path(url: &str) -> String {
    Path::new(url)
        .file_stem()
        .and_then(|stem| Path::new(stem).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| (2..=3).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// `HH:MM:SS,mmm` (a `.` separator is accepted too) to microseconds.
fn parse_timestamp(s: &str) -> Option<i64> {
    let (hms, millis) = s.trim().split_once([',', '.'])?;
    let mut parts = hms.split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let millis: i64 = millis.trim().parse().ok()?;
    // Malformed hour fields can be arbitrarily large.
    hours
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(seconds)?
        .checked_mul(1000)?
        .checked_add(millis)?
        .checked_mul(1000)
}

fn parse_cues(text: &str, language: &str) -> Vec<SubtitleBox> {
    let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();
    for block in text.split("\n\n") {
        let mut lines = block.lines().filter(|line| !line.trim().is_empty()).peekable();
        // The numeric counter is optional in practice.
        if lines.peek().is_some_and(|line| !line.contains("-->")) {
            lines.next();
        }
        let Some(timing) = lines.next() else {
            continue;
        };
        let Some((start, stop)) = timing.split_once("-->") else {
            warn!(line = timing, "Skipping subtitle block without timing");
            continue;
        };
        // Positioning hints may follow the stop time.
        let stop = stop.split_whitespace().next().unwrap_or_default();
        let (Some(start), Some(stop)) = (parse_timestamp(start), parse_timestamp(stop)) else {
            warn!(line = timing, "Skipping subtitle block with malformed timing");
            continue;
        };
        cues.push(SubtitleBox {
            format: SubtitleFormat::Text,
            language: language.to_string(),
            text: lines.collect::<Vec<_>>().join("\n"),
            presentation_start_time: start,
            presentation_stop_time: stop,
        });
    }
    cues.sort_by_key(|cue| cue.presentation_start_time);
    cues
}

struct SrtDecoder {
    url: String,
    streams: Vec<StreamInfo>,
    cues: Vec<SubtitleBox>,
    next: usize,
}

impl Decoder for SrtDecoder {
    fn url(&self) -> &str {
        &self.url
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_subtitle_list(&mut self, stream: usize) -> MediaResult<Option<SubtitleList>> {
        if stream != 0 {
            return Err(MediaError::usage(format!(
                "{}: no subtitles stream with index {stream}",
                self.url
            )));
        }
        let Some(cue) = self.cues.get(self.next) else {
            return Ok(None);
        };
        let list = SubtitleList {
            boxes: vec![cue.clone()],
        };
        self.next += 1;
        Ok(Some(list))
    }

    fn seek(&mut self, pos: i64) -> MediaResult<()> {
        self.next = self
            .cues
            .iter()
            .position(|cue| cue.presentation_stop_time > pos)
            .unwrap_or(self.cues.len());
        Ok(())
    }
}
