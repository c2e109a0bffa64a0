//! YUV4MPEG2 (`.y4m`) raw video.
//!
//! The stream header is a single text line of space separated tags, followed
//! by frames that each start with a `FRAME` line. Every frame is
//! independently decodable, so seeking is frame accurate.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

use tracing::{debug, warn};

use crate::decoder::{Backend, Decoder, StreamInfo, units_to_us, us_to_units};
use crate::error::{MediaError, MediaResult};
use crate::video::{
    ChromaLocation, ColorSpace, PixelLayout, StereoLayout, ValueRange, VideoFrame,
    parse_stereo_layout,
};

const MAGIC: &[u8] = b"YUV4MPEG2 ";
const FRAME_MAGIC: &[u8] = b"FRAME";
/// Upper bound for header and frame lines; real files stay far below.
const MAX_LINE: usize = 4096;

pub struct Y4mBackend;

impl Backend for Y4mBackend {
    fn name(&self) -> &'static str {
        "y4m"
    }

    fn probe(&self, _url: &str, header: &[u8]) -> bool {
        header.starts_with(MAGIC)
    }

    fn open(&self, url: &str) -> MediaResult<Box<dyn Decoder>> {
        Ok(Box::new(Y4mDecoder::open(url)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct StreamHeader {
    width: i32,
    height: i32,
    frame_rate: (i32, i32),
    pixel_aspect: (i32, i32),
    layout: PixelLayout,
    chroma_location: ChromaLocation,
    value_range: ValueRange,
    extensions: Vec<(String, String)>,
}

impl StreamHeader {
    fn parse(url: &str, line: &str) -> MediaResult<Self> {
        let mut header = StreamHeader {
            width: 0,
            height: 0,
            frame_rate: (25, 1),
            pixel_aspect: (1, 1),
            layout: PixelLayout::Yuv420p,
            chroma_location: ChromaLocation::Center,
            value_range: ValueRange::Mpeg,
            extensions: Vec::new(),
        };
        for token in line.split_ascii_whitespace().skip(1) {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => header.width = parse_int(url, "width", value)?,
                Some('H') => header.height = parse_int(url, "height", value)?,
                Some('F') => header.frame_rate = parse_ratio(url, "frame rate", value)?,
                Some('A') => {
                    let (num, den) = parse_ratio(url, "pixel aspect", value)?;
                    header.pixel_aspect = if num > 0 && den > 0 { (num, den) } else { (1, 1) };
                }
                Some('C') => {
                    let (layout, location) = match value {
                        "420jpeg" | "420" => (PixelLayout::Yuv420p, ChromaLocation::Center),
                        "420mpeg2" => (PixelLayout::Yuv420p, ChromaLocation::Left),
                        "420paldv" => (PixelLayout::Yuv420p, ChromaLocation::TopLeft),
                        "422" => (PixelLayout::Yuv422p, ChromaLocation::Left),
                        "444" => (PixelLayout::Yuv444p, ChromaLocation::Center),
                        other => {
                            return Err(MediaError::format(
                                url,
                                format!("unsupported y4m colour space '{other}'"),
                            ));
                        }
                    };
                    header.layout = layout;
                    header.chroma_location = location;
                }
                Some('X') => {
                    let (key, val) = value.split_once('=').unwrap_or((value, ""));
                    if key == "COLORRANGE" {
                        header.value_range = if val.eq_ignore_ascii_case("FULL") {
                            ValueRange::Full
                        } else {
                            ValueRange::Mpeg
                        };
                    }
                    header.extensions.push((key.to_string(), val.to_string()));
                }
                // Interlacing and unknown tags do not affect decoding.
                _ => {}
            }
        }
        if header.width <= 0 || header.height <= 0 {
            return Err(MediaError::format(url, "y4m header lacks frame dimensions"));
        }
        if header.frame_rate.0 <= 0 || header.frame_rate.1 <= 0 {
            return Err(MediaError::format(url, "y4m header has an invalid frame rate"));
        }
        Ok(header)
    }

    fn chroma_dimensions(&self) -> (usize, usize) {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            PixelLayout::Yuv420p => (w.div_ceil(2), h.div_ceil(2)),
            PixelLayout::Yuv422p => (w.div_ceil(2), h),
            PixelLayout::Yuv444p | PixelLayout::Bgra32 => (w, h),
        }
    }

    fn frame_size(&self) -> usize {
        let (cw, ch) = self.chroma_dimensions();
        self.width as usize * self.height as usize + 2 * cw * ch
    }

    fn template(&self) -> VideoFrame {
        let mut frame = VideoFrame {
            raw_width: self.width,
            raw_height: self.height,
            raw_aspect_ratio: (self.width as f32 * self.pixel_aspect.0 as f32)
                / (self.height as f32 * self.pixel_aspect.1 as f32),
            layout: self.layout,
            color_space: ColorSpace::Yuv601,
            value_range: self.value_range,
            chroma_location: self.chroma_location,
            ..VideoFrame::default()
        };
        if let Some((_, token)) = self.extensions.iter().find(|(key, _)| key == "STEREO") {
            match parse_stereo_layout(token) {
                // One y4m stream cannot carry a separate pair.
                Some((StereoLayout::Separate, _)) => {
                    warn!(token = token.as_str(), "Ignoring separate layout in a single stream");
                }
                Some((layout, swap)) => {
                    frame.stereo_layout = layout;
                    frame.stereo_layout_swap = swap;
                }
                None => warn!(token = token.as_str(), "Ignoring unknown stereo layout"),
            }
        }
        frame.set_view_dimensions();
        frame
    }
}

fn parse_int(url: &str, what: &str, value: &str) -> MediaResult<i32> {
    value
        .parse()
        .map_err(|_| MediaError::format(url, format!("invalid y4m {what} '{value}'")))
}

fn parse_ratio(url: &str, what: &str, value: &str) -> MediaResult<(i32, i32)> {
    let (num, den) = value
        .split_once(':')
        .ok_or_else(|| MediaError::format(url, format!("invalid y4m {what} '{value}'")))?;
    Ok((parse_int(url, what, num)?, parse_int(url, what, den)?))
}

/// Reads one `\n` terminated line without the terminator.
fn read_line(reader: &mut impl BufRead, url: &str) -> MediaResult<Option<String>> {
    let mut line = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE as u64)
        .read_until(b'\n', &mut line)
        .map_err(|err| MediaError::io(url, err))?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(MediaError::format(url, "unterminated y4m header line"));
    }
    line.pop();
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| MediaError::format(url, "y4m header line is not ASCII"))
}

struct Y4mDecoder {
    url: String,
    reader: BufReader<File>,
    header: StreamHeader,
    template: VideoFrame,
    streams: Vec<StreamInfo>,
    tags: Vec<(String, String)>,
    /// Byte offset of each frame's payload.
    frame_offsets: Vec<u64>,
    next_frame: usize,
}

impl Y4mDecoder {
    fn open(url: &str) -> MediaResult<Self> {
        let file = File::open(url).map_err(|err| MediaError::io(url, err))?;
        let mut reader = BufReader::new(file);
        let line = read_line(&mut reader, url)?
            .ok_or_else(|| MediaError::format(url, "empty file"))?;
        if !line.as_bytes().starts_with(&MAGIC[..MAGIC.len() - 1]) {
            return Err(MediaError::format(url, "missing YUV4MPEG2 signature"));
        }
        let header = StreamHeader::parse(url, &line)?;
        let frame_offsets = index_frames(&mut reader, url, header.frame_size())?;
        if frame_offsets.is_empty() {
            return Err(MediaError::format(url, "y4m file contains no frames"));
        }
        debug!(
            url,
            width = header.width,
            height = header.height,
            frames = frame_offsets.len(),
            "Indexed y4m stream"
        );

        let (num, den) = header.frame_rate;
        let template = header.template();
        let streams = vec![StreamInfo::Video {
            template: template.clone(),
            frame_rate: header.frame_rate,
            duration: units_to_us(frame_offsets.len() as u64, num as i64, den as i64),
        }];
        let tags = header
            .extensions
            .iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value.clone()))
            .collect();
        Ok(Self {
            url: url.to_string(),
            reader,
            header,
            template,
            streams,
            tags,
            frame_offsets,
            next_frame: 0,
        })
    }
}

/// Walks all `FRAME` lines and records where each payload starts.
fn index_frames(
    reader: &mut BufReader<File>,
    url: &str,
    frame_size: usize,
) -> MediaResult<Vec<u64>> {
    let total = reader
        .get_ref()
        .metadata()
        .map_err(|err| MediaError::io(url, err))?
        .len();
    let mut offsets = Vec::new();
    loop {
        let Some(line) = read_line(reader, url)? else {
            break;
        };
        if !line.as_bytes().starts_with(FRAME_MAGIC) {
            return Err(MediaError::format(
                url,
                format!("expected FRAME marker for frame {}", offsets.len()),
            ));
        }
        let payload = reader
            .stream_position()
            .map_err(|err| MediaError::io(url, err))?;
        if payload + frame_size as u64 > total {
            warn!(url, frame = offsets.len(), "Dropping truncated y4m frame");
            break;
        }
        offsets.push(payload);
        reader
            .seek_relative(frame_size as i64)
            .map_err(|err| MediaError::io(url, err))?;
    }
    Ok(offsets)
}

impl Decoder for Y4mDecoder {
    fn url(&self) -> &str {
        &self.url
    }

    fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_video_frame(&mut self, stream: usize) -> MediaResult<Option<VideoFrame>> {
        if stream != 0 {
            return Err(MediaError::usage(format!(
                "{}: no video stream with index {stream}",
                self.url
            )));
        }
        let Some(&offset) = self.frame_offsets.get(self.next_frame) else {
            return Ok(None);
        };
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|err| MediaError::io(&self.url, err))?;

        let mut frame = self.template.clone();
        let (cw, ch) = self.header.chroma_dimensions();
        let luma = (self.header.width as usize, self.header.height as usize);
        for (plane, (w, h)) in [luma, (cw, ch), (cw, ch)].into_iter().enumerate() {
            let mut data = vec![0u8; w * h];
            self.reader.read_exact(&mut data).map_err(|err| {
                MediaError::decode(&self.url, format!("frame {}: {err}", self.next_frame))
            })?;
            frame.data[0][plane] = data;
            frame.line_size[0][plane] = w;
        }
        let (num, den) = self.header.frame_rate;
        frame.presentation_time = units_to_us(self.next_frame as u64, num as i64, den as i64);
        self.next_frame += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, pos: i64) -> MediaResult<()> {
        let (num, den) = self.header.frame_rate;
        let target = us_to_units(pos, num as i64, den as i64) as usize;
        self.next_frame = target.min(self.frame_offsets.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_tags() {
        let header = StreamHeader::parse(
            "test.y4m",
            "YUV4MPEG2 W64 H32 F30000:1001 Ip A1:1 C420mpeg2 XSTEREO=left-right XCOLORRANGE=FULL",
        )
        .unwrap();
        assert_eq!((header.width, header.height), (64, 32));
        assert_eq!(header.frame_rate, (30_000, 1_001));
        assert_eq!(header.chroma_location, ChromaLocation::Left);
        assert_eq!(header.value_range, ValueRange::Full);
        assert_eq!(header.frame_size(), 64 * 32 + 2 * 32 * 16);

        let template = header.template();
        assert_eq!(template.stereo_layout, StereoLayout::LeftRight);
        assert_eq!((template.width, template.height), (32, 32));
        assert!((template.raw_aspect_ratio - 2.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_incomplete_headers() {
        assert!(StreamHeader::parse("t.y4m", "YUV4MPEG2 W64").is_err());
        assert!(StreamHeader::parse("t.y4m", "YUV4MPEG2 W64 H32 Cmono").is_err());
        assert!(StreamHeader::parse("t.y4m", "YUV4MPEG2 W64 H32 F0:1").is_err());
    }

    #[test]
    fn separate_marker_leaves_template_mono() {
        let header =
            StreamHeader::parse("t.y4m", "YUV4MPEG2 W8 H4 C444 XSTEREO=separate-left-right")
                .unwrap();
        let template = header.template();
        assert_eq!(template.stereo_layout, StereoLayout::Mono);
        assert!(!template.stereo_layout_swap);
        assert_eq!((template.width, template.height), (8, 4));
    }
}
