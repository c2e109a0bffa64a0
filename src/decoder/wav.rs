//! RIFF/WAVE PCM audio.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::blob::{AudioBlob, SampleFormat};
use crate::decoder::{Backend, Decoder, StreamInfo, units_to_us, us_to_units};
use crate::error::{MediaError, MediaResult};

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// Extensible headers are 40 bytes; anything far beyond that is corrupt.
const MAX_FMT_CHUNK: u64 = 64;

pub struct WavBackend;

impl Backend for WavBackend {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn probe(&self, _url: &str, header: &[u8]) -> bool {
        header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE"
    }

    fn open(&self, url: &str) -> MediaResult<Box<dyn Decoder>> {
        Ok(Box::new(WavDecoder::open(url)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WaveFormat {
    channels: u16,
    rate: u32,
    block_align: u16,
    sample_format: SampleFormat,
}

impl WaveFormat {
    fn parse(url: &str, data: &[u8]) -> MediaResult<Self> {
        if data.len() < 16 {
            return Err(MediaError::format(url, "fmt chunk too short"));
        }
        let mut code = read_u16(&data[0..2]);
        let channels = read_u16(&data[2..4]);
        let rate = read_u32(&data[4..8]);
        let block_align = read_u16(&data[12..14]);
        let bits = read_u16(&data[14..16]);
        if code == FORMAT_EXTENSIBLE {
            // cbSize, valid bits, channel mask, then the sub-format GUID whose
            // first two bytes are the actual format code.
            if data.len() < 26 {
                return Err(MediaError::format(url, "extensible fmt chunk too short"));
            }
            code = read_u16(&data[24..26]);
        }
        let sample_format = match (code, bits) {
            (FORMAT_PCM, 8) => SampleFormat::U8,
            (FORMAT_PCM, 16) => SampleFormat::S16,
            (FORMAT_IEEE_FLOAT, 32) => SampleFormat::F32,
            (FORMAT_IEEE_FLOAT, 64) => SampleFormat::D64,
            _ => {
                return Err(MediaError::format(
                    url,
                    format!("unsupported wave format {code} with {bits} bit samples"),
                ));
            }
        };
        if channels == 0 || rate == 0 {
            return Err(MediaError::format(url, "wave format without channels or rate"));
        }
        let expected_align = channels as usize * sample_format.sample_bytes();
        if block_align as usize != expected_align {
            return Err(MediaError::format(
                url,
                format!("block align {block_align} does not match {expected_align}"),
            ));
        }
        Ok(Self {
            channels,
            rate,
            block_align,
            sample_format,
        })
    }

    fn template(&self) -> AudioBlob {
        AudioBlob {
            channels: self.channels as i32,
            rate: self.rate as i32,
            sample_format: self.sample_format,
            ..AudioBlob::default()
        }
    }
}

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes(buf[..2].try_into().unwrap_or([0; 2]))
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[..4].try_into().unwrap_or([0; 4]))
}

struct WavDecoder {
    url: String,
    file: File,
    format: WaveFormat,
    streams: Vec<StreamInfo>,
    data_offset: u64,
    data_len: u64,
    /// Read position relative to `data_offset`, always block aligned.
    position: u64,
}

impl WavDecoder {
    fn open(url: &str) -> MediaResult<Self> {
        let mut file = File::open(url).map_err(|err| MediaError::io(url, err))?;
        let io = |err: std::io::Error| MediaError::io(url, err);

        let mut riff = [0u8; 12];
        file.read_exact(&mut riff)
            .map_err(|_| MediaError::format(url, "file too short for a RIFF header"))?;
        if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Err(MediaError::format(url, "missing RIFF/WAVE signature"));
        }

        let mut format = None;
        let mut data = None;
        loop {
            let mut chunk = [0u8; 8];
            match file.read_exact(&mut chunk) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(io(err)),
            }
            let size = read_u32(&chunk[4..8]) as u64;
            let start = file.stream_position().map_err(io)?;
            match &chunk[0..4] {
                b"fmt " => {
                    if size > MAX_FMT_CHUNK {
                        return Err(MediaError::format(
                            url,
                            format!("fmt chunk of {size} bytes is too large"),
                        ));
                    }
                    let mut payload = vec![0u8; size as usize];
                    file.read_exact(&mut payload)
                        .map_err(|_| MediaError::format(url, "truncated fmt chunk"))?;
                    format = Some(WaveFormat::parse(url, &payload)?);
                }
                b"data" => {
                    let total = file.metadata().map_err(io)?.len();
                    // Streamed files may carry a placeholder size.
                    data = Some((start, size.min(total.saturating_sub(start))));
                }
                _ => {}
            }
            if data.is_some() && format.is_some() {
                break;
            }
            // Chunks are padded to an even length.
            file.seek(SeekFrom::Start(start + size + (size & 1)))
                .map_err(io)?;
        }

        let format = format.ok_or_else(|| MediaError::format(url, "no fmt chunk"))?;
        let (data_offset, data_len) =
            data.ok_or_else(|| MediaError::format(url, "no data chunk"))?;
        let data_len = data_len - data_len % format.block_align as u64;
        let frames = data_len / format.block_align as u64;
        debug!(
            url,
            channels = format.channels,
            rate = format.rate,
            frames,
            "Opened wave stream"
        );
        let streams = vec![StreamInfo::Audio {
            template: format.template(),
            duration: units_to_us(frames, format.rate as i64, 1),
        }];
        Ok(Self {
            url: url.to_string(),
            file,
            format,
            streams,
            data_offset,
            data_len,
            position: 0,
        })
    }
}

impl Decoder for WavDecoder {
    fn url(&self) -> &str {
        &self.url
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_audio_blob(&mut self, stream: usize, size: usize) -> MediaResult<Option<AudioBlob>> {
        if stream != 0 {
            return Err(MediaError::usage(format!(
                "{}: no audio stream with index {stream}",
                self.url
            )));
        }
        if self.position >= self.data_len {
            return Ok(None);
        }
        let align = self.format.block_align as u64;
        let wanted = ((size as u64 / align).max(1) * align).min(self.data_len - self.position);
        self.file
            .seek(SeekFrom::Start(self.data_offset + self.position))
            .map_err(|err| MediaError::io(&self.url, err))?;
        let mut data = vec![0u8; wanted as usize];
        self.file
            .read_exact(&mut data)
            .map_err(|err| MediaError::decode(&self.url, err.to_string()))?;
        let blob = AudioBlob {
            data,
            presentation_time: units_to_us(self.position / align, self.format.rate as i64, 1),
            ..self.format.template()
        };
        self.position += wanted;
        Ok(Some(blob))
    }

    fn seek(&mut self, pos: i64) -> MediaResult<()> {
        let align = self.format.block_align as u64;
        let frame = us_to_units(pos, self.format.rate as i64, 1);
        self.position = (frame * align).min(self.data_len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt_chunk(code: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * bits / 8;
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&code.to_le_bytes());
        chunk.extend_from_slice(&channels.to_le_bytes());
        chunk.extend_from_slice(&rate.to_le_bytes());
        chunk.extend_from_slice(&(rate * align as u32).to_le_bytes());
        chunk.extend_from_slice(&align.to_le_bytes());
        chunk.extend_from_slice(&bits.to_le_bytes());
        chunk
    }

    #[test]
    fn maps_sample_formats() {
        let pcm = WaveFormat::parse("a.wav", &fmt_chunk(1, 2, 48_000, 16)).unwrap();
        assert_eq!(pcm.sample_format, SampleFormat::S16);
        assert_eq!(pcm.block_align, 4);
        let float = WaveFormat::parse("a.wav", &fmt_chunk(3, 1, 44_100, 64)).unwrap();
        assert_eq!(float.sample_format, SampleFormat::D64);
        assert!(WaveFormat::parse("a.wav", &fmt_chunk(1, 2, 48_000, 24)).is_err());
    }

    #[test]
    fn reads_extensible_sub_format() {
        let mut chunk = fmt_chunk(FORMAT_EXTENSIBLE, 2, 48_000, 32);
        chunk.extend_from_slice(&22u16.to_le_bytes());
        chunk.extend_from_slice(&32u16.to_le_bytes());
        chunk.extend_from_slice(&3u32.to_le_bytes());
        chunk.extend_from_slice(&FORMAT_IEEE_FLOAT.to_le_bytes());
        chunk.extend_from_slice(&[0u8; 14]);
        let format = WaveFormat::parse("a.wav", &chunk).unwrap();
        assert_eq!(format.sample_format, SampleFormat::F32);
    }

    #[test]
    fn rejects_oversized_fmt_chunk_before_reading_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge-fmt.wav");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        bytes.extend_from_slice(&fmt_chunk(1, 2, 8_000, 16));
        std::fs::write(&path, bytes).unwrap();

        let url = path.to_str().unwrap();
        let Err(err) = WavDecoder::open(url) else {
            panic!("oversized fmt chunk was accepted");
        };
        assert!(matches!(err, MediaError::Format { .. }), "{err}");
        assert!(err.to_string().contains("too large"), "{err}");
    }
}
